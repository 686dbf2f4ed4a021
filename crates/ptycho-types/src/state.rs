// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use ndarray::{Array2, Array3};
use num_complex::Complex64;

/// Object, probe and scan positions owned by the reconstruction loop.
///
/// Object: [P, Q]. Potential objects keep V in the real part, imag = 0.
/// Probe: [K, S, T] mixed-state modes sharing positions.
/// Positions: [N, 2] in object pixels, column 0 indexes rows.
#[derive(Debug, Clone)]
pub struct ReconstructionState {
    pub object: Array2<Complex64>,
    pub probe: Array3<Complex64>,
    pub positions: Array2<f64>,
}

impl ReconstructionState {
    pub fn object_shape(&self) -> (usize, usize) {
        self.object.dim()
    }

    /// Probe window (S, T).
    pub fn probe_shape(&self) -> (usize, usize) {
        let (_, s, t) = self.probe.dim();
        (s, t)
    }

    pub fn num_probe_modes(&self) -> usize {
        self.probe.dim().0
    }

    pub fn num_positions(&self) -> usize {
        self.positions.nrows()
    }

    /// Mean scan position (row, col).
    pub fn positions_center_of_mass(&self) -> [f64; 2] {
        mean_position(&self.positions)
    }
}

/// Mean of an [N, 2] position array. Zero for an empty array.
pub fn mean_position(positions: &Array2<f64>) -> [f64; 2] {
    let n = positions.nrows();
    if n == 0 {
        return [0.0, 0.0];
    }
    let mut sum = [0.0, 0.0];
    for row in positions.rows() {
        sum[0] += row[0];
        sum[1] += row[1];
    }
    [sum[0] / n as f64, sum[1] / n as f64]
}

/// Per-iteration archive entry, kept when snapshotting is enabled.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub object: Array2<Complex64>,
    pub probe: Array3<Complex64>,
    pub error: f64,
}

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Initializing,
    Iterating { iteration: usize },
    Completed,
    Stopped { iteration: usize },
}

/// Passed to run observers after each iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationReport {
    pub iteration: usize,
    pub max_iter: usize,
    /// Error of the last batch of the iteration.
    pub error: f64,
    pub num_batches: usize,
}

/// Outcome of one reconstruction run.
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    pub object: Array2<Complex64>,
    pub probe: Array3<Complex64>,
    pub positions: Array2<f64>,
    /// Error of the final iteration.
    pub error: f64,
    pub error_history: Vec<f64>,
    pub snapshots: Vec<IterationSnapshot>,
    pub iterations: usize,
    pub phase: LoopPhase,
    pub solve_time_ms: f64,
}

impl ReconstructionResult {
    pub fn stopped_early(&self) -> bool {
        matches!(self.phase, LoopPhase::Stopped { .. })
    }
}
