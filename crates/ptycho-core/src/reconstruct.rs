// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Reconstruction Loop
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Iterative ptychographic reconstruction.
//!
//! The engine owns object, probe and positions. Each iteration walks the
//! scan in contiguous batches of a (possibly shuffled) order:
//!
//! ```text
//! overlap → Fourier constraint → adjoint update → constraint pipeline
//! ```
//!
//! Every batch of one iteration shares the same [`IterationGates`]. The
//! reported iteration error is the error of the last batch.

use crate::adjoint::{gradient_descent_update, position_correction, projection_sets_update, AdjointParams};
use crate::backend::{AnyBackend, ArrayBackend};
use crate::constraints::{fourier_amplitude, ConstraintPipeline};
use crate::fourier::FourierStrategy;
use crate::model::{object_shape_for, ObjectModel};
use crate::overlap::OverlapModel;
use crate::patches::{batch_ranges, PatchIndices};
use crate::preprocess::DiffractionData;
use crate::probe::{initialize_probe, ProbeGuess};
use ndarray::{Array2, Array3, Array4, Axis};
use num_complex::Complex64;
use ptycho_types::config::{ReconstructionConfig, SetupConfig};
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::{
    mean_position, IterationReport, IterationSnapshot, LoopPhase, ReconstructionResult,
    ReconstructionState,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which parts of the update are active at one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationGates {
    pub fix_probe: bool,
    pub fix_com: bool,
    pub gaussian_blur: bool,
    pub pure_phase_object: bool,
    pub butterworth: bool,
    pub tv_denoise: bool,
    pub fix_probe_fourier_amplitude: bool,
    pub fix_positions: bool,
}

impl IterationGates {
    pub fn at(iteration: usize, config: &ReconstructionConfig, strategy: &FourierStrategy) -> Self {
        let before = |limit: Option<usize>| limit.map_or(true, |n| iteration < n);
        let fix_probe = iteration < config.fix_probe_iter;
        IterationGates {
            fix_probe,
            fix_com: config.fix_com && !fix_probe,
            gaussian_blur: config.gaussian_blur_sigma.is_some() && before(config.gaussian_blur_iter),
            pure_phase_object: iteration < config.pure_phase_object_iter,
            butterworth: config.butterworth.as_ref().is_some_and(|bw| before(bw.iterations)),
            tv_denoise: config.tv_denoise.as_ref().is_some_and(|tv| before(tv.iterations)),
            fix_probe_fourier_amplitude: iteration < config.fix_probe_fourier_amplitude_iter,
            // projection methods never refine positions
            fix_positions: strategy.uses_projection_scheme()
                || config.fix_positions_iter.map_or(true, |n| iteration < n),
        }
    }
}

/// Mutable bookkeeping threaded through one run.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Projection-sets exit-wave iterate per scan position, [N, K, S, T].
    pub exit_waves: Option<Array4<Complex64>>,
    /// Windows of every scan position.
    pub indices: PatchIndices,
    /// Visiting order of scan positions.
    pub order: Vec<usize>,
}

impl LoopState {
    pub fn new(
        positions: &Array2<f64>,
        object_shape: (usize, usize),
        probe_shape: (usize, usize),
        exit_waves: Option<Array4<Complex64>>,
    ) -> Self {
        LoopState {
            exit_waves,
            indices: PatchIndices::compute(positions.view(), object_shape, probe_shape),
            order: (0..positions.nrows()).collect(),
        }
    }

    pub fn refresh_indices(&mut self, positions: &Array2<f64>) {
        self.indices = PatchIndices::compute(
            positions.view(),
            self.indices.object_shape(),
            self.indices.probe_shape(),
        );
    }
}

/// Read-only inputs of one batch step.
#[derive(Debug)]
pub struct BatchContext<'a, B: ArrayBackend> {
    pub backend: &'a B,
    pub overlap_model: &'a OverlapModel,
    pub strategy: &'a FourierStrategy,
    pub pipeline: &'a ConstraintPipeline,
    pub data: &'a DiffractionData,
    pub config: &'a ReconstructionConfig,
}

/// One batch: overlap, Fourier constraint, adjoint update, constraints.
/// Returns the batch error.
pub fn step_batch<B: ArrayBackend>(
    ctx: &BatchContext<'_, B>,
    state: &mut ReconstructionState,
    loop_state: &mut LoopState,
    batch: &[usize],
    gates: &IterationGates,
) -> f64 {
    let backend = ctx.backend;
    let model = ctx.overlap_model.object_model();
    let config = ctx.config;

    let indices = loop_state.indices.select(batch);
    let amplitudes = ctx.data.amplitudes().select(Axis(0), batch);
    let overlap = ctx
        .overlap_model
        .project(backend, &state.object, &state.probe, &indices);

    let previous = loop_state
        .exit_waves
        .as_ref()
        .map(|waves| waves.select(Axis(0), batch));
    let output = ctx.strategy.apply(
        backend,
        &amplitudes,
        &overlap.overlap,
        previous.as_ref(),
        ctx.data.mean_diffraction_intensity(),
    );

    let params = AdjointParams {
        step_size: config.step_size,
        normalization_min: config.normalization_min,
        fix_probe: gates.fix_probe,
    };

    let mut positions_moved = false;
    match ctx.strategy {
        FourierStrategy::GradientDescent => {
            if !gates.fix_positions {
                let displacement =
                    position_correction(backend, model, &state.object, &overlap, &output.exit_wave, &indices);
                for (b, &n) in batch.iter().enumerate() {
                    state.positions[[n, 0]] += config.positions_step_size * displacement[[b, 0]];
                    state.positions[[n, 1]] += config.positions_step_size * displacement[[b, 1]];
                }
                positions_moved = true;
            }
            gradient_descent_update(
                backend,
                model,
                &mut state.object,
                &mut state.probe,
                &overlap,
                &output.exit_wave,
                &indices,
                params,
            );
        }
        FourierStrategy::ProjectionSets(_) => {
            let cache = loop_state
                .exit_waves
                .get_or_insert_with(|| {
                    let (_, k, s, t) = output.exit_wave.dim();
                    Array4::zeros((state.positions.nrows(), k, s, t))
                });
            for (b, &n) in batch.iter().enumerate() {
                cache
                    .index_axis_mut(Axis(0), n)
                    .assign(&output.exit_wave.index_axis(Axis(0), b));
            }
            projection_sets_update(
                backend,
                model,
                &mut state.object,
                &mut state.probe,
                &overlap,
                &output.exit_wave,
                &indices,
                params,
            );
        }
    }

    positions_moved |= ctx.pipeline.apply(state, gates);
    if positions_moved {
        loop_state.refresh_indices(&state.positions);
    }
    output.error
}

/// Iterative ptychographic reconstruction engine.
#[derive(Debug)]
pub struct PtychographicEngine<B: ArrayBackend> {
    backend: B,
    setup: SetupConfig,
    model: ObjectModel,
    overlap_model: OverlapModel,
    data: DiffractionData,
    state: ReconstructionState,
    initial: ReconstructionState,
    initial_fourier_amplitude: Array3<f64>,
    positions_reference: [f64; 2],
    exit_waves: Option<Array4<Complex64>>,
    error: Option<f64>,
    phase: LoopPhase,
}

impl PtychographicEngine<AnyBackend> {
    /// Build with the backend named in `setup.backend`.
    pub fn from_setup(
        setup: SetupConfig,
        data: DiffractionData,
        positions: Array2<f64>,
        probe_guess: ProbeGuess,
        object_guess: Option<Array2<Complex64>>,
    ) -> PtychoResult<Self> {
        let backend = AnyBackend::from_kind(setup.backend);
        Self::new(setup, data, positions, probe_guess, object_guess, backend)
    }
}

impl<B: ArrayBackend> PtychographicEngine<B> {
    /// `positions` are in object pixels, [N, 2], one row per pattern.
    pub fn new(
        setup: SetupConfig,
        data: DiffractionData,
        positions: Array2<f64>,
        probe_guess: ProbeGuess,
        object_guess: Option<Array2<Complex64>>,
        backend: B,
    ) -> PtychoResult<Self> {
        setup.validate()?;

        let n = data.num_patterns();
        if positions.dim() != (n, 2) {
            return Err(PtychoError::ShapeMismatch {
                what: "scan positions",
                expected: vec![n, 2],
                found: positions.shape().to_vec(),
            });
        }
        if positions.iter().any(|p| !p.is_finite()) {
            return Err(PtychoError::ConfigError(
                "scan positions must be finite".to_string(),
            ));
        }

        let probe_shape = data.pattern_shape();
        let mut rng = match setup.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let probe = initialize_probe(
            &probe_guess,
            probe_shape,
            setup.num_probe_modes,
            data.mean_diffraction_intensity(),
            &mut rng,
        )?;

        let model = ObjectModel::from(setup.object_type);
        let object = match object_guess {
            Some(object) => {
                let (p, q) = object.dim();
                if p < probe_shape.0 || q < probe_shape.1 {
                    return Err(PtychoError::ShapeMismatch {
                        what: "object guess",
                        expected: vec![probe_shape.0, probe_shape.1],
                        found: vec![p, q],
                    });
                }
                object
            }
            None => model.initialize_object(object_shape_for(
                &positions,
                probe_shape,
                setup.object_padding_px,
            )),
        };

        let state = ReconstructionState {
            object,
            probe,
            positions,
        };
        info!(
            object = ?state.object_shape(),
            probe = ?probe_shape,
            modes = state.num_probe_modes(),
            patterns = n,
            object_type = ?setup.object_type,
            backend = backend.name(),
            "ptychographic engine initialized"
        );

        Ok(PtychographicEngine {
            initial_fourier_amplitude: fourier_amplitude(&state.probe),
            positions_reference: mean_position(&state.positions),
            overlap_model: OverlapModel::new(model, probe_shape),
            initial: state.clone(),
            state,
            backend,
            setup,
            model,
            data,
            exit_waves: None,
            error: None,
            phase: LoopPhase::Initializing,
        })
    }

    pub fn reconstruct(&mut self, config: &ReconstructionConfig) -> PtychoResult<ReconstructionResult> {
        self.reconstruct_with(config, |_| ControlFlow::Continue(()))
    }

    /// Run `config.max_iter` iterations. `observer` sees every iteration
    /// report and may stop the run between iterations.
    ///
    /// The configuration is validated before any state is touched.
    pub fn reconstruct_with<F>(
        &mut self,
        config: &ReconstructionConfig,
        mut observer: F,
    ) -> PtychoResult<ReconstructionResult>
    where
        F: FnMut(&IterationReport) -> ControlFlow<()>,
    {
        config.validate()?;
        let strategy = FourierStrategy::from_method(
            config.reconstruction_method,
            config.reconstruction_parameter,
        )?;

        let started = Instant::now();
        self.phase = LoopPhase::Initializing;
        if config.reset {
            self.reset();
        } else if self.error.is_some() {
            warn!("continuing reconstruction from previous result; set reset for a fresh start");
        }

        let n = self.data.num_patterns();
        let batch_size = config.max_batch_size.unwrap_or(n).clamp(1, n.max(1));
        let batches = batch_ranges(n, batch_size);
        let mut rng = match config.seed.or(self.setup.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let pipeline = ConstraintPipeline::new(
            self.model,
            config,
            self.setup.sampling,
            self.state.object_shape(),
            self.state.probe_shape(),
            self.initial_fourier_amplitude.clone(),
            self.positions_reference,
            self.initial.positions.clone(),
        );
        let exit_waves = if strategy.uses_projection_scheme() {
            self.exit_waves.take()
        } else {
            None
        };
        let mut loop_state = LoopState::new(
            &self.state.positions,
            self.state.object_shape(),
            self.state.probe_shape(),
            exit_waves,
        );

        info!(
            method = %config.reconstruction_method,
            alpha = config.reconstruction_parameter,
            max_iter = config.max_iter,
            batch_size,
            num_batches = batches.len(),
            "starting reconstruction"
        );

        let ctx = BatchContext {
            backend: &self.backend,
            overlap_model: &self.overlap_model,
            strategy: &strategy,
            pipeline: &pipeline,
            data: &self.data,
            config,
        };

        let mut error_history = Vec::with_capacity(config.max_iter);
        let mut snapshots = Vec::new();
        let mut error = self.error.unwrap_or(f64::NAN);
        let mut phase = LoopPhase::Completed;

        for iteration in 0..config.max_iter {
            self.phase = LoopPhase::Iterating { iteration };
            let gates = IterationGates::at(iteration, config, &strategy);
            if batch_size < n {
                loop_state.order.shuffle(&mut rng);
            }

            for range in &batches {
                let batch = loop_state.order[range.clone()].to_vec();
                error = step_batch(&ctx, &mut self.state, &mut loop_state, &batch, &gates);
            }

            error_history.push(error);
            if config.store_iterations {
                snapshots.push(IterationSnapshot {
                    iteration,
                    object: self.state.object.clone(),
                    probe: self.state.probe.clone(),
                    error,
                });
            }
            debug!(iteration, error, "iteration complete");

            let report = IterationReport {
                iteration,
                max_iter: config.max_iter,
                error,
                num_batches: batches.len(),
            };
            if observer(&report).is_break() {
                info!(iteration, "reconstruction stopped by observer");
                phase = LoopPhase::Stopped { iteration };
                break;
            }
        }

        self.exit_waves = loop_state.exit_waves;
        self.error = Some(error);
        self.phase = phase;

        let solve_time_ms = started.elapsed().as_secs_f64() * 1e3;
        info!(error, iterations = error_history.len(), solve_time_ms, "reconstruction finished");

        Ok(ReconstructionResult {
            object: self.state.object.clone(),
            probe: self.state.probe.clone(),
            positions: self.state.positions.clone(),
            error,
            iterations: error_history.len(),
            error_history,
            snapshots,
            phase,
            solve_time_ms,
        })
    }

    /// Restore the initial object, probe and positions and drop cached exit
    /// waves.
    pub fn reset(&mut self) {
        self.state = self.initial.clone();
        self.exit_waves = None;
        self.error = None;
        self.phase = LoopPhase::Initializing;
    }

    pub fn state(&self) -> &ReconstructionState {
        &self.state
    }

    pub fn initial_state(&self) -> &ReconstructionState {
        &self.initial
    }

    pub fn object(&self) -> &Array2<Complex64> {
        &self.state.object
    }

    pub fn probe(&self) -> &Array3<Complex64> {
        &self.state.probe
    }

    pub fn positions(&self) -> &Array2<f64> {
        &self.state.positions
    }

    /// Centered Fourier magnitude of the object's phase (or potential).
    pub fn object_fft(&self) -> Array2<f64> {
        self.model.project_fft(&self.state.object)
    }

    pub fn object_model(&self) -> ObjectModel {
        self.model
    }

    pub fn data(&self) -> &DiffractionData {
        &self.data
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn setup(&self) -> &SetupConfig {
        &self.setup
    }

    /// Last reported error, `None` before the first run.
    pub fn error(&self) -> Option<f64> {
        self.error
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use ndarray::array;
    use ptycho_types::config::{ButterworthConfig, ReconstructionMethod};

    fn small_engine() -> PtychographicEngine<CpuBackend> {
        let amplitudes = Array3::from_elem((4, 8, 8), 1.0);
        let data = DiffractionData::from_amplitudes(amplitudes, None).unwrap();
        let positions = array![[0.0, 0.0], [0.0, 4.0], [4.0, 0.0], [4.0, 4.0]];
        let setup = SetupConfig {
            seed: Some(1),
            ..Default::default()
        };
        let guess = ProbeGuess::Array(Array2::from_elem((8, 8), Complex64::new(1.0, 0.0)));
        PtychographicEngine::new(setup, data, positions, guess, None, CpuBackend::new()).unwrap()
    }

    #[test]
    fn test_gates() {
        let config = ReconstructionConfig {
            fix_probe_iter: 2,
            fix_positions_iter: Some(3),
            gaussian_blur_sigma: Some(1.0),
            gaussian_blur_iter: Some(1),
            butterworth: Some(ButterworthConfig {
                q_lowpass: Some(0.2),
                q_highpass: None,
                order: 2.0,
                iterations: None,
            }),
            ..Default::default()
        };
        let gd = FourierStrategy::GradientDescent;
        let g0 = IterationGates::at(0, &config, &gd);
        assert!(g0.fix_probe && !g0.fix_com && g0.gaussian_blur && g0.fix_positions);
        assert!(g0.butterworth && !g0.tv_denoise);
        let g3 = IterationGates::at(3, &config, &gd);
        assert!(!g3.fix_probe && g3.fix_com && !g3.gaussian_blur && !g3.fix_positions);

        let dm = FourierStrategy::from_method(ReconstructionMethod::DifferenceMap, 0.5).unwrap();
        assert!(IterationGates::at(10, &config, &dm).fix_positions);
    }

    #[test]
    fn test_default_object_covers_scan() {
        let engine = small_engine();
        assert_eq!(engine.object().dim(), (12, 12));
        assert_eq!(engine.probe().dim(), (1, 8, 8));
        assert_eq!(engine.phase(), LoopPhase::Initializing);
        assert!(engine.error().is_none());
    }

    #[test]
    fn test_position_count_mismatch_rejected() {
        let data = DiffractionData::from_amplitudes(Array3::from_elem((3, 4, 4), 1.0), None).unwrap();
        let guess = ProbeGuess::Array(Array2::from_elem((4, 4), Complex64::new(1.0, 0.0)));
        let err = PtychographicEngine::new(
            SetupConfig::default(),
            data,
            Array2::zeros((2, 2)),
            guess,
            None,
            CpuBackend::new(),
        );
        assert!(matches!(err, Err(PtychoError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_error_history_length_and_phase() {
        let mut engine = small_engine();
        let config = ReconstructionConfig {
            max_iter: 3,
            ..Default::default()
        };
        let result = engine.reconstruct(&config).unwrap();
        assert_eq!(result.error_history.len(), 3);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.phase, LoopPhase::Completed);
        assert_eq!(engine.error(), Some(result.error));
    }

    #[test]
    fn test_observer_stops_between_iterations() {
        let mut engine = small_engine();
        let config = ReconstructionConfig {
            max_iter: 10,
            ..Default::default()
        };
        let result = engine
            .reconstruct_with(&config, |report| {
                if report.iteration == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(result.iterations, 2);
        assert_eq!(result.phase, LoopPhase::Stopped { iteration: 1 });
        assert!(result.stopped_early());
    }

    #[test]
    fn test_exit_waves_cached_for_projection_only() {
        let mut engine = small_engine();
        let gd = ReconstructionConfig {
            max_iter: 1,
            ..Default::default()
        };
        engine.reconstruct(&gd).unwrap();
        assert!(engine.exit_waves.is_none());

        let raar = ReconstructionConfig {
            reconstruction_method: ReconstructionMethod::Raar,
            reconstruction_parameter: 0.5,
            max_iter: 1,
            reset: true,
            ..Default::default()
        };
        engine.reconstruct(&raar).unwrap();
        assert_eq!(engine.exit_waves.as_ref().map(|w| w.dim()), Some((4, 1, 8, 8)));
        engine.reset();
        assert!(engine.exit_waves.is_none());
    }
}
