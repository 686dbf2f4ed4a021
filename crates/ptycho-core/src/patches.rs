// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Patch Indexing
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Object pixels covered by each probe placement.
//!
//! A position `(x, y)` anchors the top-left corner of the probe window at
//! `(round(x), round(y))`. Indices are separable: the window of position `b`
//! covers rows `rows[b, 0..S]` and columns `cols[b, 0..T]`, clipped to the
//! object (never wrapped). The sub-pixel remainder is applied to the probe
//! by the Fourier shifter.

use ndarray::{Array2, ArrayView2, Axis};
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct PatchIndices {
    rows: Array2<usize>,
    cols: Array2<usize>,
    fractional: Array2<f64>,
    object_shape: (usize, usize),
}

/// numpy `round`: halves go to the nearest even integer.
#[inline]
pub fn round_half_even(x: f64) -> f64 {
    x.round_ties_even()
}

#[inline]
fn clip_index(anchor: f64, offset: usize, len: usize) -> usize {
    let idx = anchor + offset as f64;
    idx.clamp(0.0, len.saturating_sub(1) as f64) as usize
}

impl PatchIndices {
    /// Index the windows of every row of `positions` ([B, 2], object pixels).
    pub fn compute(
        positions: ArrayView2<'_, f64>,
        object_shape: (usize, usize),
        probe_shape: (usize, usize),
    ) -> Self {
        let batch = positions.nrows();
        let (s, t) = probe_shape;
        let (p, q) = object_shape;

        let mut rows = Array2::zeros((batch, s));
        let mut cols = Array2::zeros((batch, t));
        let mut fractional = Array2::zeros((batch, 2));

        for (b, pos) in positions.rows().into_iter().enumerate() {
            let rx = round_half_even(pos[0]);
            let ry = round_half_even(pos[1]);
            fractional[[b, 0]] = pos[0] - rx;
            fractional[[b, 1]] = pos[1] - ry;
            for i in 0..s {
                rows[[b, i]] = clip_index(rx, i, p);
            }
            for j in 0..t {
                cols[[b, j]] = clip_index(ry, j, q);
            }
        }

        PatchIndices {
            rows,
            cols,
            fractional,
            object_shape,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.rows.nrows()
    }

    pub fn probe_shape(&self) -> (usize, usize) {
        (self.rows.ncols(), self.cols.ncols())
    }

    pub fn object_shape(&self) -> (usize, usize) {
        self.object_shape
    }

    /// Row indices, [B, S].
    pub fn rows(&self) -> &Array2<usize> {
        &self.rows
    }

    /// Column indices, [B, T].
    pub fn cols(&self) -> &Array2<usize> {
        &self.cols
    }

    /// Sub-pixel remainders `position - round(position)`, [B, 2].
    pub fn fractional(&self) -> &Array2<f64> {
        &self.fractional
    }

    /// Indices of a subset of positions, in `batch` order.
    pub fn select(&self, batch: &[usize]) -> PatchIndices {
        PatchIndices {
            rows: self.rows.select(Axis(0), batch),
            cols: self.cols.select(Axis(0), batch),
            fractional: self.fractional.select(Axis(0), batch),
            object_shape: self.object_shape,
        }
    }
}

/// Contiguous `[start, end)` ranges of at most `max_batch` items covering `0..n`.
pub fn batch_ranges(n: usize, max_batch: usize) -> Vec<Range<usize>> {
    let step = max_batch.max(1);
    (0..n)
        .step_by(step)
        .map(|start| start..(start + step).min(n))
        .collect()
}
