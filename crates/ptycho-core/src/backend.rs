// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Array Backends
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Dense-array compute backends.
//!
//! The engine needs four primitives from a backend: batched 2D FFTs over the
//! last two axes, patch gather, patch scatter-add, and a per-position map over
//! `[B, K, S, T]` stacks. `CpuBackend` runs them sequentially,
//! `ParallelBackend` spreads them over the rayon pool. Both produce the same
//! numbers up to floating-point summation order in scatter-add.

use crate::patches::PatchIndices;
use ndarray::{Array, Array2, Array3, Array4, ArrayViewMut3, Axis, Dimension, Zip};
use num_complex::Complex64;
use ptycho_math::fft::{transform_lane, Fft2Plan};
use ptycho_types::config::BackendKind;
use rayon::prelude::*;
use rustfft::{FftDirection, FftPlanner};
use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};

/// Element types the gather/scatter primitives accept.
pub trait Element: Copy + Default + AddAssign + Send + Sync {}

impl<T: Copy + Default + AddAssign + Send + Sync> Element for T {}

pub trait ArrayBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Forward FFT over the last two axes, in place, unnormalized.
    fn fft2<D: Dimension>(&self, data: &mut Array<Complex64, D>);

    /// Inverse FFT over the last two axes, in place, normalized by 1/(S·T).
    fn ifft2<D: Dimension>(&self, data: &mut Array<Complex64, D>);

    /// `out[b, s, t] = source[rows[b, s], cols[b, t]]`.
    fn gather<T: Element>(&self, source: &Array2<T>, indices: &PatchIndices) -> Array3<T>;

    /// `out[rows[b, s], cols[b, t]] += values[b, s, t]` over an object-sized
    /// zero array.
    fn scatter_add<T: Element>(&self, values: &Array3<T>, indices: &PatchIndices) -> Array2<T>;

    /// Call `f(b, frame)` for every `[K, S, T]` frame of a `[B, K, S, T]` stack.
    fn for_each_frame<F>(&self, data: &mut Array4<Complex64>, f: F)
    where
        F: Fn(usize, ArrayViewMut3<'_, Complex64>) + Send + Sync;
}

// ── FFT plan cache ───────────────────────────────────────────────────

type PlanKey = (usize, usize, bool);

/// Planned transforms keyed by frame shape and direction.
#[derive(Default)]
pub struct FftPlanCache {
    plans: Mutex<HashMap<PlanKey, Arc<Fft2Plan>>>,
}

impl fmt::Debug for FftPlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.plans.lock().map(|p| p.len()).unwrap_or(0);
        f.debug_struct("FftPlanCache").field("cached", &cached).finish()
    }
}

impl FftPlanCache {
    pub fn plan(&self, shape: (usize, usize), direction: FftDirection) -> Arc<Fft2Plan> {
        let inverse = matches!(direction, FftDirection::Inverse);
        let key = (shape.0, shape.1, inverse);
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans
            .entry(key)
            .or_insert_with(|| {
                let mut planner = FftPlanner::new();
                Arc::new(Fft2Plan::new(&mut planner, shape, direction))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.plans.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn frame_shape<D: Dimension>(data: &Array<Complex64, D>) -> Option<(usize, usize)> {
    let shape = data.shape();
    let ndim = shape.len();
    if ndim < 2 || data.is_empty() {
        return None;
    }
    Some((shape[ndim - 2], shape[ndim - 1]))
}

// ── Sequential CPU ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CpuBackend {
    cache: FftPlanCache,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn transform<D: Dimension>(&self, data: &mut Array<Complex64, D>, direction: FftDirection) {
        if let Some(shape) = frame_shape(data) {
            self.cache.plan(shape, direction).process(data);
        }
    }
}

impl ArrayBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn fft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        self.transform(data, FftDirection::Forward);
    }

    fn ifft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        self.transform(data, FftDirection::Inverse);
    }

    fn gather<T: Element>(&self, source: &Array2<T>, indices: &PatchIndices) -> Array3<T> {
        let (s, t) = indices.probe_shape();
        let rows = indices.rows();
        let cols = indices.cols();
        Array3::from_shape_fn((indices.batch_size(), s, t), |(b, i, j)| {
            source[[rows[[b, i]], cols[[b, j]]]]
        })
    }

    fn scatter_add<T: Element>(&self, values: &Array3<T>, indices: &PatchIndices) -> Array2<T> {
        let mut out = Array2::from_elem(indices.object_shape(), T::default());
        scatter_into(&mut out, values, indices, 0..indices.batch_size());
        out
    }

    fn for_each_frame<F>(&self, data: &mut Array4<Complex64>, f: F)
    where
        F: Fn(usize, ArrayViewMut3<'_, Complex64>) + Send + Sync,
    {
        for (b, frame) in data.axis_iter_mut(Axis(0)).enumerate() {
            f(b, frame);
        }
    }
}

fn scatter_into<T: Element>(
    out: &mut Array2<T>,
    values: &Array3<T>,
    indices: &PatchIndices,
    batch: std::ops::Range<usize>,
) {
    let rows = indices.rows();
    let cols = indices.cols();
    let (s, t) = indices.probe_shape();
    for b in batch {
        for i in 0..s {
            let r = rows[[b, i]];
            for j in 0..t {
                out[[r, cols[[b, j]]]] += values[[b, i, j]];
            }
        }
    }
}

// ── Rayon-parallel CPU ───────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ParallelBackend {
    cache: FftPlanCache,
}

impl ParallelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn transform<D: Dimension>(&self, data: &mut Array<Complex64, D>, direction: FftDirection) {
        let Some(shape) = frame_shape(data) else {
            return;
        };
        let plan = self.cache.plan(shape, direction);
        let ndim = data.ndim();

        for (axis, fft) in [(ndim - 1, plan.row_fft()), (ndim - 2, plan.col_fft())] {
            Zip::from(data.lanes_mut(Axis(axis)))
                .into_par_iter()
                .for_each_init(
                    || (Vec::new(), Vec::new()),
                    |(buffer, scratch), (lane,)| {
                        transform_lane(&**fft, lane, buffer, scratch);
                    },
                );
        }

        let norm = plan.normalization();
        if norm != 1.0 {
            data.par_mapv_inplace(|v| v * norm);
        }
    }
}

impl ArrayBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn fft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        self.transform(data, FftDirection::Forward);
    }

    fn ifft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        self.transform(data, FftDirection::Inverse);
    }

    fn gather<T: Element>(&self, source: &Array2<T>, indices: &PatchIndices) -> Array3<T> {
        let (s, t) = indices.probe_shape();
        let rows = indices.rows();
        let cols = indices.cols();
        let mut out = Array3::from_elem((indices.batch_size(), s, t), T::default());
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(b, mut patch)| {
                for ((i, j), v) in patch.indexed_iter_mut() {
                    *v = source[[rows[[b, i]], cols[[b, j]]]];
                }
            });
        out
    }

    fn scatter_add<T: Element>(&self, values: &Array3<T>, indices: &PatchIndices) -> Array2<T> {
        let shape = indices.object_shape();
        let batch = indices.batch_size();
        let chunk = batch.div_ceil(rayon::current_num_threads().max(1)).max(1);
        (0..batch)
            .into_par_iter()
            .step_by(chunk)
            .fold(
                || Array2::from_elem(shape, T::default()),
                |mut acc, start| {
                    scatter_into(&mut acc, values, indices, start..(start + chunk).min(batch));
                    acc
                },
            )
            .reduce(
                || Array2::from_elem(shape, T::default()),
                |mut a, b| {
                    a.zip_mut_with(&b, |x, &y| *x += y);
                    a
                },
            )
    }

    fn for_each_frame<F>(&self, data: &mut Array4<Complex64>, f: F)
    where
        F: Fn(usize, ArrayViewMut3<'_, Complex64>) + Send + Sync,
    {
        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(b, frame)| f(b, frame));
    }
}

// ── Selection by configuration ───────────────────────────────────────

/// Backend chosen from `SetupConfig::backend` at construction.
#[derive(Debug)]
pub enum AnyBackend {
    Cpu(CpuBackend),
    Parallel(ParallelBackend),
}

impl AnyBackend {
    pub fn from_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Cpu => AnyBackend::Cpu(CpuBackend::new()),
            BackendKind::Parallel => AnyBackend::Parallel(ParallelBackend::new()),
        }
    }
}

impl ArrayBackend for AnyBackend {
    fn name(&self) -> &'static str {
        match self {
            AnyBackend::Cpu(b) => b.name(),
            AnyBackend::Parallel(b) => b.name(),
        }
    }

    fn fft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        match self {
            AnyBackend::Cpu(b) => b.fft2(data),
            AnyBackend::Parallel(b) => b.fft2(data),
        }
    }

    fn ifft2<D: Dimension>(&self, data: &mut Array<Complex64, D>) {
        match self {
            AnyBackend::Cpu(b) => b.ifft2(data),
            AnyBackend::Parallel(b) => b.ifft2(data),
        }
    }

    fn gather<T: Element>(&self, source: &Array2<T>, indices: &PatchIndices) -> Array3<T> {
        match self {
            AnyBackend::Cpu(b) => b.gather(source, indices),
            AnyBackend::Parallel(b) => b.gather(source, indices),
        }
    }

    fn scatter_add<T: Element>(&self, values: &Array3<T>, indices: &PatchIndices) -> Array2<T> {
        match self {
            AnyBackend::Cpu(b) => b.scatter_add(values, indices),
            AnyBackend::Parallel(b) => b.scatter_add(values, indices),
        }
    }

    fn for_each_frame<F>(&self, data: &mut Array4<Complex64>, f: F)
    where
        F: Fn(usize, ArrayViewMut3<'_, Complex64>) + Send + Sync,
    {
        match self {
            AnyBackend::Cpu(b) => b.for_each_frame(data, f),
            AnyBackend::Parallel(b) => b.for_each_frame(data, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn indices() -> PatchIndices {
        let positions = array![[0.0, 0.0], [1.0, 2.0], [3.0, 1.0], [2.0, 2.0]];
        PatchIndices::compute(positions.view(), (6, 6), (3, 3))
    }

    fn stack() -> Array4<Complex64> {
        Array4::from_shape_fn((3, 2, 8, 6), |(b, k, i, j)| {
            Complex64::new((b + i) as f64 * 0.3, (k * j) as f64 - 0.5)
        })
    }

    #[test]
    fn test_backends_agree_on_fft() {
        let mut a = stack();
        let mut b = stack();
        CpuBackend::new().fft2(&mut a);
        ParallelBackend::new().fft2(&mut b);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-10);
        }
        ParallelBackend::new().ifft2(&mut b);
        for (x, y) in b.iter().zip(stack().iter()) {
            assert!((x - y).norm() < 1e-10, "parallel roundtrip failed");
        }
    }

    #[test]
    fn test_gather_scatter_agree() {
        let idx = indices();
        let source = Array2::from_shape_fn((6, 6), |(i, j)| (i * 6 + j) as f64);
        let cpu = CpuBackend::new();
        let par = ParallelBackend::new();
        let ga = cpu.gather(&source, &idx);
        let gb = par.gather(&source, &idx);
        assert_eq!(ga, gb);
        assert_eq!(ga[[1, 0, 0]], source[[1, 2]]);

        let sa = cpu.scatter_add(&ga, &idx);
        let sb = par.scatter_add(&gb, &idx);
        for (x, y) in sa.iter().zip(sb.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_scatter_counts_coverage() {
        let idx = indices();
        let ones = Array3::from_elem((4, 3, 3), 1.0f64);
        let coverage = CpuBackend::new().scatter_add(&ones, &idx);
        assert_eq!(coverage.sum(), 36.0);
        // (0,0) covered only by the first window
        assert_eq!(coverage[[0, 0]], 1.0);
        // (2,2) covered by windows at (0,0), (1,2) and (2,2)
        assert_eq!(coverage[[2, 2]], 3.0);
    }

    #[test]
    fn test_plan_cache_reuses_plans() {
        let backend = CpuBackend::new();
        let mut a = stack();
        backend.fft2(&mut a);
        backend.fft2(&mut a);
        backend.ifft2(&mut a);
        assert_eq!(backend.cache.len(), 2);
    }

    #[test]
    fn test_any_backend_dispatch() {
        assert_eq!(AnyBackend::from_kind(BackendKind::Cpu).name(), "cpu");
        assert_eq!(AnyBackend::from_kind(BackendKind::Parallel).name(), "parallel");
    }
}
