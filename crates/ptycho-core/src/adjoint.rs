// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Adjoint Update
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Object/probe updates from the exit-wave correction.
//!
//! Gradient descent accumulates a normalized step into the current object
//! and probe. Projection sets replace them with the normalized back-projection
//! of the exit-wave iterate. Every denominator carries `NORMALIZATION_EPS`.

use crate::backend::ArrayBackend;
use crate::model::ObjectModel;
use crate::overlap::Overlap;
use crate::patches::PatchIndices;
use ndarray::{Array2, Array3, Array4, Axis, Zip};
use num_complex::Complex64;
use ptycho_types::constants::NORMALIZATION_EPS;

/// Scalars shared by both update schemes.
#[derive(Debug, Clone, Copy)]
pub struct AdjointParams {
    pub step_size: f64,
    pub normalization_min: f64,
    pub fix_probe: bool,
}

/// `Σ_k conj(p_bk) · w_bk` → [B, S, T].
fn probe_weighted(shifted_probes: &Array4<Complex64>, waves: &Array4<Complex64>) -> Array3<Complex64> {
    let mut out = Array3::zeros((waves.dim().0, waves.dim().2, waves.dim().3));
    for k in 0..waves.dim().1 {
        let p = shifted_probes.index_axis(Axis(1), k);
        let w = waves.index_axis(Axis(1), k);
        Zip::from(&mut out)
            .and(&p)
            .and(&w)
            .for_each(|o, &p, &w| *o += p.conj() * w);
    }
    out
}

/// `Σ_k |p_bk|²` → [B, S, T].
fn probe_intensity(shifted_probes: &Array4<Complex64>) -> Array3<f64> {
    let (b, _, s, t) = shifted_probes.dim();
    let mut out = Array3::zeros((b, s, t));
    for mode in shifted_probes.axis_iter(Axis(1)) {
        Zip::from(&mut out).and(&mode).for_each(|o, p| *o += p.norm_sqr());
    }
    out
}

fn max_of<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    values.into_iter().cloned().fold(0.0, f64::max)
}

/// `Σ_b conj(o_b) · w_bk` → [K, S, T].
fn object_weighted(patches: &Array3<Complex64>, waves: &Array4<Complex64>) -> Array3<Complex64> {
    let (_, k, s, t) = waves.dim();
    let mut out = Array3::zeros((k, s, t));
    for (modes, patch) in waves.outer_iter().zip(patches.outer_iter()) {
        for (mut acc, mode) in out.outer_iter_mut().zip(modes.outer_iter()) {
            Zip::from(&mut acc)
                .and(&patch)
                .and(&mode)
                .for_each(|a, &o, &w| *a += o.conj() * w);
        }
    }
    out
}

/// GD denominator: `1 / (ε + scatter(nm·I + (1 - nm)·max I))`, `I = Σ_k|p_k|²`.
pub fn gradient_probe_normalization<B: ArrayBackend>(
    backend: &B,
    shifted_probes: &Array4<Complex64>,
    indices: &PatchIndices,
    normalization_min: f64,
) -> Array2<f64> {
    let mut intensity = probe_intensity(shifted_probes);
    let max = max_of(intensity.iter());
    let nm = normalization_min;
    intensity.mapv_inplace(|v| nm * v + (1.0 - nm) * max);
    backend
        .scatter_add(&intensity, indices)
        .mapv(|n| 1.0 / (NORMALIZATION_EPS + n))
}

/// Projection denominator: `1 / (ε + sqrt(n² + (nm·max n)²))`,
/// `n = scatter(Σ_k|p_k|²)`.
pub fn projection_probe_normalization<B: ArrayBackend>(
    backend: &B,
    shifted_probes: &Array4<Complex64>,
    indices: &PatchIndices,
    normalization_min: f64,
) -> Array2<f64> {
    let n = backend.scatter_add(&probe_intensity(shifted_probes), indices);
    let floor = normalization_min * max_of(n.iter());
    n.mapv(|v| 1.0 / (NORMALIZATION_EPS + (v * v + floor * floor).sqrt()))
}

/// Gradient-descent update, in place.
///
/// `correction` is `Δ = P_F(overlap) - overlap` ([B, K, S, T]).
#[allow(clippy::too_many_arguments)]
pub fn gradient_descent_update<B: ArrayBackend>(
    backend: &B,
    model: ObjectModel,
    object: &mut Array2<Complex64>,
    probe: &mut Array3<Complex64>,
    overlap: &Overlap,
    correction: &Array4<Complex64>,
    indices: &PatchIndices,
    params: AdjointParams,
) {
    let nm = params.normalization_min;
    let step = params.step_size;

    let norm = gradient_probe_normalization(backend, &overlap.shifted_probes, indices, nm);
    let weighted = probe_weighted(&overlap.shifted_probes, correction);
    let gradient = model.object_gradient(&overlap.object_patches, weighted);
    let update = backend.scatter_add(&gradient, indices);
    Zip::from(&mut *object)
        .and(&update)
        .and(&norm)
        .for_each(|o, &u, &n| *o += u * (step * n));

    if params.fix_probe {
        return;
    }

    let patches = &overlap.object_patches;
    let max = max_of(patches.mapv(|o| o.norm_sqr()).iter());
    let mut denom = Array2::<f64>::zeros((patches.dim().1, patches.dim().2));
    for patch in patches.outer_iter() {
        Zip::from(&mut denom)
            .and(&patch)
            .for_each(|d, o| *d += nm * o.norm_sqr() + (1.0 - nm) * max);
    }
    let probe_update = object_weighted(patches, correction);
    for (mut mode, upd) in probe.outer_iter_mut().zip(probe_update.outer_iter()) {
        Zip::from(&mut mode)
            .and(&upd)
            .and(&denom)
            .for_each(|p, &u, &d| *p += u * (step / (NORMALIZATION_EPS + d)));
    }
}

/// Projection-sets update: object and probe are replaced by the normalized
/// back-projection of `exit_wave` ([B, K, S, T]).
#[allow(clippy::too_many_arguments)]
pub fn projection_sets_update<B: ArrayBackend>(
    backend: &B,
    model: ObjectModel,
    object: &mut Array2<Complex64>,
    probe: &mut Array3<Complex64>,
    overlap: &Overlap,
    exit_wave: &Array4<Complex64>,
    indices: &PatchIndices,
    params: AdjointParams,
) {
    let nm = params.normalization_min;

    let norm = projection_probe_normalization(backend, &overlap.shifted_probes, indices, nm);
    let weighted = probe_weighted(&overlap.shifted_probes, exit_wave);
    let mut estimate = backend.scatter_add(&weighted, indices);
    Zip::from(&mut estimate).and(&norm).for_each(|o, &n| *o *= n);
    *object = model.from_estimate(estimate);

    if params.fix_probe {
        return;
    }

    let patches = &overlap.object_patches;
    let mut m = Array2::<f64>::zeros((patches.dim().1, patches.dim().2));
    for patch in patches.outer_iter() {
        Zip::from(&mut m).and(&patch).for_each(|d, o| *d += o.norm_sqr());
    }
    let floor = nm * max_of(m.iter());
    let mut updated = object_weighted(patches, exit_wave);
    for mut mode in updated.outer_iter_mut() {
        Zip::from(&mut mode).and(&m).for_each(|p, &v| {
            *p *= 1.0 / (NORMALIZATION_EPS + (v * v + floor * floor).sqrt());
        });
    }
    *probe = updated;
}

/// Per-position displacement estimate ([B, 2]) from central-difference
/// object gradients:
/// `Σ Re(conj(∂ψ)·Δ) / Σ|∂ψ|²` along rows and columns, `∂ψ = ∂t · p`.
pub fn position_correction<B: ArrayBackend>(
    backend: &B,
    model: ObjectModel,
    object: &Array2<Complex64>,
    overlap: &Overlap,
    correction: &Array4<Complex64>,
    indices: &PatchIndices,
) -> Array2<f64> {
    let transmission = model.transmission_field(object);
    let (p, q) = transmission.dim();
    let d_rows = Array2::from_shape_fn((p, q), |(i, j)| {
        (transmission[[(i + 1) % p, j]] - transmission[[(i + p - 1) % p, j]]) * 0.5
    });
    let d_cols = Array2::from_shape_fn((p, q), |(i, j)| {
        (transmission[[i, (j + 1) % q]] - transmission[[i, (j + q - 1) % q]]) * 0.5
    });

    let batch = indices.batch_size();
    let mut displacement = Array2::zeros((batch, 2));
    for (axis, derivative) in [d_rows, d_cols].iter().enumerate() {
        let patches = backend.gather(derivative, indices);
        for b in 0..batch {
            let mut num = 0.0;
            let mut den = 0.0;
            let patch = patches.index_axis(Axis(0), b);
            let probes = overlap.shifted_probes.index_axis(Axis(0), b);
            let delta = correction.index_axis(Axis(0), b);
            for (mode, dmode) in probes.outer_iter().zip(delta.outer_iter()) {
                Zip::from(&patch)
                    .and(&mode)
                    .and(&dmode)
                    .for_each(|&dt, &pr, &d| {
                        let dpsi = dt * pr;
                        num += (dpsi.conj() * d).re;
                        den += dpsi.norm_sqr();
                    });
            }
            displacement[[b, axis]] = num / (NORMALIZATION_EPS + den);
        }
    }
    displacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::overlap::OverlapModel;
    use ndarray::array;

    fn setup() -> (CpuBackend, OverlapModel, PatchIndices) {
        let positions = array![[0.0, 0.0], [2.0, 2.0], [4.0, 1.0]];
        let idx = PatchIndices::compute(positions.view(), (10, 10), (4, 4));
        (CpuBackend::new(), OverlapModel::new(ObjectModel::Complex, (4, 4)), idx)
    }

    #[test]
    fn test_normalization_finite_for_zero_probe() {
        let (backend, model, idx) = setup();
        let object = Array2::from_elem((10, 10), Complex64::new(1.0, 0.0));
        let probe = Array3::zeros((1, 4, 4));
        let ov = model.project(&backend, &object, &probe, &idx);

        let gd = gradient_probe_normalization(&backend, &ov.shifted_probes, &idx, 0.01);
        assert!(gd.iter().all(|v| v.is_finite()));
        let ps = projection_probe_normalization(&backend, &ov.shifted_probes, &idx, 0.01);
        assert!(ps.iter().all(|v| v.is_finite()));

        let mut obj = object.clone();
        let mut pr = probe.clone();
        let correction = Array4::from_elem((3, 1, 4, 4), Complex64::new(0.3, 0.1));
        let params = AdjointParams {
            step_size: 0.9,
            normalization_min: 0.01,
            fix_probe: false,
        };
        gradient_descent_update(
            &backend, ObjectModel::Complex, &mut obj, &mut pr, &ov, &correction, &idx, params,
        );
        assert!(obj.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        assert!(pr.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        // zero probe: no object change anywhere
        for (a, b) in obj.iter().zip(object.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_zero_correction_leaves_state() {
        let (backend, model, idx) = setup();
        let object = Array2::from_shape_fn((10, 10), |(i, j)| {
            Complex64::from_polar(1.0, 0.1 * (i as f64) - 0.05 * j as f64)
        });
        let probe = Array3::from_elem((1, 4, 4), Complex64::new(0.5, 0.2));
        let ov = model.project(&backend, &object, &probe, &idx);
        let mut obj = object.clone();
        let mut pr = probe.clone();
        let params = AdjointParams {
            step_size: 0.9,
            normalization_min: 0.01,
            fix_probe: false,
        };
        gradient_descent_update(
            &backend,
            ObjectModel::Complex,
            &mut obj,
            &mut pr,
            &ov,
            &Array4::zeros((3, 1, 4, 4)),
            &idx,
            params,
        );
        assert_eq!(obj, object);
        assert_eq!(pr, probe);
    }

    #[test]
    fn test_projection_update_reproduces_consistent_object() {
        // Exit waves generated by the current object/probe back-project to
        // the object on fully covered pixels when nm = 0.
        let (backend, model, idx) = setup();
        let object = Array2::from_shape_fn((10, 10), |(i, j)| {
            Complex64::from_polar(0.9, 0.2 * i as f64 - 0.1 * j as f64)
        });
        let probe = Array3::from_elem((1, 4, 4), Complex64::new(1.0, 0.0));
        let ov = model.project(&backend, &object, &probe, &idx);
        let mut obj = object.clone();
        let mut pr = probe.clone();
        let params = AdjointParams {
            step_size: 0.0,
            normalization_min: 0.0,
            fix_probe: true,
        };
        projection_sets_update(
            &backend,
            ObjectModel::Complex,
            &mut obj,
            &mut pr,
            &ov,
            &ov.overlap,
            &idx,
            params,
        );
        // (2, 2) is covered by two windows, (0, 0) by one
        for &(i, j) in &[(0usize, 0usize), (2, 2), (5, 4)] {
            assert!((obj[[i, j]] - object[[i, j]]).norm() < 1e-9, "pixel ({i}, {j})");
        }
        // uncovered pixels carry no estimate
        assert!(obj[[9, 9]].norm() < 1e-12);
    }

    #[test]
    fn test_fixed_probe_untouched() {
        let (backend, model, idx) = setup();
        let object = Array2::from_elem((10, 10), Complex64::new(1.0, 0.0));
        let probe = Array3::from_elem((2, 4, 4), Complex64::new(0.5, 0.0));
        let ov = model.project(&backend, &object, &probe, &idx);
        let mut obj = object.clone();
        let mut pr = probe.clone();
        let correction = Array4::from_elem((3, 2, 4, 4), Complex64::new(0.1, 0.0));
        let params = AdjointParams {
            step_size: 0.5,
            normalization_min: 0.1,
            fix_probe: true,
        };
        gradient_descent_update(
            &backend, ObjectModel::Complex, &mut obj, &mut pr, &ov, &correction, &idx, params,
        );
        assert_eq!(pr, probe);
        assert!(obj.iter().any(|v| (v - Complex64::new(1.0, 0.0)).norm() > 1e-6));
    }

    #[test]
    fn test_position_correction_flat_object_is_zero() {
        let (backend, model, idx) = setup();
        let object = Array2::from_elem((10, 10), Complex64::new(1.0, 0.0));
        let probe = Array3::from_elem((1, 4, 4), Complex64::new(1.0, 0.0));
        let ov = model.project(&backend, &object, &probe, &idx);
        let correction = Array4::from_elem((3, 1, 4, 4), Complex64::new(0.2, 0.0));
        let disp = position_correction(
            &backend,
            ObjectModel::Complex,
            &object,
            &ov,
            &correction,
            &idx,
        );
        assert_eq!(disp.dim(), (3, 2));
        assert!(disp.iter().all(|v| v.abs() < 1e-12));
    }
}
