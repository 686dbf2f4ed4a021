// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Constraint Pipeline
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Real-space constraints applied after every batch update.
//!
//! Each constraint is a pure function of the state it touches.
//! [`ConstraintPipeline`] applies them in a fixed order under the gates of
//! the current iteration.

use crate::model::ObjectModel;
use crate::reconstruct::IterationGates;
use ndarray::{Array2, Array3, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::com::center_of_mass;
use ptycho_math::fft::{fft2, ifft2};
use ptycho_math::filters::{
    butterworth_envelope, butterworth_filter, gaussian_filter, gaussian_filter_complex,
};
use ptycho_math::linalg::fit_affine;
use ptycho_math::shift::fourier_shift;
use ptycho_math::tv::tv_denoise;
use ptycho_types::config::{ReconstructionConfig, TvDenoiseConfig};
use ptycho_types::state::{mean_position, ReconstructionState};
use tracing::warn;

// ── Object constraints ───────────────────────────────────────────────

/// Gaussian smoothing. Pure-phase complex objects blur the phase only and
/// keep each pixel's amplitude.
pub fn gaussian_smoothing(
    model: ObjectModel,
    object: &Array2<Complex64>,
    sigma: f64,
    pure_phase: bool,
) -> Array2<Complex64> {
    match model {
        ObjectModel::Complex if pure_phase => {
            let phase = gaussian_filter(&object.mapv(|v| v.arg()), sigma);
            let mut out = object.clone();
            Zip::from(&mut out)
                .and(&phase)
                .for_each(|o, &p| *o = Complex64::from_polar(o.norm(), p));
            out
        }
        ObjectModel::Complex => gaussian_filter_complex(object, sigma),
        ObjectModel::Potential => {
            gaussian_filter(&object.mapv(|v| v.re), sigma).mapv(|v| Complex64::new(v, 0.0))
        }
    }
}

/// Butterworth band filter. Potential objects keep the real part.
pub fn butterworth(
    model: ObjectModel,
    object: &Array2<Complex64>,
    envelope: &Array2<f64>,
) -> Array2<Complex64> {
    let filtered = butterworth_filter(object, envelope);
    match model {
        ObjectModel::Complex => filtered,
        ObjectModel::Potential => filtered.mapv(|v| Complex64::new(v.re, 0.0)),
    }
}

/// TV denoising of the phase (complex) or the potential.
pub fn tv(model: ObjectModel, object: &Array2<Complex64>, settings: &TvDenoiseConfig) -> Array2<Complex64> {
    match model {
        ObjectModel::Complex => {
            let phase = tv_denoise(&object.mapv(|v| v.arg()), settings.weight, settings.pad_object);
            let mut out = object.clone();
            Zip::from(&mut out)
                .and(&phase)
                .for_each(|o, &p| *o = Complex64::from_polar(o.norm(), p));
            out
        }
        ObjectModel::Potential => {
            tv_denoise(&object.mapv(|v| v.re), settings.weight, settings.pad_object)
                .mapv(|v| Complex64::new(v, 0.0))
        }
    }
}

/// Amplitude clamp for complex objects (unit amplitude when pure-phase);
/// `max(V - shrinkage, 0)` for potentials.
pub fn threshold(
    model: ObjectModel,
    object: &Array2<Complex64>,
    pure_phase: bool,
    shrinkage_rad: Option<f64>,
) -> Array2<Complex64> {
    match model {
        ObjectModel::Complex => object.mapv(|v| {
            let amplitude = if pure_phase { 1.0 } else { v.norm().min(1.0) };
            Complex64::from_polar(amplitude, v.arg())
        }),
        ObjectModel::Potential => {
            let shrink = shrinkage_rad.unwrap_or(0.0);
            object.mapv(|v| Complex64::new((v.re - shrink).max(0.0), 0.0))
        }
    }
}

// ── Probe constraints ────────────────────────────────────────────────

/// Per-mode `|FFT(p_k)|`.
pub fn fourier_amplitude(probe: &Array3<Complex64>) -> Array3<f64> {
    let mut out = Array3::zeros(probe.dim());
    for (mut dst, mode) in out.outer_iter_mut().zip(probe.outer_iter()) {
        dst.assign(&fft2(&mode.to_owned()).mapv(|v| v.norm()));
    }
    out
}

/// Replace each mode's Fourier amplitude by `amplitude`, keeping its phase.
pub fn probe_fourier_amplitude(probe: &Array3<Complex64>, amplitude: &Array3<f64>) -> Array3<Complex64> {
    let mut out = probe.clone();
    for (mut mode, amp) in out.outer_iter_mut().zip(amplitude.outer_iter()) {
        let mut spectrum = fft2(&mode.to_owned());
        Zip::from(&mut spectrum)
            .and(&amp)
            .for_each(|s, &a| *s = Complex64::from_polar(a, s.arg()));
        mode.assign(&ifft2(&spectrum));
    }
    out
}

/// `exp(-((x/r)² + (y/r)²)^degree)` with `x = -1 + 2i/S`, `y = -1 + 2j/T`.
pub fn supergaussian_support_mask(shape: (usize, usize), relative_radius: f64, degree: f64) -> Array2<f64> {
    let (s, t) = shape;
    Array2::from_shape_fn(shape, |(i, j)| {
        let x = -1.0 + 2.0 * i as f64 / s as f64;
        let y = -1.0 + 2.0 * j as f64 / t as f64;
        let r2 = (x / relative_radius).powi(2) + (y / relative_radius).powi(2);
        (-r2.powf(degree)).exp()
    })
}

pub fn finite_support(probe: &Array3<Complex64>, mask: &Array2<f64>) -> Array3<Complex64> {
    let mut out = probe.clone();
    for mut mode in out.outer_iter_mut() {
        Zip::from(&mut mode).and(mask).for_each(|p, &m| *p *= m);
    }
    out
}

/// Shift all modes so the centroid of `Σ_k|p_k|²` sits at `(S/2, T/2)`.
/// An all-zero probe is returned unchanged.
pub fn probe_center_of_mass(probe: &Array3<Complex64>) -> Array3<Complex64> {
    let (_, s, t) = probe.dim();
    let mut intensity = Array2::<f64>::zeros((s, t));
    for mode in probe.outer_iter() {
        Zip::from(&mut intensity).and(&mode).for_each(|i, p| *i += p.norm_sqr());
    }
    let Some((r0, c0)) = center_of_mass(&intensity) else {
        return probe.clone();
    };
    let shift = (s as f64 / 2.0 - r0, t as f64 / 2.0 - c0);
    let mut out = probe.clone();
    for mut mode in out.outer_iter_mut() {
        let shifted = fourier_shift(&mode.to_owned(), shift);
        mode.assign(&shifted);
    }
    out
}

// ── Position constraints ─────────────────────────────────────────────

/// `positions - (mean(positions) - reference)`. Idempotent.
pub fn positions_center_of_mass(positions: &Array2<f64>, reference: [f64; 2]) -> Array2<f64> {
    let mean = mean_position(positions);
    let mut out = positions.clone();
    for (axis, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
        col -= mean[axis] - reference[axis];
    }
    out
}

/// Least-squares affine map from `initial` onto `current` about `reference`,
/// applied to `initial`. Degenerate fits leave `current` unchanged.
pub fn positions_affine(
    current: &Array2<f64>,
    initial: &Array2<f64>,
    reference: [f64; 2],
) -> Array2<f64> {
    match fit_affine(initial, current, reference) {
        Ok(transform) => transform.apply(initial, reference),
        Err(e) => {
            warn!(error = %e, "affine position fit skipped");
            current.clone()
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Loop-start precomputation plus the per-run settings of every constraint.
#[derive(Debug, Clone)]
pub struct ConstraintPipeline {
    model: ObjectModel,
    support_mask: Array2<f64>,
    initial_fourier_amplitude: Array3<f64>,
    butterworth_envelope: Option<Array2<f64>>,
    gaussian_blur_sigma: Option<f64>,
    tv_denoise: Option<TvDenoiseConfig>,
    shrinkage_rad: Option<f64>,
    constrain_position_affine: bool,
    positions_reference: [f64; 2],
    initial_positions: Array2<f64>,
}

impl ConstraintPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: ObjectModel,
        config: &ReconstructionConfig,
        sampling: [f64; 2],
        object_shape: (usize, usize),
        probe_shape: (usize, usize),
        initial_fourier_amplitude: Array3<f64>,
        positions_reference: [f64; 2],
        initial_positions: Array2<f64>,
    ) -> Self {
        let butterworth_envelope = config.butterworth.as_ref().and_then(|bw| {
            if bw.q_lowpass.is_none() && bw.q_highpass.is_none() {
                return None;
            }
            Some(butterworth_envelope(
                object_shape,
                sampling,
                bw.q_lowpass,
                bw.q_highpass,
                bw.order,
            ))
        });
        ConstraintPipeline {
            model,
            support_mask: supergaussian_support_mask(
                probe_shape,
                config.probe_support_relative_radius,
                config.probe_support_supergaussian_degree,
            ),
            initial_fourier_amplitude,
            butterworth_envelope,
            gaussian_blur_sigma: config.gaussian_blur_sigma,
            tv_denoise: config.tv_denoise.clone(),
            shrinkage_rad: config.shrinkage_rad,
            constrain_position_affine: config.constrain_position_affine,
            positions_reference,
            initial_positions,
        }
    }

    pub fn support_mask(&self) -> &Array2<f64> {
        &self.support_mask
    }

    /// Apply all active constraints in order. Returns `true` when the
    /// positions changed and patch indices must be recomputed.
    pub fn apply(&self, state: &mut ReconstructionState, gates: &IterationGates) -> bool {
        let model = self.model;

        if let (true, Some(sigma)) = (gates.gaussian_blur, self.gaussian_blur_sigma) {
            state.object = gaussian_smoothing(model, &state.object, sigma, gates.pure_phase_object);
        }
        if let (true, Some(envelope)) = (gates.butterworth, &self.butterworth_envelope) {
            state.object = butterworth(model, &state.object, envelope);
        }
        if let (true, Some(settings)) = (gates.tv_denoise, &self.tv_denoise) {
            state.object = tv(model, &state.object, settings);
        }
        state.object = threshold(model, &state.object, gates.pure_phase_object, self.shrinkage_rad);

        if gates.fix_probe_fourier_amplitude {
            state.probe = probe_fourier_amplitude(&state.probe, &self.initial_fourier_amplitude);
        }
        state.probe = finite_support(&state.probe, &self.support_mask);
        if gates.fix_com {
            state.probe = probe_center_of_mass(&state.probe);
        }

        if gates.fix_positions {
            return false;
        }
        if self.constrain_position_affine {
            state.positions = positions_affine(
                &state.positions,
                &self.initial_positions,
                self.positions_reference,
            );
        }
        state.positions = positions_center_of_mass(&state.positions, self.positions_reference);
        true
    }
}
