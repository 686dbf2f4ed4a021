// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Probe Initialization
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Initial probe guesses and mixed-state mode seeding.
//!
//! Every guess is scaled so that `Σ_k Σ|FFT(p_k)|²` equals the mean
//! diffraction intensity.

use ndarray::{Array2, Array3, Axis};
use num_complex::Complex64;
use ptycho_math::com::center_of_mass;
use ptycho_math::fft::{fftfreq, fftshift2, ifft2};
use ptycho_math::shift::fourier_shift_real;
use ptycho_types::error::{PtychoError, PtychoResult};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::f64::consts::PI;

pub use crate::constraints::fourier_amplitude;

/// Source of the initial probe.
#[derive(Debug, Clone)]
pub enum ProbeGuess {
    /// Single real-space mode; extra modes are seeded from it.
    Array(Array2<Complex64>),
    /// All modes given explicitly, [K, S, T].
    Modes(Array3<Complex64>),
    /// Circular aperture in reciprocal space with a cosine edge, radii in
    /// Fourier pixels.
    Aperture {
        semiangle_cutoff_px: f64,
        rolloff_px: f64,
    },
    /// Measured vacuum diffraction intensity; its square root is the aperture.
    VacuumIntensity(Array2<f64>),
}

/// Soft-edged disc on the unshifted FFT grid.
pub fn aperture(shape: (usize, usize), semiangle_cutoff_px: f64, rolloff_px: f64) -> Array2<f64> {
    let qr = fftfreq(shape.0, 1.0);
    let qc = fftfreq(shape.1, 1.0);
    Array2::from_shape_fn(shape, |(i, j)| {
        let q = ((qr[i] * shape.0 as f64).powi(2) + (qc[j] * shape.1 as f64).powi(2)).sqrt();
        if rolloff_px > 0.0 {
            let edge = semiangle_cutoff_px - rolloff_px;
            if q <= edge {
                1.0
            } else if q >= semiangle_cutoff_px {
                0.0
            } else {
                0.5 * (1.0 + (PI * (q - edge) / rolloff_px).cos())
            }
        } else if q <= semiangle_cutoff_px {
            1.0
        } else {
            0.0
        }
    })
}

/// Real-space probe centered in the window from a reciprocal-space amplitude.
pub fn probe_from_fourier_amplitude(amplitude: &Array2<f64>) -> Array2<Complex64> {
    fftshift2(&ifft2(&amplitude.mapv(|a| Complex64::new(a, 0.0))))
}

/// Vacuum intensity with its center of mass moved to the FFT origin.
pub fn vacuum_amplitude(intensity: &Array2<f64>) -> Array2<f64> {
    let clamped = intensity.mapv(|v| v.max(0.0));
    let centered = match center_of_mass(&clamped) {
        Some((r0, c0)) => fourier_shift_real(&clamped, (-r0, -c0)).mapv(|v| v.max(0.0)),
        None => clamped,
    };
    centered.mapv(f64::sqrt)
}

/// Scale all modes so that `Σ_k Σ|FFT(p_k)|² = mean_diffraction_intensity`.
/// An all-zero probe is left unchanged.
pub fn normalize_probe(probe: &mut Array3<Complex64>, mean_diffraction_intensity: f64) {
    let (_, s, t) = probe.dim();
    // Parseval: Σ|FFT p|² = S·T·Σ|p|²
    let power: f64 = probe.iter().map(|v| v.norm_sqr()).sum::<f64>() * (s * t) as f64;
    if power > 0.0 && power.is_finite() {
        let scale = (mean_diffraction_intensity / power).sqrt();
        probe.mapv_inplace(|v| v * scale);
    }
}

/// Stack `base` into `num_modes` modes. Mode k is mode k-1 multiplied by a
/// random real-space phase ramp of up to half a cycle per window, weighted
/// by `1/(k+1)`.
pub fn seed_modes<R: Rng + ?Sized>(
    base: &Array2<Complex64>,
    num_modes: usize,
    rng: &mut R,
) -> Array3<Complex64> {
    let (s, t) = base.dim();
    let mut modes = Array3::zeros((num_modes, s, t));
    if num_modes == 0 {
        return modes;
    }
    modes.index_axis_mut(Axis(0), 0).assign(base);
    let fr = fftfreq(s, 1.0);
    let fc = fftfreq(t, 1.0);
    let offset = Uniform::new(-0.5, 0.5);
    let mut previous = base.clone();
    for k in 1..num_modes {
        let dr = offset.sample(rng);
        let dc = offset.sample(rng);
        let ramped = Array2::from_shape_fn((s, t), |(i, j)| {
            previous[[i, j]] * Complex64::from_polar(1.0, -2.0 * PI * (dr * fr[i] + dc * fc[j]))
        });
        let weight = 1.0 / (k + 1) as f64;
        modes
            .index_axis_mut(Axis(0), k)
            .assign(&ramped.mapv(|v| v * weight));
        previous = ramped;
    }
    modes
}

/// Build and normalize the initial probe, [K, S, T].
pub fn initialize_probe<R: Rng + ?Sized>(
    guess: &ProbeGuess,
    shape: (usize, usize),
    num_modes: usize,
    mean_diffraction_intensity: f64,
    rng: &mut R,
) -> PtychoResult<Array3<Complex64>> {
    let check = |what: &'static str, found: (usize, usize)| -> PtychoResult<()> {
        if found != shape {
            return Err(PtychoError::ShapeMismatch {
                what,
                expected: vec![shape.0, shape.1],
                found: vec![found.0, found.1],
            });
        }
        Ok(())
    };

    let mut probe = match guess {
        ProbeGuess::Array(base) => {
            check("probe guess", base.dim())?;
            seed_modes(base, num_modes, rng)
        }
        ProbeGuess::Modes(modes) => {
            let (k, s, t) = modes.dim();
            if k != num_modes || (s, t) != shape {
                return Err(PtychoError::ShapeMismatch {
                    what: "probe modes",
                    expected: vec![num_modes, shape.0, shape.1],
                    found: vec![k, s, t],
                });
            }
            modes.clone()
        }
        ProbeGuess::Aperture {
            semiangle_cutoff_px,
            rolloff_px,
        } => {
            if !semiangle_cutoff_px.is_finite() || *semiangle_cutoff_px <= 0.0 {
                return Err(PtychoError::ParameterOutOfRange {
                    name: "semiangle_cutoff_px",
                    value: *semiangle_cutoff_px,
                });
            }
            let base = probe_from_fourier_amplitude(&aperture(
                shape,
                *semiangle_cutoff_px,
                rolloff_px.max(0.0),
            ));
            seed_modes(&base, num_modes, rng)
        }
        ProbeGuess::VacuumIntensity(intensity) => {
            check("vacuum intensity", intensity.dim())?;
            let base = probe_from_fourier_amplitude(&vacuum_amplitude(intensity));
            seed_modes(&base, num_modes, rng)
        }
    };

    normalize_probe(&mut probe, mean_diffraction_intensity);
    Ok(probe)
}
