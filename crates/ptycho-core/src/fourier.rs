// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Fourier Constraint
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Measured-amplitude constraint in reciprocal space.
//!
//! Mixed-state modes are incoherent: the modelled amplitude at a detector
//! pixel is `|F| = sqrt(Σ_k |F_k|²)` and every mode is rescaled by `A/|F|`.
//! Where `|F| = 0` mode 0 receives `A` with zero phase and the other modes
//! are zeroed.

use crate::backend::ArrayBackend;
use ndarray::{Array3, Array4, ArrayView2, ArrayViewMut3, Axis, Zip};
use num_complex::Complex64;
use ptycho_types::config::ReconstructionMethod;
use ptycho_types::error::{PtychoError, PtychoResult};

/// Generalized projection-sets coefficients.
///
/// `exit' = x·prev + a·overlap + b·P_F(c·overlap + y·prev)` with
/// `x = 1 - a - b`, `y = 1 - c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl ProjectionCoefficients {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        ProjectionCoefficients { a, b, c }
    }

    /// Difference map with alternating projections.
    pub fn difference_map(alpha: f64) -> Self {
        Self::new(-alpha, 1.0, 1.0 + alpha)
    }

    /// Relaxed averaged alternating reflections.
    pub fn raar(alpha: f64) -> Self {
        Self::new(1.0 - 2.0 * alpha, alpha, 2.0)
    }

    pub fn x(&self) -> f64 {
        1.0 - self.a - self.b
    }

    pub fn y(&self) -> f64 {
        1.0 - self.c
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FourierStrategy {
    GradientDescent,
    ProjectionSets(ProjectionCoefficients),
}

/// Exit wave and batch error from one Fourier projection.
#[derive(Debug, Clone)]
pub struct FourierOutput {
    /// Gradient descent: correction `Δ = P_F(overlap) - overlap`.
    /// Projection sets: the new exit-wave iterate.
    pub exit_wave: Array4<Complex64>,
    pub error: f64,
}

impl FourierStrategy {
    /// Resolve a method and α. α outside [0, 1] is rejected for every method.
    pub fn from_method(method: ReconstructionMethod, alpha: f64) -> PtychoResult<Self> {
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(PtychoError::ParameterOutOfRange {
                name: "reconstruction_parameter",
                value: alpha,
            });
        }
        Ok(match method {
            ReconstructionMethod::GradientDescent => FourierStrategy::GradientDescent,
            ReconstructionMethod::DifferenceMap => {
                FourierStrategy::ProjectionSets(ProjectionCoefficients::difference_map(alpha))
            }
            ReconstructionMethod::Raar => {
                FourierStrategy::ProjectionSets(ProjectionCoefficients::raar(alpha))
            }
        })
    }

    pub fn uses_projection_scheme(&self) -> bool {
        matches!(self, FourierStrategy::ProjectionSets(_))
    }

    pub fn coefficients(&self) -> Option<ProjectionCoefficients> {
        match self {
            FourierStrategy::GradientDescent => None,
            FourierStrategy::ProjectionSets(c) => Some(*c),
        }
    }

    /// Apply the constraint to one batch.
    ///
    /// `amplitudes`: [B, S, T]; `overlap`, `previous`: [B, K, S, T].
    /// A missing `previous` exit wave defaults to the overlap.
    pub fn apply<B: ArrayBackend>(
        &self,
        backend: &B,
        amplitudes: &Array3<f64>,
        overlap: &Array4<Complex64>,
        previous: Option<&Array4<Complex64>>,
        mean_diffraction_intensity: f64,
    ) -> FourierOutput {
        let mut spectrum = overlap.clone();
        backend.fft2(&mut spectrum);
        let error = batch_error(&spectrum, amplitudes, mean_diffraction_intensity);

        match self {
            FourierStrategy::GradientDescent => {
                replace_modulus(backend, &mut spectrum, amplitudes);
                backend.ifft2(&mut spectrum);
                spectrum -= overlap;
                FourierOutput {
                    exit_wave: spectrum,
                    error,
                }
            }
            FourierStrategy::ProjectionSets(coeffs) => {
                let prev = previous.unwrap_or(overlap);
                let (x, y) = (coeffs.x(), coeffs.y());

                let mut factor = overlap * coeffs.c;
                factor.zip_mut_with(prev, |f, &p| *f += p * y);
                let projected = fourier_projection(backend, factor, amplitudes);

                let mut exit_wave = prev * x;
                Zip::from(&mut exit_wave)
                    .and(overlap)
                    .and(&projected)
                    .for_each(|e, &o, &p| *e += o * coeffs.a + p * coeffs.b);
                FourierOutput { exit_wave, error }
            }
        }
    }
}

/// Resolve a method by name (long form or alias) and α.
pub fn lookup(name: &str, alpha: f64) -> PtychoResult<FourierStrategy> {
    FourierStrategy::from_method(ReconstructionMethod::from_name(name)?, alpha)
}

/// `mean(|A - sqrt(Σ_k|F_k|²)|²) / mean_diffraction_intensity`.
pub fn batch_error(
    spectrum: &Array4<Complex64>,
    amplitudes: &Array3<f64>,
    mean_diffraction_intensity: f64,
) -> f64 {
    let count = amplitudes.len();
    if count == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for (modes, amps) in spectrum.outer_iter().zip(amplitudes.outer_iter()) {
        for ((i, j), &a) in amps.indexed_iter() {
            let modelled: f64 = modes
                .outer_iter()
                .map(|m| m[[i, j]].norm_sqr())
                .sum::<f64>()
                .sqrt();
            total += (a - modelled).powi(2);
        }
    }
    total / count as f64 / mean_diffraction_intensity
}

fn replace_frame_modulus(mut frame: ArrayViewMut3<'_, Complex64>, amps: ArrayView2<'_, f64>) {
    let modes = frame.dim().0;
    for ((i, j), &a) in amps.indexed_iter() {
        let norm: f64 = (0..modes)
            .map(|k| frame[[k, i, j]].norm_sqr())
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            let scale = a / norm;
            for k in 0..modes {
                frame[[k, i, j]] *= scale;
            }
        } else {
            frame[[0, i, j]] = Complex64::new(a, 0.0);
            for k in 1..modes {
                frame[[k, i, j]] = Complex64::new(0.0, 0.0);
            }
        }
    }
}

/// Replace the modal-sum modulus of a spectrum stack by `amplitudes`, in place.
pub fn replace_modulus<B: ArrayBackend>(
    backend: &B,
    spectrum: &mut Array4<Complex64>,
    amplitudes: &Array3<f64>,
) {
    backend.for_each_frame(spectrum, |b, frame| {
        replace_frame_modulus(frame, amplitudes.index_axis(Axis(0), b));
    });
}

/// `P_F(ψ) = IFFT(A · F/|F|)` with `F = FFT(ψ)`.
pub fn fourier_projection<B: ArrayBackend>(
    backend: &B,
    mut field: Array4<Complex64>,
    amplitudes: &Array3<f64>,
) -> Array4<Complex64> {
    backend.fft2(&mut field);
    replace_modulus(backend, &mut field, amplitudes);
    backend.ifft2(&mut field);
    field
}
