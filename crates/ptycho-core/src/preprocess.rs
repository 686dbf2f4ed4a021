// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Preprocessing
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Diffraction intensities → amplitudes, and scan positions → object pixels.

use ndarray::{Array2, Array3, Array4, Axis};
use ptycho_math::com::center_of_mass;
use ptycho_math::shift::fourier_shift_real;
use ptycho_types::config::{CenterOfMassCorrection, PreprocessConfig};
use ptycho_types::error::{PtychoError, PtychoResult};
use tracing::debug;

/// Measured amplitudes, one pattern per scan position, with the unscattered
/// beam at the FFT origin.
#[derive(Debug, Clone)]
pub struct DiffractionData {
    amplitudes: Array3<f64>,
    mean_diffraction_intensity: f64,
    scan_shape: Option<(usize, usize)>,
}

impl DiffractionData {
    /// From a 4D intensity stack [Rx, Ry, Qx, Qy].
    pub fn from_intensities(intensities: &Array4<f64>, config: &PreprocessConfig) -> PtychoResult<Self> {
        let (rx, ry, qx, qy) = intensities.dim();
        let n = rx * ry;
        if n == 0 || qx == 0 || qy == 0 {
            return Err(PtychoError::ConfigError(
                "diffraction intensities must be non-empty".to_string(),
            ));
        }

        let background = config.background;
        let mut patterns = intensities
            .to_shape((n, qx, qy))
            .map_err(|e| PtychoError::ConfigError(e.to_string()))?
            .mapv(|v| (v - background).max(0.0));

        match config.com_correction {
            CenterOfMassCorrection::None => {}
            CenterOfMassCorrection::Mean => {
                let mean = patterns.mean_axis(Axis(0)).unwrap_or_else(|| Array2::zeros((qx, qy)));
                if let Some((r0, c0)) = center_of_mass(&mean) {
                    debug!(r0, c0, "shifting patterns by mean center of mass");
                    for mut frame in patterns.outer_iter_mut() {
                        let shifted = fourier_shift_real(&frame.to_owned(), (-r0, -c0));
                        frame.assign(&shifted.mapv(|v| v.max(0.0)));
                    }
                }
            }
            CenterOfMassCorrection::PerPattern => {
                for mut frame in patterns.outer_iter_mut() {
                    let owned = frame.to_owned();
                    if let Some((r0, c0)) = center_of_mass(&owned) {
                        let shifted = fourier_shift_real(&owned, (-r0, -c0));
                        frame.assign(&shifted.mapv(|v| v.max(0.0)));
                    }
                }
            }
        }

        let total: f64 = patterns.iter().sum();
        let mean_diffraction_intensity = total / n as f64;
        Ok(DiffractionData {
            amplitudes: patterns.mapv(f64::sqrt),
            mean_diffraction_intensity,
            scan_shape: Some((rx, ry)),
        })
    }

    /// From amplitudes [N, S, T]. `mean_diffraction_intensity` defaults to
    /// `Σ A² / N`.
    pub fn from_amplitudes(amplitudes: Array3<f64>, mean_diffraction_intensity: Option<f64>) -> PtychoResult<Self> {
        let n = amplitudes.dim().0;
        if n == 0 {
            return Err(PtychoError::ConfigError(
                "at least one diffraction pattern is required".to_string(),
            ));
        }
        if amplitudes.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(PtychoError::ConfigError(
                "amplitudes must be finite and non-negative".to_string(),
            ));
        }
        let mean = match mean_diffraction_intensity {
            Some(m) => m,
            None => amplitudes.iter().map(|a| a * a).sum::<f64>() / n as f64,
        };
        if !mean.is_finite() || mean <= 0.0 {
            return Err(PtychoError::ParameterOutOfRange {
                name: "mean_diffraction_intensity",
                value: mean,
            });
        }
        Ok(DiffractionData {
            amplitudes,
            mean_diffraction_intensity: mean,
            scan_shape: None,
        })
    }

    pub fn amplitudes(&self) -> &Array3<f64> {
        &self.amplitudes
    }

    pub fn mean_diffraction_intensity(&self) -> f64 {
        self.mean_diffraction_intensity
    }

    pub fn num_patterns(&self) -> usize {
        self.amplitudes.dim().0
    }

    pub fn pattern_shape(&self) -> (usize, usize) {
        let (_, s, t) = self.amplitudes.dim();
        (s, t)
    }

    pub fn scan_shape(&self) -> Option<(usize, usize)> {
        self.scan_shape
    }
}

/// Calibrated positions [N, 2] → object pixels: divide by `sampling`, move
/// the minimum to zero, add the near-edge `padding`.
pub fn positions_in_pixels(positions: &Array2<f64>, sampling: [f64; 2], padding: [f64; 2]) -> Array2<f64> {
    let mut px = positions.clone();
    for (axis, mut col) in px.axis_iter_mut(Axis(1)).enumerate().take(2) {
        col.mapv_inplace(|v| v / sampling[axis]);
        let min = col.iter().cloned().fold(f64::INFINITY, f64::min);
        let min = if min.is_finite() { min } else { 0.0 };
        col.mapv_inplace(|v| v - min + padding[axis]);
    }
    px
}

/// Row-major raster grid of `scan_shape` points, [Rx·Ry, 2].
pub fn raster_positions(scan_shape: (usize, usize), step: [f64; 2], offset: [f64; 2]) -> Array2<f64> {
    let (rx, ry) = scan_shape;
    Array2::from_shape_fn((rx * ry, 2), |(n, axis)| {
        let index = if axis == 0 { n / ry } else { n % ry };
        offset[axis] + step[axis] * index as f64
    })
}
