// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Overlap Projection
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Object patch × sub-pixel shifted probe, per scan position and mode.

use crate::backend::ArrayBackend;
use crate::model::ObjectModel;
use crate::patches::PatchIndices;
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use num_complex::Complex64;
use ptycho_math::fft::fftfreq;
use std::f64::consts::PI;

/// Fourier-domain sub-pixel translation of probe modes.
#[derive(Debug, Clone)]
pub struct SubpixelShifter {
    kr: Array1<f64>,
    kc: Array1<f64>,
}

impl SubpixelShifter {
    pub fn new(probe_shape: (usize, usize)) -> Self {
        SubpixelShifter {
            kr: fftfreq(probe_shape.0, 1.0),
            kc: fftfreq(probe_shape.1, 1.0),
        }
    }

    /// Separable ramp factors `exp(-2πi k·δ)` along rows and columns.
    fn ramps(&self, shift: (f64, f64)) -> (Vec<Complex64>, Vec<Complex64>) {
        let row = self
            .kr
            .iter()
            .map(|k| Complex64::from_polar(1.0, -2.0 * PI * k * shift.0))
            .collect();
        let col = self
            .kc
            .iter()
            .map(|k| Complex64::from_polar(1.0, -2.0 * PI * k * shift.1))
            .collect();
        (row, col)
    }

    /// Shift every mode of `probe` ([K, S, T]) by each row of `fractional`
    /// ([B, 2]), giving [B, K, S, T].
    ///
    /// One forward FFT per mode, one inverse FFT per position and mode.
    pub fn shift_probes<B: ArrayBackend>(
        &self,
        backend: &B,
        probe: &Array3<Complex64>,
        fractional: &Array2<f64>,
    ) -> Array4<Complex64> {
        let (k, s, t) = probe.dim();
        let batch = fractional.nrows();

        let mut spectrum = probe.clone();
        backend.fft2(&mut spectrum);

        let mut shifted = Array4::zeros((batch, k, s, t));
        for mut frame in shifted.axis_iter_mut(Axis(0)) {
            frame.assign(&spectrum);
        }

        backend.for_each_frame(&mut shifted, |b, mut frame| {
            let (row, col) = self.ramps((fractional[[b, 0]], fractional[[b, 1]]));
            for mut mode in frame.outer_iter_mut() {
                for ((i, j), v) in mode.indexed_iter_mut() {
                    *v *= row[i] * col[j];
                }
            }
        });

        backend.ifft2(&mut shifted);
        shifted
    }
}

/// Outputs of one overlap projection.
#[derive(Debug, Clone)]
pub struct Overlap {
    /// [B, K, S, T]
    pub shifted_probes: Array4<Complex64>,
    /// Object transmission under each window, [B, S, T].
    pub object_patches: Array3<Complex64>,
    /// [B, K, S, T]
    pub overlap: Array4<Complex64>,
}

/// Patch extraction plus sub-pixel probe shifting. Pure with respect to the
/// object and probe it reads.
#[derive(Debug, Clone)]
pub struct OverlapModel {
    shifter: SubpixelShifter,
    model: ObjectModel,
}

impl OverlapModel {
    pub fn new(model: ObjectModel, probe_shape: (usize, usize)) -> Self {
        OverlapModel {
            shifter: SubpixelShifter::new(probe_shape),
            model,
        }
    }

    pub fn object_model(&self) -> ObjectModel {
        self.model
    }

    pub fn project<B: ArrayBackend>(
        &self,
        backend: &B,
        object: &Array2<Complex64>,
        probe: &Array3<Complex64>,
        indices: &PatchIndices,
    ) -> Overlap {
        let shifted_probes = self
            .shifter
            .shift_probes(backend, probe, indices.fractional());
        let object_patches = self
            .model
            .transmission_patches(backend.gather(object, indices));
        let overlap = self.model.propagate(&object_patches, &shifted_probes);
        Overlap {
            shifted_probes,
            object_patches,
            overlap,
        }
    }
}
