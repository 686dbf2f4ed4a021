//! Fourier-domain sub-pixel shifts.

use crate::fft::{fft2, fftfreq, ifft2};
use ndarray::Array2;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Linear phase ramp `exp(-2πi (k_r·dr + k_c·dc))` on the FFT grid of `shape`.
///
/// Multiplying a spectrum by this ramp translates the field by `(dr, dc)`
/// pixels with periodic wrap.
pub fn phase_ramp(shape: (usize, usize), shift: (f64, f64)) -> Array2<Complex64> {
    let kr = fftfreq(shape.0, 1.0);
    let kc = fftfreq(shape.1, 1.0);
    Array2::from_shape_fn(shape, |(i, j)| {
        let phase = -2.0 * PI * (kr[i] * shift.0 + kc[j] * shift.1);
        Complex64::from_polar(1.0, phase)
    })
}

/// Translate a complex field by a fractional number of pixels.
pub fn fourier_shift(field: &Array2<Complex64>, shift: (f64, f64)) -> Array2<Complex64> {
    let mut spectrum = fft2(field);
    spectrum *= &phase_ramp(field.dim(), shift);
    ifft2(&spectrum)
}

/// Translate a real field, keeping the real part of the result.
pub fn fourier_shift_real(field: &Array2<f64>, shift: (f64, f64)) -> Array2<f64> {
    let complex = field.mapv(|v| Complex64::new(v, 0.0));
    fourier_shift(&complex, shift).mapv(|c| c.re)
}
