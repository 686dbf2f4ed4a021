//! Smoothing and band-limiting filters for real and complex images.
//!
//! `gaussian_filter` follows `scipy.ndimage.gaussian_filter` with
//! `mode="reflect"`: separable, kernel radius `round(truncate * sigma)`,
//! boundary mirrored about the edge of the outermost pixel.

use crate::fft::{fft2, fftfreq, ifft2};
use ndarray::{Array2, Axis};
use num_complex::Complex64;
use ptycho_types::constants::GAUSSIAN_TRUNCATE;
use std::ops::{Add, Mul};

/// Normalized 1D Gaussian taps, centered, length `2r + 1`.
pub fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5).floor().max(0.0) as usize;
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let mut taps: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let x = k as f64 - radius as f64;
            (-0.5 * (x / sigma).powi(2)).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps
}

/// Map an out-of-range index into `[0, n)` by half-sample reflection
/// (`d c b a | a b c d | d c b a`).
#[inline]
pub fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn convolve_axis<T>(input: &Array2<T>, taps: &[f64], axis: Axis) -> Array2<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f64, Output = T>,
{
    let radius = (taps.len() / 2) as isize;
    let mut out = Array2::from_elem(input.dim(), T::default());
    for (src, mut dst) in input.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = src.len();
        for (i, d) in dst.iter_mut().enumerate() {
            let mut acc = T::default();
            for (k, &w) in taps.iter().enumerate() {
                let idx = reflect_index(i as isize + k as isize - radius, n);
                acc = acc + src[idx] * w;
            }
            *d = acc;
        }
    }
    out
}

fn separable<T>(input: &Array2<T>, sigma: f64) -> Array2<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f64, Output = T>,
{
    if sigma <= 0.0 || input.is_empty() {
        return input.clone();
    }
    let taps = gaussian_kernel(sigma, GAUSSIAN_TRUNCATE);
    let rows = convolve_axis(input, &taps, Axis(0));
    convolve_axis(&rows, &taps, Axis(1))
}

/// Gaussian blur of a real image. Matches `scipy.ndimage.gaussian_filter`.
pub fn gaussian_filter(input: &Array2<f64>, sigma: f64) -> Array2<f64> {
    separable(input, sigma)
}

/// Gaussian blur applied to real and imaginary parts independently.
pub fn gaussian_filter_complex(input: &Array2<Complex64>, sigma: f64) -> Array2<Complex64> {
    separable(input, sigma)
}

/// Butterworth band envelope on the FFT grid of `shape`.
///
/// `|q|` is measured in inverse `sampling` units. A high-pass cut-off gives
/// `1 - 1/(1 + (q/q_hp)^(2n))`, a low-pass cut-off multiplies by
/// `1/(1 + (q/q_lp)^(2n))`.
pub fn butterworth_envelope(
    shape: (usize, usize),
    sampling: [f64; 2],
    q_lowpass: Option<f64>,
    q_highpass: Option<f64>,
    order: f64,
) -> Array2<f64> {
    let qr = fftfreq(shape.0, sampling[0]);
    let qc = fftfreq(shape.1, sampling[1]);
    Array2::from_shape_fn(shape, |(i, j)| {
        let q = (qr[i] * qr[i] + qc[j] * qc[j]).sqrt();
        let mut env = 1.0;
        if let Some(hp) = q_highpass {
            env = 1.0 - 1.0 / (1.0 + (q / hp).powf(2.0 * order));
        }
        if let Some(lp) = q_lowpass {
            env *= 1.0 / (1.0 + (q / lp).powf(2.0 * order));
        }
        env
    })
}

/// Apply a Butterworth envelope to the mean-subtracted field, then restore
/// the mean.
///
/// The DC term always survives, so a high-pass envelope removes structure
/// but never the average transmission. A plain envelope product would zero
/// the mean under a high-pass cut-off.
pub fn butterworth_filter(field: &Array2<Complex64>, envelope: &Array2<f64>) -> Array2<Complex64> {
    let n = field.len().max(1) as f64;
    let mean = field.iter().fold(Complex64::new(0.0, 0.0), |acc, v| acc + v) / n;
    let centered = field.mapv(|v| v - mean);
    let mut spectrum = fft2(&centered);
    spectrum.zip_mut_with(envelope, |s, &e| *s *= e);
    ifft2(&spectrum).mapv(|v| v + mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_normalized_and_symmetric() {
        let taps = gaussian_kernel(1.5, 4.0);
        assert_eq!(taps.len(), 2 * 6 + 1);
        let sum: f64 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for k in 0..taps.len() / 2 {
            assert!((taps[k] - taps[taps.len() - 1 - k]).abs() < 1e-15);
        }
    }

    #[test]
    fn test_reflect_index() {
        // scipy 'reflect': -1 -> 0, -2 -> 1, n -> n-1, n+1 -> n-2
        assert_eq!(reflect_index(-1, 5), 0);
        assert_eq!(reflect_index(-2, 5), 1);
        assert_eq!(reflect_index(5, 5), 4);
        assert_eq!(reflect_index(6, 5), 3);
        assert_eq!(reflect_index(2, 5), 2);
        assert_eq!(reflect_index(-3, 1), 0);
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let img = Array2::from_elem((9, 7), 2.5);
        let out = gaussian_filter(&img, 1.3);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_gaussian_preserves_sum_of_interior_impulse() {
        let mut img = Array2::zeros((21, 21));
        img[[10, 10]] = 1.0;
        let out = gaussian_filter(&img, 1.0);
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(out[[10, 10]] < 1.0 && out[[10, 10]] > out[[10, 11]]);
    }

    #[test]
    fn test_gaussian_complex_matches_parts() {
        let img = Array2::from_shape_fn((8, 8), |(i, j)| {
            Complex64::new(i as f64, (j as f64).sqrt())
        });
        let out = gaussian_filter_complex(&img, 0.8);
        let re = gaussian_filter(&img.mapv(|c| c.re), 0.8);
        let im = gaussian_filter(&img.mapv(|c| c.im), 0.8);
        for ((i, j), v) in out.indexed_iter() {
            assert!((v.re - re[[i, j]]).abs() < 1e-12);
            assert!((v.im - im[[i, j]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_butterworth_envelope_values() {
        let env = butterworth_envelope((16, 16), [1.0, 1.0], Some(0.25), None, 2.0);
        assert!((env[[0, 0]] - 1.0).abs() < 1e-12);
        // q = 0.25 exactly at index 4 along rows
        assert!((env[[4, 0]] - 0.5).abs() < 1e-12);

        let hp = butterworth_envelope((16, 16), [1.0, 1.0], None, Some(0.25), 2.0);
        assert!(hp[[0, 0]].abs() < 1e-12);
    }

    #[test]
    fn test_butterworth_keeps_mean() {
        let field = Array2::from_shape_fn((12, 12), |(i, j)| {
            Complex64::new(1.0 + 0.1 * ((i + 2 * j) % 3) as f64, 0.2)
        });
        let env = butterworth_envelope((12, 12), [1.0, 1.0], Some(0.1), None, 2.0);
        let out = butterworth_filter(&field, &env);
        let mean_in: Complex64 = field.iter().sum::<Complex64>() / 144.0;
        let mean_out: Complex64 = out.iter().sum::<Complex64>() / 144.0;
        assert!((mean_in - mean_out).norm() < 1e-10);
    }

    #[test]
    fn test_butterworth_highpass_keeps_mean() {
        let field = Array2::from_shape_fn((16, 16), |(i, j)| {
            Complex64::new(2.0 + 0.1 * (i as f64).sin(), 0.5 - 0.1 * (j as f64).cos())
        });
        let env = butterworth_envelope((16, 16), [1.0, 1.0], None, Some(0.2), 2.0);
        assert_eq!(env[[0, 0]], 0.0);
        let out = butterworth_filter(&field, &env);
        let mean_in: Complex64 = field.iter().sum::<Complex64>() / 256.0;
        let mean_out: Complex64 = out.iter().sum::<Complex64>() / 256.0;
        assert!((mean_in - mean_out).norm() < 1e-10);
    }
}
