//! Total-variation denoising (Chambolle projection algorithm).

use ndarray::{s, Array2, Array3, Axis};
use ptycho_types::constants::{TV_EPS, TV_MAX_ITER};

/// Result of one denoising call.
#[derive(Debug, Clone)]
pub struct TvResult {
    pub image: Array2<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Chambolle TV denoising of a 2D real image.
///
/// Stops when the relative change of the energy falls below `eps` times the
/// initial energy, or after `max_iter` iterations. When `pad` is set the image
/// is zero-padded by one pixel on every side first and cropped afterwards.
/// The output is rescaled to preserve the sum of the input.
pub fn tv_denoise_with(
    image: &Array2<f64>,
    weight: f64,
    pad: bool,
    eps: f64,
    max_iter: usize,
) -> TvResult {
    let (rows0, cols0) = image.dim();
    if rows0 == 0 || cols0 == 0 || weight <= 0.0 {
        return TvResult {
            image: image.clone(),
            iterations: 0,
            converged: true,
        };
    }

    let x = if pad {
        let mut padded = Array2::zeros((rows0 + 2, cols0 + 2));
        padded.slice_mut(s![1..rows0 + 1, 1..cols0 + 1]).assign(image);
        padded
    } else {
        image.clone()
    };
    let (rows, cols) = x.dim();
    let size = (rows * cols) as f64;
    let tau = 0.25;

    let mut p = Array3::<f64>::zeros((2, rows, cols));
    let mut g = Array3::<f64>::zeros((2, rows, cols));
    let mut updated = x.clone();
    let mut e_init = 0.0;
    let mut e_prev = 0.0;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        let mut d = Array2::<f64>::zeros((rows, cols));
        if iterations > 0 {
            d.assign(&(-(&p.index_axis(Axis(0), 0) + &p.index_axis(Axis(0), 1))));
            {
                let p0 = p.index_axis(Axis(0), 0);
                let mut tail = d.slice_mut(s![1.., ..]);
                tail += &p0.slice(s![..-1, ..]);
            }
            {
                let p1 = p.index_axis(Axis(0), 1);
                let mut tail = d.slice_mut(s![.., 1..]);
                tail += &p1.slice(s![.., ..-1]);
            }
            updated = &x + &d;
        } else {
            updated.assign(&x);
        }
        let mut energy: f64 = d.iter().map(|v| v * v).sum();

        for i in 0..rows.saturating_sub(1) {
            for j in 0..cols {
                g[[0, i, j]] = updated[[i + 1, j]] - updated[[i, j]];
            }
        }
        for i in 0..rows {
            for j in 0..cols.saturating_sub(1) {
                g[[1, i, j]] = updated[[i, j + 1]] - updated[[i, j]];
            }
        }

        let mut norm = Array2::<f64>::zeros((rows, cols));
        for ((i, j), n) in norm.indexed_iter_mut() {
            *n = (g[[0, i, j]].powi(2) + g[[1, i, j]].powi(2)).sqrt();
        }
        energy += weight * norm.sum();
        norm.mapv_inplace(|n| 1.0 + n * tau / weight);

        for c in 0..2 {
            for ((i, j), &n) in norm.indexed_iter() {
                p[[c, i, j]] = (p[[c, i, j]] - tau * g[[c, i, j]]) / n;
            }
        }

        energy /= size;
        iterations += 1;
        if iterations == 1 {
            e_init = energy;
            e_prev = energy;
        } else if (e_prev - energy).abs() < eps * e_init {
            converged = true;
            break;
        } else {
            e_prev = energy;
        }
    }

    let mut out = if pad {
        updated.slice(s![1..rows0 + 1, 1..cols0 + 1]).to_owned()
    } else {
        updated
    };

    let target: f64 = image.sum();
    let current: f64 = out.sum();
    if current.abs() > f64::EPSILON && target.is_finite() {
        let scale = target / current;
        out.mapv_inplace(|v| v * scale);
    }

    TvResult {
        image: out,
        iterations,
        converged,
    }
}

/// TV denoising with the default tolerance and iteration cap.
pub fn tv_denoise(image: &Array2<f64>, weight: f64, pad: bool) -> Array2<f64> {
    tv_denoise_with(image, weight, pad, TV_EPS, TV_MAX_ITER).image
}

/// Total variation (sum of forward-difference gradient magnitudes).
pub fn total_variation(image: &Array2<f64>) -> f64 {
    let (rows, cols) = image.dim();
    let mut tv = 0.0;
    for i in 0..rows {
        for j in 0..cols {
            let dr = if i + 1 < rows { image[[i + 1, j]] - image[[i, j]] } else { 0.0 };
            let dc = if j + 1 < cols { image[[i, j + 1]] - image[[i, j]] } else { 0.0 };
            tv += (dr * dr + dc * dc).sqrt();
        }
    }
    tv
}
