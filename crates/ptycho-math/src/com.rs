//! Intensity center of mass.

use ndarray::Array2;

/// Center of mass (row, col) of a non-negative intensity image, in pixels.
///
/// Returns `None` when the total intensity is not positive or not finite.
pub fn center_of_mass(image: &Array2<f64>) -> Option<(f64, f64)> {
    let mut total = 0.0;
    let mut sum_r = 0.0;
    let mut sum_c = 0.0;
    for ((i, j), &v) in image.indexed_iter() {
        total += v;
        sum_r += v * i as f64;
        sum_c += v * j as f64;
    }
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    Some((sum_r / total, sum_c / total))
}
