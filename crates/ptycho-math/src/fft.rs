//! 2D FFT wrappers around rustfft.
//!
//! Convention matches numpy:
//! - Forward FFT (fft2): unnormalized
//! - Inverse FFT (ifft2): normalized by 1/(rows*cols)
//!
//! Transforms act on the last two axes, so a stack `[.., S, T]` of frames is
//! transformed frame by frame in a single call.

use ndarray::{Array1, Array2, ArrayBase, ArrayViewMut1, Axis, DataMut, Dimension};
use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

/// Planned 2D transform for one frame shape and direction.
#[derive(Clone)]
pub struct Fft2Plan {
    rows: usize,
    cols: usize,
    direction: FftDirection,
    /// Length `cols`, applied along the last axis.
    row_fft: Arc<dyn Fft<f64>>,
    /// Length `rows`, applied along the second-to-last axis.
    col_fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft2Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2Plan")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("direction", &self.direction)
            .finish()
    }
}

impl Fft2Plan {
    pub fn new(
        planner: &mut FftPlanner<f64>,
        shape: (usize, usize),
        direction: FftDirection,
    ) -> Self {
        let (rows, cols) = shape;
        Fft2Plan {
            rows,
            cols,
            direction,
            row_fft: planner.plan_fft(cols, direction),
            col_fft: planner.plan_fft(rows, direction),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn direction(&self) -> FftDirection {
        self.direction
    }

    pub fn row_fft(&self) -> &Arc<dyn Fft<f64>> {
        &self.row_fft
    }

    pub fn col_fft(&self) -> &Arc<dyn Fft<f64>> {
        &self.col_fft
    }

    /// Scale applied after the lane transforms (numpy `ifft2` normalization).
    pub fn normalization(&self) -> f64 {
        match self.direction {
            FftDirection::Forward => 1.0,
            FftDirection::Inverse => 1.0 / (self.rows * self.cols).max(1) as f64,
        }
    }

    /// Transform every frame of `data` over its last two axes, in place.
    pub fn process<S, D>(&self, data: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = Complex64>,
        D: Dimension,
    {
        let ndim = data.ndim();
        assert!(ndim >= 2, "2D FFT needs at least two axes, got {ndim}");
        let shape = data.shape();
        assert_eq!(
            (shape[ndim - 2], shape[ndim - 1]),
            (self.rows, self.cols),
            "FFT plan shape does not match frame shape"
        );

        let mut buffer = Vec::with_capacity(self.rows.max(self.cols));
        let mut scratch = Vec::new();
        for lane in data.lanes_mut(Axis(ndim - 1)) {
            transform_lane(&*self.row_fft, lane, &mut buffer, &mut scratch);
        }
        for lane in data.lanes_mut(Axis(ndim - 2)) {
            transform_lane(&*self.col_fft, lane, &mut buffer, &mut scratch);
        }

        let norm = self.normalization();
        if norm != 1.0 {
            data.mapv_inplace(|v| v * norm);
        }
    }
}

/// Run a 1D transform over one lane, copying through `buffer` when the lane
/// is strided.
pub fn transform_lane(
    fft: &dyn Fft<f64>,
    mut lane: ArrayViewMut1<Complex64>,
    buffer: &mut Vec<Complex64>,
    scratch: &mut Vec<Complex64>,
) {
    let scratch_len = fft.get_inplace_scratch_len();
    if scratch.len() < scratch_len {
        scratch.resize(scratch_len, Complex64::new(0.0, 0.0));
    }
    if let Some(slice) = lane.as_slice_mut() {
        fft.process_with_scratch(slice, &mut scratch[..scratch_len]);
        return;
    }
    buffer.clear();
    buffer.extend(lane.iter().copied());
    fft.process_with_scratch(buffer, &mut scratch[..scratch_len]);
    for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
        *dst = *src;
    }
}

fn frame_shape<S, D>(data: &ArrayBase<S, D>) -> (usize, usize)
where
    S: ndarray::Data,
    D: Dimension,
{
    let shape = data.shape();
    let ndim = shape.len();
    assert!(ndim >= 2, "2D FFT needs at least two axes, got {ndim}");
    (shape[ndim - 2], shape[ndim - 1])
}

/// Forward 2D FFT over the last two axes, in place.
pub fn fft2_inplace<S, D>(data: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = Complex64>,
    D: Dimension,
{
    let mut planner = FftPlanner::new();
    Fft2Plan::new(&mut planner, frame_shape(data), FftDirection::Forward).process(data);
}

/// Inverse 2D FFT over the last two axes, in place, normalized.
pub fn ifft2_inplace<S, D>(data: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = Complex64>,
    D: Dimension,
{
    let mut planner = FftPlanner::new();
    Fft2Plan::new(&mut planner, frame_shape(data), FftDirection::Inverse).process(data);
}

/// Forward 2D FFT. Matches `numpy.fft.fft2()`.
pub fn fft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    let mut data = input.clone();
    fft2_inplace(&mut data);
    data
}

/// Inverse 2D FFT. Matches `numpy.fft.ifft2()`.
pub fn ifft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    let mut data = input.clone();
    ifft2_inplace(&mut data);
    data
}

/// Forward 2D FFT of a real field.
pub fn fft2_real(input: &Array2<f64>) -> Array2<Complex64> {
    let mut data = input.mapv(|v| Complex64::new(v, 0.0));
    fft2_inplace(&mut data);
    data
}

/// Inverse 2D FFT keeping the real part.
pub fn ifft2_real(input: &Array2<Complex64>) -> Array2<f64> {
    ifft2(input).mapv(|c| c.re)
}

/// Sample frequencies. Matches `numpy.fft.fftfreq(n, d)`.
pub fn fftfreq(n: usize, d: f64) -> Array1<f64> {
    let scale = 1.0 / (n as f64 * d);
    Array1::from_shape_fn(n, |i| {
        let k = if i < n.div_ceil(2) {
            i as f64
        } else {
            i as f64 - n as f64
        };
        k * scale
    })
}

/// Circular shift of a 2D array. Matches `numpy.roll(a, shift, axis=(0, 1))`.
pub fn roll2<T: Clone>(input: &Array2<T>, shift: (isize, isize)) -> Array2<T> {
    let (rows, cols) = input.dim();
    if rows == 0 || cols == 0 {
        return input.clone();
    }
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let si = (i as isize - shift.0).rem_euclid(rows as isize) as usize;
        let sj = (j as isize - shift.1).rem_euclid(cols as isize) as usize;
        input[[si, sj]].clone()
    })
}

/// Move the zero frequency to the center. Matches `numpy.fft.fftshift`.
pub fn fftshift2<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    roll2(input, ((rows / 2) as isize, (cols / 2) as isize))
}

/// Inverse of [`fftshift2`]. Matches `numpy.fft.ifftshift`.
pub fn ifftshift2<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    roll2(input, (-((rows / 2) as isize), -((cols / 2) as isize)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn test_field(rows: usize, cols: usize) -> Array2<Complex64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| {
            Complex64::new((i * cols + j) as f64, (i as f64 - j as f64) * 0.5)
        })
    }

    #[test]
    fn test_fft2_roundtrip() {
        let original = test_field(16, 12);
        let spectrum = fft2(&original);
        let recovered = ifft2(&spectrum);

        for ((i, j), &val) in original.indexed_iter() {
            assert!(
                (recovered[[i, j]] - val).norm() < 1e-10,
                "FFT roundtrip failed at ({i}, {j}): {} vs {val}",
                recovered[[i, j]]
            );
        }
    }

    #[test]
    fn test_fft2_dc_component() {
        // For a constant field, the DC component (0,0) should be N*M*value
        let n = 8;
        let val = 3.0;
        let input = Array2::from_elem((n, n), val);
        let spectrum = fft2_real(&input);

        let expected_dc = (n * n) as f64 * val;
        assert!(
            (spectrum[[0, 0]].re - expected_dc).abs() < 1e-10,
            "DC component: {} vs {expected_dc}",
            spectrum[[0, 0]].re
        );
        assert!(
            spectrum[[0, 0]].im.abs() < 1e-10,
            "DC imaginary should be zero"
        );
        for ((i, j), v) in spectrum.indexed_iter() {
            if (i, j) != (0, 0) {
                assert!(v.norm() < 1e-10, "Non-DC bin ({i}, {j}) should vanish");
            }
        }
    }

    #[test]
    fn test_fft2_zeros() {
        let input = Array2::zeros((8, 8));
        let spectrum = fft2_real(&input);
        for &v in spectrum.iter() {
            assert!(v.norm() < 1e-15, "FFT of zeros should be zero");
        }
    }

    #[test]
    fn test_parseval() {
        let field = test_field(10, 6);
        let spectrum = fft2(&field);
        let energy_real: f64 = field.iter().map(|v| v.norm_sqr()).sum();
        let energy_fourier: f64 = spectrum.iter().map(|v| v.norm_sqr()).sum();
        assert!((energy_fourier - 60.0 * energy_real).abs() < 1e-6 * energy_fourier);
    }

    #[test]
    fn test_stack_matches_single_frames() {
        let mut stack = Array3::from_shape_fn((3, 8, 6), |(k, i, j)| {
            Complex64::new((k + i) as f64, (j * k) as f64 - 1.0)
        });
        let frames: Vec<Array2<Complex64>> =
            stack.outer_iter().map(|f| fft2(&f.to_owned())).collect();
        fft2_inplace(&mut stack);
        for (k, frame) in frames.iter().enumerate() {
            for ((i, j), v) in frame.indexed_iter() {
                assert!((stack[[k, i, j]] - v).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn test_fftfreq_matches_numpy() {
        let even = fftfreq(4, 1.0);
        assert_eq!(even.to_vec(), vec![0.0, 0.25, -0.5, -0.25]);
        let odd = fftfreq(5, 0.5);
        let expected = [0.0, 0.4, 0.8, -0.8, -0.4];
        for (a, b) in odd.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fftshift_inverse() {
        let field = Array2::from_shape_fn((5, 4), |(i, j)| (i * 4 + j) as f64);
        let shifted = fftshift2(&field);
        assert_eq!(shifted[[2, 2]], 0.0);
        assert_eq!(ifftshift2(&shifted), field);
    }

    #[test]
    fn test_roll_matches_numpy() {
        let field = Array2::from_shape_fn((3, 3), |(i, j)| (i * 3 + j) as i32);
        let rolled = roll2(&field, (1, -1));
        // np.roll(np.arange(9).reshape(3,3), (1,-1), axis=(0,1))
        assert_eq!(rolled[[0, 0]], 7);
        assert_eq!(rolled[[1, 2]], 0);
        assert_eq!(rolled[[2, 0]], 4);
    }
}
