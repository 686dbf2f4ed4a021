//! Linear algebra utilities.
//!
//! Small dense solves and the affine least-squares fit used to regularize
//! scan positions.

use ndarray::{Array1, Array2};
use ptycho_types::error::{PtychoError, PtychoResult};

/// Pivot magnitude below which a system is treated as singular.
const PIVOT_EPS: f64 = 1e-12;

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
///
/// Intended for the small (n ≤ ~10) systems produced by normal equations.
pub fn solve_dense(a: &Array2<f64>, b: &Array1<f64>) -> PtychoResult<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(PtychoError::ShapeMismatch {
            what: "linear system",
            expected: vec![n, n, n],
            found: vec![a.nrows(), a.ncols(), b.len()],
        });
    }

    let mut m = a.clone();
    let mut rhs = b.clone();
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| m[[i, col]].abs().total_cmp(&m[[j, col]].abs()))
            .unwrap_or(col);
        if m[[pivot_row, col]].abs() < PIVOT_EPS * scale {
            return Err(PtychoError::LinAlg(format!(
                "singular system: pivot {:.3e} in column {col}",
                m[[pivot_row, col]]
            )));
        }
        if pivot_row != col {
            for k in 0..n {
                m.swap([col, k], [pivot_row, k]);
            }
            rhs.swap(col, pivot_row);
        }
        for row in (col + 1)..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for k in (row + 1)..n {
            acc -= m[[row, k]] * x[k];
        }
        x[row] = acc / m[[row, row]];
    }
    Ok(x)
}

/// Least-squares solution of the overdetermined system `a x ≈ b` via the
/// normal equations `aᵀa x = aᵀb`.
pub fn lstsq(a: &Array2<f64>, b: &Array1<f64>) -> PtychoResult<Array1<f64>> {
    if a.nrows() != b.len() {
        return Err(PtychoError::ShapeMismatch {
            what: "least-squares rows",
            expected: vec![a.nrows()],
            found: vec![b.len()],
        });
    }
    let at = a.t();
    let ata = at.dot(a);
    let atb = at.dot(b);
    solve_dense(&ata, &atb)
}

/// `p' = M (p - origin) + origin + t` acting on (row, col) positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub matrix: [[f64; 2]; 2],
    pub translation: [f64; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        AffineTransform {
            matrix: [[1.0, 0.0], [0.0, 1.0]],
            translation: [0.0, 0.0],
        }
    }
}

impl AffineTransform {
    pub fn apply_point(&self, point: [f64; 2], origin: [f64; 2]) -> [f64; 2] {
        let d = [point[0] - origin[0], point[1] - origin[1]];
        [
            self.matrix[0][0] * d[0] + self.matrix[0][1] * d[1] + origin[0] + self.translation[0],
            self.matrix[1][0] * d[0] + self.matrix[1][1] * d[1] + origin[1] + self.translation[1],
        ]
    }

    /// Transform every row of an [N, 2] position array.
    pub fn apply(&self, points: &Array2<f64>, origin: [f64; 2]) -> Array2<f64> {
        let mut out = points.clone();
        for mut row in out.rows_mut() {
            let p = self.apply_point([row[0], row[1]], origin);
            row[0] = p[0];
            row[1] = p[1];
        }
        out
    }
}

/// Fit the affine map taking `src` onto `dst` (both [N, 2]) in the least
/// squares sense, about `origin`.
///
/// Needs at least three non-collinear points.
pub fn fit_affine(
    src: &Array2<f64>,
    dst: &Array2<f64>,
    origin: [f64; 2],
) -> PtychoResult<AffineTransform> {
    let n = src.nrows();
    if src.dim() != dst.dim() || src.ncols() != 2 {
        return Err(PtychoError::ShapeMismatch {
            what: "affine point sets",
            expected: vec![n, 2],
            found: vec![dst.nrows(), dst.ncols()],
        });
    }
    if n < 3 {
        return Err(PtychoError::LinAlg(format!(
            "affine fit needs at least 3 points, got {n}"
        )));
    }

    let design = Array2::from_shape_fn((n, 3), |(i, k)| match k {
        0 => src[[i, 0]] - origin[0],
        1 => src[[i, 1]] - origin[1],
        _ => 1.0,
    });

    let mut transform = AffineTransform::default();
    for axis in 0..2 {
        let target = Array1::from_shape_fn(n, |i| dst[[i, axis]] - origin[axis]);
        let coeffs = lstsq(&design, &target)?;
        transform.matrix[axis] = [coeffs[0], coeffs[1]];
        transform.translation[axis] = coeffs[2];
    }
    Ok(transform)
}
