// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Object Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! How the stored object maps to a transmission function.
//!
//! `Complex` objects store the transmission directly. `Potential` objects
//! store a real phase potential V (real part, imaginary part zero) with
//! transmission `exp(iV)`.

use ndarray::{Array2, Array3, Array4, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::fft::{fft2_real, fftshift2};
use ptycho_types::config::ObjectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectModel {
    Complex,
    Potential,
}

impl From<ObjectType> for ObjectModel {
    fn from(kind: ObjectType) -> Self {
        match kind {
            ObjectType::Complex => ObjectModel::Complex,
            ObjectType::Potential => ObjectModel::Potential,
        }
    }
}

impl ObjectModel {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectModel::Complex => ObjectType::Complex,
            ObjectModel::Potential => ObjectType::Potential,
        }
    }

    /// Vacuum object: unit transmission or zero potential.
    pub fn initialize_object(&self, shape: (usize, usize)) -> Array2<Complex64> {
        match self {
            ObjectModel::Complex => Array2::from_elem(shape, Complex64::new(1.0, 0.0)),
            ObjectModel::Potential => Array2::zeros(shape),
        }
    }

    #[inline]
    pub fn transmission(&self, value: Complex64) -> Complex64 {
        match self {
            ObjectModel::Complex => value,
            ObjectModel::Potential => Complex64::from_polar(1.0, value.re),
        }
    }

    pub fn transmission_patches(&self, mut patches: Array3<Complex64>) -> Array3<Complex64> {
        if *self == ObjectModel::Potential {
            patches.mapv_inplace(|v| self.transmission(v));
        }
        patches
    }

    pub fn transmission_field(&self, object: &Array2<Complex64>) -> Array2<Complex64> {
        object.mapv(|v| self.transmission(v))
    }

    /// Exit waves `t_b · p_bk` for every position and mode, [B, K, S, T].
    pub fn propagate(
        &self,
        patches: &Array3<Complex64>,
        shifted_probes: &Array4<Complex64>,
    ) -> Array4<Complex64> {
        let mut overlap = shifted_probes.clone();
        for (mut modes, patch) in overlap.outer_iter_mut().zip(patches.outer_iter()) {
            for mut mode in modes.outer_iter_mut() {
                mode *= &patch;
            }
        }
        overlap
    }

    /// Map the probe-weighted residual `Σ_k conj(p_k)Δ_k` ([B, S, T]) to the
    /// object-space gradient.
    ///
    /// Potential objects chain through `t = exp(iV)`: `Re(-i·conj(t)·g)`.
    pub fn object_gradient(
        &self,
        patches: &Array3<Complex64>,
        mut weighted: Array3<Complex64>,
    ) -> Array3<Complex64> {
        if *self == ObjectModel::Potential {
            let minus_i = Complex64::new(0.0, -1.0);
            Zip::from(&mut weighted).and(patches).for_each(|g, &t| {
                *g = Complex64::new((minus_i * t.conj() * *g).re, 0.0);
            });
        }
        weighted
    }

    /// Store a projection-sets object estimate. Potential objects keep the
    /// phase of the estimate.
    pub fn from_estimate(&self, estimate: Array2<Complex64>) -> Array2<Complex64> {
        match self {
            ObjectModel::Complex => estimate,
            ObjectModel::Potential => estimate.mapv(|v| Complex64::new(v.arg(), 0.0)),
        }
    }

    /// Real map the object is analysed as: phase for complex objects,
    /// potential otherwise.
    pub fn real_view(&self, object: &Array2<Complex64>) -> Array2<f64> {
        match self {
            ObjectModel::Complex => object.mapv(|v| v.arg()),
            ObjectModel::Potential => object.mapv(|v| v.re),
        }
    }

    /// `|fftshift(fft2(·))|` of [`real_view`](Self::real_view).
    pub fn project_fft(&self, object: &Array2<Complex64>) -> Array2<f64> {
        fftshift2(&fft2_real(&self.real_view(object)).mapv(|v| v.norm()))
    }
}

/// Object extent covering every window: `max(round(max_position + pad), probe)`
/// per axis. `padding` defaults to the probe window.
pub fn object_shape_for(
    positions: &Array2<f64>,
    probe_shape: (usize, usize),
    padding: Option<[usize; 2]>,
) -> (usize, usize) {
    let pad = padding.unwrap_or([probe_shape.0, probe_shape.1]);
    let max_of = |axis: usize| {
        positions
            .index_axis(Axis(1), axis)
            .iter()
            .cloned()
            .fold(0.0f64, f64::max)
    };
    let p = (max_of(0) + pad[0] as f64).round_ties_even().max(0.0) as usize;
    let q = (max_of(1) + pad[1] as f64).round_ties_even().max(0.0) as usize;
    (p.max(probe_shape.0), q.max(probe_shape.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_initial_objects() {
        let c = ObjectModel::Complex.initialize_object((3, 4));
        assert!(c.iter().all(|v| *v == Complex64::new(1.0, 0.0)));
        let p = ObjectModel::Potential.initialize_object((3, 4));
        assert!(p.iter().all(|v| *v == Complex64::new(0.0, 0.0)));
        assert_eq!(
            ObjectModel::Potential.transmission(Complex64::new(0.0, 0.0)),
            Complex64::new(1.0, 0.0)
        );
    }

    #[test]
    fn test_potential_gradient_matches_chain_rule() {
        // d/dV |t·p - ψ|² direction for t = exp(iV): Re(-i conj(t) conj(p) Δ)
        let v = 0.3;
        let t = Complex64::from_polar(1.0, v);
        let g = Complex64::new(0.2, -0.7);
        let patches = Array3::from_elem((1, 1, 1), t);
        let weighted = Array3::from_elem((1, 1, 1), g);
        let out = ObjectModel::Potential.object_gradient(&patches, weighted);
        let expected = (Complex64::new(0.0, -1.0) * t.conj() * g).re;
        assert!((out[[0, 0, 0]].re - expected).abs() < 1e-15);
        assert_eq!(out[[0, 0, 0]].im, 0.0);
    }

    #[test]
    fn test_estimate_to_potential_keeps_phase() {
        let est = array![[Complex64::from_polar(2.0, 0.4)]];
        let v = ObjectModel::Potential.from_estimate(est);
        assert!((v[[0, 0]].re - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_project_fft_of_flat_object() {
        let obj = ObjectModel::Potential.initialize_object((8, 8)).mapv(|_| Complex64::new(0.5, 0.0));
        let f = ObjectModel::Potential.project_fft(&obj);
        // DC moved to the center
        assert!((f[[4, 4]] - 32.0).abs() < 1e-10);
        assert!(f[[0, 0]].abs() < 1e-10);
    }

    #[test]
    fn test_object_shape_covers_windows() {
        let positions = array![[0.0, 0.0], [10.4, 3.0], [2.0, 12.6]];
        assert_eq!(object_shape_for(&positions, (16, 16), None), (26, 29));
        assert_eq!(object_shape_for(&positions, (16, 16), Some([0, 0])), (16, 16));
    }
}
