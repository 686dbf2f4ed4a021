// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Property-Based Tests (proptest) for ptycho-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for ptycho-types using proptest.
//!
//! Covers: configuration validation ranges, serialization roundtrip,
//! method lookup, position center of mass.

use ndarray::Array2;
use ptycho_types::config::{ReconstructionConfig, ReconstructionMethod};
use ptycho_types::error::PtychoError;
use ptycho_types::state::mean_position;
use proptest::prelude::*;

fn method_strategy() -> impl Strategy<Value = ReconstructionMethod> {
    prop_oneof![
        Just(ReconstructionMethod::GradientDescent),
        Just(ReconstructionMethod::DifferenceMap),
        Just(ReconstructionMethod::Raar),
    ]
}

// ── Validation Ranges ────────────────────────────────────────────────

proptest! {
    /// Any α in [0, 1] validates for every method with full batches.
    #[test]
    fn alpha_in_unit_interval_validates(
        alpha in 0.0f64..=1.0,
        method in method_strategy(),
    ) {
        let cfg = ReconstructionConfig {
            reconstruction_method: method,
            reconstruction_parameter: alpha,
            ..Default::default()
        };
        prop_assert!(cfg.validate().is_ok());
    }

    /// α outside [0, 1] always fails before anything runs.
    #[test]
    fn alpha_outside_unit_interval_fails(
        excess in 1e-6f64..10.0,
        below in proptest::bool::ANY,
        method in method_strategy(),
    ) {
        let alpha = if below { -excess } else { 1.0 + excess };
        let cfg = ReconstructionConfig {
            reconstruction_method: method,
            reconstruction_parameter: alpha,
            ..Default::default()
        };
        let is_range_error = matches!(
            cfg.validate(),
            Err(PtychoError::ParameterOutOfRange { name: "reconstruction_parameter", .. })
        );
        prop_assert!(is_range_error);
    }

    /// Mini-batching is accepted only by gradient descent.
    #[test]
    fn batching_only_with_gradient_descent(
        batch in 1usize..512,
        method in method_strategy(),
    ) {
        let cfg = ReconstructionConfig {
            reconstruction_method: method,
            max_batch_size: Some(batch),
            ..Default::default()
        };
        let result = cfg.validate();
        if method.uses_projection_scheme() {
            let is_batching_error = matches!(result, Err(PtychoError::IncompatibleBatching(_)));
            prop_assert!(is_batching_error);
        } else {
            prop_assert!(result.is_ok());
        }
    }
}

// ── Serialization and Lookup ─────────────────────────────────────────

proptest! {
    /// JSON roundtrip preserves the schedule.
    #[test]
    fn config_roundtrip(
        method in method_strategy(),
        max_iter in 1usize..500,
        fix_probe_iter in 0usize..50,
        normalization_min in 0.0f64..=1.0,
    ) {
        let cfg = ReconstructionConfig {
            reconstruction_method: method,
            max_iter,
            fix_probe_iter,
            normalization_min,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ReconstructionConfig = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.reconstruction_method, method);
        prop_assert_eq!(back.max_iter, max_iter);
        prop_assert_eq!(back.fix_probe_iter, fix_probe_iter);
        prop_assert!((back.normalization_min - normalization_min).abs() < 1e-15);
    }

    /// Long names and aliases resolve to the same method.
    #[test]
    fn name_and_alias_agree(method in method_strategy()) {
        let by_name = ReconstructionMethod::from_name(method.name()).unwrap();
        let by_alias = ReconstructionMethod::from_name(method.alias()).unwrap();
        prop_assert_eq!(by_name, method);
        prop_assert_eq!(by_alias, method);
    }
}

// ── Position Center of Mass ──────────────────────────────────────────

proptest! {
    /// Translating every position translates the mean by the same amount.
    #[test]
    fn mean_position_translates(
        n in 1usize..64,
        dx in -50.0f64..50.0,
        dy in -50.0f64..50.0,
    ) {
        let positions = Array2::from_shape_fn((n, 2), |(i, j)| (i * 3 + j) as f64 * 0.7);
        let mut moved = positions.clone();
        for mut row in moved.rows_mut() {
            row[0] += dx;
            row[1] += dy;
        }
        let a = mean_position(&positions);
        let b = mean_position(&moved);
        prop_assert!((b[0] - a[0] - dx).abs() < 1e-9);
        prop_assert!((b[1] - a[1] - dy).abs() < 1e-9);
    }
}
