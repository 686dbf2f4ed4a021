// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Additive floor on every overlap normalization denominator.
/// Keeps thinly covered pixels finite instead of raising an error.
pub const NORMALIZATION_EPS: f64 = 1e-9;

/// Default number of reconstruction iterations.
pub const DEFAULT_MAX_ITER: usize = 64;

/// Default gradient-descent step size.
pub const DEFAULT_STEP_SIZE: f64 = 0.9;

/// Default position-correction step size.
pub const DEFAULT_POSITIONS_STEP_SIZE: f64 = 0.9;

/// Default normalization minimum.
pub const DEFAULT_NORMALIZATION_MIN: f64 = 1e-2;

/// Default probe support radius, relative to half the probe window.
pub const DEFAULT_SUPPORT_RADIUS: f64 = 1.0;

/// Default supergaussian degree of the probe support mask.
pub const DEFAULT_SUPPORT_DEGREE: f64 = 10.0;

/// Default projection parameter α.
pub const DEFAULT_RECONSTRUCTION_PARAMETER: f64 = 1.0;

/// TV (Chambolle) relative energy stopping tolerance.
pub const TV_EPS: f64 = 2.0e-4;

/// TV (Chambolle) iteration cap.
pub const TV_MAX_ITER: usize = 200;

/// Gaussian kernel truncation in standard deviations (scipy default).
pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// Default Butterworth filter order.
pub const DEFAULT_BUTTERWORTH_ORDER: f64 = 2.0;
