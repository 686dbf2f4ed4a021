// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::{
    DEFAULT_BUTTERWORTH_ORDER, DEFAULT_MAX_ITER, DEFAULT_NORMALIZATION_MIN,
    DEFAULT_POSITIONS_STEP_SIZE, DEFAULT_RECONSTRUCTION_PARAMETER, DEFAULT_STEP_SIZE,
    DEFAULT_SUPPORT_DEGREE, DEFAULT_SUPPORT_RADIUS,
};
use crate::error::{PtychoError, PtychoResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level configuration file: construction-time setup plus one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtychoConfig {
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
}

impl PtychoConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> PtychoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> PtychoResult<()> {
        self.setup.validate()?;
        self.reconstruction.validate()
    }
}

/// Iterative algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReconstructionMethod {
    #[default]
    #[serde(rename = "gradient-descent", alias = "GD", alias = "gradient_descent")]
    GradientDescent,
    #[serde(rename = "difference-map_alternating-projections", alias = "DM_AP")]
    DifferenceMap,
    #[serde(rename = "relaxed-averaged-alternating-reflections", alias = "RAAR")]
    Raar,
}

impl ReconstructionMethod {
    /// Resolve a long name or its short alias.
    pub fn from_name(name: &str) -> PtychoResult<Self> {
        match name {
            "gradient-descent" | "gradient_descent" | "GD" => Ok(Self::GradientDescent),
            "difference-map_alternating-projections" | "DM_AP" => Ok(Self::DifferenceMap),
            "relaxed-averaged-alternating-reflections" | "RAAR" => Ok(Self::Raar),
            other => Err(PtychoError::UnknownMethod(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GradientDescent => "gradient-descent",
            Self::DifferenceMap => "difference-map_alternating-projections",
            Self::Raar => "relaxed-averaged-alternating-reflections",
        }
    }

    pub fn alias(&self) -> &'static str {
        match self {
            Self::GradientDescent => "GD",
            Self::DifferenceMap => "DM_AP",
            Self::Raar => "RAAR",
        }
    }

    /// Projection methods carry exit waves across iterations.
    pub fn uses_projection_scheme(&self) -> bool {
        !matches!(self, Self::GradientDescent)
    }
}

impl FromStr for ReconstructionMethod {
    type Err = PtychoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the stored object array is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// Complex transmission function, initialized to ones.
    #[default]
    Complex,
    /// Real projected potential V with transmission exp(iV), initialized to zeros.
    Potential,
}

/// Numeric backend selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Parallel,
}

/// Reciprocal-space center-of-mass correction applied during preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterOfMassCorrection {
    /// Patterns already have the unscattered beam at the origin.
    #[default]
    None,
    /// Shift every pattern by the CoM of the mean pattern.
    Mean,
    /// Shift every pattern by its own CoM.
    PerPattern,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Constant detector background subtracted before the square root.
    #[serde(default)]
    pub background: f64,
    #[serde(default)]
    pub com_correction: CenterOfMassCorrection,
}

/// Construction-time parameters of a reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub object_type: ObjectType,
    /// Far-edge object padding in pixels. Defaults to the probe window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_padding_px: Option<[usize; 2]>,
    #[serde(default = "default_num_probe_modes")]
    pub num_probe_modes: usize,
    #[serde(default)]
    pub backend: BackendKind,
    /// Real-space pixel size, used by the Butterworth filter frequencies.
    #[serde(default = "default_sampling")]
    pub sampling: [f64; 2],
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Seed for extra probe-mode initialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_num_probe_modes() -> usize {
    1
}
fn default_sampling() -> [f64; 2] {
    [1.0, 1.0]
}

impl Default for SetupConfig {
    fn default() -> Self {
        SetupConfig {
            object_type: ObjectType::default(),
            object_padding_px: None,
            num_probe_modes: default_num_probe_modes(),
            backend: BackendKind::default(),
            sampling: default_sampling(),
            preprocess: PreprocessConfig::default(),
            seed: None,
        }
    }
}

impl SetupConfig {
    pub fn validate(&self) -> PtychoResult<()> {
        if self.num_probe_modes == 0 {
            return Err(PtychoError::ConfigError(
                "setup.num_probe_modes must be >= 1".to_string(),
            ));
        }
        if self.sampling.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(PtychoError::ConfigError(
                "setup.sampling must be finite and > 0".to_string(),
            ));
        }
        if !self.preprocess.background.is_finite() {
            return Err(PtychoError::ConfigError(
                "setup.preprocess.background must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Butterworth band filter on the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButterworthConfig {
    /// Low-pass cut-off in inverse sampling units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_lowpass: Option<f64>,
    /// High-pass cut-off in inverse sampling units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_highpass: Option<f64>,
    #[serde(default = "default_butterworth_order")]
    pub order: f64,
    /// Applied while iteration < this value. None: every iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
}

/// Total-variation (Chambolle) denoising of the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvDenoiseConfig {
    pub weight: f64,
    #[serde(default = "default_true")]
    pub pad_object: bool,
    /// Applied while iteration < this value. None: every iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
}

fn default_butterworth_order() -> f64 {
    DEFAULT_BUTTERWORTH_ORDER
}

fn default_true() -> bool {
    true
}

/// Per-run reconstruction parameters.
///
/// Iteration thresholds compare against the iteration index, so every batch
/// of one iteration shares the same gating. `None` thresholds never expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    #[serde(default)]
    pub reconstruction_method: ReconstructionMethod,
    #[serde(default = "default_reconstruction_parameter")]
    pub reconstruction_parameter: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// None: one full batch per iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default = "default_positions_step_size")]
    pub positions_step_size: f64,
    #[serde(default = "default_normalization_min")]
    pub normalization_min: f64,
    #[serde(default = "default_true")]
    pub fix_com: bool,
    #[serde(default)]
    pub fix_probe_iter: usize,
    /// Positions stay fixed while iteration < this value. None: always fixed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_positions_iter: Option<usize>,
    #[serde(default = "default_support_radius")]
    pub probe_support_relative_radius: f64,
    #[serde(default = "default_support_degree")]
    pub probe_support_supergaussian_degree: f64,
    #[serde(default)]
    pub fix_probe_fourier_amplitude_iter: usize,
    #[serde(default)]
    pub pure_phase_object_iter: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaussian_blur_sigma: Option<f64>,
    /// Blur applied while iteration < this value. None: every iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaussian_blur_iter: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub butterworth: Option<ButterworthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv_denoise: Option<TvDenoiseConfig>,
    /// Potential objects only: constant subtracted before the positivity clamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrinkage_rad: Option<f64>,
    #[serde(default)]
    pub constrain_position_affine: bool,
    #[serde(default)]
    pub store_iterations: bool,
    /// Restore the initial object, probe and positions before running.
    #[serde(default)]
    pub reset: bool,
    /// Seed for batch shuffling. None: seeded from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_reconstruction_parameter() -> f64 {
    DEFAULT_RECONSTRUCTION_PARAMETER
}
fn default_max_iter() -> usize {
    DEFAULT_MAX_ITER
}
fn default_step_size() -> f64 {
    DEFAULT_STEP_SIZE
}
fn default_positions_step_size() -> f64 {
    DEFAULT_POSITIONS_STEP_SIZE
}
fn default_normalization_min() -> f64 {
    DEFAULT_NORMALIZATION_MIN
}
fn default_support_radius() -> f64 {
    DEFAULT_SUPPORT_RADIUS
}
fn default_support_degree() -> f64 {
    DEFAULT_SUPPORT_DEGREE
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        ReconstructionConfig {
            reconstruction_method: ReconstructionMethod::default(),
            reconstruction_parameter: default_reconstruction_parameter(),
            max_iter: default_max_iter(),
            max_batch_size: None,
            step_size: default_step_size(),
            positions_step_size: default_positions_step_size(),
            normalization_min: default_normalization_min(),
            fix_com: true,
            fix_probe_iter: 0,
            fix_positions_iter: None,
            probe_support_relative_radius: default_support_radius(),
            probe_support_supergaussian_degree: default_support_degree(),
            fix_probe_fourier_amplitude_iter: 0,
            pure_phase_object_iter: 0,
            gaussian_blur_sigma: None,
            gaussian_blur_iter: None,
            butterworth: None,
            tv_denoise: None,
            shrinkage_rad: None,
            constrain_position_affine: false,
            store_iterations: false,
            reset: false,
            seed: None,
        }
    }
}

fn check_positive(name: &'static str, value: f64) -> PtychoResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PtychoError::ParameterOutOfRange { name, value });
    }
    Ok(())
}

impl ReconstructionConfig {
    /// Eager validation; runs before any state is touched.
    pub fn validate(&self) -> PtychoResult<()> {
        let alpha = self.reconstruction_parameter;
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(PtychoError::ParameterOutOfRange {
                name: "reconstruction_parameter",
                value: alpha,
            });
        }
        if self.max_iter == 0 {
            return Err(PtychoError::ConfigError(
                "reconstruction.max_iter must be >= 1".to_string(),
            ));
        }
        if let Some(batch) = self.max_batch_size {
            if batch == 0 {
                return Err(PtychoError::ConfigError(
                    "reconstruction.max_batch_size must be >= 1".to_string(),
                ));
            }
            if self.reconstruction_method.uses_projection_scheme() {
                return Err(PtychoError::IncompatibleBatching(format!(
                    "stochastic object/probe updating is inconsistent with '{}'; \
                     use 'GD' or leave max_batch_size unset",
                    self.reconstruction_method.alias()
                )));
            }
        }
        if !self.reconstruction_method.uses_projection_scheme() {
            check_positive("step_size", self.step_size)?;
        }
        if !self.positions_step_size.is_finite() {
            return Err(PtychoError::ParameterOutOfRange {
                name: "positions_step_size",
                value: self.positions_step_size,
            });
        }
        let nm = self.normalization_min;
        if !nm.is_finite() || !(0.0..=1.0).contains(&nm) {
            return Err(PtychoError::ParameterOutOfRange {
                name: "normalization_min",
                value: nm,
            });
        }
        check_positive(
            "probe_support_relative_radius",
            self.probe_support_relative_radius,
        )?;
        check_positive(
            "probe_support_supergaussian_degree",
            self.probe_support_supergaussian_degree,
        )?;
        if let Some(sigma) = self.gaussian_blur_sigma {
            check_positive("gaussian_blur_sigma", sigma)?;
        }
        if let Some(bw) = &self.butterworth {
            if bw.q_lowpass.is_none() && bw.q_highpass.is_none() {
                return Err(PtychoError::ConfigError(
                    "reconstruction.butterworth needs q_lowpass or q_highpass".to_string(),
                ));
            }
            if let Some(q) = bw.q_lowpass {
                check_positive("butterworth.q_lowpass", q)?;
            }
            if let Some(q) = bw.q_highpass {
                check_positive("butterworth.q_highpass", q)?;
            }
            check_positive("butterworth.order", bw.order)?;
        }
        if let Some(tv) = &self.tv_denoise {
            check_positive("tv_denoise.weight", tv.weight)?;
        }
        if let Some(shrinkage) = self.shrinkage_rad {
            if !shrinkage.is_finite() || shrinkage < 0.0 {
                return Err(PtychoError::ParameterOutOfRange {
                    name: "shrinkage_rad",
                    value: shrinkage,
                });
            }
        }
        Ok(())
    }
}
