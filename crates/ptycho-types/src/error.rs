use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtychoError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "Unknown reconstruction method '{0}': expected one of 'gradient-descent' (GD), \
         'difference-map_alternating-projections' (DM_AP), \
         'relaxed-averaged-alternating-reflections' (RAAR)"
    )]
    UnknownMethod(String),

    #[error("Parameter {name} out of range: {value}")]
    ParameterOutOfRange { name: &'static str, value: f64 },

    #[error("Incompatible batching: {0}")]
    IncompatibleBatching(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PtychoResult<T> = Result<T, PtychoError>;
