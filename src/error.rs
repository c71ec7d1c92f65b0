use thiserror::Error;

/// Validation failures for incoming attempt data.
///
/// These are client errors: the request never reaches feature synthesis
/// or the decision engine.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be non-negative, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("idle_time_percentage must be within 0-100, got {0}")]
    PercentageOutOfRange(f64),

    #[error("path_curvature_ratio must be >= 1.0, got {0}")]
    CurvatureBelowStraightLine(f64),

    #[error("country_code must be a 2-letter code, got {0:?}")]
    MalformedCountryCode(String),

    #[error("fingerprint_hash must be 16-64 characters, got {0}")]
    MalformedFingerprint(usize),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Baseline store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("baseline I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt baseline record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Classifier artifact load failures. Never fatal for the engine: the
/// caller falls back to rule-based scoring.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model artifact shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Top-level error for the assessment service.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}
