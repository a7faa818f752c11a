//! Error kinds surfaced by the execution engine.
//!
//! The kinds mirror how a failed case should be reported: configuration
//! mistakes abort immediately, assertion failures carry both sides of the
//! comparison, transport and database errors pass through from the
//! underlying drivers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TauonError {
    /// A case or rule is malformed: missing required field, unsupported
    /// body-encoding mode, unknown assertion type, bad cookies value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A comparison predicate rejected the actual value.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// No case with the requested id exists in the corpus.
    #[error("case not found: {0}")]
    CaseNotFound(String),

    /// An interface dependence chain reached a case already executing.
    #[error("cyclic case dependence: {0}")]
    CyclicDependence(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type TauonResult<T> = Result<T, TauonError>;

impl TauonError {
    /// True for failures that indicate a broken case definition rather
    /// than a failed check.
    pub fn is_config(&self) -> bool {
        matches!(self, TauonError::Config(_))
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, TauonError::Assertion(_))
    }
}
