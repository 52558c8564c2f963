/// Shared error type used across all Curio crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("schema version mismatch: found {found:?}, expected {expected:?}")]
    SchemaVersionMismatch { found: String, expected: String },

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("model preset not found: {0}")]
    ModelPresetNotFound(String),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("skill slug already in use: {0}")]
    SkillConflict(String),

    #[error("built-in entries are read-only: {0}")]
    BuiltInReadOnly(String),

    #[error("bundle is pending hard deletion: {0}")]
    BundleDeleting(String),

    #[error("bundle is disabled: {0}")]
    BundleDisabled(String),

    #[error("skill is disabled: {0}")]
    SkillDisabled(String),

    #[error("skill content is missing on disk: {0}")]
    SkillIsMissing(String),

    #[error("bundle still contains skills: {0}")]
    BundleNotEmpty(String),

    #[error("provider still owns model presets: {0}")]
    ProviderHasModels(String),

    #[error("runtime rejected {op}: {message}")]
    RuntimeRejected { op: String, message: String },
}

impl Error {
    /// Shorthand for the most common validation failure.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
