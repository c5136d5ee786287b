//! Error types for zampy.

use thiserror::Error;

/// Result type alias using ZampyError.
pub type Result<T> = std::result::Result<T, ZampyError>;

/// Coarse classification of a [`ZampyError`], used for retry decisions and
/// for the end-of-run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed recipe or unknown names; raised before any work starts.
    Validation,
    /// Archive timeout or rate limit; retried with backoff.
    TransientRemote,
    /// Authorization missing, terms not accepted, permanent rejection.
    FatalRemote,
    /// Malformed artifact or unregistered unit conversion.
    DataIntegrity,
    /// Requested output finer than the source supports.
    Resolution,
    /// Local filesystem or index failure.
    Io,
    /// The run was aborted between stages.
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TransientRemote => "transient-remote",
            Self::FatalRemote => "fatal-remote",
            Self::DataIntegrity => "data-integrity",
            Self::Resolution => "resolution",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Primary error type for the recipe pipeline.
#[derive(Debug, Error)]
pub enum ZampyError {
    // === Validation Errors ===
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("Unknown variable '{0}': not present in the variable registry")]
    UnknownVariable(String),

    #[error("Dataset '{dataset}' does not provide variable '{variable}'")]
    UnsupportedVariable { dataset: String, variable: String },

    #[error("Unknown convention '{0}'")]
    UnknownConvention(String),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Invalid frequency '{0}'")]
    InvalidFrequency(String),

    #[error("Invalid resolution {0}: must be a positive number of degrees")]
    InvalidResolution(f64),

    #[error("Dataset '{dataset}' does not cover the requested time range: {detail}")]
    TimeOutOfCoverage { dataset: String, detail: String },

    // === Remote Errors ===
    #[error("Remote archive unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Authorization required: {0}")]
    AuthorizationRequired(String),

    #[error("Request not supported by the archive: {0}")]
    UnsupportedRequest(String),

    #[error("Download of '{key}' failed after {attempts} attempt(s): {source}")]
    DownloadFailed {
        key: String,
        attempts: u32,
        #[source]
        source: Box<ZampyError>,
    },

    #[error("Raw artifact '{0}' is not available locally and downloading is disabled")]
    ArtifactMissing(String),

    // === Data Integrity Errors ===
    #[error("Malformed artifact '{path}': {message}")]
    MalformedArtifact { path: String, message: String },

    #[error("No registered conversion from '{from}' to '{to}' for variable '{variable}'")]
    UnsupportedUnitConversion {
        variable: String,
        from: String,
        to: String,
    },

    // === Resolution Errors ===
    #[error("Upsampling is not supported: requested {requested} is finer than the native {native}")]
    UnsupportedUpsampling { requested: String, native: String },

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Artifact index error: {0}")]
    Index(String),

    #[error("Cancelled before stage '{0}'")]
    Cancelled(String),
}

impl ZampyError {
    /// Build a MalformedArtifact error.
    pub fn malformed(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Classify this error according to the pipeline's error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ZampyError::InvalidRecipe(_)
            | ZampyError::InvalidConfig(_)
            | ZampyError::UnknownDataset(_)
            | ZampyError::UnknownVariable(_)
            | ZampyError::UnsupportedVariable { .. }
            | ZampyError::UnknownConvention(_)
            | ZampyError::InvalidBounds(_)
            | ZampyError::InvalidFrequency(_)
            | ZampyError::InvalidResolution(_)
            | ZampyError::TimeOutOfCoverage { .. } => ErrorCategory::Validation,

            ZampyError::RemoteUnavailable(_) => ErrorCategory::TransientRemote,

            ZampyError::AuthorizationRequired(_)
            | ZampyError::UnsupportedRequest(_)
            | ZampyError::ArtifactMissing(_) => ErrorCategory::FatalRemote,

            // Exhausted retries are reported by the cause that exhausted them.
            ZampyError::DownloadFailed { source, .. } => match source.category() {
                ErrorCategory::TransientRemote => ErrorCategory::FatalRemote,
                other => other,
            },

            ZampyError::MalformedArtifact { .. }
            | ZampyError::UnsupportedUnitConversion { .. }
            | ZampyError::Serialization(_) => ErrorCategory::DataIntegrity,

            ZampyError::UnsupportedUpsampling { .. } => ErrorCategory::Resolution,

            ZampyError::Io(_) | ZampyError::Index(_) => ErrorCategory::Io,

            ZampyError::Cancelled(_) => ErrorCategory::Cancelled,
        }
    }

    /// Whether the Download Coordinator may retry after this error.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::TransientRemote
    }
}

impl From<serde_json::Error> for ZampyError {
    fn from(err: serde_json::Error) -> Self {
        ZampyError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for ZampyError {
    fn from(err: serde_yaml::Error) -> Self {
        ZampyError::Serialization(format!("YAML error: {}", err))
    }
}
