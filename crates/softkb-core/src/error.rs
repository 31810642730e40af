//! Error types for softkb

use thiserror::Error;

/// Result type alias using softkb's Error
pub type Result<T> = std::result::Result<T, Error>;

/// softkb error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Source errors (E100-E199)
    #[error("Malformed record from source '{source_name}' at {location}: {reason}")]
    MalformedSourceRecord {
        source_name: String,
        location: String,
        reason: String,
    },

    // Template errors (E200-E299)
    #[error("Entity template '{0}' could not be loaded. Check `resources.templates_dir`.")]
    TemplateMissing(String),

    // Merge errors (E300-E399)
    #[error("Merge invariant violated: {0}")]
    MergeInvariantViolation(String),

    // Lookup errors (E400-E499)
    #[error("External lookup to {service} failed: {reason}")]
    ExternalLookupFailure { service: String, reason: String },

    // Storage errors (E500-E599)
    #[error("Storage unavailable: {0}. Run `softkb doctor` to check the database.")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Lookup-by-id errors (E700-E799)
    #[error("Not found: {0}")]
    NotFound(String),

    // Input errors (E800-E899)
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Network errors (E900-E999)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedSourceRecord { .. } => "E100",
            Self::TemplateMissing(_) => "E200",
            Self::MergeInvariantViolation(_) => "E300",
            Self::ExternalLookupFailure { .. } => "E400",
            Self::StorageUnavailable(_) => "E500",
            Self::DatabaseError(_) => "E501",
            Self::ConfigError(_) => "E600",
            Self::NotFound(_) => "E700",
            Self::Parse(_) => "E800",
            Self::InvalidInput(_) => "E801",
            Self::Network(_) => "E900",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::TemplateMissing(_) => {
                Some("softkb config get resources.templates_dir".to_string())
            }
            Self::StorageUnavailable(_) => Some("softkb doctor".to_string()),
            Self::ConfigError(_) => Some("softkb config list".to_string()),
            Self::MergeInvariantViolation(_) => Some("softkb merge".to_string()),
            Self::NotFound(_) => Some("softkb stats".to_string()),
            _ => None,
        }
    }

    /// Whether the pipeline may skip the offending record and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedSourceRecord { .. }
                | Self::MergeInvariantViolation(_)
                | Self::ExternalLookupFailure { .. }
        )
    }

    pub(crate) fn malformed(
        source_name: impl Into<String>,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedSourceRecord {
            source_name: source_name.into(),
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn lookup(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalLookupFailure {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_record_error() {
        let error = Error::malformed("CRAN", "packages.jsonl:12", "missing Package");
        assert_eq!(error.code(), "E100");
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("packages.jsonl:12"));
        assert!(error.to_string().contains("CRAN"));
    }

    #[test]
    fn test_template_missing_error() {
        let error = Error::TemplateMissing("software".to_string());
        assert_eq!(error.code(), "E200");
        assert!(!error.is_recoverable());
        assert_eq!(
            error.suggestion(),
            Some("softkb config get resources.templates_dir".to_string())
        );
    }

    #[test]
    fn test_storage_unavailable_is_fatal() {
        let error = Error::StorageUnavailable("no such file".to_string());
        assert_eq!(error.code(), "E500");
        assert!(!error.is_recoverable());
        assert_eq!(error.suggestion(), Some("softkb doctor".to_string()));
    }

    #[test]
    fn test_lookup_failure_is_recoverable() {
        let error = Error::lookup("biblio-glutton", "status 404");
        assert_eq!(error.code(), "E400");
        assert!(error.is_recoverable());
        assert_eq!(error.suggestion(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: Error = io.into();
        assert_eq!(error.code(), "E9999");
    }
}
