//! Custom error types for conversion sessions.
//!
//! Every fatal failure of a session is a [`ConvertError`]. Temporary file
//! cleanup failures are deliberately absent from this module: they are
//! reported as [`SessionEvent`](crate::events::SessionEvent)s instead.

use std::path::PathBuf;

use shpstream_common::GeometryType;
use thiserror::Error;

/// Boxed source error from a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for conversion sessions.
///
/// It uses `#[error(transparent)]` to delegate display formatting to the
/// underlying error variants.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Invalid options, raised before any feature is accepted
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The encoder rejected a record or failed to finalize
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Temporary file allocation or read-back failed
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A feature could not be reprojected
    #[error("Failed to reproject feature from EPSG:{from} to EPSG:{to}: {source}")]
    Reproject {
        /// Source EPSG code
        from: u32,
        /// Target EPSG code
        to: u32,
        /// The underlying error
        #[source]
        source: BoxError,
    },

    /// The archiver failed while packaging the output
    #[error("Failed to package output: {source}")]
    Archive {
        /// The underlying error
        #[source]
        source: BoxError,
    },

    /// An output file could not be read back
    #[error("Failed to read output file '{name}': {source}")]
    Read {
        /// The output file name
        name: String,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// A previous fatal error ended the session
    #[error("Conversion failed: {reason}")]
    SessionFailed {
        /// Message of the error that ended the session
        reason: String,
    },

    /// The session no longer accepts commands
    #[error("Conversion session is closed")]
    SessionClosed,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },

    /// No definition is registered for a spatial reference
    #[error("Unknown spatial reference EPSG:{code}")]
    UnknownCrs {
        /// The EPSG code
        code: u32,
    },

    /// Required option or collaborator is missing
    #[error("Missing required option: {option}")]
    MissingRequired {
        /// The missing option name
        option: String,
    },
}

/// Encoding errors, fatal to the whole session.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// No encoder family accepts this geometry
    #[error("Unsupported geometry type: {geometry}")]
    UnsupportedGeometry {
        /// Name of the geometry variant
        geometry: String,
    },

    /// The encoder for a geometry type could not be created
    #[error("Failed to create {geometry_type} encoder: {source}")]
    Create {
        geometry_type: GeometryType,
        #[source]
        source: BoxError,
    },

    /// A record was rejected
    #[error("Failed to encode {geometry_type} record: {source}")]
    Record {
        geometry_type: GeometryType,
        #[source]
        source: BoxError,
    },

    /// Finalizing the encoder failed
    #[error("Failed to finalize {geometry_type} encoder: {source}")]
    Finish {
        geometry_type: GeometryType,
        #[source]
        source: BoxError,
    },
}

/// Temporary resource errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Failed to create a backing file
    #[error("Failed to create temporary file '{path}': {source}")]
    Create {
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to reopen a backing file for read-back
    #[error("Failed to read temporary file '{path}': {source}")]
    Open {
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The same (geometry type, extension) pair was requested twice
    #[error("Temporary file for {geometry_type}.{extension} already allocated")]
    AlreadyAllocated {
        geometry_type: GeometryType,
        extension: String,
    },
}

/// Type alias for Results using `ConvertError`.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Encode(e) => format!("Encoding error: {e}"),
            Self::Resource(e) => format!("Temporary storage error: {e}"),
            Self::Reproject { .. } | Self::Archive { .. } | Self::Read { .. } => self.to_string(),
            Self::SessionFailed { .. } | Self::SessionClosed => {
                format!("{self}. Start a new conversion.")
            },
        }
    }

    /// Check if this error is potentially recoverable.
    ///
    /// Only configuration errors are: they are raised before a session starts,
    /// so retrying with corrected options is possible. Every other error is
    /// terminal for its session.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Collapse this error into the marker delivered to late observers of a
    /// failed session.
    #[must_use]
    pub fn to_session_failure(&self) -> ConvertError {
        match self {
            Self::SessionFailed { reason } => Self::SessionFailed {
                reason: reason.clone(),
            },
            other => Self::SessionFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ConvertError::from(ConfigError::InvalidOption {
            option: "source_crs".to_string(),
            message: "'abc' is not an integer".to_string(),
        });

        assert_eq!(
            error.to_string(),
            "Invalid source_crs option: 'abc' is not an integer"
        );
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_encode_error_is_terminal() {
        let error = ConvertError::from(EncodeError::Record {
            geometry_type: GeometryType::Point,
            source: "bad record".into(),
        });

        assert_eq!(
            error.to_string(),
            "Failed to encode point record: bad record"
        );
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_session_failure_keeps_reason() {
        let error = ConvertError::from(EncodeError::UnsupportedGeometry {
            geometry: "GeometryCollection".to_string(),
        });

        let failure = error.to_session_failure();
        assert_eq!(
            failure.to_string(),
            "Conversion failed: Unsupported geometry type: GeometryCollection"
        );
        assert_eq!(
            failure.to_session_failure().to_string(),
            failure.to_string()
        );
    }
}
