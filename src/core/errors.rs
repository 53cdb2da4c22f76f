//! Error types for the covforge library.
//!
//! Library operations fail with [`CovforgeError`]. Per-iteration failures of an
//! improvement session (a test that does not compile, a crashing binary, a dead
//! generator) are not errors at all: they are recorded as
//! [`IterationFailure`](crate::core::pipeline::IterationFailure) data inside
//! coverage records and strategy outcomes so that a session always finishes
//! with a report.

use std::io;
use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

/// Main result type for covforge operations.
pub type Result<T> = std::result::Result<T, CovforgeError>;

/// Error type for all fallible covforge operations.
#[derive(Error, Debug)]
pub enum CovforgeError {
    /// I/O related errors (file operations, process spawning, etc.)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Invalid configuration. A session cannot start with this error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Parsing errors for C++ sources and coverage artifacts
    #[error("Parse error in {format}: {message}")]
    Parse {
        /// Input format being parsed (`cpp`, `gcov`, `lcov`, `cobertura`)
        format: String,
        /// Error description
        message: String,
        /// File path where error occurred
        file_path: Option<String>,
        /// Line number (if available)
        line: Option<usize>,
    },

    /// Validation errors for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Compiler or coverage tool could not be invoked at all
    #[error("Toolchain error ({tool}): {message}")]
    Toolchain {
        /// Tool that failed (`g++`, `gcov`, ...)
        tool: String,
        /// Error description
        message: String,
    },

    /// Test generator transport or protocol errors
    #[error("Generator error: {message}")]
    Generator {
        /// Error description
        message: String,
        /// HTTP status, when the generator answered at all
        status: Option<u16>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },

    /// Unsupported operation or input
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Error description
        message: String,
    },
}

impl CovforgeError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new parse error
    pub fn parse(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.into(),
            file_path: None,
            line: None,
        }
    }

    /// Create a new parse error with file context
    pub fn parse_with_location(
        format: impl Into<String>,
        message: impl Into<String>,
        file_path: impl Into<String>,
        line: Option<usize>,
    ) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.into(),
            file_path: Some(file_path.into()),
            line,
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new toolchain error
    pub fn toolchain(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Toolchain {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new generator error
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator {
            message: message.into(),
            status: None,
        }
    }

    /// Create a new generator error carrying an HTTP status
    pub fn generator_status(message: impl Into<String>, status: u16) -> Self {
        Self::Generator {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// True when this error must stop a session before it starts.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            Self::Io { message, .. }
            | Self::Toolchain { message, .. }
            | Self::Generator { message, .. } => {
                *message = format!("{}: {message}", context.into());
            }
            _ => {}
        }
        self
    }
}

impl From<io::Error> for CovforgeError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for CovforgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for CovforgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<ParseIntError> for CovforgeError {
    fn from(err: ParseIntError) -> Self {
        Self::validation(format!("Invalid integer: {err}"))
    }
}

impl From<ParseFloatError> for CovforgeError {
    fn from(err: ParseFloatError) -> Self {
        Self::validation(format!("Invalid float: {err}"))
    }
}

impl From<reqwest::Error> for CovforgeError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::generator_status(err.to_string(), status.as_u16()),
            None => Self::generator(err.to_string()),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CovforgeError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CovforgeError::config("Invalid configuration");
        assert!(matches!(err, CovforgeError::Config { .. }));
        assert!(err.is_fatal_config());

        let err = CovforgeError::parse("gcov", "Malformed line record");
        assert!(matches!(err, CovforgeError::Parse { .. }));
        assert!(!err.is_fatal_config());
    }

    #[test]
    fn test_error_with_context() {
        let err = CovforgeError::internal("Something went wrong").with_context("During rollup");

        if let CovforgeError::Internal { context, .. } = err {
            assert_eq!(context, Some("During rollup".to_string()));
        } else {
            panic!("Expected Internal error");
        }
    }

    #[test]
    fn test_io_context_is_prefixed() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = CovforgeError::io("read failed", io_err).with_context("Loading mock cache");

        if let CovforgeError::Io { message, source } = &err {
            assert_eq!(message, "Loading mock cache: read failed");
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        } else {
            panic!("Expected Io error");
        }
    }

    #[test]
    fn test_result_extension() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));

        let covforge_result = result.context("Failed to read configuration file");
        assert!(matches!(covforge_result, Err(CovforgeError::Io { .. })));
    }

    #[test]
    fn test_config_field_error() {
        let err = CovforgeError::config_field("must be positive", "session.max_iterations");

        if let CovforgeError::Config { message, field } = err {
            assert_eq!(message, "must be positive");
            assert_eq!(field, Some("session.max_iterations".to_string()));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_parse_with_location() {
        let err =
            CovforgeError::parse_with_location("lcov", "Bad DA record", "coverage.info", Some(7));

        if let CovforgeError::Parse {
            format,
            message,
            file_path,
            line,
        } = err
        {
            assert_eq!(format, "lcov");
            assert_eq!(message, "Bad DA record");
            assert_eq!(file_path, Some("coverage.info".to_string()));
            assert_eq!(line, Some(7));
        } else {
            panic!("Expected Parse error");
        }
    }

    #[test]
    fn test_generator_status() {
        let err = CovforgeError::generator_status("model not loaded", 503);
        assert_eq!(err.to_string(), "Generator error: model not loaded");
        assert!(matches!(
            err,
            CovforgeError::Generator {
                status: Some(503),
                ..
            }
        ));
    }

    #[test]
    fn test_from_parse_errors() {
        let int_err: CovforgeError = "x".parse::<i32>().unwrap_err().into();
        assert!(matches!(int_err, CovforgeError::Validation { .. }));

        let float_err: CovforgeError = "y".parse::<f64>().unwrap_err().into();
        assert!(matches!(float_err, CovforgeError::Validation { .. }));
    }

    #[test]
    fn test_serialization_from_json() {
        let err: CovforgeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(
            err,
            CovforgeError::Serialization {
                data_type: Some(ref t),
                ..
            } if t == "JSON"
        ));
    }
}
