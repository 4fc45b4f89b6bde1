//! Error types for the pipeline kernel.
//!
//! Two errors are control flow rather than failures: [`Error::Drop`] skips
//! the value in flight and [`Error::Quit`] ends the iteration cleanly. The
//! chain runner absorbs both; every other variant propagates.

use std::sync::Arc;
use thiserror::Error;

/// Boxed cause shared between clones of an [`Error`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// The main error type for sources, transforms, sinks and the decoder.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Sentinel: abandon the current value and continue with the next one
    #[error("value dropped")]
    Drop,

    /// Sentinel: end the iteration as if the source were exhausted
    #[error("iteration quit")]
    Quit,

    /// The envelope decoder rejected a message
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A source failed reading from a file, a server or another origin
    #[error("source error on {origin}: {cause}")]
    SourceIo { origin: String, cause: Cause },

    /// A sink failed writing or acknowledging
    #[error("sink error: {0}")]
    SinkIo(Cause),

    /// A transform failed for a reason other than the sentinels
    #[error("transform error: {0}")]
    Transform(Cause),

    /// Invalid construction parameters; fatal when building a source
    #[error("invalid configuration for {field}: {reason}")]
    Configuration { field: String, reason: String },

    /// A sink required a delivery back-reference and the value had none
    #[error("value carries no acknowledgement capability")]
    MissingAck,

    /// A channel was closed unexpectedly
    #[error("channel was closed unexpectedly")]
    ChannelClosed,

    /// An operation timed out
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),

    /// Multiple errors occurred (e.g. one per file of a multi-file source)
    #[error("{}", join(.0))]
    Multiple(Vec<Error>),
}

/// Failures of the envelope decoding state machine.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The delivery payload is not a `{version, payload}` envelope
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The payload carries an `event_type` the registry does not know
    #[error("unsupported event type {0:?}")]
    UnsupportedEventType(String),

    /// The payload does not fit the schema selected for its tag
    #[error("payload for {tag:?} does not match its schema: {cause}")]
    SchemaMismatch { tag: String, cause: String },
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}]", e))
        .collect::<Vec<_>>()
        .join(", ")
}

// Convenience constructors
impl Error {
    /// Create a source error from any error type
    pub fn source_io<E>(origin: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::SourceIo {
            origin: origin.into(),
            cause: Arc::new(error),
        }
    }

    /// Create a sink error from any error type
    pub fn sink<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::SinkIo(Arc::new(error))
    }

    /// Create a transform error from any error type
    pub fn transform<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Transform(Arc::new(error))
    }

    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Collapse a list of errors: none, the single one, or `Multiple`.
    pub fn join(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// True for the `Drop` and `Quit` sentinels.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Error::Drop | Error::Quit)
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Custom(format!("Timeout: {}", e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_sink_error(self) -> Result<T>;
    fn into_transform_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_sink_error(self) -> Result<T> {
        self.map_err(Error::sink)
    }

    fn into_transform_error(self) -> Result<T> {
        self.map_err(Error::transform)
    }
}
