//! Error types for the DBQ queue storage engine.
//!
//! All public APIs return `DbqResult<T>`: no panics in library code.
//!
//! The accessor never lets a raw [`rusqlite::Error`] escape a public
//! operation: failures are reclassified into [`DbqError::Unavailable`] or
//! [`DbqError::Unknown`] by re-probing the connection at the moment of failure.

use thiserror::Error;

/// Boxed source error carried by the classified variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for all DBQ operations.
#[derive(Debug, Error)]
pub enum DbqError {
    /// Backend connectivity is lost or presumed lost.
    ///
    /// Callers should stop issuing queue operations for the store until a
    /// subsequent successful ping.
    #[error("storage unavailable: {context}")]
    Unavailable {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A single operation failed for a reason that does not indicate backend
    /// loss (constraint violation, deadlock victim, timeout).
    #[error("unknown database error: {context}")]
    Unknown {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A capacity limit was reached before any database access.
    #[error("overflow of '{property}': {message}")]
    Overflow { property: String, message: String },

    /// Operation intentionally unsupported by this storage kind
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Invalid arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Operation not allowed in the current state (shut down, not admin, ...)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// SQLite driver error (internal; reclassified at the accessor boundary)
    #[error("sqlite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// Connection pool error (exhausted, shut down, open failure)
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all DBQ operations.
pub type DbqResult<T> = Result<T, DbqError>;

impl From<serde_json::Error> for DbqError {
    fn from(err: serde_json::Error) -> Self {
        DbqError::Serialization(err.to_string())
    }
}

impl DbqError {
    /// `Unavailable` without an underlying cause.
    pub fn unavailable(context: impl Into<String>) -> Self {
        DbqError::Unavailable {
            context: context.into(),
            source: None,
        }
    }

    /// `Unavailable` wrapping the error that revealed the connection loss.
    pub fn unavailable_from(context: impl Into<String>, source: DbqError) -> Self {
        DbqError::Unavailable {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// `Unknown` wrapping the failed operation's error.
    pub fn unknown_from(context: impl Into<String>, source: DbqError) -> Self {
        DbqError::Unknown {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Overflow naming the exceeded property.
    pub fn overflow(property: impl Into<String>, message: impl Into<String>) -> Self {
        DbqError::Overflow {
            property: property.into(),
            message: message.into(),
        }
    }

    /// True when the backend is presumed lost.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DbqError::Unavailable { .. })
    }

    /// True for errors eligible for bounded retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbqError::Unknown { .. })
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, DbqError::Overflow { .. })
    }

    /// True if the error is already part of the public taxonomy and must be
    /// passed through unchanged by the classifier.
    pub(crate) fn is_classified(&self) -> bool {
        matches!(
            self,
            DbqError::Unavailable { .. }
                | DbqError::Unknown { .. }
                | DbqError::Overflow { .. }
                | DbqError::NotImplemented(_)
                | DbqError::InvalidArguments(_)
                | DbqError::IllegalState(_)
        )
    }
}
