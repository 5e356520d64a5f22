//! Error types for the pool state synchronizer.
//!
//! This module provides a unified error type [`TrackerError`] covering every
//! failure the sync pipeline distinguishes between.
//!
//! # Design
//!
//! The error hierarchy is organized by how the controller reacts to it:
//! - [`TrackerError::ConfigError`]: bad configuration; fatal during startup
//! - [`TrackerError::RpcError`]: a log fetch or call failed; retried next cycle
//! - [`TrackerError::DecodingError`]: a single log could not be decoded; dropped
//! - [`TrackerError::MetadataError`]: pool metadata could not be resolved;
//!   the pool is remembered as known-invalid
//! - [`TrackerError::StateError`]: store or cursor invariants were violated
//! - [`TrackerError::CacheError`]: the on-disk cache artifact is unusable
//!
//! # Example
//!
//! ```
//! use dex_state_sync::error::{TrackerError, TrackerResult};
//!
//! fn validate_window(from: u64, to: u64) -> TrackerResult<()> {
//!     if from > to {
//!         return Err(TrackerError::state("window start is past its end", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`TrackerError`].
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Boxed error used as the optional source of every variant.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the synchronizer.
#[derive(Debug)]
pub enum TrackerError {
    /// Configuration or environment variable errors.
    ///
    /// Variants include:
    /// - Missing or invalid environment variables
    /// - Unsupported exchange names
    /// - Unreadable dataset files at startup
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// RPC provider or network errors.
    ///
    /// A failed `eth_getLogs` aborts the whole gather; the controller keeps
    /// its cursor and tries the same range again next cycle.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Event decoding errors.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Token or fee resolution failed for a pool.
    MetadataError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// State management or validation errors.
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Reading or writing the cache artifact failed.
    CacheError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },
}

impl TrackerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_state_sync::error::TrackerError;
    ///
    /// let err = TrackerError::config("RPC_URL not set", None);
    /// assert!(matches!(err, TrackerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_state_sync::error::TrackerError;
    ///
    /// let err = TrackerError::rpc("Failed to fetch logs", None);
    /// assert!(err.is_transient());
    /// ```
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new metadata resolution error.
    #[must_use]
    pub fn metadata(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::MetadataError {
            message: message.into(),
            source,
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new cache error.
    #[must_use]
    pub fn cache(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::CacheError {
            message: message.into(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// RPC and cache I/O failures are transient. Everything else points at
    /// bad input that a retry would reproduce.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RpcError { .. } | Self::CacheError { .. })
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::MetadataError { message, .. } => {
                write!(f, "Metadata resolution error: {message}")
            }
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
            Self::CacheError { message, .. } => write!(f, "Cache error: {message}"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::MetadataError { source, .. }
            | Self::StateError { source, .. }
            | Self::CacheError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
        }
    }
}

/// Convert from `eyre::Report` to `TrackerError`.
///
/// Reports reaching the library come from provider plumbing, so they are
/// categorized as RPC errors.
impl From<eyre::Report> for TrackerError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error() {
        let err = TrackerError::config("test error", None);
        assert!(matches!(err, TrackerError::ConfigError { .. }));
        assert_eq!(err.to_string(), "Configuration error: test error");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rpc_error_is_transient() {
        let err = TrackerError::rpc("connection failed", None);
        assert_eq!(err.to_string(), "RPC error: connection failed");
        assert!(err.is_transient());
    }

    #[test]
    fn test_metadata_error() {
        let err = TrackerError::metadata("token0() reverted", None);
        assert!(matches!(err, TrackerError::MetadataError { .. }));
        assert_eq!(err.to_string(), "Metadata resolution error: token0() reverted");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_cache_error_is_transient() {
        let err = TrackerError::cache("disk full", None);
        assert_eq!(err.to_string(), "Cache error: disk full");
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = TrackerError::config("failed to load", Some(Box::new(source)));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Configuration error: failed to load");
    }

    #[test]
    fn test_from_eyre_report() {
        let err: TrackerError = eyre::eyre!("provider hung up").into();
        assert!(matches!(err, TrackerError::RpcError { .. }));
    }
}
