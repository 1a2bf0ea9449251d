//! Error taxonomy for storage operations.
//!
//! Every failure carries the [`Stage`] it happened in so callers can tell a
//! failed probe from a rejected completion without string matching.

use std::fmt;

use thiserror::Error;

/// Boxed error used as the `source` of backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where an operation failed.
///
/// The first five variants are the states of a copy call; the rest name the
/// pass-through capability that was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading the source object's length.
    Probing,
    /// Partitioning the source into byte ranges.
    Planning,
    /// Opening the upload session and copying byte ranges into it.
    CopyingParts,
    /// Submitting the ordered part list.
    Completing,
    /// Single-request copy of a small object.
    DirectCopy,
    /// [`Storage::list`](crate::Storage::list).
    List,
    /// [`Storage::walk`](crate::Storage::walk).
    Walk,
    /// [`Storage::create`](crate::Storage::create).
    Create,
    /// [`Storage::get`](crate::Storage::get).
    Get,
    /// [`Storage::put`](crate::Storage::put).
    Put,
    /// [`Storage::link`](crate::Storage::link).
    Link,
    /// [`Storage::delete`](crate::Storage::delete).
    Delete,
    /// [`Storage::stat`](crate::Storage::stat).
    Stat,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Probing => "probing",
            Stage::Planning => "planning",
            Stage::CopyingParts => "copying parts",
            Stage::Completing => "completing",
            Stage::DirectCopy => "direct copy",
            Stage::List => "list",
            Stage::Walk => "walk",
            Stage::Create => "create",
            Stage::Get => "get",
            Stage::Put => "put",
            Stage::Link => "link",
            Stage::Delete => "delete",
            Stage::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// Primary error type for all storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// Missing key, with its container when known.
        key: String,
    },

    /// Object needs more parts than the backend accepts in one upload.
    #[error("copying {length} bytes needs {parts} parts, backend allows at most {max_parts}")]
    PlanTooLarge {
        /// Source length in bytes.
        length: u64,
        /// Parts the source would need.
        parts: u64,
        /// Parts the backend accepts.
        max_parts: u64,
    },

    /// Transport, auth or protocol rejection from the backend.
    #[error("{stage} failed for {key}: {message}")]
    Backend {
        /// Stage that was running.
        stage: Stage,
        /// Object the request addressed.
        key: String,
        /// Backend message, with error context.
        message: String,
        /// Underlying client error.
        #[source]
        source: Option<BoxError>,
    },

    /// Caller cancelled the operation.
    #[error("cancelled while {stage}")]
    Cancelled {
        /// Stage that was interrupted or not started.
        stage: Stage,
    },

    /// Method called with an empty path.
    #[error("empty file path")]
    EmptyPath,

    /// Capability the backend does not provide.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Backend kind.
        backend: &'static str,
    },

    /// URI refers to a backend with no client configured.
    #[error("{backend} backend is not configured")]
    NotConfigured {
        /// Backend kind.
        backend: &'static str,
    },

    /// URI that does not match a known scheme.
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri {
        /// URI as given.
        uri: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Argument outside what the operation accepts.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was rejected.
        reason: String,
    },

    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Backend failure without an underlying error value.
    pub fn backend(stage: Stage, key: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Backend {
            stage,
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Re-tags a backend failure or cancellation with the stage the caller
    /// was in. Other variants already say what went wrong and pass through.
    pub fn at_stage(self, at: Stage) -> Self {
        match self {
            StorageError::Backend {
                key,
                message,
                source,
                ..
            } => StorageError::Backend {
                stage: at,
                key,
                message,
                source,
            },
            StorageError::Cancelled { .. } => StorageError::Cancelled { stage: at },
            other => other,
        }
    }

    /// Stage the failure is attributed to, if it has one. An oversized plan
    /// always fails while planning.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StorageError::Backend { stage, .. } | StorageError::Cancelled { stage } => Some(*stage),
            StorageError::PlanTooLarge { .. } => Some(Stage::Planning),
            _ => None,
        }
    }

    /// True for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True for [`StorageError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled { .. })
    }
}

/// Result type alias for storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stage_retags_backend_errors() {
        let err = StorageError::backend(Stage::DirectCopy, "a/b", "denied").at_stage(Stage::Completing);
        assert_eq!(err.stage(), Some(Stage::Completing));
        assert_eq!(err.to_string(), "completing failed for a/b: denied");
    }

    #[test]
    fn test_at_stage_keeps_other_variants() {
        let err = StorageError::NotFound { key: "x".into() }.at_stage(Stage::CopyingParts);
        assert!(err.is_not_found());
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_plan_too_large_is_a_planning_failure() {
        let err = StorageError::PlanTooLarge {
            length: 100,
            parts: 13,
            max_parts: 4,
        };
        assert_eq!(err.stage(), Some(Stage::Planning));
        assert_eq!(err.at_stage(Stage::CopyingParts).stage(), Some(Stage::Planning));
    }

    #[test]
    fn test_io_error_converts() {
        let err: StorageError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
