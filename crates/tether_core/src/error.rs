//! # Core Error Types

use thiserror::Error;

/// Errors raised by the fixed-size component codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// Buffer length does not match the component's constant encoded size.
    #[error("{component} expects exactly {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Wire type name of the component.
        component: &'static str,
        /// Required length.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// Type string does not name a known fixed-size component.
    #[error("unknown component type: {0:?}")]
    UnknownComponent(String),

    /// Blob is tagged with a different type than the one requested.
    #[error("expected {expected} component, blob is tagged {actual:?}")]
    KindMismatch {
        /// Type requested by the caller.
        expected: &'static str,
        /// Type string carried by the blob.
        actual: String,
    },
}

/// Result type for component codec operations.
pub type ComponentResult<T> = Result<T, ComponentError>;
