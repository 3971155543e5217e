//! Error types for array, coordinate and store operations.

use thiserror::Error;

use crate::units::UnitError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data model.
///
/// Every failure is local and synchronous: nothing is retried and nothing
/// degrades silently.
#[derive(Error, Debug)]
pub enum DataError {
    /// Two arrays (or an array and its variance) do not have the same extent.
    #[error("Operation forbidden for arrays with different sizes ({context}): expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// What was being combined
        context: String,
        /// Shape of the reference operand
        expected: Vec<usize>,
        /// Shape of the offending operand
        found: Vec<usize>,
    },

    /// Both operands carry coordinate descriptors and they disagree.
    #[error("Operation forbidden for objects with different world coordinates in {axis} direction")]
    IncompatibleCoordinates {
        /// "spectral" or "spatial"
        axis: &'static str,
    },

    /// The pair of operand kinds cannot be combined.
    #[error("Operation forbidden between {left} and {right}")]
    UnsupportedCombination {
        /// Kind of the left operand
        left: &'static str,
        /// Kind of the right operand
        right: &'static str,
    },

    /// The operation needs a variance array and none is tracked.
    #[error("Operation '{operation}' forbidden without variance")]
    MissingVariance {
        /// Name of the operation
        operation: &'static str,
    },

    /// The operation needs a coordinate descriptor that is absent.
    #[error("Operation '{operation}' forbidden without {which} coordinates")]
    MissingCoordinates {
        /// Name of the operation
        operation: &'static str,
        /// "spatial" or "spectral"
        which: &'static str,
    },

    /// A persisted layer does not have the rank the caller asked for.
    #[error("Wrong dimension number in layer '{layer}': expected {expected}, found {found}")]
    WrongRank {
        /// Layer name
        layer: String,
        /// Expected rank
        expected: usize,
        /// Rank found in the store
        found: usize,
    },

    /// Index outside the extent of an axis.
    #[error("Index {index} out of bounds for axis {axis} of length {len}")]
    IndexOutOfBounds {
        /// Axis number
        axis: usize,
        /// Requested index
        index: usize,
        /// Axis length
        len: usize,
    },

    /// A selection produced no elements.
    #[error("Empty selection: {context}")]
    EmptySelection {
        /// Description of the selection
        context: String,
    },

    /// An argument is outside its accepted domain.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem
        message: String,
    },

    /// Unit parsing or conversion failed.
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    /// The backing store rejected a read or write.
    #[error("Store error: {message}")]
    Store {
        /// Description of the store failure
        message: String,
    },

    /// NumPy array encoding or decoding failed.
    #[error("NumPy array error: {message}")]
    Npy {
        /// Underlying error rendered as text
        message: String,
    },

    /// I/O error from the filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Header (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A per-slice function failed during parallel mapping.
    #[error("{message}\n The error occurred for the {position}")]
    Worker {
        /// Position of the failing slice, e.g. "spectrum [:,2,3]"
        position: String,
        /// Error reported by the function
        message: String,
    },
}

impl DataError {
    /// Create a shape mismatch error.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: &[usize],
        found: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an empty selection error.
    pub fn empty_selection(context: impl Into<String>) -> Self {
        Self::EmptySelection {
            context: context.into(),
        }
    }
}

impl From<ndarray_npy::ReadNpyError> for DataError {
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        Self::Npy {
            message: e.to_string(),
        }
    }
}

impl From<ndarray_npy::WriteNpyError> for DataError {
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::Npy {
            message: e.to_string(),
        }
    }
}

impl From<ndarray::ShapeError> for DataError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::InvalidArgument {
            message: format!("shape error: {}", e),
        }
    }
}
