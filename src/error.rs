//! Error types for the edge controller

use thiserror::Error;

use crate::pki::PkiError;

/// Boxed cause carried by connectivity errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for controller operations
///
/// Every variant that wraps a lower-level failure keeps it reachable through
/// [`std::error::Error::source`], prefixed with the operation that failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The addressed node, unit, deployment or policy does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The unit is not in a state that allows the requested command
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Input rejected before any backend was contacted
    #[error("validation error: {0}")]
    Validation(String),

    /// The request deadline elapsed before the operation completed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Node lookup or transport failure
    #[error("{context}: {source}")]
    Connection {
        /// Operation that was being attempted
        context: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// A node rejected an RPC with a status outside the normalized set
    #[error("{context}: {source}")]
    Rpc {
        /// Operation that was being attempted
        context: String,
        /// Status returned by the node
        #[source]
        source: tonic::Status,
    },

    /// Kubernetes API error
    #[error("{context}: {source}")]
    Kube {
        /// Operation that was being attempted
        context: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },

    /// Certificate authority failure
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Filesystem error outside the CA directory
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invariant broken inside the controller
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a failed-precondition error with the given message
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a deadline error naming the operation that timed out
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded(operation.into())
    }

    /// Create a connectivity error from any cause
    pub fn connection(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Create a Kubernetes error with an operation prefix
    pub fn kube(context: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Normalize a gRPC status returned by a node.
    ///
    /// `NotFound`, `FailedPrecondition` and `DeadlineExceeded` keep their
    /// category; anything else is wrapped with the operation name.
    pub fn from_status(context: impl Into<String>, status: tonic::Status) -> Self {
        let context = context.into();
        match status.code() {
            tonic::Code::NotFound => Self::NotFound(format!("{context}: {}", status.message())),
            tonic::Code::FailedPrecondition => {
                Self::FailedPrecondition(format!("{context}: {}", status.message()))
            }
            tonic::Code::DeadlineExceeded => {
                Self::DeadlineExceeded(format!("{context}: {}", status.message()))
            }
            _ => Self::Rpc {
                context,
                source: status,
            },
        }
    }

    /// True for errors meaning the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for errors meaning the command is not allowed in the current state
    pub fn is_failed_precondition(&self) -> bool {
        matches!(self, Self::FailedPrecondition(_))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
