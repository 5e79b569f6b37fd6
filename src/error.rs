//! Error types for the flowbus public surface.
//!
//! The lock-free core has no recoverable errors: CAS retry loops always make
//! progress and consumer cancellation is a normal termination path. The only
//! fallible operation is awaiting a [`DispatchHandle`](crate::DispatchHandle)
//! whose publish ran on a configured dispatch context and never completed.

use thiserror::Error;

/// # Errors observable when awaiting a dispatched publish.
///
/// Inline publishes (no dispatch context configured for the type) complete
/// before `dispatch`/`update` return and can never produce these.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The dispatch context's runtime shut down before the publish ran.
    #[error("publish task was canceled before it ran")]
    Canceled,

    /// The publish task panicked (an `update` transform panicked on the
    /// dispatch context).
    #[error("publish task panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use flowbus::DispatchError;
    ///
    /// assert_eq!(DispatchError::Canceled.as_label(), "dispatch_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Canceled => "dispatch_canceled",
            DispatchError::Panicked { .. } => "dispatch_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            DispatchError::Canceled => "canceled before running".to_string(),
            DispatchError::Panicked { message } => format!("panicked: {message}"),
        }
    }
}

impl From<tokio::task::JoinError> for DispatchError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            DispatchError::Canceled
        } else {
            DispatchError::Panicked {
                message: err.to_string(),
            }
        }
    }
}
