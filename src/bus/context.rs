//! # Dispatch completion handles.
//!
//! `dispatch`/`update` are fire-and-forget: they return a [`DispatchHandle`]
//! that callers may await when they need the publish to have happened (for
//! example before asserting on `value_of` in a test). Publishes without a
//! configured dispatch context run inline and hand back an
//! already-completed handle; publishes routed to a context wrap the spawned
//! task's join handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::error::DispatchError;

/// Completion handle for one `dispatch`/`update` call.
///
/// Awaiting is optional; dropping the handle does not cancel the publish.
#[derive(Debug)]
pub struct DispatchHandle {
    join: Option<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Publish already ran inline on the caller.
    pub(crate) fn ready() -> Self {
        Self { join: None }
    }

    /// Publish was spawned onto a dispatch context.
    pub(crate) fn spawned(join: JoinHandle<()>) -> Self {
        Self { join: Some(join) }
    }

    /// Whether the publish has already completed.
    ///
    /// Inline publishes are complete from construction.
    pub fn is_finished(&self) -> bool {
        match &self.join {
            None => true,
            Some(join) => join.is_finished(),
        }
    }
}

impl Future for DispatchHandle {
    type Output = Result<(), DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join.as_mut() {
            None => Poll::Ready(Ok(())),
            Some(join) => match Pin::new(join).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
                Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_handle_completes_immediately() {
        let handle = DispatchHandle::ready();
        assert!(handle.is_finished());
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_spawned_handle_waits_for_task() {
        let handle = DispatchHandle::spawned(tokio::spawn(async {}));
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_panicked_task_reports_error() {
        let handle = DispatchHandle::spawned(tokio::spawn(async { panic!("boom") }));
        assert!(matches!(
            handle.await,
            Err(DispatchError::Panicked { .. })
        ));
    }
}
