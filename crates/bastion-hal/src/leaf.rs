//! Generic [`Leaf`] trait for capability executors.
//!
//! A leaf performs one action type's real-world effect (walking to a block,
//! swinging a sword, crafting a recipe).  Leaves register themselves with a
//! [`CapabilityRegistry`][crate::registry::CapabilityRegistry]; the dispatcher
//! only ever talks to the trait, so executors can be swapped without touching
//! planning or safety logic.
//!
//! Every call carries a [`LeafContext`] with an abort token and a timeout.
//! Enforcing both is the leaf's job: an aborted leaf must return a terminal,
//! non-retryable [`LeafOutcome::aborted`] before its timeout elapses.
//! [`run_abortable`] does this for any future.

use std::time::Duration;

use async_trait::async_trait;
use bastion_types::{LeafError, LeafOutcome, LeafSpec, ParamMap};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Error code reported by [`run_abortable`] when the timeout elapses first.
pub const TIMEOUT_CODE: &str = "timeout";

/// Per-call context handed to [`Leaf::run`].
#[derive(Debug, Clone)]
pub struct LeafContext {
    pub request_id: Uuid,
    pub action_type: String,
    /// Lease holder the call runs under, for navigation actions.
    pub holder: Option<String>,
    pub timeout: Duration,
    pub abort: CancellationToken,
}

impl LeafContext {
    pub fn new(action_type: impl Into<String>, timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action_type: action_type.into(),
            holder: None,
            timeout,
            abort: CancellationToken::new(),
        }
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// A pluggable executor implementing one action type.
#[async_trait]
pub trait Leaf: Send + Sync {
    fn spec(&self) -> &LeafSpec;

    /// Perform the action with already-normalized `params`.
    async fn run(&self, ctx: &LeafContext, params: &ParamMap) -> LeafOutcome;
}

/// Drive `work` to completion unless the context's abort token fires or its
/// timeout elapses first.
///
/// Abort wins over timeout when both are ready.
pub async fn run_abortable<F>(ctx: &LeafContext, work: F) -> LeafOutcome
where
    F: Future<Output = LeafOutcome> + Send,
{
    if ctx.is_aborted() {
        return LeafOutcome::aborted(format!("{} aborted before start", ctx.action_type));
    }
    tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => {
            LeafOutcome::aborted(format!("{} aborted", ctx.action_type))
        }
        _ = tokio::time::sleep(ctx.timeout) => {
            LeafOutcome::failure(LeafError::new(
                TIMEOUT_CODE,
                format!("{} exceeded {} ms", ctx.action_type, ctx.timeout.as_millis()),
                true,
            ))
        }
        outcome = work => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completes_when_not_aborted() {
        let ctx = LeafContext::new("dig_block", Duration::from_secs(1));
        let out = run_abortable(&ctx, async { LeafOutcome::success(json!({"dug": 1})) }).await;
        assert!(out.is_success());
    }

    #[tokio::test]
    async fn abort_yields_terminal_failure() {
        let ctx = LeafContext::new("navigate", Duration::from_secs(5));
        let token = ctx.abort.clone();
        let work = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            LeafOutcome::success(json!(null))
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let out = run_abortable(&ctx, work).await;
        handle.await.unwrap();
        let err = out.error.expect("aborted outcome carries an error");
        assert!(err.is_aborted());
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn pre_cancelled_context_never_starts() {
        let ctx = LeafContext::new("navigate", Duration::from_secs(5));
        ctx.abort.cancel();
        let out = run_abortable(&ctx, async { LeafOutcome::success(json!(1)) }).await;
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn timeout_is_retryable_failure() {
        let ctx = LeafContext::new("navigate", Duration::from_millis(10));
        let out = run_abortable(&ctx, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            LeafOutcome::success(json!(null))
        })
        .await;
        let err = out.error.unwrap();
        assert_eq!(err.code, TIMEOUT_CODE);
        assert!(err.retryable);
    }
}
