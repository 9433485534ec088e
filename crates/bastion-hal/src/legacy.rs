//! Legacy hardcoded action handlers.
//!
//! Action types that predate the capability registry are still served by
//! black-box handler functions.  The dispatcher falls back to this table when
//! no usable leaf exists.  Handlers return the same [`LeafOutcome`] envelope
//! as leaves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_types::{LeafOutcome, ParamMap};
use tracing::debug;

use crate::leaf::LeafContext;

#[async_trait]
pub trait LegacyHandler: Send + Sync {
    async fn handle(&self, ctx: &LeafContext, params: &ParamMap) -> LeafOutcome;
}

/// Handlers keyed by action type.
#[derive(Default, Clone)]
pub struct LegacyHandlerTable {
    handlers: HashMap<String, Arc<dyn LegacyHandler>>,
}

impl LegacyHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `action_type`, replacing any previous one.
    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn LegacyHandler>) {
        let action_type = action_type.into();
        debug!(%action_type, "legacy handler registered");
        self.handlers.insert(action_type, handler);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn LegacyHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
