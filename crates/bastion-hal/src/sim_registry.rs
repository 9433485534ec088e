//! [`SimRegistry`] – In-process capability registry for CI/CD.
//!
//! Builds a [`LeafRegistry`] whose every slot is backed by a scripted
//! [`SimLeaf`] that records calls without touching a game client.  This lets
//! the dispatcher, lease manager and safety monitor run headless in tests.
//!
//! # Stub behaviour
//!
//! | Builder call | Leaf behaviour |
//! |---|---|
//! | `with_leaf` | Succeeds with `{"leaf": name}`. |
//! | `with_placeholder` | Registered as a placeholder; must never run. |
//! | `with_failing_leaf` | Fails with the supplied [`LeafError`]. |
//! | `with_sim_leaf` | Any hand-configured [`SimLeaf`] (custom result, delay). |
//! | `unroutable` | Marks a name as not routable for guarded contracts. |
//!
//! A leaf configured with a delay honours its abort token and timeout through
//! [`run_abortable`].
//!
//! # Example
//!
//! ```rust
//! use bastion_hal::sim_registry::SimRegistry;
//!
//! let sim = SimRegistry::builder()
//!     .with_leaf("navigate")
//!     .with_placeholder("smelt")
//!     .build();
//!
//! let registry = sim.registry();
//! assert!(registry.get("navigate").is_some());
//! assert!(registry.get("smelt").unwrap().spec().placeholder);
//! assert_eq!(sim.calls("navigate"), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bastion_types::{LeafError, LeafOutcome, LeafSpec, ParamMap};
use serde_json::{Value, json};

use crate::leaf::{Leaf, LeafContext, run_abortable};
use crate::legacy::LegacyHandler;
use crate::registry::{CapabilityRegistry, LeafRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// Stub leaf
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted leaf that counts calls and remembers the last parameters.
pub struct SimLeaf {
    spec: LeafSpec,
    outcome: LeafOutcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_params: Mutex<Option<ParamMap>>,
}

impl SimLeaf {
    pub fn new(name: impl Into<String>) -> Self {
        let spec = LeafSpec::new(name);
        let outcome = LeafOutcome::success(json!({ "leaf": spec.name.clone() }));
        Self::from_parts(spec, outcome)
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        let spec = LeafSpec::placeholder(name);
        let outcome = LeafOutcome::failure(LeafError::new(
            "not_implemented",
            format!("{} is a placeholder", spec.name),
            false,
        ));
        Self::from_parts(spec, outcome)
    }

    fn from_parts(spec: LeafSpec, outcome: LeafOutcome) -> Self {
        Self {
            spec,
            outcome,
            delay: None,
            calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    /// Succeed with `result`.
    pub fn with_result(mut self, result: Value) -> Self {
        self.outcome = LeafOutcome::success(result);
        self
    }

    /// Respond with an arbitrary envelope.
    pub fn with_outcome(mut self, outcome: LeafOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn failing(mut self, error: LeafError) -> Self {
        self.outcome = LeafOutcome::failure(error);
        self
    }

    /// Take `delay` to complete, abortable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<ParamMap> {
        self.last_params
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Leaf for SimLeaf {
    fn spec(&self) -> &LeafSpec {
        &self.spec
    }

    async fn run(&self, ctx: &LeafContext, params: &ParamMap) -> LeafOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap_or_else(|p| p.into_inner()) = Some(params.clone());

        match self.delay {
            Some(delay) => {
                let outcome = self.outcome.clone();
                run_abortable(ctx, async move {
                    tokio::time::sleep(delay).await;
                    outcome
                })
                .await
            }
            None => self.outcome.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub legacy handler
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted [`LegacyHandler`] that counts calls.
pub struct SimLegacyHandler {
    outcome: LeafOutcome,
    calls: AtomicUsize,
}

impl SimLegacyHandler {
    pub fn succeeding(result: Value) -> Self {
        Self {
            outcome: LeafOutcome::success(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: LeafError) -> Self {
        Self {
            outcome: LeafOutcome::failure(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacyHandler for SimLegacyHandler {
    async fn handle(&self, _ctx: &LeafContext, _params: &ParamMap) -> LeafOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Fluent builder for [`SimRegistry`].
#[derive(Default)]
pub struct SimRegistryBuilder {
    registry: LeafRegistry,
    leaves: HashMap<String, Arc<SimLeaf>>,
}

impl SimRegistryBuilder {
    pub fn with_leaf(self, name: &str) -> Self {
        self.with_sim_leaf(SimLeaf::new(name))
    }

    pub fn with_placeholder(self, name: &str) -> Self {
        self.with_sim_leaf(SimLeaf::placeholder(name))
    }

    pub fn with_failing_leaf(self, name: &str, error: LeafError) -> Self {
        self.with_sim_leaf(SimLeaf::new(name).failing(error))
    }

    pub fn with_sim_leaf(mut self, leaf: SimLeaf) -> Self {
        let leaf = Arc::new(leaf);
        self.registry.register(leaf.clone());
        self.leaves.insert(leaf.spec().name.clone(), leaf);
        self
    }

    pub fn unroutable(mut self, name: &str) -> Self {
        self.registry.set_routable(name, false);
        self
    }

    pub fn build(self) -> SimRegistry {
        SimRegistry {
            registry: Arc::new(self.registry),
            leaves: self.leaves,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// A [`LeafRegistry`] of [`SimLeaf`]s plus handles for inspecting them.
pub struct SimRegistry {
    registry: Arc<LeafRegistry>,
    leaves: HashMap<String, Arc<SimLeaf>>,
}

impl SimRegistry {
    pub fn builder() -> SimRegistryBuilder {
        SimRegistryBuilder::default()
    }

    /// The registry to inject into a dispatcher.
    pub fn registry(&self) -> Arc<dyn CapabilityRegistry> {
        self.registry.clone()
    }

    pub fn leaf(&self, name: &str) -> Option<Arc<SimLeaf>> {
        self.leaves.get(name).cloned()
    }

    /// Calls made to `name` so far; 0 for unknown names.
    pub fn calls(&self, name: &str) -> usize {
        self.leaves.get(name).map_or(0, |l| l.calls())
    }

    /// Total calls across every leaf.
    pub fn total_calls(&self) -> usize {
        self.leaves.values().map(|l| l.calls()).sum()
    }
}
