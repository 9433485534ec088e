//! [`ActionDispatcher`] – routes planner requests to capability leaves.
//!
//! # Dispatch pipeline
//!
//! 1. Normalize parameters against the action's contract.
//! 2. Navigation types take the [`NavigationLeaseManager`] lease under the
//!    request's holder and priority; a rejected acquire is
//!    [`BastionError::Busy`] and nothing runs.
//! 3. `explore` requests without a target get one from the exploration seed
//!    hash.
//! 4. Unless the contract is handler-only, the leaf is looked up in the
//!    injected [`CapabilityRegistry`].  A usable leaf runs and its envelope is
//!    mapped to an [`ActionOutcome`] or error.
//! 5. Otherwise the legacy handler for the type runs, if one exists.
//! 6. Otherwise the first routing failure from step 4 is returned.
//!
//! When the lease is preempted, the abort token of every in-flight leaf run by
//! the evicted holder is cancelled; the leaf then ends with an `aborted`
//! failure, surfaced as [`BastionError::Aborted`].
//!
//! The dispatcher never races its own timer against a leaf.  The timeout is
//! handed to the leaf in its [`LeafContext`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bastion_hal::{CapabilityRegistry, LeafContext, LegacyHandlerTable};
use bastion_kernel::NavigationLeaseManager;
use bastion_perception::WorldClient;
use bastion_types::{
    ActionOutcome, ActionRequest, BastionError, DispatchRoute, LeafError, LeafOutcome, ParamMap,
    Vec3,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::action_contracts::{
    ActionContract, DispatchMode, contract_for, is_navigation_action, normalize_action_params,
};
use crate::collect_diagnostics::CollectDiagnostics;
use crate::config::DispatcherConfig;
use crate::exploration::{ExplorationKey, exploration_seed_hash, exploration_target};

const COLLECT_ACTION: &str = "collect_items";
const EXPLORE_ACTION: &str = "explore";

type InFlightMap = HashMap<String, HashMap<Uuid, CancellationToken>>;

/// Abort tokens of running navigation leaves, keyed by lease holder.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<InFlightMap>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, InFlightMap> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn track(&self, holder: &str, id: Uuid) -> (CancellationToken, InFlightEntry) {
        let token = CancellationToken::new();
        self.lock()
            .entry(holder.to_string())
            .or_default()
            .insert(id, token.clone());
        let entry = InFlightEntry {
            in_flight: self.clone(),
            holder: holder.to_string(),
            id,
        };
        (token, entry)
    }

    /// Cancel every leaf running under `holder`.  Returns how many.
    fn abort_holder(&self, holder: &str) -> usize {
        let tokens = self.lock().remove(holder).unwrap_or_default();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    fn count(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}

/// Untracks its token on drop, including when the dispatch future is dropped.
struct InFlightEntry {
    in_flight: InFlight,
    holder: String,
    id: Uuid,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock();
        if let Some(tokens) = map.get_mut(&self.holder) {
            tokens.remove(&self.id);
            if tokens.is_empty() {
                map.remove(&self.holder);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ActionDispatcherBuilder {
    registry: Option<Arc<dyn CapabilityRegistry>>,
    legacy: LegacyHandlerTable,
    lease: Option<NavigationLeaseManager>,
    world: Option<Arc<dyn WorldClient>>,
    config: DispatcherConfig,
}

impl ActionDispatcherBuilder {
    pub fn registry(mut self, registry: Arc<dyn CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn legacy_handlers(mut self, legacy: LegacyHandlerTable) -> Self {
        self.legacy = legacy;
        self
    }

    /// Share an existing lease manager.  A fresh one is created otherwise.
    pub fn lease(mut self, lease: NavigationLeaseManager) -> Self {
        self.lease = Some(lease);
        self
    }

    /// World client used to derive exploration targets.
    pub fn world(mut self, world: Arc<dyn WorldClient>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ActionDispatcher {
        let lease = self.lease.unwrap_or_default();
        let in_flight = InFlight::default();

        let hook_in_flight = in_flight.clone();
        lease.add_preempt_hook(move |evicted| {
            let aborted = hook_in_flight.abort_holder(evicted);
            if aborted > 0 {
                info!(holder = evicted, aborted, "aborted in-flight navigation of evicted holder");
            }
            Ok(())
        });

        ActionDispatcher {
            registry: self.registry,
            legacy: self.legacy,
            lease,
            world: self.world,
            config: self.config,
            in_flight,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionDispatcher
// ─────────────────────────────────────────────────────────────────────────────

pub struct ActionDispatcher {
    registry: Option<Arc<dyn CapabilityRegistry>>,
    legacy: LegacyHandlerTable,
    lease: NavigationLeaseManager,
    world: Option<Arc<dyn WorldClient>>,
    config: DispatcherConfig,
    in_flight: InFlight,
}

impl ActionDispatcher {
    pub fn builder() -> ActionDispatcherBuilder {
        ActionDispatcherBuilder::default()
    }

    pub fn lease(&self) -> &NavigationLeaseManager {
        &self.lease
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Navigation leaves currently running.
    pub fn in_flight_navigation(&self) -> usize {
        self.in_flight.count()
    }

    /// Execute one request end to end.
    pub async fn execute_action(
        &self,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, BastionError> {
        let holder = request
            .holder
            .clone()
            .unwrap_or_else(|| self.config.default_holder.clone());
        let span = info_span!(
            "execute_action",
            action_type = %request.action_type,
            holder = %holder,
            priority = %request.priority,
        );
        self.dispatch(request, holder).instrument(span).await
    }

    async fn dispatch(
        &self,
        request: &ActionRequest,
        holder: String,
    ) -> Result<ActionOutcome, BastionError> {
        let action_type = request.action_type.as_str();
        let contract = contract_for(action_type);

        let normalized = normalize_action_params(action_type, &request.parameters);
        let mut warnings = normalized.warnings;
        for key in &normalized.missing_keys {
            warnings.push(format!("{action_type}: missing required parameter '{key}'"));
        }
        if !normalized.missing_keys.is_empty() {
            debug!(missing = ?normalized.missing_keys, "required parameters missing");
        }
        let mut params = normalized.params;

        let timeout = request
            .timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout());
        let ctx = LeafContext::new(action_type, timeout).with_holder(holder.clone());

        if !is_navigation_action(action_type) {
            return self.route(contract, ctx, params, warnings).await;
        }

        let Some(guard) = self.lease.acquire_guard(&holder, request.priority) else {
            let current = self.lease.holder().unwrap_or_default();
            debug!(current = %current, "navigation lease busy");
            return Err(BastionError::Busy {
                requested: request.priority,
                holder: current,
            });
        };

        if action_type == EXPLORE_ACTION {
            self.derive_explore_target(&mut params).await;
        }

        let (abort, _entry) = self.in_flight.track(&holder, ctx.request_id);
        // A preemption may have landed between acquire and track.
        if !guard.is_current() {
            abort.cancel();
        }
        let ctx = ctx.with_abort(abort);

        let result = self.route(contract, ctx, params, warnings).await;
        drop(guard);
        result
    }

    /// Steps 4–6 of the pipeline.
    async fn route(
        &self,
        contract: Option<&'static ActionContract>,
        ctx: LeafContext,
        params: ParamMap,
        warnings: Vec<String>,
    ) -> Result<ActionOutcome, BastionError> {
        let action_type = ctx.action_type.clone();

        let fallthrough = match contract {
            None => BastionError::UnknownActionType(action_type.clone()),
            Some(c) if c.dispatch_mode == DispatchMode::HandlerOnly => {
                BastionError::UnknownActionType(action_type.clone())
            }
            Some(c) => match &self.registry {
                None => BastionError::FactoryUnavailable {
                    action_type: action_type.clone(),
                },
                Some(registry) => match registry.get(c.leaf_name) {
                    None => BastionError::NoLeafRegistered {
                        leaf: c.leaf_name.to_string(),
                    },
                    Some(leaf) if leaf.spec().placeholder => BastionError::PlaceholderLeaf {
                        leaf: c.leaf_name.to_string(),
                    },
                    Some(_)
                        if c.dispatch_mode == DispatchMode::Guarded
                            && !registry.is_routable(c.leaf_name) =>
                    {
                        BastionError::LeafNotRoutable {
                            leaf: c.leaf_name.to_string(),
                        }
                    }
                    Some(leaf) => {
                        debug!(leaf = c.leaf_name, "routing to leaf");
                        let outcome = leaf.run(&ctx, &params).await;
                        return map_outcome(
                            &action_type,
                            DispatchRoute::Leaf,
                            c.leaf_name,
                            outcome,
                            warnings,
                        );
                    }
                },
            },
        };

        if let Some(handler) = self.legacy.get(&action_type) {
            debug!(reason = %fallthrough, "routing to legacy handler");
            let outcome = handler.handle(&ctx, &params).await;
            return map_outcome(
                &action_type,
                DispatchRoute::LegacyHandler,
                &action_type,
                outcome,
                warnings,
            );
        }

        warn!(error = %fallthrough, "action could not be routed");
        Err(fallthrough)
    }

    /// Fill `target` for an `explore` request that has none.
    async fn derive_explore_target(&self, params: &mut ParamMap) {
        if params.get("target").is_some_and(|t| !t.is_null()) {
            return;
        }

        let origin = match params.get("origin").and_then(Vec3::from_value) {
            Some(origin) => origin,
            None => match &self.world {
                Some(world) => match world.position().await {
                    Ok(position) => position,
                    Err(e) => {
                        warn!(error = %e, "no position for exploration target");
                        return;
                    }
                },
                None => {
                    warn!("no world client or origin; exploration target left unset");
                    return;
                }
            },
        };

        let distance = params.get("distance").and_then(Value::as_f64).unwrap_or(24.0);
        let scope = params.get("scope").and_then(Value::as_str).unwrap_or("explore");
        let purpose = params.get("purpose").and_then(Value::as_str).unwrap_or("resources");
        let mut key = ExplorationKey::new(scope, purpose, origin, distance);
        if let Some(retry) = params.get("retry").and_then(Value::as_u64) {
            key = key.with_retry(u32::try_from(retry).unwrap_or(u32::MAX));
        }

        let seed = exploration_seed_hash(&key);
        let target = exploration_target(origin, distance, seed);
        debug!(key = %key, seed, "derived exploration target");
        params.insert("target".to_string(), target.to_value());
    }
}

/// Map a leaf or handler envelope to the dispatcher's result.
fn map_outcome(
    action_type: &str,
    route: DispatchRoute,
    executor: &str,
    outcome: LeafOutcome,
    warnings: Vec<String>,
) -> Result<ActionOutcome, BastionError> {
    let success = outcome.is_success();
    let diagnostics = (action_type == COLLECT_ACTION)
        .then(|| CollectDiagnostics::from_report(outcome.result.as_ref(), success).to_value());

    if success {
        return Ok(ActionOutcome {
            action_type: action_type.to_string(),
            route,
            leaf: (route == DispatchRoute::Leaf).then(|| executor.to_string()),
            result: outcome.result.unwrap_or(Value::Null),
            warnings,
            diagnostics,
        });
    }

    let error = outcome.error.unwrap_or_else(|| {
        LeafError::new("unknown", format!("{executor} failed without an error"), false)
    });
    if error.is_aborted() {
        info!(executor, "action aborted");
        return Err(BastionError::Aborted {
            action_type: action_type.to_string(),
        });
    }
    debug!(executor, code = %error.code, retryable = error.retryable, "action failed");
    Err(BastionError::LeafFailed {
        leaf: executor.to_string(),
        error,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_hal::{SimLegacyHandler, SimRegistry};
    use bastion_perception::SimWorld;
    use bastion_types::Priority;
    use serde_json::json;

    fn dispatcher(sim: &SimRegistry) -> ActionDispatcher {
        ActionDispatcher::builder().registry(sim.registry()).build()
    }

    #[tokio::test]
    async fn routes_to_leaf_with_normalized_params() {
        let sim = SimRegistry::builder().with_leaf("place_block").build();
        let d = dispatcher(&sim);
        let req = ActionRequest::new("place_block")
            .with_param("item", "stone")
            .with_param("block_type", "dirt");

        let out = d.execute_action(&req).await.unwrap();
        assert_eq!(out.route, DispatchRoute::Leaf);
        assert_eq!(out.leaf.as_deref(), Some("place_block"));
        assert_eq!(out.warnings.len(), 1);
        let params = sim.leaf("place_block").unwrap().last_params().unwrap();
        assert_eq!(params["item"], "stone");
        assert_eq!(params["count"], 1);
    }

    #[tokio::test]
    async fn no_registry_is_factory_unavailable() {
        let d = ActionDispatcher::builder().build();
        let err = d.execute_action(&ActionRequest::new("dig_block")).await.unwrap_err();
        assert!(matches!(err, BastionError::FactoryUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_leaf_is_no_leaf_registered() {
        let sim = SimRegistry::builder().build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("dig_block"))
            .await
            .unwrap_err();
        assert_eq!(err, BastionError::NoLeafRegistered { leaf: "dig_block".into() });
    }

    #[tokio::test]
    async fn placeholder_is_never_run() {
        let sim = SimRegistry::builder().with_placeholder("craft_recipe").build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("craft_recipe").with_param("recipe", "stick"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "craft_recipe is a placeholder");
        assert_eq!(sim.calls("craft_recipe"), 0);
    }

    #[tokio::test]
    async fn unknown_type_without_handler() {
        let sim = SimRegistry::builder().build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("teleport"))
            .await
            .unwrap_err();
        assert_eq!(err, BastionError::UnknownActionType("teleport".into()));
    }

    #[tokio::test]
    async fn handler_only_skips_leaf_lookup() {
        let sim = SimRegistry::builder().with_leaf("chat").build();
        let handler = Arc::new(SimLegacyHandler::succeeding(json!({"sent": true})));
        let mut legacy = LegacyHandlerTable::new();
        legacy.register("chat", handler.clone());
        let d = ActionDispatcher::builder()
            .registry(sim.registry())
            .legacy_handlers(legacy)
            .build();

        let out = d
            .execute_action(&ActionRequest::new("chat").with_param("msg", "hi"))
            .await
            .unwrap();
        assert_eq!(out.route, DispatchRoute::LegacyHandler);
        assert!(out.leaf.is_none());
        assert_eq!(handler.calls(), 1);
        assert_eq!(sim.calls("chat"), 0);
    }

    #[tokio::test]
    async fn guarded_unroutable_falls_back_to_handler() {
        let sim = SimRegistry::builder().with_leaf("smelt").unroutable("smelt").build();
        let mut legacy = LegacyHandlerTable::new();
        legacy.register("smelt", Arc::new(SimLegacyHandler::succeeding(json!({"smelted": 1}))));
        let d = ActionDispatcher::builder()
            .registry(sim.registry())
            .legacy_handlers(legacy)
            .build();

        let out = d
            .execute_action(&ActionRequest::new("smelt").with_param("item", "iron_ore"))
            .await
            .unwrap();
        assert_eq!(out.route, DispatchRoute::LegacyHandler);
        assert_eq!(sim.calls("smelt"), 0);
    }

    #[tokio::test]
    async fn guarded_routable_runs_the_leaf() {
        let sim = SimRegistry::builder().with_leaf("smelt").build();
        let handler = Arc::new(SimLegacyHandler::succeeding(json!({"smelted": 1})));
        let mut legacy = LegacyHandlerTable::new();
        legacy.register("smelt", handler.clone());
        let d = ActionDispatcher::builder()
            .registry(sim.registry())
            .legacy_handlers(legacy)
            .build();

        let out = d
            .execute_action(&ActionRequest::new("smelt").with_param("item", "iron_ore"))
            .await
            .unwrap();
        assert_eq!(out.route, DispatchRoute::Leaf);
        assert_eq!(out.leaf.as_deref(), Some("smelt"));
        assert_eq!(sim.calls("smelt"), 1);
        assert_eq!(handler.calls(), 0);
        let params = sim.leaf("smelt").unwrap().last_params().unwrap();
        assert_eq!(params["input"], "iron_ore");
        assert_eq!(params["qty"], 1);
    }

    #[tokio::test]
    async fn guarded_unroutable_without_handler() {
        let sim = SimRegistry::builder().with_leaf("smelt").unroutable("smelt").build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("smelt").with_param("input", "iron_ore"))
            .await
            .unwrap_err();
        assert_eq!(err, BastionError::LeafNotRoutable { leaf: "smelt".into() });
    }

    #[tokio::test]
    async fn leaf_failure_passes_error_through() {
        let error = LeafError::new("no_tool", "missing pickaxe", true);
        let sim = SimRegistry::builder().with_failing_leaf("dig_block", error.clone()).build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("dig_block").with_param("pos", json!([1, 2, 3])))
            .await
            .unwrap_err();
        match err {
            BastionError::LeafFailed { leaf, error: e, diagnostics } => {
                assert_eq!(leaf, "dig_block");
                assert_eq!(e, error);
                assert!(diagnostics.is_none());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn navigation_is_busy_while_leased() {
        let sim = SimRegistry::builder().with_leaf("navigate").build();
        let d = dispatcher(&sim);
        let _held = d.lease().acquire_guard("builder", Priority::High).unwrap();

        let err = d
            .execute_action(&ActionRequest::new("navigate").with_param("target", "home"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BastionError::Busy { requested: Priority::Normal, holder: "builder".into() }
        );
        assert_eq!(sim.calls("navigate"), 0);
    }

    #[tokio::test]
    async fn non_navigation_ignores_lease() {
        let sim = SimRegistry::builder().with_leaf("equip_weapon").build();
        let d = dispatcher(&sim);
        let _held = d.lease().acquire_guard("builder", Priority::High).unwrap();
        assert!(d.execute_action(&ActionRequest::new("equip_weapon")).await.is_ok());
    }

    #[tokio::test]
    async fn lease_released_after_navigation() {
        let sim = SimRegistry::builder().with_leaf("move_forward").build();
        let d = dispatcher(&sim);
        d.execute_action(&ActionRequest::new("move_forward")).await.unwrap();
        assert!(!d.lease().is_held());
        assert_eq!(d.in_flight_navigation(), 0);
    }

    #[tokio::test]
    async fn explore_derives_target_from_world_position() {
        let sim = SimRegistry::builder().with_leaf("navigate").build();
        let world = Arc::new(SimWorld::new().with_position(Vec3::new(100.0, 64.0, -20.0)));
        let d = ActionDispatcher::builder()
            .registry(sim.registry())
            .world(world)
            .build();

        d.execute_action(&ActionRequest::new("explore")).await.unwrap();
        let params = sim.leaf("navigate").unwrap().last_params().unwrap();
        let target = Vec3::from_value(&params["target"]).unwrap();
        assert!((Vec3::new(100.0, 64.0, -20.0).distance_to(target) - 24.0).abs() < 1e-6);
        assert_eq!(params["range"], 2);
    }

    #[tokio::test]
    async fn explore_retry_rotates_heading() {
        let sim = SimRegistry::builder().with_leaf("navigate").build();
        let d = dispatcher(&sim);
        let origin = json!({"x": 0, "y": 64, "z": 0});

        d.execute_action(&ActionRequest::new("explore").with_param("origin", origin.clone()))
            .await
            .unwrap();
        let first = sim.leaf("navigate").unwrap().last_params().unwrap()["target"].clone();
        d.execute_action(
            &ActionRequest::new("explore")
                .with_param("origin", origin)
                .with_param("retry", 1),
        )
        .await
        .unwrap();
        let second = sim.leaf("navigate").unwrap().last_params().unwrap()["target"].clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn collect_items_attaches_diagnostics() {
        let report = json!({
            "scan": {"items": []},
            "exploration": {"pathRequests": 3, "pathSuccesses": 3}
        });
        let failure = LeafOutcome::failure(LeafError::new("nothing", "no items", true))
            .with_result(report);
        let leaf = bastion_hal::SimLeaf::new("collect_items").with_outcome(failure);
        let sim = SimRegistry::builder().with_sim_leaf(leaf).build();
        let err = dispatcher(&sim)
            .execute_action(&ActionRequest::new("collect_items"))
            .await
            .unwrap_err();
        let BastionError::LeafFailed { diagnostics: Some(d), .. } = err else {
            panic!("expected diagnostics");
        };
        assert_eq!(d["reason_code"], "no_item_entities");
        assert_eq!(d["version"], 1);
    }
}
