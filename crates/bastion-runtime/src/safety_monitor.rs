//! [`SafetyMonitor`] – reactive response to perceived threats.
//!
//! Executes a [`ThreatAssessment`]'s recommendation by dispatching ordinary
//! [`ActionRequest`]s under holder [`SAFETY_HOLDER`] at
//! [`Priority::Emergency`], so navigation it issues always preempts the
//! planner's.
//!
//! | Recommendation | Response |
//! |---|---|
//! | `attack` | equip a weapon, attack the nearest threat within `attack_radius`; any failure falls back to flee |
//! | `flee` | sprinting `navigate` away from the threat-weighted centre; `move_forward` when no target is computable |
//! | `find_shelter` | `find_shelter` with `urgency = "high"`; failures are logged and swallowed |
//!
//! Only one attack sequence runs at a time.  A second attack request while
//! one is in flight returns [`SafetyAction::AttackInProgress`] without
//! dispatching anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bastion_perception::{RecommendedAction, ThreatAssessment, ThreatPerception, WorldClient};
use bastion_types::{ActionRequest, BastionError, Priority, Vec3};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action_dispatcher::ActionDispatcher;
use crate::config::SafetyConfig;

/// Lease holder used for every safety dispatch.
pub const SAFETY_HOLDER: &str = "safety-monitor";

/// What the monitor did in response to one assessment.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyAction {
    Idle,
    Attacked { entity_id: String },
    /// Another attack sequence was already running; nothing dispatched.
    AttackInProgress,
    Fled { target: Vec3 },
    MovedForward { distance: f64 },
    FleeFailed,
    ShelterRequested,
    ShelterFailed,
}

/// Clears the attack flag when the sequence ends, however it ends.
struct AttackGuard<'a>(&'a AtomicBool);

impl Drop for AttackGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SafetyMonitor {
    dispatcher: Arc<ActionDispatcher>,
    world: Arc<dyn WorldClient>,
    config: SafetyConfig,
    attacking: AtomicBool,
}

impl SafetyMonitor {
    pub fn new(
        dispatcher: Arc<ActionDispatcher>,
        world: Arc<dyn WorldClient>,
        config: SafetyConfig,
    ) -> Self {
        Self {
            dispatcher,
            world,
            config,
            attacking: AtomicBool::new(false),
        }
    }

    pub fn is_attacking(&self) -> bool {
        self.attacking.load(Ordering::Acquire)
    }

    fn request(&self, action_type: &str) -> ActionRequest {
        ActionRequest::new(action_type).on_behalf_of(SAFETY_HOLDER, Priority::Emergency)
    }

    async fn dispatch(&self, request: ActionRequest) -> Result<(), BastionError> {
        self.dispatcher.execute_action(&request).await.map(|_| ())
    }

    /// Execute the assessment's recommendation.
    pub async fn respond(&self, assessment: &ThreatAssessment) -> SafetyAction {
        match assessment.recommended_action {
            RecommendedAction::None => SafetyAction::Idle,
            RecommendedAction::Attack => self.attack_nearest_threat(assessment).await,
            RecommendedAction::Flee => self.flee(assessment).await,
            RecommendedAction::FindShelter => self.seek_shelter().await,
        }
    }

    pub async fn attack_nearest_threat(&self, assessment: &ThreatAssessment) -> SafetyAction {
        if self
            .attacking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("attack already in progress");
            return SafetyAction::AttackInProgress;
        }
        let _guard = AttackGuard(&self.attacking);

        let Some(target) = assessment.nearest_external(self.config.attack_radius) else {
            warn!(radius = self.config.attack_radius, "no attack target in range; fleeing");
            return self.flee(assessment).await;
        };

        if let Err(e) = self.dispatch(self.request("equip_weapon")).await {
            warn!(error = %e, "equip failed; fleeing");
            return self.flee(assessment).await;
        }

        let attack = self
            .request("attack_entity")
            .with_param("entityId", target.id.as_str());
        match self.dispatch(attack).await {
            Ok(()) => {
                info!(entity = %target.id, kind = %target.kind, "attacked threat");
                SafetyAction::Attacked {
                    entity_id: target.id.clone(),
                }
            }
            Err(e) => {
                warn!(entity = %target.id, error = %e, "attack failed; fleeing");
                self.flee(assessment).await
            }
        }
    }

    pub async fn flee(&self, assessment: &ThreatAssessment) -> SafetyAction {
        if let Some(target) = self.flee_target(assessment).await {
            let request = self
                .request("navigate")
                .with_param("target", target.to_value())
                .with_param("sprint", true);
            return match self.dispatch(request).await {
                Ok(()) => {
                    info!(x = target.x, z = target.z, "fled from threats");
                    SafetyAction::Fled { target }
                }
                Err(e) => {
                    warn!(error = %e, "flee navigation failed");
                    SafetyAction::FleeFailed
                }
            };
        }

        let distance = self.config.fallback_forward_distance;
        warn!(distance, "no flee target; moving forward");
        let request = self
            .request("move_forward")
            .with_param("distance", distance)
            .with_param("sprint", true);
        match self.dispatch(request).await {
            Ok(()) => SafetyAction::MovedForward { distance },
            Err(e) => {
                warn!(error = %e, "fallback move failed");
                SafetyAction::FleeFailed
            }
        }
    }

    /// Point `flee_distance` away from the threat-weighted sum of directions
    /// to each external threat, in the horizontal plane.
    async fn flee_target(&self, assessment: &ThreatAssessment) -> Option<Vec3> {
        let position = match self.world.position().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "position unavailable for flee");
                return None;
            }
        };

        let away = assessment
            .external_threats()
            .filter_map(|t| {
                let offset = position.sub(t.position);
                Vec3::new(offset.x, 0.0, offset.z)
                    .normalized()
                    .map(|dir| dir.scale(t.threat_level.max(f64::MIN_POSITIVE)))
            })
            .fold(Vec3::ZERO, Vec3::add);

        away.normalized()
            .map(|dir| position.add(dir.scale(self.config.flee_distance)))
    }

    pub async fn seek_shelter(&self) -> SafetyAction {
        let request = self.request("find_shelter").with_param("urgency", "high");
        match self.dispatch(request).await {
            Ok(()) => SafetyAction::ShelterRequested,
            Err(e) => {
                warn!(error = %e, "find_shelter failed");
                SafetyAction::ShelterFailed
            }
        }
    }

    /// One perceive-and-respond cycle.
    pub async fn tick(&self, perception: &mut ThreatPerception) -> SafetyAction {
        let now = Utc::now();
        perception.cleanup(now);
        let assessment = perception.assess_threats_at(self.world.as_ref(), now).await;
        let action = self.respond(&assessment).await;
        if action != SafetyAction::Idle {
            debug!(
                level = ?assessment.overall_threat_level,
                action = ?action,
                "safety response"
            );
        }
        action
    }

    /// Poll every `poll_interval_ms` until `shutdown` fires.  Returns the
    /// number of completed cycles.
    pub async fn run(&self, perception: &mut ThreatPerception, shutdown: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.config.poll_interval_ms, "safety monitor started");

        let mut cycles = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(perception).await;
                    cycles += 1;
                }
            }
        }
        info!(cycles, "safety monitor stopped");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bastion_hal::{SimLeaf, SimRegistry};
    use bastion_perception::{PerceptionConfig, SimWorld, ThreatEntity, ThreatLevel};
    use bastion_types::LeafError;

    fn threat(id: &str, kind: &str, position: Vec3, distance: f64) -> ThreatEntity {
        ThreatEntity {
            id: id.into(),
            kind: kind.into(),
            position,
            last_seen: Utc::now(),
            distance,
            has_line_of_sight: true,
            threat_level: 50.0,
        }
    }

    fn assessment(action: RecommendedAction, threats: Vec<ThreatEntity>) -> ThreatAssessment {
        ThreatAssessment {
            threats,
            overall_threat_level: ThreatLevel::Medium,
            recommended_action: action,
        }
    }

    fn monitor(sim: &SimRegistry, world: SimWorld) -> SafetyMonitor {
        let dispatcher = Arc::new(ActionDispatcher::builder().registry(sim.registry()).build());
        SafetyMonitor::new(dispatcher, Arc::new(world), SafetyConfig::default())
    }

    fn combat_registry() -> SimRegistry {
        SimRegistry::builder()
            .with_leaf("equip_weapon")
            .with_leaf("attack_entity")
            .with_leaf("navigate")
            .with_leaf("move_forward")
            .with_leaf("find_shelter")
            .build()
    }

    #[tokio::test]
    async fn attack_targets_nearest_threat() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let a = assessment(
            RecommendedAction::Attack,
            vec![
                threat("far", "zombie", Vec3::new(9.0, 0.0, 0.0), 9.0),
                threat("near", "spider", Vec3::new(2.0, 0.0, 0.0), 2.0),
            ],
        );

        let action = m.respond(&a).await;
        assert_eq!(action, SafetyAction::Attacked { entity_id: "near".into() });
        let params = sim.leaf("attack_entity").unwrap().last_params().unwrap();
        assert_eq!(params["entityId"], "near");
        assert!(!m.is_attacking());
    }

    #[tokio::test]
    async fn second_attack_while_in_flight_dispatches_nothing() {
        let sim = SimRegistry::builder()
            .with_sim_leaf(SimLeaf::new("equip_weapon").with_delay(Duration::from_millis(100)))
            .with_leaf("attack_entity")
            .build();
        let m = monitor(&sim, SimWorld::new());
        let a = assessment(
            RecommendedAction::Attack,
            vec![threat("z1", "zombie", Vec3::new(2.0, 0.0, 0.0), 2.0)],
        );

        let (first, second) =
            tokio::join!(m.attack_nearest_threat(&a), m.attack_nearest_threat(&a));
        assert_eq!(first, SafetyAction::Attacked { entity_id: "z1".into() });
        assert_eq!(second, SafetyAction::AttackInProgress);
        assert_eq!(sim.calls("equip_weapon"), 1);
        assert_eq!(sim.calls("attack_entity"), 1);
    }

    #[tokio::test]
    async fn failed_equip_falls_back_to_flee() {
        let sim = SimRegistry::builder()
            .with_failing_leaf(
                "equip_weapon",
                LeafError::new("no_weapon", "inventory empty", false),
            )
            .with_leaf("attack_entity")
            .with_leaf("navigate")
            .build();
        let m = monitor(&sim, SimWorld::new());
        let a = assessment(
            RecommendedAction::Attack,
            vec![threat("z1", "zombie", Vec3::new(4.0, 0.0, 0.0), 4.0)],
        );

        let action = m.respond(&a).await;
        let SafetyAction::Fled { target } = action else {
            panic!("expected flee, got {action:?}");
        };
        assert!((target.x + 16.0).abs() < 1e-9);
        assert_eq!(sim.calls("attack_entity"), 0);
        let params = sim.leaf("navigate").unwrap().last_params().unwrap();
        assert_eq!(params["sprint"], true);
    }

    #[tokio::test]
    async fn attack_without_target_in_range_flees() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let a = assessment(
            RecommendedAction::Attack,
            vec![threat("far", "skeleton", Vec3::new(0.0, 0.0, 30.0), 30.0)],
        );
        assert!(matches!(m.respond(&a).await, SafetyAction::Fled { .. }));
        assert_eq!(sim.calls("equip_weapon"), 0);
    }

    #[tokio::test]
    async fn flee_weights_directions_by_threat() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let mut east = threat("e", "zombie", Vec3::new(5.0, 0.0, 0.0), 5.0);
        east.threat_level = 90.0;
        let north = threat("n", "zombie", Vec3::new(0.0, 0.0, 5.0), 5.0);
        let a = assessment(RecommendedAction::Flee, vec![east, north]);

        let SafetyAction::Fled { target } = m.respond(&a).await else {
            panic!("expected flee");
        };
        assert!(target.x < 0.0 && target.z < 0.0);
        assert!(target.x < target.z, "heavier threat should dominate");
        assert!((Vec3::ZERO.distance_to(target) - 16.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn flee_without_direction_moves_forward() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let a = assessment(RecommendedAction::Flee, Vec::new());

        assert_eq!(m.respond(&a).await, SafetyAction::MovedForward { distance: 8.0 });
        assert_eq!(sim.calls("navigate"), 0);
        let params = sim.leaf("move_forward").unwrap().last_params().unwrap();
        assert_eq!(params["distance"], 8.0);
    }

    #[tokio::test]
    async fn shelter_is_high_urgency_and_failures_are_swallowed() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        assert_eq!(m.seek_shelter().await, SafetyAction::ShelterRequested);
        let params = sim.leaf("find_shelter").unwrap().last_params().unwrap();
        assert_eq!(params["urgency"], "high");

        let empty = SimRegistry::builder().build();
        let m = monitor(&empty, SimWorld::new());
        assert_eq!(m.seek_shelter().await, SafetyAction::ShelterFailed);
    }

    #[tokio::test]
    async fn safety_navigation_preempts_planner() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let planner = m.dispatcher.lease().acquire_guard("planner", Priority::High).unwrap();

        let a = assessment(
            RecommendedAction::Flee,
            vec![threat("z1", "zombie", Vec3::new(3.0, 0.0, 0.0), 3.0)],
        );
        assert!(matches!(m.respond(&a).await, SafetyAction::Fled { .. }));
        assert!(!planner.is_current());
        assert!(!m.dispatcher.lease().is_held());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let sim = combat_registry();
        let m = monitor(&sim, SimWorld::new());
        let mut perception = ThreatPerception::new(PerceptionConfig::default());

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(m.run(&mut perception, shutdown).await, 0);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let cycles = m.run(&mut perception, shutdown).await;
        assert!(cycles >= 1);
        assert_eq!(sim.total_calls(), 0);
    }
}
