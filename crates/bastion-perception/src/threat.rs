//! Threat perception.
//!
//! [`ThreatPerception`] scans the hostile entities around the agent and
//! condenses them into a [`ThreatAssessment`]: an ordered threat list, an
//! overall [`ThreatLevel`] and a [`RecommendedAction`] for the safety monitor.
//!
//! # Scan pipeline
//!
//! For every hostile entity reported by the [`WorldClient`]:
//!
//! 1. **Radius** – entities farther than `detection_radius` (Euclidean) are
//!    ignored.
//! 2. **Memory** – an entity perceived less than `persistence_window_secs`
//!    ago is suppressed, so a mob pacing at the edge of vision does not make
//!    the agent thrash between responses.
//! 3. **Sight** – a ray is cast from the agent's eyes within
//!    `fov_degrees`; entities the agent cannot see are invisible to the
//!    assessment.
//!
//! Each counted entity scores
//! `base_score(type) × (1 − distance / radius) × (1.5 if health ≤ low_health_threshold)`.
//! When health is at or below the threshold the agent's own condition is
//! added as a `low_health` pseudo-threat.
//!
//! Any world-client failure produces [`ThreatAssessment::safe_default`]: no
//! threats, level `low`, action `none`.  A sensing fault must never crash the
//! control loop.

use std::collections::HashMap;

use bastion_types::{BastionError, Vec3};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::world::{EntitySnapshot, InventoryItem, WorldClient, is_ranged_weapon, is_weapon};

/// Pseudo-threat type injected for the agent's own low health.
pub const LOW_HEALTH_KIND: &str = "low_health";
const LOW_HEALTH_ID: &str = "self:low_health";

/// Entity types that explode; only fightable from range.
const EXPLOSIVE_KINDS: [&str; 1] = ["creeper"];

const LOW_HEALTH_AMPLIFICATION: f64 = 1.5;
/// Minimum health to consider standing and fighting.
const FIGHT_HEALTH_FLOOR: f64 = 10.0;
/// Health below which a `high` threat means run rather than hide.
const FLEE_HEALTH_CEILING: f64 = 10.0;
/// At this many external threats the agent is overwhelmed.
const OVERWHELMED_COUNT: usize = 3;

const CRITICAL_SCORE: f64 = 160.0;
const HIGH_SCORE: f64 = 100.0;
const MEDIUM_SCORE: f64 = 40.0;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionConfig {
    #[serde(default = "default_detection_radius")]
    pub detection_radius: f64,
    #[serde(default = "default_persistence_window_secs")]
    pub persistence_window_secs: u64,
    #[serde(default = "default_fov_degrees")]
    pub fov_degrees: f64,
    #[serde(default = "default_melee_range")]
    pub melee_range: f64,
    #[serde(default = "default_low_health_threshold")]
    pub low_health_threshold: f64,
}

fn default_detection_radius() -> f64 {
    16.0
}
fn default_persistence_window_secs() -> u64 {
    300
}
fn default_fov_degrees() -> f64 {
    120.0
}
fn default_melee_range() -> f64 {
    3.5
}
fn default_low_health_threshold() -> f64 {
    6.0
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            detection_radius: default_detection_radius(),
            persistence_window_secs: default_persistence_window_secs(),
            fov_degrees: default_fov_degrees(),
            melee_range: default_melee_range(),
            low_health_threshold: default_low_health_threshold(),
        }
    }
}

impl PerceptionConfig {
    fn persistence_window(&self) -> TimeDelta {
        i64::try_from(self.persistence_window_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assessment types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Vec3,
    pub last_seen: DateTime<Utc>,
    pub distance: f64,
    pub has_line_of_sight: bool,
    pub threat_level: f64,
}

impl ThreatEntity {
    pub fn is_low_health(&self) -> bool {
        self.kind == LOW_HEALTH_KIND
    }

    pub fn is_explosive(&self) -> bool {
        EXPLOSIVE_KINDS.contains(&self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    fn from_score(score: f64) -> Self {
        if score >= CRITICAL_SCORE {
            ThreatLevel::Critical
        } else if score >= HIGH_SCORE {
            ThreatLevel::High
        } else if score >= MEDIUM_SCORE {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    Flee,
    FindShelter,
    Attack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAssessment {
    /// Highest threat first.
    pub threats: Vec<ThreatEntity>,
    pub overall_threat_level: ThreatLevel,
    pub recommended_action: RecommendedAction,
}

impl ThreatAssessment {
    /// The fail-safe result: nothing seen, nothing to do.
    pub fn safe_default() -> Self {
        Self {
            threats: Vec::new(),
            overall_threat_level: ThreatLevel::Low,
            recommended_action: RecommendedAction::None,
        }
    }

    /// Threats that are actual entities, excluding the low-health pseudo-threat.
    pub fn external_threats(&self) -> impl Iterator<Item = &ThreatEntity> {
        self.threats.iter().filter(|t| !t.is_low_health())
    }

    /// Closest external threat no farther than `max_distance`.
    pub fn nearest_external(&self, max_distance: f64) -> Option<&ThreatEntity> {
        self.external_threats()
            .filter(|t| t.distance <= max_distance)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Base danger score for an entity type.
pub fn base_threat_score(kind: &str) -> f64 {
    match kind {
        "creeper" => 90.0,
        "vindicator" => 80.0,
        "witch" => 75.0,
        "skeleton" | "stray" | "pillager" => 70.0,
        "zombie" | "husk" | "drowned" | "zombie_villager" => 60.0,
        "spider" | "cave_spider" | "phantom" => 55.0,
        "enderman" => 50.0,
        "slime" | "magma_cube" => 30.0,
        _ => 50.0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ThreatPerception
// ─────────────────────────────────────────────────────────────────────────────

/// Stateful threat scanner.  Owns the known-threats memory used for
/// re-detection suppression; purge it with [`ThreatPerception::cleanup`].
#[derive(Debug)]
pub struct ThreatPerception {
    config: PerceptionConfig,
    known: HashMap<String, ThreatEntity>,
}

impl ThreatPerception {
    pub fn new(config: PerceptionConfig) -> Self {
        Self {
            config,
            known: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    pub fn known_threat_count(&self) -> usize {
        self.known.len()
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.known.contains_key(id)
    }

    /// Drop memory entries last seen more than the persistence window before
    /// `now`.  Returns how many were purged.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.config.persistence_window();
        let before = self.known.len();
        self.known.retain(|_, t| now - t.last_seen <= window);
        let purged = before - self.known.len();
        if purged > 0 {
            debug!(purged, remaining = self.known.len(), "known threats purged");
        }
        purged
    }

    pub async fn assess_threats(&mut self, world: &dyn WorldClient) -> ThreatAssessment {
        self.assess_threats_at(world, Utc::now()).await
    }

    /// [`assess_threats`][Self::assess_threats] with an explicit clock.
    pub async fn assess_threats_at(
        &mut self,
        world: &dyn WorldClient,
        now: DateTime<Utc>,
    ) -> ThreatAssessment {
        match self.try_assess(world, now).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(error = %e, "threat assessment failed; assuming no threats");
                ThreatAssessment::safe_default()
            }
        }
    }

    async fn try_assess(
        &mut self,
        world: &dyn WorldClient,
        now: DateTime<Utc>,
    ) -> Result<ThreatAssessment, BastionError> {
        let position = world.position().await?;
        let eye = world.eye_position().await?;
        let health = world.health().await?;
        let inventory = world.inventory().await?;
        let entities = world.nearby_entities().await?;

        let low_health = health <= self.config.low_health_threshold;
        let amplification = if low_health { LOW_HEALTH_AMPLIFICATION } else { 1.0 };
        let window = self.config.persistence_window();

        let mut threats = Vec::new();
        for entity in entities.into_iter().filter(|e| e.hostile) {
            let distance = position.distance_to(entity.position);
            if !distance.is_finite() || distance > self.config.detection_radius {
                continue;
            }
            if let Some(known) = self.known.get(&entity.id)
                && now - known.last_seen < window
            {
                debug!(id = %entity.id, kind = %entity.kind, "threat suppressed by memory");
                continue;
            }
            if !world
                .has_line_of_sight(eye, entity.position, self.config.fov_degrees)
                .await?
            {
                continue;
            }

            let threat = self.score(entity, distance, amplification, now);
            self.known.insert(threat.id.clone(), threat.clone());
            threats.push(threat);
        }

        if low_health {
            threats.push(ThreatEntity {
                id: LOW_HEALTH_ID.to_string(),
                kind: LOW_HEALTH_KIND.to_string(),
                position,
                last_seen: now,
                distance: 0.0,
                has_line_of_sight: true,
                threat_level: 50.0 + (self.config.low_health_threshold - health).max(0.0) * 5.0,
            });
        }

        threats.sort_by(|a, b| {
            b.threat_level
                .total_cmp(&a.threat_level)
                .then(a.distance.total_cmp(&b.distance))
        });

        let total: f64 = threats.iter().map(|t| t.threat_level).sum();
        let level = ThreatLevel::from_score(total);
        let action = self.recommend(level, &threats, health, &inventory);
        debug!(
            threats = threats.len(),
            score = total,
            level = ?level,
            action = ?action,
            "threats assessed"
        );

        Ok(ThreatAssessment {
            threats,
            overall_threat_level: level,
            recommended_action: action,
        })
    }

    fn score(
        &self,
        entity: EntitySnapshot,
        distance: f64,
        amplification: f64,
        now: DateTime<Utc>,
    ) -> ThreatEntity {
        let falloff = (1.0 - distance / self.config.detection_radius).clamp(0.0, 1.0);
        ThreatEntity {
            threat_level: base_threat_score(&entity.kind) * falloff * amplification,
            id: entity.id,
            kind: entity.kind,
            position: entity.position,
            last_seen: now,
            distance,
            has_line_of_sight: true,
        }
    }

    fn recommend(
        &self,
        level: ThreatLevel,
        threats: &[ThreatEntity],
        health: f64,
        inventory: &[InventoryItem],
    ) -> RecommendedAction {
        let default = match level {
            ThreatLevel::Critical => RecommendedAction::Flee,
            ThreatLevel::High if health < FLEE_HEALTH_CEILING => RecommendedAction::Flee,
            ThreatLevel::High | ThreatLevel::Medium => RecommendedAction::FindShelter,
            ThreatLevel::Low => RecommendedAction::None,
        };
        if default == RecommendedAction::None {
            return default;
        }

        let external: Vec<&ThreatEntity> = threats.iter().filter(|t| !t.is_low_health()).collect();
        let has_weapon = inventory.iter().any(|i| is_weapon(&i.name));
        if external.is_empty() || !has_weapon || health <= FIGHT_HEALTH_FLOOR {
            return default;
        }
        if external.len() >= OVERWHELMED_COUNT {
            return RecommendedAction::Flee;
        }

        let has_ranged = inventory.iter().any(|i| is_ranged_weapon(&i.name));
        let fightable = external.iter().all(|t| !t.is_explosive() || has_ranged);
        let in_reach = level != ThreatLevel::Medium
            || external.iter().any(|t| t.distance <= self.config.melee_range);

        if fightable && in_reach {
            RecommendedAction::Attack
        } else {
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimWorld;

    fn perception() -> ThreatPerception {
        ThreatPerception::new(PerceptionConfig::default())
    }

    fn armed_world() -> SimWorld {
        SimWorld::new().with_health(20.0).with_item("iron_sword", 1)
    }

    #[tokio::test]
    async fn empty_world_is_calm() {
        let mut p = perception();
        let a = p.assess_threats(&SimWorld::new()).await;
        assert_eq!(a, ThreatAssessment::safe_default());
    }

    #[tokio::test]
    async fn entity_beyond_radius_is_ignored() {
        let world = SimWorld::new().with_hostile("z1", "zombie", Vec3::new(20.0, 0.0, 0.0));
        let mut p = perception();
        let a = p.assess_threats(&world).await;
        assert!(a.threats.is_empty());
        assert!(!p.is_known("z1"));
    }

    #[tokio::test]
    async fn entity_without_sight_line_is_ignored() {
        let world = SimWorld::new()
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0))
            .with_blocked_sight("z1");
        let mut p = perception();
        let a = p.assess_threats(&world).await;
        assert!(a.threats.iter().all(|t| t.id != "z1"));
        assert_eq!(a.recommended_action, RecommendedAction::None);
    }

    #[tokio::test]
    async fn passive_entities_are_not_threats() {
        let world = SimWorld::new().with_passive("c1", "cow", Vec3::new(1.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert!(a.threats.is_empty());
    }

    #[tokio::test]
    async fn threat_score_falls_off_with_distance() {
        let world = SimWorld::new()
            .with_hostile("near", "zombie", Vec3::new(2.0, 0.0, 0.0))
            .with_hostile("far", "zombie", Vec3::new(12.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.threats.len(), 2);
        assert_eq!(a.threats[0].id, "near");
        assert!(a.threats[0].threat_level > a.threats[1].threat_level);
        assert!((a.threats[0].threat_level - 52.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn low_health_injects_pseudo_threat_without_entities() {
        let world = SimWorld::new().with_health(5.0).with_item("iron_sword", 1);
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.threats.len(), 1);
        assert_eq!(a.threats[0].kind, LOW_HEALTH_KIND);
        assert_ne!(a.recommended_action, RecommendedAction::Attack);
        assert_eq!(a.recommended_action, RecommendedAction::FindShelter);
    }

    #[tokio::test]
    async fn low_health_amplifies_entity_threat() {
        let world = SimWorld::new()
            .with_health(6.0)
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        let zombie = a.threats.iter().find(|t| t.id == "z1").unwrap();
        assert!((zombie.threat_level - 52.5 * 1.5).abs() < 1e-9);
        assert_eq!(a.overall_threat_level, ThreatLevel::High);
        assert_eq!(a.recommended_action, RecommendedAction::Flee);
    }

    #[tokio::test]
    async fn redetection_is_suppressed_inside_window() {
        let world = SimWorld::new().with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0));
        let mut p = perception();
        let t0 = Utc::now();
        assert_eq!(p.assess_threats_at(&world, t0).await.threats.len(), 1);

        let soon = t0 + TimeDelta::seconds(60);
        assert!(p.assess_threats_at(&world, soon).await.threats.is_empty());

        let later = t0 + TimeDelta::seconds(301);
        assert_eq!(p.assess_threats_at(&world, later).await.threats.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_purges_only_stale_entries() {
        let world = SimWorld::new()
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0))
            .with_hostile("s1", "spider", Vec3::new(3.0, 0.0, 0.0));
        let mut p = perception();
        let t0 = Utc::now();
        p.assess_threats_at(&world, t0).await;
        assert_eq!(p.known_threat_count(), 2);

        assert_eq!(p.cleanup(t0 + TimeDelta::seconds(10)), 0);
        assert_eq!(p.cleanup(t0 + TimeDelta::seconds(400)), 2);
        assert_eq!(p.known_threat_count(), 0);
    }

    #[tokio::test]
    async fn medium_threat_in_melee_range_recommends_attack() {
        let world = armed_world().with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.overall_threat_level, ThreatLevel::Medium);
        assert_eq!(a.recommended_action, RecommendedAction::Attack);
    }

    #[tokio::test]
    async fn medium_threat_out_of_reach_seeks_shelter() {
        let world = armed_world().with_hostile("s1", "skeleton", Vec3::new(5.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.overall_threat_level, ThreatLevel::Medium);
        assert_eq!(a.recommended_action, RecommendedAction::FindShelter);
    }

    #[tokio::test]
    async fn unarmed_agent_does_not_attack() {
        let world = SimWorld::new()
            .with_health(20.0)
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.recommended_action, RecommendedAction::FindShelter);
    }

    #[tokio::test]
    async fn creeper_needs_ranged_weapon() {
        let melee = armed_world().with_hostile("c1", "creeper", Vec3::new(2.0, 0.0, 0.0));
        let a = perception().assess_threats(&melee).await;
        assert_ne!(a.recommended_action, RecommendedAction::Attack);

        let ranged = SimWorld::new()
            .with_health(20.0)
            .with_item("bow", 1)
            .with_hostile("c1", "creeper", Vec3::new(2.0, 0.0, 0.0));
        let a = perception().assess_threats(&ranged).await;
        assert_eq!(a.recommended_action, RecommendedAction::Attack);
    }

    #[tokio::test]
    async fn three_threats_overwhelm() {
        let world = armed_world()
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0))
            .with_hostile("z2", "zombie", Vec3::new(0.0, 0.0, 2.0))
            .with_hostile("z3", "zombie", Vec3::new(-2.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.threats.len(), 3);
        assert_eq!(a.recommended_action, RecommendedAction::Flee);
    }

    #[tokio::test]
    async fn high_threat_with_two_fightable_mobs_attacks() {
        let world = armed_world()
            .with_hostile("s1", "skeleton", Vec3::new(4.0, 0.0, 0.0))
            .with_hostile("s2", "skeleton", Vec3::new(-4.0, 0.0, 0.0));
        let a = perception().assess_threats(&world).await;
        assert_eq!(a.overall_threat_level, ThreatLevel::High);
        assert_eq!(a.recommended_action, RecommendedAction::Attack);
    }

    #[tokio::test]
    async fn world_failure_fails_safe() {
        let world = SimWorld::new()
            .with_hostile("z1", "zombie", Vec3::new(2.0, 0.0, 0.0))
            .with_failure("client disconnected");
        let a = perception().assess_threats(&world).await;
        assert_eq!(a, ThreatAssessment::safe_default());
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(ThreatLevel::from_score(0.0), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(40.0), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(100.0), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(160.0), ThreatLevel::Critical);
    }

    #[test]
    fn nearest_external_skips_pseudo_threat() {
        let now = Utc::now();
        let mk = |id: &str, kind: &str, d: f64| ThreatEntity {
            id: id.into(),
            kind: kind.into(),
            position: Vec3::ZERO,
            last_seen: now,
            distance: d,
            has_line_of_sight: true,
            threat_level: 10.0,
        };
        let a = ThreatAssessment {
            threats: vec![
                mk("self", LOW_HEALTH_KIND, 0.0),
                mk("z", "zombie", 5.0),
                mk("s", "spider", 3.0),
            ],
            overall_threat_level: ThreatLevel::Medium,
            recommended_action: RecommendedAction::Attack,
        };
        assert_eq!(a.nearest_external(16.0).unwrap().id, "s");
        assert!(a.nearest_external(2.0).is_none());
    }
}
