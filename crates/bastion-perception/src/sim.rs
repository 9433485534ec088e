//! [`SimWorld`] – scripted [`WorldClient`] for headless tests.
//!
//! Holds a mutable snapshot of the agent (position, health, inventory) and
//! the entities around it.  Sight lines are clear unless an entity id has
//! been blocked; a configured failure makes every query return
//! [`BastionError::World`].

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bastion_types::{BastionError, Vec3};

use crate::world::{EntitySnapshot, InventoryItem, WorldClient};

const EYE_HEIGHT: f64 = 1.62;

#[derive(Debug, Clone)]
struct SimState {
    position: Vec3,
    health: f64,
    inventory: Vec<InventoryItem>,
    entities: Vec<EntitySnapshot>,
    blocked: HashSet<String>,
    failure: Option<String>,
    sight_queries: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            health: 20.0,
            inventory: Vec::new(),
            entities: Vec::new(),
            blocked: HashSet::new(),
            failure: None,
            sight_queries: 0,
        }
    }
}

/// In-memory world.  Builder methods configure the initial state; the
/// `set_*` methods mutate it while a test is running.
#[derive(Debug, Default)]
pub struct SimWorld {
    state: Mutex<SimState>,
}

impl SimWorld {
    /// Agent at the origin with full health and an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(self, position: Vec3) -> Self {
        self.set_position(position);
        self
    }

    pub fn with_health(self, health: f64) -> Self {
        self.set_health(health);
        self
    }

    pub fn with_item(self, name: &str, count: u32) -> Self {
        self.state().inventory.push(InventoryItem {
            name: name.to_string(),
            count,
        });
        self
    }

    pub fn with_hostile(self, id: &str, kind: &str, position: Vec3) -> Self {
        self.add_entity(id, kind, position, true);
        self
    }

    pub fn with_passive(self, id: &str, kind: &str, position: Vec3) -> Self {
        self.add_entity(id, kind, position, false);
        self
    }

    /// Hide `id` from sight-line queries.
    pub fn with_blocked_sight(self, id: &str) -> Self {
        self.state().blocked.insert(id.to_string());
        self
    }

    /// Fail every query with `message`.
    pub fn with_failure(self, message: &str) -> Self {
        self.set_failure(Some(message));
        self
    }

    pub fn set_position(&self, position: Vec3) {
        self.state().position = position;
    }

    pub fn set_health(&self, health: f64) {
        self.state().health = health;
    }

    pub fn set_failure(&self, message: Option<&str>) {
        self.state().failure = message.map(str::to_string);
    }

    pub fn add_entity(&self, id: &str, kind: &str, position: Vec3, hostile: bool) {
        self.state().entities.push(EntitySnapshot {
            id: id.to_string(),
            kind: kind.to_string(),
            position,
            hostile,
        });
    }

    pub fn remove_entity(&self, id: &str) {
        self.state().entities.retain(|e| e.id != id);
    }

    pub fn clear_entities(&self) {
        self.state().entities.clear();
    }

    /// Number of sight-line queries answered so far.
    pub fn sight_queries(&self) -> usize {
        self.state().sight_queries
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn read<T>(&self, f: impl FnOnce(&SimState) -> T) -> Result<T, BastionError> {
        let state = self.state();
        match &state.failure {
            Some(message) => Err(BastionError::World(message.clone())),
            None => Ok(f(&state)),
        }
    }
}

#[async_trait]
impl WorldClient for SimWorld {
    async fn position(&self) -> Result<Vec3, BastionError> {
        self.read(|s| s.position)
    }

    async fn eye_position(&self) -> Result<Vec3, BastionError> {
        self.read(|s| s.position.add(Vec3::new(0.0, EYE_HEIGHT, 0.0)))
    }

    async fn health(&self) -> Result<f64, BastionError> {
        self.read(|s| s.health)
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>, BastionError> {
        self.read(|s| s.inventory.clone())
    }

    async fn nearby_entities(&self) -> Result<Vec<EntitySnapshot>, BastionError> {
        self.read(|s| s.entities.clone())
    }

    async fn has_line_of_sight(
        &self,
        _observer: Vec3,
        target: Vec3,
        _fov_degrees: f64,
    ) -> Result<bool, BastionError> {
        let mut state = self.state();
        if let Some(message) = &state.failure {
            return Err(BastionError::World(message.clone()));
        }
        state.sight_queries += 1;
        let blocked = state
            .entities
            .iter()
            .any(|e| e.position == target && state.blocked.contains(&e.id));
        Ok(!blocked)
    }
}
