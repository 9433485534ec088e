//! [`WorldClient`] – the agent's view of the game world.
//!
//! Position, inventory, nearby entities and sight-line queries come from an
//! external client.  Every query may suspend on network I/O, so the trait is
//! async; any of them may fail with [`BastionError::World`].

use async_trait::async_trait;
use bastion_types::{BastionError, Vec3};
use serde::{Deserialize, Serialize};

/// An entity reported near the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    /// Entity type name, e.g. `"zombie"` or `"creeper"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Vec3,
    pub hostile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub count: u32,
}

#[async_trait]
pub trait WorldClient: Send + Sync {
    /// Feet position of the agent.
    async fn position(&self) -> Result<Vec3, BastionError>;

    async fn eye_position(&self) -> Result<Vec3, BastionError>;

    /// Current health, 0–20.
    async fn health(&self) -> Result<f64, BastionError>;

    async fn inventory(&self) -> Result<Vec<InventoryItem>, BastionError>;

    async fn nearby_entities(&self) -> Result<Vec<EntitySnapshot>, BastionError>;

    /// Ray cast from `observer` to `target`, limited to a cone of
    /// `fov_degrees` around the agent's facing.
    async fn has_line_of_sight(
        &self,
        observer: Vec3,
        target: Vec3,
        fov_degrees: f64,
    ) -> Result<bool, BastionError>;
}

const MELEE_WEAPON_SUFFIXES: [&str; 2] = ["_sword", "_axe"];
const RANGED_WEAPONS: [&str; 3] = ["bow", "crossbow", "trident"];

/// `true` for bows, crossbows and tridents.
pub fn is_ranged_weapon(name: &str) -> bool {
    RANGED_WEAPONS.contains(&name)
}

/// `true` for any sword, axe or ranged weapon.
pub fn is_weapon(name: &str) -> bool {
    is_ranged_weapon(name) || MELEE_WEAPON_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weapon_classification() {
        assert!(is_weapon("iron_sword"));
        assert!(is_weapon("stone_axe"));
        assert!(is_weapon("bow"));
        assert!(!is_weapon("stone_pickaxe_head"));
        assert!(!is_weapon("oak_log"));
        assert!(is_ranged_weapon("crossbow"));
        assert!(!is_ranged_weapon("diamond_sword"));
    }

    #[test]
    fn entity_snapshot_uses_type_on_the_wire() {
        let e = EntitySnapshot {
            id: "e1".into(),
            kind: "zombie".into(),
            position: Vec3::new(1.0, 64.0, 2.0),
            hostile: true,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "zombie");
    }
}
