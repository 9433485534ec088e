//! `bastion-perception` – Threat sensing
//!
//! Turns the raw entity list reported by the game client into a ranked threat
//! picture the safety monitor can act on.
//!
//! # Modules
//!
//! - [`world`] – [`WorldClient`][world::WorldClient]: async queries for the
//!   agent's position, health, inventory, nearby entities and sight lines.
//! - [`threat`] – [`ThreatPerception`][threat::ThreatPerception]: radius,
//!   memory and line-of-sight filtering, distance-scaled scoring and the
//!   flee / shelter / attack recommendation.
//! - [`sim`] – [`SimWorld`][sim::SimWorld]: scripted world for tests.

pub mod sim;
pub mod threat;
pub mod world;

pub use sim::SimWorld;
pub use threat::{
    PerceptionConfig, RecommendedAction, ThreatAssessment, ThreatEntity, ThreatLevel,
    ThreatPerception,
};
pub use world::{EntitySnapshot, InventoryItem, WorldClient};
