//! `bastion-hal` – Capability executor seams
//!
//! Everything that actually touches the game world lives behind the traits in
//! this crate, so the dispatcher and safety monitor can be tested headless.
//!
//! # Modules
//!
//! - [`leaf`] – [`Leaf`][leaf::Leaf] and [`LeafContext`][leaf::LeafContext]:
//!   the contract every capability executor implements, plus
//!   [`run_abortable`][leaf::run_abortable] for honouring abort tokens and
//!   timeouts.
//! - [`registry`] – [`CapabilityRegistry`][registry::CapabilityRegistry] and the
//!   in-memory [`LeafRegistry`][registry::LeafRegistry].
//! - [`legacy`] – [`LegacyHandlerTable`][legacy::LegacyHandlerTable]: hardcoded
//!   fallback handlers for action types without a leaf yet.
//! - [`sim_registry`] – [`SimRegistry`][sim_registry::SimRegistry]: scripted
//!   leaves and handlers for CI.

pub mod leaf;
pub mod legacy;
pub mod registry;
pub mod sim_registry;

pub use leaf::{Leaf, LeafContext, TIMEOUT_CODE, run_abortable};
pub use legacy::{LegacyHandler, LegacyHandlerTable};
pub use registry::{CapabilityRegistry, LeafRegistry};
pub use sim_registry::{SimLeaf, SimLegacyHandler, SimRegistry, SimRegistryBuilder};
