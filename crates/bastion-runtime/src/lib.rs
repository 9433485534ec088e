//! `bastion-runtime` – Action dispatch and the reactive safety loop
//!
//! # Modules
//!
//! - [`action_contracts`] – the contract table: leaf names, dispatch modes,
//!   alias / deprecated-key / default rules and
//!   [`normalize_action_params`][action_contracts::normalize_action_params].
//! - [`action_dispatcher`] – [`ActionDispatcher`][action_dispatcher::ActionDispatcher]:
//!   normalizes, takes the navigation lease for locomotion, routes to a leaf
//!   or legacy handler and maps the result.
//! - [`exploration`] – deterministic exploration headings from
//!   [`exploration_seed_hash`][exploration::exploration_seed_hash].
//! - [`collect_diagnostics`] – versioned `collect_items` diagnostics and
//!   [`ReasonCode`][collect_diagnostics::ReasonCode].
//! - [`safety_monitor`] – [`SafetyMonitor`][safety_monitor::SafetyMonitor]:
//!   turns threat assessments into emergency-priority dispatches.
//! - [`kernel`] – [`ActionKernel`][kernel::ActionKernel]: wires everything
//!   from one [`BastionConfig`][config::BastionConfig].
//! - [`config`] – TOML configuration with `BASTION_*` overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP export.

pub mod action_contracts;
pub mod action_dispatcher;
pub mod collect_diagnostics;
pub mod config;
pub mod exploration;
pub mod kernel;
pub mod safety_monitor;
pub mod telemetry;

pub use action_contracts::{
    ActionContract, DispatchMode, NormalizationResult, build_action_type_to_leaf_map,
    is_navigation_action, normalize_action_params, resolve_leaf_name,
};
pub use action_dispatcher::{ActionDispatcher, ActionDispatcherBuilder};
pub use collect_diagnostics::{CollectDiagnostics, ReasonCode};
pub use config::BastionConfig;
pub use exploration::{ExplorationKey, exploration_seed_hash, exploration_target};
pub use kernel::{ActionKernel, ActionKernelBuilder};
pub use safety_monitor::{SAFETY_HOLDER, SafetyAction, SafetyMonitor};
pub use telemetry::{TracerProviderGuard, init_tracing};
