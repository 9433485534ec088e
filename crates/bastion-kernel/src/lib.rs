//! `bastion-kernel` – Actuator arbitration
//!
//! The kernel does not decide what the agent does; it decides who is allowed
//! to move the agent's body right now.
//!
//! # Modules
//!
//! - [`navigation_lease`] – [`NavigationLeaseManager`][navigation_lease::NavigationLeaseManager]:
//!   a reference-counted, priority-preemptive lease guarding the single
//!   locomotion actuator.  Planner navigation runs at `normal`/`high`
//!   priority; the safety monitor acquires at `emergency` and evicts whoever
//!   holds it, notifying registered preemption hooks.

pub mod navigation_lease;

pub use navigation_lease::{
    LeaseGuard, LeaseSnapshot, LeaseTicket, NavigationLeaseManager, PreemptHook,
};
