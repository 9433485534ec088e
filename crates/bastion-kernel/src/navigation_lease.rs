//! [`NavigationLeaseManager`] – priority-preemptive mutex for the locomotion
//! actuator.
//!
//! The agent has exactly one body to move.  Every navigation-type action must
//! hold the lease while it runs; everything else may execute without it.
//!
//! # Rules
//!
//! | Lease state | Request | Outcome |
//! |---|---|---|
//! | free | any | granted, `ref_count = 1` |
//! | held by the same holder | any | re-acquired, `ref_count += 1`, priority upgraded (never downgraded) |
//! | held by another holder | `Emergency`, strictly above current | **preempt**: hooks notified, prior lease cleared, new lease granted |
//! | held by another holder | anything else | rejected (`None`) |
//!
//! Each successful [`acquire`][NavigationLeaseManager::acquire] yields a fresh
//! [`LeaseTicket`].  Releasing a ticket is one-shot: the first
//! [`release`][NavigationLeaseManager::release] decrements the reference
//! count, later calls only log.  A ticket issued before a preemption can never
//! touch the lease granted afterwards.
//!
//! # Example
//!
//! ```
//! use bastion_kernel::NavigationLeaseManager;
//! use bastion_types::Priority;
//!
//! let lease = NavigationLeaseManager::new();
//!
//! let mut planner = lease.acquire("planner", Priority::Normal).unwrap();
//! assert!(lease.acquire("builder", Priority::High).is_none());
//!
//! // The safety monitor may always take the actuator from a lower priority.
//! let mut safety = lease.acquire("safety-monitor", Priority::Emergency).unwrap();
//! assert_eq!(lease.holder().as_deref(), Some("safety-monitor"));
//!
//! // The evicted ticket is now inert.
//! assert!(!lease.release(&mut planner));
//! assert!(lease.release(&mut safety));
//! assert!(!lease.is_held());
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use bastion_types::{BastionError, Priority};
use tracing::{debug, error, info, warn};

/// Notification hook invoked with the evicted holder's id after a preemption.
pub type PreemptHook = Arc<dyn Fn(&str) -> Result<(), BastionError> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LeaseState {
    holder: Option<String>,
    priority: Option<Priority>,
    ref_count: u32,
    /// Incremented on every fresh grant; tickets from older epochs are inert.
    epoch: u64,
}

impl LeaseState {
    fn grant(&mut self, holder: &str, priority: Priority) -> LeaseTicket {
        self.epoch += 1;
        self.holder = Some(holder.to_string());
        self.priority = Some(priority);
        self.ref_count = 1;
        LeaseTicket::new(holder, self.epoch)
    }

    fn clear(&mut self) {
        self.holder = None;
        self.priority = None;
        self.ref_count = 0;
    }
}

enum AcquireDecision {
    Granted(LeaseTicket),
    Preempted { ticket: LeaseTicket, evicted: String },
    Rejected,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot release token handed out by [`NavigationLeaseManager::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseTicket {
    holder: String,
    epoch: u64,
    consumed: bool,
}

impl LeaseTicket {
    fn new(holder: &str, epoch: u64) -> Self {
        Self {
            holder: holder.to_string(),
            epoch,
            consumed: false,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// `true` once the ticket has been passed to
    /// [`release`][NavigationLeaseManager::release].
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// Point-in-time view of the lease, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSnapshot {
    pub holder: Option<String>,
    pub priority: Option<Priority>,
    pub ref_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// NavigationLeaseManager
// ─────────────────────────────────────────────────────────────────────────────

/// Reference-counted, priority-preemptive lease over the locomotion actuator.
///
/// Clone it cheaply – all clones share the same lease.
#[derive(Clone, Default)]
pub struct NavigationLeaseManager {
    state: Arc<Mutex<LeaseState>>,
    hooks: Arc<Mutex<Vec<PreemptHook>>>,
}

impl NavigationLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook that is told which holder was evicted by a preemption.
    ///
    /// Hooks run after the lease has already changed hands, each inside its
    /// own error boundary: a returned `Err` or a panic is logged and never
    /// affects the preemption.  Hooks must not block.
    pub fn add_preempt_hook(
        &self,
        hook: impl Fn(&str) -> Result<(), BastionError> + Send + Sync + 'static,
    ) {
        let mut hooks = self.hooks.lock().unwrap_or_else(|p| p.into_inner());
        hooks.push(Arc::new(hook));
    }

    /// Try to take the lease for `holder` at `priority`.
    ///
    /// Returns `None` when another holder owns the lease and the request is
    /// not allowed to preempt it; the caller must treat the actuator as busy.
    pub fn acquire(&self, holder: &str, priority: Priority) -> Option<LeaseTicket> {
        let decision = {
            let mut state = self.lock_state();
            match state.holder.clone() {
                None => AcquireDecision::Granted(state.grant(holder, priority)),
                Some(current) if current == holder => {
                    state.ref_count += 1;
                    let upgraded = state.priority.map_or(priority, |p| p.max(priority));
                    state.priority = Some(upgraded);
                    debug!(
                        holder,
                        ref_count = state.ref_count,
                        priority = %upgraded,
                        "lease re-acquired"
                    );
                    AcquireDecision::Granted(LeaseTicket::new(holder, state.epoch))
                }
                Some(current) => {
                    let current_priority = state.priority.unwrap_or_default();
                    if priority == Priority::Emergency && priority > current_priority {
                        state.clear();
                        let ticket = state.grant(holder, priority);
                        AcquireDecision::Preempted {
                            ticket,
                            evicted: current,
                        }
                    } else {
                        debug!(
                            holder,
                            current = %current,
                            requested = %priority,
                            held = %current_priority,
                            "lease busy"
                        );
                        AcquireDecision::Rejected
                    }
                }
            }
        };

        match decision {
            AcquireDecision::Granted(ticket) => Some(ticket),
            AcquireDecision::Preempted { ticket, evicted } => {
                warn!(evicted = %evicted, holder, "navigation lease preempted");
                self.notify_preempted(&evicted);
                Some(ticket)
            }
            AcquireDecision::Rejected => None,
        }
    }

    /// Release a ticket.
    ///
    /// Returns `true` when this call decremented the reference count.  A
    /// ticket that was already released, or that belongs to a lease since
    /// preempted, is a logged no-op.
    pub fn release(&self, ticket: &mut LeaseTicket) -> bool {
        if ticket.consumed {
            warn!(holder = %ticket.holder, "lease ticket released twice; ignoring");
            return false;
        }
        ticket.consumed = true;

        let mut state = self.lock_state();
        let same_lease =
            state.epoch == ticket.epoch && state.holder.as_deref() == Some(ticket.holder.as_str());
        if !same_lease {
            warn!(
                holder = %ticket.holder,
                current = ?state.holder,
                "stale lease ticket released after preemption; ignoring"
            );
            return false;
        }

        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count == 0 {
            info!(holder = %ticket.holder, "navigation lease released");
            state.clear();
        }
        true
    }

    /// Acquire the lease as an RAII [`LeaseGuard`] that releases on drop.
    pub fn acquire_guard(&self, holder: &str, priority: Priority) -> Option<LeaseGuard> {
        self.acquire(holder, priority).map(|ticket| LeaseGuard {
            manager: self.clone(),
            ticket,
        })
    }

    /// Run `f` while holding the lease.
    ///
    /// Returns `busy` without running `f` when the lease cannot be acquired.
    /// The lease is released on every exit path, including a panic inside
    /// `f` or the returned future being dropped mid-flight.
    pub async fn with_lease<T, F, Fut>(&self, holder: &str, priority: Priority, f: F, busy: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(_guard) = self.acquire_guard(holder, priority) else {
            return busy;
        };
        f().await
    }

    pub fn snapshot(&self) -> LeaseSnapshot {
        let state = self.lock_state();
        LeaseSnapshot {
            holder: state.holder.clone(),
            priority: state.priority,
            ref_count: state.ref_count,
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.lock_state().holder.clone()
    }

    pub fn is_held(&self) -> bool {
        self.lock_state().holder.is_some()
    }

    // Lease state stays consistent across a poisoned lock: every mutation is
    // a single field assignment sequence with no intermediate panics.
    fn lock_state(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn notify_preempted(&self, evicted: &str) {
        let hooks: Vec<PreemptHook> = self
            .hooks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for hook in hooks {
            match catch_unwind(AssertUnwindSafe(|| hook(evicted))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(evicted, error = %e, "preempt hook failed"),
                Err(_) => error!(evicted, "preempt hook panicked"),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Holds a [`LeaseTicket`] and releases it when dropped.
pub struct LeaseGuard {
    manager: NavigationLeaseManager,
    ticket: LeaseTicket,
}

impl LeaseGuard {
    pub fn holder(&self) -> &str {
        self.ticket.holder()
    }

    /// `false` once a higher-priority holder has taken the lease from us.
    pub fn is_current(&self) -> bool {
        let state = self.manager.lock_state();
        state.epoch == self.ticket.epoch && state.holder.as_deref() == Some(self.ticket.holder())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.ticket.consumed {
            self.manager.release(&mut self.ticket);
        }
    }
}
