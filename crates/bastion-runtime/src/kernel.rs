//! [`ActionKernel`] – one object wiring the lease, dispatcher, perception and
//! safety monitor together from a [`BastionConfig`].
//!
//! The capability registry, world client and legacy handlers are injected by
//! the host; nothing is looked up from global state.
//!
//! ```no_run
//! # async fn demo() -> Result<(), bastion_types::BastionError> {
//! use std::sync::Arc;
//! use bastion_hal::SimRegistry;
//! use bastion_perception::SimWorld;
//! use bastion_runtime::{ActionKernel, BastionConfig};
//! use bastion_types::ActionRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! let sim = SimRegistry::builder().with_leaf("navigate").build();
//! let kernel = ActionKernel::builder(BastionConfig::default())
//!     .registry(sim.registry())
//!     .world(Arc::new(SimWorld::new()))
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! let safety = kernel.spawn_safety_loop(shutdown.clone());
//! kernel
//!     .execute_action(&ActionRequest::new("navigate").with_param("target", "home"))
//!     .await?;
//! shutdown.cancel();
//! let _ = safety.await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bastion_hal::{CapabilityRegistry, LegacyHandlerTable};
use bastion_kernel::NavigationLeaseManager;
use bastion_perception::{ThreatPerception, WorldClient};
use bastion_types::{ActionOutcome, ActionRequest, BastionError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::action_dispatcher::ActionDispatcher;
use crate::config::BastionConfig;
use crate::safety_monitor::SafetyMonitor;

pub struct ActionKernelBuilder {
    config: BastionConfig,
    registry: Option<Arc<dyn CapabilityRegistry>>,
    legacy: LegacyHandlerTable,
    world: Option<Arc<dyn WorldClient>>,
}

impl ActionKernelBuilder {
    pub fn registry(mut self, registry: Arc<dyn CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn legacy_handlers(mut self, legacy: LegacyHandlerTable) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn world(mut self, world: Arc<dyn WorldClient>) -> Self {
        self.world = Some(world);
        self
    }

    /// Fails with [`BastionError::Config`] when no world client was given.
    /// A missing registry is allowed; leaf routes then report
    /// `FactoryUnavailable`.
    pub fn build(self) -> Result<ActionKernel, BastionError> {
        let world = self
            .world
            .ok_or_else(|| BastionError::Config("a world client is required".to_string()))?;

        let lease = NavigationLeaseManager::new();
        let mut dispatcher = ActionDispatcher::builder()
            .lease(lease.clone())
            .legacy_handlers(self.legacy)
            .world(world.clone())
            .config(self.config.dispatcher.clone());
        if let Some(registry) = self.registry {
            dispatcher = dispatcher.registry(registry);
        }
        let dispatcher = Arc::new(dispatcher.build());
        let safety = Arc::new(SafetyMonitor::new(
            dispatcher.clone(),
            world.clone(),
            self.config.safety.clone(),
        ));

        info!(
            default_holder = %self.config.dispatcher.default_holder,
            detection_radius = self.config.perception.detection_radius,
            "action kernel ready"
        );
        Ok(ActionKernel {
            config: self.config,
            lease,
            dispatcher,
            safety,
            world,
        })
    }
}

pub struct ActionKernel {
    config: BastionConfig,
    lease: NavigationLeaseManager,
    dispatcher: Arc<ActionDispatcher>,
    safety: Arc<SafetyMonitor>,
    world: Arc<dyn WorldClient>,
}

impl ActionKernel {
    pub fn builder(config: BastionConfig) -> ActionKernelBuilder {
        ActionKernelBuilder {
            config,
            registry: None,
            legacy: LegacyHandlerTable::new(),
            world: None,
        }
    }

    pub fn config(&self) -> &BastionConfig {
        &self.config
    }

    pub fn lease(&self) -> &NavigationLeaseManager {
        &self.lease
    }

    pub fn dispatcher(&self) -> Arc<ActionDispatcher> {
        self.dispatcher.clone()
    }

    pub fn safety_monitor(&self) -> Arc<SafetyMonitor> {
        self.safety.clone()
    }

    pub fn world(&self) -> Arc<dyn WorldClient> {
        self.world.clone()
    }

    pub async fn execute_action(
        &self,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, BastionError> {
        self.dispatcher.execute_action(request).await
    }

    /// A fresh perception manager with the configured thresholds.
    pub fn new_perception(&self) -> ThreatPerception {
        ThreatPerception::new(self.config.perception.clone())
    }

    /// Run the safety loop on the Tokio runtime until `shutdown` fires.
    /// The task resolves to the number of completed cycles.
    pub fn spawn_safety_loop(&self, shutdown: CancellationToken) -> JoinHandle<u64> {
        let safety = self.safety.clone();
        let mut perception = self.new_perception();
        tokio::spawn(async move { safety.run(&mut perception, shutdown).await })
    }
}
