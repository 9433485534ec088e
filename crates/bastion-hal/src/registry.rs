//! [`CapabilityRegistry`] – lookup of capability leaves by name.
//!
//! The dispatcher receives a registry explicitly at construction; there is no
//! process-wide registry.  [`LeafRegistry`] is the in-memory implementation
//! used by hosts that assemble their leaves at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::leaf::Leaf;

/// Source of capability leaves for the dispatcher.
pub trait CapabilityRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Leaf>>;

    /// Whether a guarded contract may be routed to `name`.
    ///
    /// Registries that do not gate routing report every leaf as routable.
    fn is_routable(&self, name: &str) -> bool {
        let _ = name;
        true
    }
}

/// In-memory [`CapabilityRegistry`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use bastion_hal::registry::{CapabilityRegistry, LeafRegistry};
/// use bastion_hal::sim_registry::SimLeaf;
///
/// let mut registry = LeafRegistry::new();
/// registry.register(Arc::new(SimLeaf::new("dig_block")));
/// registry.set_routable("dig_block", false);
///
/// assert!(registry.get("dig_block").is_some());
/// assert!(!registry.is_routable("dig_block"));
/// assert!(registry.get("fly").is_none());
/// ```
#[derive(Default)]
pub struct LeafRegistry {
    leaves: HashMap<String, Arc<dyn Leaf>>,
    unroutable: HashSet<String>,
}

impl LeafRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf under its spec name.  Any previously registered leaf
    /// with the same name is replaced.
    pub fn register(&mut self, leaf: Arc<dyn Leaf>) {
        let name = leaf.spec().name.clone();
        if self.leaves.insert(name.clone(), leaf).is_some() {
            debug!(leaf = %name, "replaced registered leaf");
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Leaf>> {
        self.leaves.remove(name)
    }

    pub fn set_routable(&mut self, name: &str, routable: bool) {
        if routable {
            self.unroutable.remove(name);
        } else {
            self.unroutable.insert(name.to_string());
        }
    }

    /// Registered leaf names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.leaves.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

impl CapabilityRegistry for LeafRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Leaf>> {
        self.leaves.get(name).cloned()
    }

    fn is_routable(&self, name: &str) -> bool {
        !self.unroutable.contains(name)
    }
}
