//! Record of running background units.
//!
//! Units register themselves when they start and the returned guard removes
//! the entry when dropped, so the running flag cannot outlive the unit.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    id: u64,
    pub package: String,
    /// Fully qualified name, e.g. `skyprobe::location::LocationAcquisition`.
    pub name: String,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    entries: Mutex<Vec<ServiceEntry>>,
}

/// Cheap to clone; all clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, package: impl Into<String>, name: impl Into<String>) -> ServiceGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ServiceEntry {
            id,
            package: package.into(),
            name: name.into(),
        };
        tracing::debug!(package = %entry.package, name = %entry.name, "service registered");
        self.inner.entries.lock().push(entry);

        ServiceGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Names of running units owned by `package`, in registration order.
    pub fn running_in(&self, package: &str) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|e| e.package == package)
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn is_running(&self, package: &str, name: &str) -> bool {
        self.inner.entries.lock().iter().any(|e| e.package == package && e.name == name)
    }

    fn remove(&self, id: u64) {
        let mut entries = self.inner.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            let entry = entries.remove(pos);
            tracing::debug!(package = %entry.package, name = %entry.name, "service unregistered");
        }
    }
}

/// Keeps a registry entry alive. Dropping it marks the unit as stopped.
#[derive(Debug)]
pub struct ServiceGuard {
    registry: ServiceRegistry,
    id: u64,
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_clears_entry() {
        let registry = ServiceRegistry::new();
        let guard = registry.register("skyprobe", "skyprobe::a");
        assert!(registry.is_running("skyprobe", "skyprobe::a"));

        drop(guard);
        assert!(!registry.is_running("skyprobe", "skyprobe::a"));
        assert!(registry.running_in("skyprobe").is_empty());
    }

    #[test]
    fn running_in_filters_by_package_and_keeps_order() {
        let registry = ServiceRegistry::new();
        let _a = registry.register("skyprobe", "skyprobe::a");
        let _other = registry.register("com.example", "com.example::Sync");
        let _b = registry.register("skyprobe", "skyprobe::b");

        assert_eq!(registry.running_in("skyprobe"), vec!["skyprobe::a", "skyprobe::b"]);
        assert_eq!(registry.running_in("com.example"), vec!["com.example::Sync"]);
    }

    #[test]
    fn duplicate_names_are_tracked_separately() {
        let registry = ServiceRegistry::new();
        let first = registry.register("skyprobe", "skyprobe::a");
        let _second = registry.register("skyprobe", "skyprobe::a");

        drop(first);
        assert!(registry.is_running("skyprobe", "skyprobe::a"));
    }
}
