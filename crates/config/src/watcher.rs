//! Atomic configuration snapshot handling.

use std::sync::{Arc, RwLock};

use crate::Config;

/// Holder for the live configuration snapshot.
///
/// Requests clone the `Arc` once on entry and keep that snapshot for their
/// whole lifetime; a reload swaps the pointer without touching in-flight
/// requests.
#[derive(Clone)]
pub struct ConfigWatcher {
    current: Arc<RwLock<Arc<Config>>>,
}

impl ConfigWatcher {
    /// Wrap an initial configuration.
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The snapshot to use for a new request.
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the live snapshot.
    pub fn swap(&self, config: Config) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_does_not_disturb_existing_snapshots() {
        let watcher = ConfigWatcher::new(Config::default());
        let before = watcher.snapshot();

        let mut updated = Config::default();
        updated.server.port = 9999;
        watcher.swap(updated);

        assert_eq!(before.server.port, 8000);
        assert_eq!(watcher.snapshot().server.port, 9999);
    }
}
