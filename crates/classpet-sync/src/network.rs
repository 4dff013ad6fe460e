//! Connectivity state.
//!
//! The host platform reports online/offline transitions through
//! [`NetworkMonitor::set_online`]; the engine watches the channel and drains
//! the offline queue whenever the device comes back online.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a transition.  Returns `true` if the state actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
