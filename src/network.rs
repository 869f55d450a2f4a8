//! Connectivity state for the offline-first core.
//!
//! A process-wide online/offline boolean, driven by the host's
//! connectivity events (`set_online`). The sync engine and audio uploader
//! gate on it, and async waiters observe transitions through a watch
//! channel so a regained connection can re-trigger a drain.

use tokio::sync::watch;

/// Observable online/offline state.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(initial_online: bool) -> Self {
        let (tx, _) = watch::channel(initial_online);
        Self { tx }
    }

    /// Record a connectivity transition. No-op if the state is unchanged,
    /// so waiters only wake on real transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network state changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(NetworkMonitor::new(true).is_online());
        assert!(!NetworkMonitor::new(false).is_online());
    }

    #[tokio::test]
    async fn test_waiters_observe_transition() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_redundant_set_does_not_wake() {
        let monitor = NetworkMonitor::new(true);
        let rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
    }
}
