//! Service State
//!
//! The lifecycle states of the south service and the cell that publishes them.

use serde::Serialize;
use tokio::sync::watch;

/// Current state of the south service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Constructed, `start` not yet called
    Created,
    /// Loading the plugin and registering with core
    Starting,
    /// Ingesting readings
    Running,
    /// Ingestion is being paused or torn down
    Stopping,
    /// Plugin loaded but ingestion inactive
    Paused,
    /// Terminal state
    Shutdown,
}

impl ServiceState {
    /// Check if the service is in its terminal state
    pub fn is_terminal(&self) -> bool {
        *self == ServiceState::Shutdown
    }

    /// Check if the service is running
    pub fn is_running(&self) -> bool {
        *self == ServiceState::Running
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Created => write!(f, "created"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Paused => write!(f, "paused"),
            ServiceState::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Publishes state transitions to any number of observers
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ServiceState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ServiceState::Created);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ServiceState {
        *self.tx.borrow()
    }

    /// Move to a new state, returning the previous one
    pub(crate) fn set(&self, state: ServiceState) -> ServiceState {
        self.tx.send_replace(state)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ServiceState::Shutdown.is_terminal());
        assert!(!ServiceState::Paused.is_terminal());
        assert!(ServiceState::Running.is_running());
        assert_eq!(ServiceState::Paused.to_string(), "paused");
    }

    #[tokio::test]
    async fn test_state_cell_notifies_observers() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        assert_eq!(cell.get(), ServiceState::Created);

        assert_eq!(cell.set(ServiceState::Starting), ServiceState::Created);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ServiceState::Starting);
    }
}
