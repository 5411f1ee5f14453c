use tokio::sync::watch;
use tracing::info;

/// Tri-state lifecycle of the server as a whole.
///
/// `Starting → Alive | Failed`; once `Alive`, an external-service outage
/// moves the state to `Failed`, which pauses the tick engine, and back to
/// `Starting` while recovery retries run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Starting,
    Alive,
    Failed,
}

/// Shared readiness handle; observers subscribe through a watch channel.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: watch::Sender<ReadyState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadyState::Starting);
        Self { tx }
    }

    pub fn state(&self) -> ReadyState {
        *self.tx.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ReadyState::Alive
    }

    pub fn set(&self, state: ReadyState) {
        let previous = *self.tx.borrow();
        if previous != state {
            info!(?previous, current = ?state, "Readiness transition");
            let _ = self.tx.send(state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.tx.subscribe()
    }

    /// Block until the state becomes `Alive`.
    pub async fn wait_alive(&self) {
        let mut rx = self.subscribe();
        while *rx.borrow() != ReadyState::Alive {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_in_starting_state() {
        let readiness = Readiness::new();
        assert_eq!(readiness.state(), ReadyState::Starting);
        assert!(!readiness.is_alive());
    }

    #[tokio::test]
    async fn wait_alive_wakes_on_transition() {
        let readiness = Readiness::new();
        let waiter = readiness.clone();
        let handle = tokio::spawn(async move { waiter.wait_alive().await });

        readiness.set(ReadyState::Alive);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("wait_alive should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn failed_is_observable_by_subscribers() {
        let readiness = Readiness::new();
        let mut rx = readiness.subscribe();

        readiness.set(ReadyState::Alive);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ReadyState::Alive);

        readiness.set(ReadyState::Failed);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ReadyState::Failed);
    }
}
