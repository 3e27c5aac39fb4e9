//! PresenceSweeper - periodic stale-presence cleanup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use super::PresenceTracker;

#[derive(Debug, Clone)]
pub struct PresenceSweeperConfig {
    pub interval: Duration,
    /// Heartbeat age after which a user is considered gone.
    pub max_age: Duration,
}

impl Default for PresenceSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_age: Duration::from_secs(90),
        }
    }
}

pub struct PresenceSweeper {
    tracker: Arc<PresenceTracker>,
    config: PresenceSweeperConfig,
}

impl PresenceSweeper {
    pub fn new(tracker: Arc<PresenceTracker>, config: PresenceSweeperConfig) -> Self {
        Self { tracker, config }
    }

    /// Sweeps every interval until shutdown. Errors are logged, not fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("presence sweeper stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tracker.cleanup_stale_presence(self.config.max_age).await {
                        tracing::warn!(error = %e, "presence sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::presence::InMemoryPresenceStore;
    use crate::domain::foundation::{ConnectionId, DeviceId, DomainError, Envelope, Timestamp, UserId};
    use crate::ports::EventPublisher;
    use async_trait::async_trait;

    struct NullPublisher;

    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish(&self, _: Envelope) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sweeper_takes_stale_users_offline_and_stops() {
        let store = Arc::new(InMemoryPresenceStore::new());
        let tracker = Arc::new(PresenceTracker::new(store.clone(), Arc::new(NullPublisher)));
        let user = UserId::new("u1").unwrap();
        tracker
            .set_online(&user, &DeviceId::new("d1").unwrap(), &ConnectionId::new())
            .await
            .unwrap();
        store.set_heartbeat(&user, Timestamp::now().plus_secs(-600));

        let sweeper = PresenceSweeper::new(
            tracker.clone(),
            PresenceSweeperConfig {
                interval: Duration::from_millis(10),
                max_age: Duration::from_secs(90),
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(!tracker.get_presence(&user).await.unwrap().online);
    }
}
