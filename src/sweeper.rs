use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use crate::progress::ProgressStore;

/// Periodically drop finished jobs nobody collected.
pub fn spawn_sweeper(store: Arc<ProgressStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            sweep_once(&store, ttl);
        }
    })
}

pub fn sweep_once(store: &ProgressStore, ttl: Duration) -> usize {
    let evicted = store.evict_expired(ttl);
    if evicted > 0 {
        warn!("evicted {} expired jobs ({} still tracked)", evicted, store.len());
    } else {
        debug!("sweep found nothing to evict");
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_failed_jobs_and_keeps_running_ones() {
        let store = Arc::new(ProgressStore::new());
        let failed = Uuid::new_v4();
        let running = Uuid::new_v4();
        store.create(failed);
        store.create(running);
        store.fail(&failed, "boom");

        let handle = spawn_sweeper(store.clone(), Duration::ZERO, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.read(&failed).is_none());
        assert!(store.read(&running).is_some());
        handle.abort();
    }

    #[test]
    fn fresh_jobs_survive_a_sweep() {
        let store = ProgressStore::new();
        let id = Uuid::new_v4();
        store.create(id);
        store.fail(&id, "boom");
        assert_eq!(sweep_once(&store, Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }
}
