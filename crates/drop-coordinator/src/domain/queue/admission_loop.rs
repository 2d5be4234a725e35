use log::{debug, error, info};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::QueueStore;
use crate::domain::Error;

/// Ticks at `1/issueRate` across every drop currently known to have a
/// queue, promoting `waiting` tokens to `ready` while capacity remains.
/// One admission loop serves every drop; the per-drop cap still lives in
/// `QueueCounters`, so concurrent drops don't starve each other.
pub struct AdmissionLoop {
    store: Arc<QueueStore>,
    active_drop_ids: Arc<tokio::sync::RwLock<Vec<String>>>,
    ready_cap: u32,
    ready_ttl_secs: u64,
    tick_interval: Duration,
    cancel_token: CancellationToken,
}

impl AdmissionLoop {
    pub fn new(
        store: Arc<QueueStore>,
        active_drop_ids: Arc<tokio::sync::RwLock<Vec<String>>>,
        ready_cap: u32,
        ready_ttl_secs: u64,
        tick_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            active_drop_ids,
            ready_cap,
            ready_ttl_secs,
            tick_interval,
            cancel_token,
        }
    }

    pub async fn watch(&self) -> Result<(), anyhow::Error> {
        info!("Starting admission loop");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("admission loop received cancellation");
                break;
            }

            match self.admit_all().await {
                Ok(promoted) if promoted > 0 => debug!("admission loop promoted {promoted} tokens"),
                Ok(_) => {}
                Err(e) => error!("admission loop tick error: {e}"),
            }

            tokio::select! {
                _ = sleep(self.tick_interval) => continue,
                _ = self.cancel_token.cancelled() => {
                    info!("admission loop cancelled during sleep");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn admit_all(&self) -> Result<u32, Error> {
        let drop_ids = self.active_drop_ids.read().await.clone();
        let mut total_promoted = 0;
        for drop_id in drop_ids {
            total_promoted += self.store.admit(&drop_id, self.ready_cap, self.ready_ttl_secs).await?;
        }
        Ok(total_promoted)
    }
}
