use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::webhook_processor::WebhookProcessor;

/// Deliveries replayed per tick. Failures re-park with a fresh
/// next-attempt time, so a small batch keeps each cycle short.
const BATCH_SIZE: i64 = 50;

/// Periodically replays webhook deliveries parked on the retry queue.
pub struct WebhookRetryWorker {
    processor: Arc<WebhookProcessor>,
    interval_secs: u64,
}

impl WebhookRetryWorker {
    pub fn new(processor: Arc<WebhookProcessor>, interval_secs: u64) -> Self {
        Self {
            processor,
            interval_secs,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        info!(
            interval_secs = self.interval_secs,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.processor.retry_due(BATCH_SIZE).await {
                        Ok(count) => {
                            if count > 0 {
                                info!(replayed = count, "Replayed parked webhooks");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Webhook retry cycle failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Webhook retry worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("Webhook retry worker stopped");
    }
}
