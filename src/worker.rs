//! Completion event worker
//!
//! A bounded pool of consumer loops that claim completion events from the
//! outbox and drive the instance state machine. A handler failure releases
//! the claim so the event is redelivered; the handler itself is idempotent,
//! so at-least-once delivery is safe.

use anyhow::Result;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::db;
use crate::engine;

pub struct CompletionWorker {
    pool: PgPool,
    config: WorkerConfig,
}

impl CompletionWorker {
    pub fn new(pool: PgPool, config: WorkerConfig) -> Self {
        Self { pool, config }
    }

    /// Run consumer loops until the shutdown token fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut handles = Vec::new();

        for consumer in 0..self.config.concurrency {
            let pool = self.pool.clone();
            let config = self.config.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                consumer_loop(consumer, pool, config, shutdown).await;
            }));
        }

        tracing::info!(consumers = self.config.concurrency, "completion worker started");

        for handle in handles {
            handle.await?;
        }

        tracing::info!("completion worker stopped");
        Ok(())
    }
}

async fn consumer_loop(
    consumer: usize,
    pool: PgPool,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match db::events::claim_event(&pool, config.claim_timeout_secs).await {
            Ok(Some(event)) => {
                if let Err(err) = engine::apply_completion_event(&pool, &event).await {
                    tracing::error!(
                        consumer,
                        event_id = %event.id,
                        instance_id = %event.workflow_instance_id,
                        attempt = event.attempt,
                        error = %err,
                        "failed to apply completion event, releasing for redelivery"
                    );

                    if let Err(release_err) = db::events::release_event(&pool, &event.id).await {
                        tracing::error!(
                            consumer,
                            event_id = %event.id,
                            error = %release_err,
                            "failed to release completion event"
                        );
                    }
                }
            }
            Ok(None) => {
                // No work available, sleep briefly and retry
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
            Err(err) => {
                tracing::error!(consumer, error = %err, "failed to claim completion event");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }
}
