use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{timeout, MissedTickBehavior};
use uuid::Uuid;

use super::record::OutboxRecord;
use super::router::EventRouter;
use super::RelayError;
use crate::messaging::{EventPublisher, PublishError};
use crate::metrics::Metrics;
use crate::store::{LockedBatch, OrderStore};

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Publish-then-delete, never the other way around:
//
//   lock (skip locked) -> route -> publish (bounded) -> delete -> release
//
// A crash between publish and delete re-publishes the record on the next
// sweep, so delivery is at-least-once and consumers dedupe on event_id.
//
// Two entry points share the protocol:
//   publish_one - right after a command commits, for low latency
//   sweep       - periodic batch, picks up whatever publish_one missed
//
// A record that fails is deferred, not dropped: transient failures back off
// exponentially from retry_backoff, unroutable records wait the full
// max_retry_backoff. Deferred records queue behind everything already due.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub publish_timeout: Duration,
    /// Delay after the first failed attempt, doubled per attempt
    pub retry_backoff: Duration,
    /// Cap for the doubling, and the delay for records that cannot be routed
    pub max_retry_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(300),
        }
    }
}

impl RelayConfig {
    /// How long a record waits after `attempts` earlier failures plus `error`.
    pub fn retry_delay(&self, attempts: i32, error: &RelayError) -> Duration {
        if !error.is_transient() {
            return self.max_retry_backoff;
        }
        let exponent = attempts.clamp(0, 16) as u32;
        self.retry_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_retry_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Already published, or currently held by a sweep.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub locked: usize,
    pub published: usize,
    pub failed: usize,
    pub unroutable: usize,
}

pub struct OutboxRelay {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    router: EventRouter,
    config: RelayConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        router: EventRouter,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            router,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publish a single freshly committed record.
    ///
    /// Returns `Skipped` if a sweep holds the record or it is already gone.
    /// On failure the record stays in the outbox, deferred for a later sweep.
    pub async fn publish_one(&self, event_id: Uuid) -> Result<PublishOutcome, RelayError> {
        let Some(mut batch) = self.store.lock_record(event_id).await? else {
            tracing::debug!(event_id = %event_id, "Outbox record already taken, skipping");
            return Ok(PublishOutcome::Skipped);
        };

        let Some(record) = batch.records().first().cloned() else {
            batch.release().await?;
            return Ok(PublishOutcome::Skipped);
        };

        match self.dispatch(&record).await {
            Ok(()) => {
                batch.delete(event_id).await?;
                batch.release().await?;
                Ok(PublishOutcome::Published)
            }
            Err(e) => {
                self.observe_failure(&record, &e);
                self.defer(batch.as_mut(), &record, &e).await;
                batch.release().await?;
                Err(e)
            }
        }
    }

    /// Lock one batch of pending records and try to publish each of them.
    ///
    /// Per-record failures are counted, not returned; only store errors on
    /// lock or release fail the sweep.
    pub async fn sweep(&self) -> Result<SweepReport, RelayError> {
        let mut batch = self.store.lock_pending_batch(self.config.batch_size).await?;
        let records = batch.records().to_vec();
        let mut report = SweepReport {
            locked: records.len(),
            ..SweepReport::default()
        };

        for record in &records {
            let Some(event_id) = record.event_id else {
                continue;
            };

            match self.dispatch(record).await {
                Ok(()) => match batch.delete(event_id).await {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        // Published but still queued; the next sweep re-publishes it.
                        tracing::warn!(
                            event_id = %event_id,
                            error = %e,
                            "Failed to delete published outbox record"
                        );
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    self.observe_failure(record, &e);
                    self.defer(batch.as_mut(), record, &e).await;
                    if e.is_transient() {
                        report.failed += 1;
                    } else {
                        report.unroutable += 1;
                    }
                }
            }
        }

        batch.release().await?;
        self.observe_sweep().await;

        if report.locked > 0 {
            tracing::info!(
                locked = report.locked,
                published = report.published,
                failed = report.failed,
                unroutable = report.unroutable,
                "Outbox sweep finished"
            );
        }

        Ok(report)
    }

    /// Sweep every `poll_interval` until `shutdown` flips to true or its
    /// sender is dropped. A sweep in progress always runs to completion.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox relay started"
        );

        // interval() panics on a zero period
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.sweep().await {
                tracing::warn!(error = %e, "Outbox sweep failed");
            }
        }

        tracing::info!("Outbox relay stopped");
    }

    async fn dispatch(&self, record: &OutboxRecord) -> Result<(), RelayError> {
        let destination = self.router.route_for(&record.event_type)?;
        let key = record.partition_key();
        let headers = record.headers();
        let started = Instant::now();

        let receipt = timeout(
            self.config.publish_timeout,
            self.publisher.publish(destination, &key, &record.payload, &headers),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.config.publish_timeout))??;

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_published(&record.event_type, elapsed.as_secs_f64());
        }

        tracing::debug!(
            event_id = ?record.event_id,
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            destination = %receipt.destination,
            elapsed_ms = elapsed.as_millis() as u64,
            "Outbox record published"
        );
        Ok(())
    }

    async fn defer(&self, batch: &mut dyn LockedBatch, record: &OutboxRecord, error: &RelayError) {
        let Some(event_id) = record.event_id else {
            return;
        };
        let delay = self.config.retry_delay(record.attempts, error);
        if let Err(e) = batch.defer(event_id, delay).await {
            // Still released unchanged, so it is simply due again.
            tracing::warn!(event_id = %event_id, error = %e, "Failed to defer outbox record");
        }
    }

    fn observe_failure(&self, record: &OutboxRecord, error: &RelayError) {
        if error.is_transient() {
            tracing::warn!(
                event_id = ?record.event_id,
                event_type = %record.event_type,
                aggregate_id = %record.aggregate_id,
                error = %error,
                "Outbox publish failed, record kept for the next sweep"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_publish_failure(&record.event_type, error.reason());
            }
        } else {
            tracing::error!(
                event_id = ?record.event_id,
                event_type = %record.event_type,
                aggregate_id = %record.aggregate_id,
                permanent = true,
                error = %error,
                retry_in_s = self.config.max_retry_backoff.as_secs(),
                "Outbox record cannot be routed and will stay queued"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_unroutable(&record.event_type);
            }
        }
    }

    async fn observe_sweep(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        metrics.record_sweep();
        if let Some(state) = self.publisher.breaker_state() {
            metrics.update_circuit_breaker_state(state);
        }
        match self.store.pending_count().await {
            Ok(pending) => metrics.set_pending(pending),
            Err(e) => tracing::debug!(error = %e, "Could not count pending outbox records"),
        }
    }
}
