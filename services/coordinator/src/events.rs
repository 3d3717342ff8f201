//! Chain event replay
//!
//! The contract is the only source of truth for slips, claims and the Open
//! and Resolved edges; this module folds its confirmed events into the
//! store. Every handler is idempotent behind a store-level key, so a crash
//! between applying a batch and advancing the cursor replays cleanly.
//!
//! Hash checks happen here. `CycleStarted` must announce the hash of the
//! slate this store froze and `CycleResolved` the hash of the results it
//! collected; a divergence is a hard stop for that cycle, not something to
//! paper over.

use std::sync::Arc;
use std::time::Duration;

use chain_gateway::{B256, ChainEvent, ContestChain, EventBatch, EventEnvelope, contract};
use chrono::{DateTime, Utc};
use fixture_store::{
    AuditEvent, FixtureStore, NewPrizeClaim, NewSlip, StoreError, TransitionOutcome,
};
use services_common::constants::SLATE_SIZE;
use services_common::{Backoff, Clock, CycleId, CycleState, OutcomePair};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::alerts::Alerter;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::metrics::Metrics;

/// Cursor row naming the contract event stream.
pub const EVENT_CURSOR: &str = "chain_events";

/// Folds confirmed contract events into the store.
#[derive(Clone)]
pub struct EventApplier {
    store: FixtureStore,
    alerter: Alerter,
    metrics: Arc<Metrics>,
}

impl EventApplier {
    /// Applier over the shared store.
    #[must_use]
    pub const fn new(store: FixtureStore, alerter: Alerter, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            alerter,
            metrics,
        }
    }

    /// First block the next poll must cover.
    ///
    /// The cursor records the last fully applied block; an absent cursor
    /// means a fresh store starting from the deployment block.
    pub async fn next_from_block(&self, start_block: u64) -> CoordinatorResult<u64> {
        Ok(self
            .store
            .cursor(EVENT_CURSOR)
            .await?
            .map_or(start_block, |last| last + 1))
    }

    /// Apply one confirmed batch in order, then advance the cursor past it.
    ///
    /// An event that can never apply (its cycle is in a state the edge does
    /// not leave from) is alerted and skipped, because replaying it forever
    /// would wedge every event behind it. Store and connection errors abort
    /// the batch with the cursor untouched, so the same range is retried.
    pub async fn apply_batch(
        &self,
        batch: &EventBatch,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<usize> {
        let mut applied = 0;
        for envelope in &batch.events {
            match self.apply(envelope, now).await {
                Ok(()) => {
                    self.metrics
                        .chain_events
                        .with_label_values(&[envelope.event.kind()])
                        .inc();
                    applied += 1;
                }
                Err(CoordinatorError::Store(StoreError::InvalidTransition {
                    cycle_id,
                    from,
                    to,
                    actual,
                })) => {
                    error!(
                        %cycle_id, %from, %to, %actual,
                        kind = envelope.event.kind(),
                        tx_hash = %envelope.tx_hash,
                        "event contradicts the recorded cycle state; skipped"
                    );
                    self.metrics
                        .alerts
                        .with_label_values(&["event_order"])
                        .inc();
                }
                Err(err) => return Err(err),
            }
        }

        if batch.next_from_block > 0 {
            self.store
                .advance_cursor(EVENT_CURSOR, batch.next_from_block - 1, now)
                .await?;
        }
        Ok(applied)
    }

    async fn apply(&self, envelope: &EventEnvelope, now: DateTime<Utc>) -> CoordinatorResult<()> {
        match &envelope.event {
            ChainEvent::CycleStarted {
                cycle_id,
                slate_hash,
            } => {
                self.apply_cycle_started(*cycle_id, *slate_hash, envelope, now)
                    .await
            }
            ChainEvent::CycleResolved {
                cycle_id,
                result_hash,
            } => {
                self.apply_cycle_resolved(*cycle_id, *result_hash, envelope, now)
                    .await
            }
            ChainEvent::SlipPlaced {
                cycle_id,
                slip_id,
                player,
                predictions,
            } => {
                if self.store.cycle(*cycle_id).await?.is_none() {
                    warn!(%cycle_id, slip_id = %slip_id, "slip for a cycle this store never created");
                    return Ok(());
                }
                let inserted = self
                    .store
                    .insert_slip(
                        &NewSlip {
                            slip_id: *slip_id,
                            cycle_id: *cycle_id,
                            player: *player,
                            predictions: predictions.clone(),
                            placed_at: envelope.block_time,
                            block_number: envelope.block_number,
                            tx_hash: envelope.tx_hash.clone(),
                            log_index: envelope.log_index,
                        },
                        now,
                    )
                    .await?;
                if !inserted {
                    debug!(slip_id = %slip_id, "slip already indexed");
                }
                Ok(())
            }
            ChainEvent::PrizeClaimed {
                cycle_id,
                slip_id,
                player,
                amount_wei,
            } => {
                self.store
                    .insert_claim(&NewPrizeClaim {
                        cycle_id: *cycle_id,
                        slip_id: *slip_id,
                        player: *player,
                        amount_wei: amount_wei.clone(),
                        block_number: envelope.block_number,
                        claimed_at: envelope.block_time,
                        tx_hash: envelope.tx_hash.clone(),
                        log_index: envelope.log_index,
                    })
                    .await?;
                Ok(())
            }
        }
    }

    /// `CycleStarted`: verify the announced slate hash, then Pending -> Open.
    ///
    /// A hash that does not match what this store froze means entries are
    /// being taken against a slate nobody here selected. The cycle is
    /// cancelled and the operator paged; it must never accept results.
    async fn apply_cycle_started(
        &self,
        cycle_id: CycleId,
        announced: B256,
        envelope: &EventEnvelope,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        let Some(cycle) = self.store.cycle(cycle_id).await? else {
            warn!(%cycle_id, "CycleStarted for a cycle this store never created");
            return Ok(());
        };
        if cycle.state != CycleState::Pending {
            debug!(%cycle_id, state = %cycle.state, "CycleStarted replayed after the open");
            return Ok(());
        }

        let entries = self.store.slate(cycle_id).await?;
        let computed = contract::slate_payload(&entries)
            .map(|payload| contract::slate_hash(&payload))
            .ok();
        if computed == Some(announced) {
            let outcome = self.store.mark_cycle_open(cycle_id, &envelope.tx_hash, now).await?;
            if outcome == TransitionOutcome::Applied {
                self.metrics.transitions.with_label_values(&["Open"]).inc();
                info!(%cycle_id, tx_hash = %envelope.tx_hash, "cycle open for entries");
            }
            return Ok(());
        }

        let expected = computed.map_or_else(
            || format!("{} slate rows", entries.len()),
            |hash| format!("{hash:#x}"),
        );
        self.alerter
            .raise(
                &AuditEvent::SlateMismatch {
                    cycle_id: cycle_id.as_u64(),
                    expected,
                    actual: format!("{announced:#x}"),
                },
                now,
            )
            .await;
        let outcome = self.store.cancel_cycle(cycle_id, "slate_mismatch", now).await?;
        if outcome == TransitionOutcome::Applied {
            self.metrics.transitions.with_label_values(&["Cancelled"]).inc();
        }
        Ok(())
    }

    /// `CycleResolved`: verify the announced result hash, then
    /// Resolving -> Resolved with the confirmed outcome vector.
    ///
    /// On a mismatch the cycle holds in Resolving. Scoring against results
    /// the contract does not hold would pay the wrong players, so nothing
    /// advances until an operator reconciles the two sides.
    async fn apply_cycle_resolved(
        &self,
        cycle_id: CycleId,
        announced: B256,
        envelope: &EventEnvelope,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        let Some(cycle) = self.store.cycle(cycle_id).await? else {
            warn!(%cycle_id, "CycleResolved for a cycle this store never created");
            return Ok(());
        };
        match cycle.state {
            CycleState::Resolved | CycleState::Evaluated => {
                debug!(%cycle_id, "CycleResolved replayed after the resolve");
                return Ok(());
            }
            CycleState::AwaitingResults => {
                // The contract holds results this process never submitted,
                // either an external submitter or a lost intent mark. Record
                // the intent so the ordinary edge below can apply.
                self.store.mark_cycle_resolving(cycle_id, now).await?;
            }
            _ => {}
        }

        let results = self.store.results_for_cycle(cycle_id).await?;
        let settled: Vec<OutcomePair> = results
            .iter()
            .flatten()
            .map(fixture_store::FixtureResult::outcomes)
            .collect();
        if settled.len() != SLATE_SIZE {
            self.alerter
                .raise(
                    &AuditEvent::ResultMismatch {
                        cycle_id: cycle_id.as_u64(),
                        expected: format!("{} of {SLATE_SIZE} results recorded", settled.len()),
                        actual: format!("{announced:#x}"),
                    },
                    now,
                )
                .await;
            return Ok(());
        }

        let payload = contract::results_payload(&settled)?;
        let computed = contract::result_hash(&payload);
        if computed != announced {
            self.alerter
                .raise(
                    &AuditEvent::ResultMismatch {
                        cycle_id: cycle_id.as_u64(),
                        expected: format!("{computed:#x}"),
                        actual: format!("{announced:#x}"),
                    },
                    now,
                )
                .await;
            return Ok(());
        }

        let moneyline: Vec<i16> = settled.iter().map(|p| i16::from(p.moneyline.wire())).collect();
        let totals: Vec<i16> = settled.iter().map(|p| i16::from(p.totals.wire())).collect();
        let outcome = self
            .store
            .mark_cycle_resolved(cycle_id, &envelope.tx_hash, &moneyline, &totals, now)
            .await?;
        if outcome == TransitionOutcome::Applied {
            self.metrics.transitions.with_label_values(&["Resolved"]).inc();
            info!(%cycle_id, tx_hash = %envelope.tx_hash, "cycle resolved on-chain");
        }
        Ok(())
    }
}

/// Poll confirmed events and apply them until `shutdown` flips.
///
/// Poll failures back off and the loop keeps going; once the backoff budget
/// is spent the exhaustion is alerted and polling resumes at the ordinary
/// cadence. The cursor only ever advances after a fully applied batch.
pub async fn run_event_loop<C: ContestChain>(
    chain: Arc<C>,
    applier: EventApplier,
    alerter: Alerter,
    start_block: u64,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        start_block,
        interval_secs = poll_interval.as_secs(),
        "event replay started"
    );
    let mut backoff = Backoff::standard();
    loop {
        let now = clock.now();
        let outcome = poll_once(chain.as_ref(), &applier, start_block, now).await;
        let delay = match outcome {
            Ok(applied) => {
                if applied > 0 {
                    debug!(applied, "event batch applied");
                }
                backoff.reset();
                poll_interval
            }
            Err(err) => {
                error!(error = %err, "event poll failed");
                match backoff.next_delay() {
                    Some(delay) => delay,
                    None => {
                        alerter
                            .raise(
                                &AuditEvent::RetryExhausted {
                                    operation: "event_poll".to_string(),
                                    attempts: backoff.attempts(),
                                },
                                now,
                            )
                            .await;
                        backoff.reset();
                        poll_interval
                    }
                }
            }
        };
        tokio::select! {
            () = clock.sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("event replay stopping");
                return;
            }
        }
    }
}

async fn poll_once<C: ContestChain + ?Sized>(
    chain: &C,
    applier: &EventApplier,
    start_block: u64,
    now: DateTime<Utc>,
) -> CoordinatorResult<usize> {
    let from = applier.next_from_block(start_block).await?;
    let batch = chain.poll_events(from).await?;
    applier.apply_batch(&batch, now).await
}
