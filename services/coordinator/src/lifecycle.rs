//! Time and readiness driven cycle transitions.
//!
//! One sweep per tick walks every non-terminal cycle and moves it along
//! whichever edge is due: closing past the entry deadline, submitting the
//! resolve once results are complete, evaluating once the contract and the
//! store agree on the slip count. The event replay owns the edges the
//! contract announces (Open, Resolved); this driver owns the rest, plus
//! every transaction submission.
//!
//! Submissions run as spawned tasks tracked per cycle, so a slow
//! confirmation never stalls the sweep and a cycle never has two
//! transactions in flight. Cycles fail independently: an error in one is
//! logged and the sweep moves on to the next.

use std::sync::Arc;
use std::time::Duration;

use chain_gateway::{ChainCyclePhase, ContestChain, GatewayError};
use chrono::{DateTime, Utc};
use fixture_store::{AuditEvent, Cycle, FixtureStore, SlateEntry, TransitionOutcome};
use projector::Projector;
use rustc_hash::{FxHashMap, FxHashSet};
use services_common::constants::SLATE_SIZE;
use services_common::{Clock, CycleId, CycleState, FixtureId, FixtureStatus, OutcomePair};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::Alerter;
use crate::error::CoordinatorResult;
use crate::metrics::Metrics;

/// How a submission task ended, reported through its join handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionOutcome {
    /// Confirmed, or failed in a way the next sweep may retry.
    Settled,
    /// Mined and reverted. Never retried without an operator.
    Reverted,
}

/// Drives every non-terminal cycle once per tick.
pub struct LifecycleDriver<C> {
    store: FixtureStore,
    chain: Arc<C>,
    projector: Projector,
    alerter: Alerter,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    /// In-flight submission per cycle. At most one.
    submissions: FxHashMap<u64, JoinHandle<SubmissionOutcome>>,
    /// Cycles whose last submission reverted, held for the operator. A
    /// restart is the explicit way to lift the hold.
    halted: FxHashSet<u64>,
    /// Cycles already paged for a blown resolve deadline.
    overdue_alerted: FxHashSet<u64>,
}

impl<C: ContestChain + 'static> LifecycleDriver<C> {
    /// Driver over the shared store, chain and projector.
    #[must_use]
    pub fn new(
        store: FixtureStore,
        chain: Arc<C>,
        projector: Projector,
        alerter: Alerter,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            chain,
            projector,
            alerter,
            metrics,
            clock,
            tick,
            submissions: FxHashMap::default(),
            halted: FxHashSet::default(),
            overdue_alerted: FxHashSet::default(),
        }
    }

    /// Sweep until `shutdown` flips. Sweep errors are logged and the next
    /// tick runs regardless.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick.as_secs(), "lifecycle driver started");
        loop {
            if let Err(err) = self.sweep_once().await {
                error!(error = %err, "lifecycle sweep failed");
            }
            tokio::select! {
                () = self.clock.sleep(self.tick) => {}
                _ = shutdown.changed() => {
                    info!("lifecycle driver stopping");
                    return;
                }
            }
        }
    }

    /// One pass over every non-terminal cycle, then the stats backlog.
    pub async fn sweep_once(&mut self) -> CoordinatorResult<()> {
        self.reap_submissions().await;

        let now = self.clock.now();
        let cycles = self.store.active_cycles().await?;
        for cycle in &cycles {
            if let Err(err) = self.drive_cycle(cycle, now).await {
                error!(cycle_id = %cycle.cycle_id, error = %err, "cycle sweep failed");
            }
        }

        let applied = self.projector.apply_pending_stats(now).await?;
        if applied > 0 {
            debug!(applied, "user statistics applied");
        }
        Ok(())
    }

    /// Collect finished submission tasks and latch any revert verdicts.
    async fn reap_submissions(&mut self) {
        let finished: Vec<u64> = self
            .submissions
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(cycle_id, _)| *cycle_id)
            .collect();
        for cycle_id in finished {
            let Some(handle) = self.submissions.remove(&cycle_id) else {
                continue;
            };
            match handle.await {
                Ok(SubmissionOutcome::Settled) => {}
                Ok(SubmissionOutcome::Reverted) => {
                    self.halted.insert(cycle_id);
                }
                Err(err) => {
                    error!(cycle_id, error = %err, "submission task panicked");
                }
            }
        }
    }

    async fn drive_cycle(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        self.check_resolve_deadline(cycle, now).await;
        match cycle.state {
            CycleState::Pending => self.drive_pending(cycle, now).await,
            CycleState::Open => self.drive_open(cycle, now).await,
            CycleState::Closed => self.drive_closed(cycle, now).await,
            CycleState::AwaitingResults => self.drive_awaiting(cycle, now).await,
            CycleState::Resolving => {
                self.drive_resolving(cycle);
                Ok(())
            }
            CycleState::Resolved => self.drive_resolved(cycle, now).await,
            // active_cycles never returns terminal states.
            CycleState::Evaluated | CycleState::Cancelled => Ok(()),
        }
    }

    /// Pending with a frozen slate owes the contract a `startCycle`, whether
    /// the freeze just happened or a restart cut the submission loose.
    async fn drive_pending(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let entries = self.store.slate(cycle.cycle_id).await?;
        if entries.len() != SLATE_SIZE {
            // Selection found no slate for this id; it is retried at the
            // next selection moment, not here.
            return Ok(());
        }
        if let Some(fixture_id) = self.cancelled_slate_fixture(&entries).await? {
            return self.cancel_for_fixture(cycle, fixture_id, now).await;
        }
        if !self.submission_slot_free(cycle.cycle_id) {
            return Ok(());
        }
        if self.chain.current_cycle_id().await? >= cycle.cycle_id {
            // The contract already assigned this id; the event replay will
            // open or cancel the row once the log is in the confirmed range.
            return Ok(());
        }
        self.spawn_start(cycle.cycle_id, entries);
        Ok(())
    }

    /// Open -> Closed once the entry deadline passed and the contract has
    /// stopped accepting slips.
    async fn drive_open(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let entries = self.store.slate(cycle.cycle_id).await?;
        if let Some(fixture_id) = self.cancelled_slate_fixture(&entries).await? {
            return self.cancel_for_fixture(cycle, fixture_id, now).await;
        }
        let Some(closes_at) = cycle.closes_at else {
            warn!(cycle_id = %cycle.cycle_id, "open cycle has no close time");
            return Ok(());
        };
        if now < closes_at {
            return Ok(());
        }
        let snapshot = self.chain.cycle(cycle.cycle_id).await?;
        if snapshot.phase == ChainCyclePhase::Open {
            // The contract clock runs behind ours; close on its schedule.
            debug!(cycle_id = %cycle.cycle_id, "entry deadline passed locally, contract still open");
            return Ok(());
        }
        if self.store.mark_cycle_closed(cycle.cycle_id, now).await? == TransitionOutcome::Applied {
            self.metrics.transitions.with_label_values(&["Closed"]).inc();
            info!(cycle_id = %cycle.cycle_id, "entries closed");
        }
        // Closed is a staging state; move straight on.
        if self.store.mark_cycle_awaiting(cycle.cycle_id, now).await? == TransitionOutcome::Applied
        {
            self.metrics
                .transitions
                .with_label_values(&["AwaitingResults"])
                .inc();
        }
        Ok(())
    }

    /// Closed only persists across a crash between the two close edges.
    async fn drive_closed(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let entries = self.store.slate(cycle.cycle_id).await?;
        if let Some(fixture_id) = self.cancelled_slate_fixture(&entries).await? {
            return self.cancel_for_fixture(cycle, fixture_id, now).await;
        }
        if self.store.mark_cycle_awaiting(cycle.cycle_id, now).await? == TransitionOutcome::Applied
        {
            self.metrics
                .transitions
                .with_label_values(&["AwaitingResults"])
                .inc();
        }
        Ok(())
    }

    /// AwaitingResults -> Resolving once all ten results are recorded and
    /// none is disputed.
    async fn drive_awaiting(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let entries = self.store.slate(cycle.cycle_id).await?;
        if let Some(fixture_id) = self.cancelled_slate_fixture(&entries).await? {
            return self.cancel_for_fixture(cycle, fixture_id, now).await;
        }
        if !self.submission_slot_free(cycle.cycle_id) {
            return Ok(());
        }
        let results = self.store.results_for_cycle(cycle.cycle_id).await?;
        if results.len() != SLATE_SIZE || results.iter().any(Option::is_none) {
            return Ok(());
        }
        if results.iter().flatten().any(|result| result.disputed) {
            debug!(cycle_id = %cycle.cycle_id, "results complete but disputed; resolve held");
            return Ok(());
        }
        self.spawn_resolve(cycle.cycle_id);
        Ok(())
    }

    /// Resolving with no live task means a restart cut the submission loose
    /// or the confirmation has not replayed yet. Re-running is safe: the
    /// task checks the contract before submitting anything.
    fn drive_resolving(&mut self, cycle: &Cycle) {
        if !self.submission_slot_free(cycle.cycle_id) {
            return;
        }
        self.spawn_resolve(cycle.cycle_id);
    }

    /// Resolved -> Evaluated once every slip the contract accepted is
    /// indexed locally.
    async fn drive_resolved(&mut self, cycle: &Cycle, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let local = self.store.slip_count(cycle.cycle_id).await?;
        let snapshot = self.chain.cycle(cycle.cycle_id).await?;
        if local < snapshot.slip_count {
            debug!(
                cycle_id = %cycle.cycle_id,
                local, on_chain = snapshot.slip_count,
                "slips still replaying; evaluation deferred"
            );
            return Ok(());
        }
        if local > snapshot.slip_count {
            warn!(
                cycle_id = %cycle.cycle_id,
                local, on_chain = snapshot.slip_count,
                "store indexes more slips than the contract accepted"
            );
            return Ok(());
        }

        let summary = self.projector.evaluate_cycle(cycle.cycle_id, now).await?;
        self.metrics.slips_projected.inc_by(summary.slips as u64);
        if self.store.mark_cycle_evaluated(cycle.cycle_id, now).await? == TransitionOutcome::Applied
        {
            self.metrics.transitions.with_label_values(&["Evaluated"]).inc();
            info!(
                cycle_id = %cycle.cycle_id,
                slips = summary.slips,
                qualified = summary.qualified,
                winner = ?summary.winner,
                "cycle evaluated"
            );
        }
        Ok(())
    }

    /// Page once per process for a cycle past its resolve deadline.
    async fn check_resolve_deadline(&mut self, cycle: &Cycle, now: DateTime<Utc>) {
        if matches!(cycle.state, CycleState::Resolved | CycleState::Evaluated) {
            return;
        }
        let Some(deadline) = cycle.resolve_deadline else {
            return;
        };
        if now <= deadline || !self.overdue_alerted.insert(cycle.cycle_id.as_u64()) {
            return;
        }
        self.alerter
            .raise(
                &AuditEvent::ResolveOverdue {
                    cycle_id: cycle.cycle_id.as_u64(),
                    deadline,
                },
                now,
            )
            .await;
    }

    /// True when a cycle may take a new submission: nothing in flight and
    /// no standing revert hold.
    fn submission_slot_free(&self, cycle_id: CycleId) -> bool {
        let id = cycle_id.as_u64();
        !self.submissions.contains_key(&id) && !self.halted.contains(&id)
    }

    /// First cancelled fixture in the slate, if any.
    async fn cancelled_slate_fixture(
        &self,
        entries: &[SlateEntry],
    ) -> CoordinatorResult<Option<FixtureId>> {
        for entry in entries {
            if let Some(fixture) = self.store.fixture(entry.fixture_id).await? {
                if fixture.status == FixtureStatus::Cancelled {
                    return Ok(Some(entry.fixture_id));
                }
            }
        }
        Ok(None)
    }

    /// A dead fixture voids the whole slate; no resolve is ever submitted.
    async fn cancel_for_fixture(
        &self,
        cycle: &Cycle,
        fixture_id: FixtureId,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        warn!(cycle_id = %cycle.cycle_id, %fixture_id, "slate fixture cancelled");
        let outcome = self
            .store
            .cancel_cycle(cycle.cycle_id, "fixture_cancelled", now)
            .await?;
        if outcome == TransitionOutcome::Applied {
            self.metrics.transitions.with_label_values(&["Cancelled"]).inc();
            self.alerter
                .raise(
                    &AuditEvent::CycleCancelled {
                        cycle_id: cycle.cycle_id.as_u64(),
                        reason: "fixture_cancelled".to_string(),
                    },
                    now,
                )
                .await;
        }
        Ok(())
    }

    fn spawn_start(&mut self, cycle_id: CycleId, entries: Vec<SlateEntry>) {
        let chain = Arc::clone(&self.chain);
        let alerter = self.alerter.clone();
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            submit_start(chain.as_ref(), &alerter, &metrics, &*clock, cycle_id, entries).await
        });
        self.submissions.insert(cycle_id.as_u64(), handle);
    }

    fn spawn_resolve(&mut self, cycle_id: CycleId) {
        let chain = Arc::clone(&self.chain);
        let store = self.store.clone();
        let alerter = self.alerter.clone();
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            submit_resolve(chain.as_ref(), &store, &alerter, &metrics, &*clock, cycle_id).await
        });
        self.submissions.insert(cycle_id.as_u64(), handle);
    }
}

/// Submit `startCycle` and wait for confirmation.
///
/// The Open edge itself is applied by event replay once `CycleStarted` is
/// in the confirmed range; this task only reports the submission's fate.
async fn submit_start<C: ContestChain + ?Sized>(
    chain: &C,
    alerter: &Alerter,
    metrics: &Metrics,
    clock: &dyn Clock,
    cycle_id: CycleId,
    entries: Vec<SlateEntry>,
) -> SubmissionOutcome {
    info!(%cycle_id, "submitting startCycle");
    metrics.tx_submitted.inc();
    match chain.start_cycle(&entries).await {
        Ok(tx) => {
            metrics.tx_confirmed.inc();
            info!(%cycle_id, tx_hash = %tx.tx_hash, block = tx.block_number, "startCycle confirmed");
            SubmissionOutcome::Settled
        }
        Err(err) => {
            report_submission_failure(alerter, metrics, clock, cycle_id, "startCycle", err).await
        }
    }
}

/// Record the resolve intent, then submit `resolveCycle` and wait for
/// confirmation.
///
/// The intent mark lands before anything touches the wire, so a crash in
/// between leaves durable evidence that a transaction may exist. The
/// Resolved edge is applied by event replay; on confirmation this task only
/// pins the hash to the cycle row.
async fn submit_resolve<C: ContestChain + ?Sized>(
    chain: &C,
    store: &FixtureStore,
    alerter: &Alerter,
    metrics: &Metrics,
    clock: &dyn Clock,
    cycle_id: CycleId,
) -> SubmissionOutcome {
    match store.mark_cycle_resolving(cycle_id, clock.now()).await {
        Ok(TransitionOutcome::Applied) => {
            metrics.transitions.with_label_values(&["Resolving"]).inc();
        }
        Ok(TransitionOutcome::AlreadyApplied) => {}
        Err(err) => {
            error!(%cycle_id, error = %err, "resolve intent not recorded; submission abandoned");
            return SubmissionOutcome::Settled;
        }
    }

    match chain.is_cycle_resolved(cycle_id).await {
        Ok(true) => {
            debug!(%cycle_id, "contract already holds results; waiting for the event");
            return SubmissionOutcome::Settled;
        }
        Ok(false) => {}
        Err(err) => {
            error!(%cycle_id, error = %err, "resolved check failed; retried next sweep");
            return SubmissionOutcome::Settled;
        }
    }

    let Some(settled) = load_settled_results(store, cycle_id).await else {
        return SubmissionOutcome::Settled;
    };

    info!(%cycle_id, "submitting resolveCycle");
    metrics.tx_submitted.inc();
    match chain.resolve_cycle(cycle_id, &settled).await {
        Ok(tx) => {
            metrics.tx_confirmed.inc();
            info!(%cycle_id, tx_hash = %tx.tx_hash, block = tx.block_number, "resolveCycle confirmed");
            if let Err(err) = store.update_resolve_tx(cycle_id, &tx.tx_hash, clock.now()).await {
                warn!(%cycle_id, error = %err, "confirmed resolve hash not pinned to the cycle");
            }
            SubmissionOutcome::Settled
        }
        Err(err) => {
            report_submission_failure(alerter, metrics, clock, cycle_id, "resolveCycle", err).await
        }
    }
}

/// Settled outcomes in slate order, or `None` when the vector is not
/// submittable yet.
async fn load_settled_results(store: &FixtureStore, cycle_id: CycleId) -> Option<Vec<OutcomePair>> {
    let results = match store.results_for_cycle(cycle_id).await {
        Ok(results) => results,
        Err(err) => {
            error!(%cycle_id, error = %err, "results unreadable; resolve abandoned this sweep");
            return None;
        }
    };
    let settled: Vec<OutcomePair> = results
        .iter()
        .flatten()
        .filter(|result| !result.disputed)
        .map(fixture_store::FixtureResult::outcomes)
        .collect();
    if settled.len() != SLATE_SIZE {
        // A dispute or late conflict landed between the sweep's check and
        // this task; the next sweep re-decides.
        debug!(%cycle_id, settled = settled.len(), "result vector incomplete; resolve deferred");
        return None;
    }
    Some(settled)
}

/// Classify one failed submission for the operator.
///
/// A revert is terminal for the cycle until an operator intervenes; a
/// confirmation timeout may still land and event replay would observe it;
/// anything else is transient and the next sweep retries.
async fn report_submission_failure(
    alerter: &Alerter,
    metrics: &Metrics,
    clock: &dyn Clock,
    cycle_id: CycleId,
    operation: &str,
    err: GatewayError,
) -> SubmissionOutcome {
    let now = clock.now();
    match err {
        GatewayError::Reverted { tx_hash } => {
            metrics.tx_reverted.inc();
            alerter
                .raise(
                    &AuditEvent::TransactionReverted {
                        cycle_id: cycle_id.as_u64(),
                        tx_hash,
                    },
                    now,
                )
                .await;
            SubmissionOutcome::Reverted
        }
        GatewayError::ConfirmationTimeout { tx_hash, waited_blocks } => {
            warn!(%cycle_id, operation, waited_blocks, "submission unconfirmed within budget");
            alerter
                .raise(
                    &AuditEvent::ConfirmationTimeout {
                        cycle_id: cycle_id.as_u64(),
                        tx_hash,
                    },
                    now,
                )
                .await;
            SubmissionOutcome::Settled
        }
        err => {
            error!(%cycle_id, operation, error = %err, "submission failed; retried next sweep");
            SubmissionOutcome::Settled
        }
    }
}
