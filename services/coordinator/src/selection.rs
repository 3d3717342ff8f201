//! Daily slate selection
//!
//! Once per day at the configured moment this driver works out which id the
//! contract will hand to the next `startCycle`, creates that cycle row and
//! freezes a slate under it. `startCycle` carries no id, so the proposal
//! must match what the contract's sequential assignment will do; everything
//! downstream is keyed by it.
//!
//! A failed selection leaves the row Pending with no slate. The id was
//! never consumed on-chain, so the next day's run proposes it again.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chain_gateway::ContestChain;
use fixture_store::{AuditEvent, FixtureStore};
use match_selector::{MatchSelector, SelectorError};
use services_common::{Backoff, Clock, CycleId, CycleState, DailySchedule};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::alerts::Alerter;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::metrics::Metrics;

/// Runs one slate selection per day.
pub struct SelectionDriver<C> {
    store: FixtureStore,
    selector: MatchSelector,
    chain: Arc<C>,
    alerter: Alerter,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    schedule: DailySchedule,
}

impl<C: ContestChain> SelectionDriver<C> {
    /// Driver over the shared store, selector and chain.
    #[must_use]
    pub const fn new(
        store: FixtureStore,
        selector: MatchSelector,
        chain: Arc<C>,
        alerter: Alerter,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        schedule: DailySchedule,
    ) -> Self {
        Self {
            store,
            selector,
            chain,
            alerter,
            metrics,
            clock,
            schedule,
        }
    }

    /// Select at every scheduled moment until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(schedule = %self.schedule, "selection driver started");
        loop {
            let now = self.clock.now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or(StdDuration::ZERO);
            debug!(%next, "next selection scheduled");
            tokio::select! {
                () = self.clock.sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("selection driver stopping");
                    return;
                }
            }
            if let Err(err) = self.select_once().await {
                error!(error = %err, "selection run failed; no cycle today");
            }
        }
    }

    /// One selection pass: propose the id, create the row, freeze a slate.
    ///
    /// An insufficient pool is not an error of this driver: the selector
    /// records it and the cycle simply stays Pending for tomorrow.
    pub async fn select_once(&self) -> CoordinatorResult<()> {
        let proposal = self.propose_cycle_id().await?;
        let now = self.clock.now();
        match self.selector.build_slate(proposal, now).await {
            Ok(entries) => {
                info!(
                    cycle_id = %proposal,
                    fixtures = entries.len(),
                    "slate frozen; start submission owed"
                );
                Ok(())
            }
            Err(SelectorError::InsufficientFixtures { eligible, required }) => {
                error!(
                    cycle_id = %proposal,
                    eligible, required,
                    "selection failed; cycle stays pending until tomorrow"
                );
                self.metrics
                    .alerts
                    .with_label_values(&["SelectionFailed"])
                    .inc();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The id the contract will assign to the next `startCycle`.
    ///
    /// Ordinarily `currentCycleId + 1`. Local rows may legitimately run
    /// ahead of that: a Pending row with a frozen slate has a start in
    /// flight and its id is spoken for, and a Pending row without one is a
    /// failed selection whose id is free to reuse. A non-Pending row ahead
    /// of the contract means this process is talking to the wrong contract
    /// or the wrong database, and selection refuses to guess.
    async fn propose_cycle_id(&self) -> CoordinatorResult<CycleId> {
        let chain_current = self.read_current_cycle_id().await?;
        let chain_next = CycleId::new(chain_current.as_u64() + 1);
        let Some(latest) = self.store.latest_cycle_id().await? else {
            return Ok(chain_next);
        };
        if latest < chain_next {
            return Ok(chain_next);
        }

        let state = self.store.cycle(latest).await?.map(|cycle| cycle.state);
        if state != Some(CycleState::Pending) {
            return Err(CoordinatorError::ContractMismatch {
                store_cycle: latest,
                chain_cycle: chain_current,
            });
        }
        if self.store.slate(latest).await?.is_empty() {
            Ok(latest)
        } else {
            Ok(CycleId::new(latest.as_u64() + 1))
        }
    }

    /// Read `currentCycleId` with a bounded retry.
    async fn read_current_cycle_id(&self) -> CoordinatorResult<CycleId> {
        let mut backoff = Backoff::standard();
        loop {
            match self.chain.current_cycle_id().await {
                Ok(id) => return Ok(id),
                Err(err) if err.retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(error = %err, "current cycle id read failed; retrying");
                        self.clock.sleep(delay).await;
                    }
                    None => {
                        self.alerter
                            .raise(
                                &AuditEvent::RetryExhausted {
                                    operation: "current_cycle_id".to_string(),
                                    attempts: backoff.attempts(),
                                },
                                self.clock.now(),
                            )
                            .await;
                        return Err(err.into());
                    }
                },
                Err(err) => return Err(err.into()),
            }
        }
    }
}
