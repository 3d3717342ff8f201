//! Process assembly and the long-running service entrypoint.
//!
//! [`run`] validates the environment end to end before anything mutating
//! starts: the schema stamp, chain reachability, and agreement between the
//! store's cycle history and the contract's. Only then are the long-lived
//! loops spawned. Shutdown is a watch flip followed by a bounded drain of
//! in-flight transaction drivers.

use std::sync::Arc;
use std::time::Duration;

use chain_gateway::{ChainGateway, ContestChain};
use fixture_store::{AuditTrail, FixtureStore, StoreError, verify_schema};
use match_selector::MatchSelector;
use projector::Projector;
use results_collector::{HttpResultsFeed, ResultsCollector};
use services_common::{Clock, CycleId, CycleState, SystemClock};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::Alerter;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{EventApplier, run_event_loop};
use crate::lifecycle::LifecycleDriver;
use crate::metrics::{self, Metrics};
use crate::selection::SelectionDriver;

/// Connection cap for the shared pool. Five loops share it and none holds
/// a connection across an await on the chain.
const POOL_CONNECTIONS: u32 = 10;

/// Connect the pool and require the schema stamp to match this build.
pub async fn connect_store(config: &CoordinatorConfig) -> CoordinatorResult<PgPool> {
    let pool = pool_options()
        .connect(&config.database_url)
        .await
        .map_err(StoreError::from)?;
    verify_schema(&pool).await?;
    Ok(pool)
}

/// Connect without the schema gate. Only `migrate` wants this.
pub async fn connect_unverified(config: &CoordinatorConfig) -> CoordinatorResult<PgPool> {
    let pool = pool_options()
        .connect(&config.database_url)
        .await
        .map_err(StoreError::from)?;
    Ok(pool)
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(POOL_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
}

/// Refuse to run when the store's history claims cycles the contract has
/// not started. Pending rows ahead of the contract are fine: their start
/// submissions simply have not landed yet and the sweep will retry them.
async fn verify_cycle_agreement(
    store: &FixtureStore,
    chain_current: CycleId,
) -> CoordinatorResult<()> {
    for cycle in store.active_cycles().await? {
        if cycle.state != CycleState::Pending && cycle.cycle_id > chain_current {
            return Err(CoordinatorError::ContractMismatch {
                store_cycle: cycle.cycle_id,
                chain_cycle: chain_current,
            });
        }
    }
    Ok(())
}

/// Drive the results collector on its own cadence.
async fn run_collector(
    mut collector: ResultsCollector<HttpResultsFeed>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "results collector started");
    loop {
        match collector.sweep_once().await {
            Ok(summary) => {
                metrics.feed_sweeps.inc();
                if summary.polled > 0 {
                    debug!(
                        polled = summary.polled,
                        recorded = summary.results_recorded,
                        conflicts = summary.conflicts,
                        failed = summary.failed,
                        "results sweep finished"
                    );
                }
            }
            Err(err) => error!(error = %err, "results sweep failed"),
        }
        tokio::select! {
            () = clock.sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("results collector stopping");
                return;
            }
        }
    }
}

/// Run the coordinator until interrupted.
///
/// Startup is fail-fast: a stale schema, an unreachable chain, or a store
/// whose history contradicts the contract all abort before any loop runs.
pub async fn run(config: CoordinatorConfig) -> CoordinatorResult<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new()?);

    let pool = connect_store(&config).await?;
    let store = FixtureStore::new(pool.clone());
    let audit = AuditTrail::new(pool.clone());
    let alerter = Alerter::new(audit.clone(), Arc::clone(&metrics));

    let gateway = Arc::new(ChainGateway::connect(config.gateway.clone(), Arc::clone(&clock)).await?);
    let chain_current = gateway.current_cycle_id().await?;
    verify_cycle_agreement(&store, chain_current).await?;
    info!(%chain_current, "chain reachable; store and contract agree");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    {
        let metrics = Arc::clone(&metrics);
        let rx = shutdown_rx.clone();
        let addr = config.metrics_addr;
        workers.push(tokio::spawn(async move {
            if let Err(err) = metrics::serve(metrics, addr, rx).await {
                error!(error = %err, "metrics listener failed");
            }
        }));
    }

    let feed = HttpResultsFeed::new(config.feed.clone())?;
    let collector = ResultsCollector::new(
        store.clone(),
        audit.clone(),
        feed,
        Arc::clone(&clock),
        config.collector.clone(),
    );
    workers.push(tokio::spawn(run_collector(
        collector,
        Arc::clone(&metrics),
        Arc::clone(&clock),
        config.collector.effective_interval(),
        shutdown_rx.clone(),
    )));

    let applier = EventApplier::new(store.clone(), alerter.clone(), Arc::clone(&metrics));
    workers.push(tokio::spawn(run_event_loop(
        Arc::clone(&gateway),
        applier,
        alerter.clone(),
        config.start_block,
        config.event_poll_interval,
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));

    let lifecycle = LifecycleDriver::new(
        store.clone(),
        Arc::clone(&gateway),
        Projector::new(store.clone()),
        alerter.clone(),
        Arc::clone(&metrics),
        Arc::clone(&clock),
        config.lifecycle_tick,
    );
    workers.push(tokio::spawn(lifecycle.run(shutdown_rx.clone())));

    let selector = MatchSelector::new(store.clone(), audit.clone(), config.selector.clone());
    let selection = SelectionDriver::new(
        store.clone(),
        selector,
        Arc::clone(&gateway),
        alerter.clone(),
        Arc::clone(&metrics),
        Arc::clone(&clock),
        config.selection_schedule,
    );
    workers.push(tokio::spawn(selection.run(shutdown_rx.clone())));

    info!("coordinator up");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received; shutting down"),
        Err(err) => error!(error = %err, "signal listener failed; shutting down"),
    }
    // Every loop watches this flag. Flip it once and wait for them all.
    let _ = shutdown_tx.send(true);

    for worker in workers {
        if let Err(err) = worker.await {
            error!(error = %err, "worker task panicked");
        }
    }
    if !gateway.drain(config.shutdown_budget).await {
        warn!("transaction drivers still in flight after the shutdown budget");
    }
    pool.close().await;
    info!("coordinator stopped");
    Ok(())
}
