//! Operator command line.
//!
//! Without a subcommand the binary runs the service. Everything else is a
//! one-shot maintenance operation against the same database and contract,
//! so an operator never needs a second tool to inspect or repair a cycle.

use std::sync::Arc;

use chain_gateway::{ChainCyclePhase, ChainGateway, ContestChain, contract};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fixture_store::{
    AuditEvent, AuditTrail, FixtureResult, FixtureStore, run_migrations,
};
use projector::Projector;
use services_common::constants::SLATE_SIZE;
use services_common::{Clock, CycleId, CycleState, FixtureId, OutcomePair, SystemClock};

use crate::app;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Contest cycle coordinator.
#[derive(Parser)]
#[command(name = "coordinator")]
#[command(about = "Runs Tenfold contest cycles end to end", version)]
pub struct Cli {
    /// Operator command. The service runs when none is given.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operator subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator service. This is the default.
    Run,
    /// Create or update the database schema, then exit.
    Migrate,
    /// Print every active cycle alongside the contract's view of it.
    Status,
    /// Check one cycle's stored state against the contract. Exits nonzero
    /// on divergence.
    Verify {
        /// Cycle to check.
        cycle_id: u64,
    },
    /// Rebuild leaderboard and player projections from evaluated cycles.
    RebuildProjections,
    /// Clear a fixture's dispute flag so resolution can proceed.
    ClearDispute {
        /// Fixture to clear.
        fixture_id: u64,
    },
}

/// Execute a parsed command.
pub async fn dispatch(
    command: Option<Command>,
    config: CoordinatorConfig,
) -> CoordinatorResult<()> {
    match command.unwrap_or(Command::Run) {
        Command::Run => app::run(config).await,
        Command::Migrate => migrate(&config).await,
        Command::Status => status(&config).await,
        Command::Verify { cycle_id } => verify(&config, CycleId::new(cycle_id)).await,
        Command::RebuildProjections => rebuild_projections(&config).await,
        Command::ClearDispute { fixture_id } => {
            clear_dispute(&config, FixtureId::new(fixture_id)).await
        }
    }
}

async fn migrate(config: &CoordinatorConfig) -> CoordinatorResult<()> {
    let pool = app::connect_unverified(config).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    println!("schema ready");
    Ok(())
}

async fn status(config: &CoordinatorConfig) -> CoordinatorResult<()> {
    let pool = app::connect_store(config).await?;
    let store = FixtureStore::new(pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = ChainGateway::connect(config.gateway.clone(), clock).await?;

    let chain_current = gateway.current_cycle_id().await?;
    println!("contract current cycle: {chain_current}");

    let cycles = store.active_cycles().await?;
    if cycles.is_empty() {
        println!("no active cycles");
    }
    for cycle in cycles {
        let snapshot = gateway.cycle(cycle.cycle_id).await?;
        let closes = cycle
            .closes_at
            .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
        println!(
            "{}: store {} | chain {:?} | slips {} | closes {closes}",
            cycle.cycle_id, cycle.state, snapshot.phase, snapshot.slip_count,
        );
    }
    pool.close().await;
    Ok(())
}

async fn verify(config: &CoordinatorConfig, cycle_id: CycleId) -> CoordinatorResult<()> {
    let pool = app::connect_store(config).await?;
    let store = FixtureStore::new(pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = ChainGateway::connect(config.gateway.clone(), clock).await?;

    let Some(cycle) = store.cycle(cycle_id).await? else {
        return Err(CoordinatorError::UnknownCycle { cycle_id });
    };
    let snapshot = gateway.cycle(cycle_id).await?;
    println!("cycle {cycle_id}");
    println!("  store state: {}", cycle.state);
    println!("  chain phase: {:?}", snapshot.phase);

    let mut divergences = 0_u32;

    if phase_contradicts(cycle.state, snapshot.phase) {
        divergences += 1;
        println!(
            "  phase: store {} cannot coexist with chain {:?}",
            cycle.state, snapshot.phase
        );
    }

    let entries = store.slate(cycle_id).await?;
    if entries.is_empty() {
        println!("  slate: not frozen");
    } else if snapshot.phase == ChainCyclePhase::Absent {
        println!("  slate: frozen locally, cycle not started on chain");
    } else {
        let payload = contract::slate_payload(&entries)?;
        let local = contract::slate_hash(&payload);
        if local == snapshot.slate_hash {
            println!("  slate hash: match ({local})");
        } else {
            divergences += 1;
            println!(
                "  slate hash: DIVERGED store {local} chain {}",
                snapshot.slate_hash
            );
        }
    }

    if snapshot.phase == ChainCyclePhase::Resolved {
        let results = store.results_for_cycle(cycle_id).await?;
        let settled: Vec<OutcomePair> = results
            .iter()
            .flatten()
            .filter(|result| !result.disputed)
            .map(FixtureResult::outcomes)
            .collect();
        if settled.len() == SLATE_SIZE {
            let payload = contract::results_payload(&settled)?;
            let local = contract::result_hash(&payload);
            if local == snapshot.result_hash {
                println!("  result hash: match ({local})");
            } else {
                divergences += 1;
                println!(
                    "  result hash: DIVERGED store {local} chain {}",
                    snapshot.result_hash
                );
            }
        } else {
            divergences += 1;
            println!(
                "  results: {} of {SLATE_SIZE} settled locally, contract already resolved",
                settled.len()
            );
        }
    }

    let local_slips = store.slip_count(cycle_id).await?;
    if local_slips > snapshot.slip_count {
        divergences += 1;
        println!(
            "  slips: store {local_slips} exceeds chain {}",
            snapshot.slip_count
        );
    } else {
        println!("  slips: store {local_slips}, chain {}", snapshot.slip_count);
    }

    pool.close().await;
    if divergences > 0 {
        return Err(CoordinatorError::Diverged {
            cycle_id,
            count: divergences,
        });
    }
    println!("no divergence");
    Ok(())
}

/// Store states that can only be reached through a chain event must find
/// the chain agreeing; everything else has a replay-lag explanation.
fn phase_contradicts(state: CycleState, phase: ChainCyclePhase) -> bool {
    match state {
        CycleState::Resolved | CycleState::Evaluated => phase != ChainCyclePhase::Resolved,
        CycleState::Cancelled => phase == ChainCyclePhase::Resolved,
        CycleState::Pending => false,
        CycleState::Open
        | CycleState::Closed
        | CycleState::AwaitingResults
        | CycleState::Resolving => phase == ChainCyclePhase::Absent,
    }
}

async fn rebuild_projections(config: &CoordinatorConfig) -> CoordinatorResult<()> {
    let pool = app::connect_store(config).await?;
    let store = FixtureStore::new(pool.clone());
    let audit = AuditTrail::new(pool.clone());

    let summary = Projector::new(store).rebuild(Utc::now()).await?;
    audit
        .log(
            &AuditEvent::ProjectionsRebuilt {
                cycles: summary.cycles,
            },
            Utc::now(),
        )
        .await?;
    println!(
        "projections rebuilt: {} cycles, {} slips",
        summary.cycles, summary.slips
    );
    if summary.skipped > 0 {
        println!("{} cycles skipped with undecodable rows", summary.skipped);
    }
    pool.close().await;
    Ok(())
}

async fn clear_dispute(config: &CoordinatorConfig, fixture_id: FixtureId) -> CoordinatorResult<()> {
    let pool = app::connect_store(config).await?;
    let store = FixtureStore::new(pool.clone());
    let audit = AuditTrail::new(pool.clone());

    if store.clear_dispute(fixture_id).await? {
        audit
            .log(
                &AuditEvent::DisputeCleared {
                    fixture_id: fixture_id.as_u64(),
                },
                Utc::now(),
            )
            .await?;
        println!("dispute cleared on fixture {fixture_id}");
    } else {
        println!("fixture {fixture_id} has no dispute to clear");
    }
    pool.close().await;
    Ok(())
}
