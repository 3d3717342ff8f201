//! Persisted entity types
//!
//! These structs mirror the relational rows one-to-one. Domain validation
//! happens when rows are decoded, so a corrupt row surfaces as an error
//! instead of a bad value flowing into scoring.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use services_common::{
    CycleId, CycleState, FixtureId, FixtureOdds, FixtureStatus, OutcomePair, PlayerAddress,
    Prediction, SlipId,
};

/// A fixture as ingested from the data provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Provider-stable identifier.
    pub fixture_id: FixtureId,
    /// League the fixture belongs to.
    pub league: String,
    /// Home side.
    pub home_team: String,
    /// Away side.
    pub away_team: String,
    /// Kickoff instant. Immutable after first insert.
    pub kickoff_at: DateTime<Utc>,
    /// Current status as driven by the results collector.
    pub status: FixtureStatus,
    /// When the fixture first entered the store.
    pub first_seen_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `upsert_fixture`.
#[derive(Debug, Clone)]
pub struct NewFixture {
    /// Provider-stable identifier.
    pub fixture_id: FixtureId,
    /// League the fixture belongs to.
    pub league: String,
    /// Home side.
    pub home_team: String,
    /// Away side.
    pub away_team: String,
    /// Kickoff instant.
    pub kickoff_at: DateTime<Utc>,
}

/// One appended odds quote for a single market of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketQuote {
    /// 1X2 prices.
    Moneyline {
        /// Home win price.
        home: services_common::OddsX100,
        /// Draw price.
        draw: services_common::OddsX100,
        /// Away win price.
        away: services_common::OddsX100,
    },
    /// Over/under 2.5 prices.
    Totals {
        /// Over price.
        over: services_common::OddsX100,
        /// Under price.
        under: services_common::OddsX100,
    },
}

/// A recorded final result. Write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureResult {
    /// Fixture this result settles.
    pub fixture_id: FixtureId,
    /// Final home goals.
    pub home_goals: u16,
    /// Final away goals.
    pub away_goals: u16,
    /// When the provider reported the fixture finished.
    pub finished_at: DateTime<Utc>,
    /// When the store recorded it.
    pub recorded_at: DateTime<Utc>,
    /// Set when a later report disagreed; blocks cycle resolution until an
    /// operator clears it.
    pub disputed: bool,
}

impl FixtureResult {
    /// Outcomes derived from the stored score.
    #[must_use]
    pub const fn outcomes(&self) -> OutcomePair {
        OutcomePair::from_score(self.home_goals, self.away_goals)
    }
}

/// Outcome of a `record_result` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultWrite {
    /// First write for this fixture.
    Recorded,
    /// Identical payload was already on record.
    Unchanged,
}

/// A contest cycle row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Monotonic contest identifier.
    pub cycle_id: CycleId,
    /// Lifecycle state.
    pub state: CycleState,
    /// When `startCycle` confirmed, if it has.
    pub opened_at: Option<DateTime<Utc>>,
    /// Entry close instant: earliest slate kickoff minus the entry grace.
    pub closes_at: Option<DateTime<Utc>>,
    /// Alerting deadline for resolution.
    pub resolve_deadline: Option<DateTime<Utc>>,
    /// Hash of the confirmed `startCycle` transaction.
    pub start_tx_hash: Option<String>,
    /// Hash of the latest `resolveCycle` submission.
    pub resolve_tx_hash: Option<String>,
    /// Why the cycle was cancelled, for terminal failures.
    pub cancel_reason: Option<String>,
    /// Confirmed moneyline outcomes, slate order. Present once Resolved.
    pub result_moneyline: Option<Vec<i16>>,
    /// Confirmed totals outcomes, slate order. Present once Resolved.
    pub result_totals: Option<Vec<i16>>,
    /// Whether user statistics were rolled up for this cycle.
    pub stats_applied: bool,
    /// Row creation.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a durable state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied by this call.
    Applied,
    /// A previous call already applied it; safe under at-least-once retries.
    AlreadyApplied,
}

/// One appended row of the cycle transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Log sequence.
    pub id: i64,
    /// Cycle transitioned.
    pub cycle_id: CycleId,
    /// State before.
    pub from_state: CycleState,
    /// State after.
    pub to_state: CycleState,
    /// What caused the transition.
    pub trigger_event: String,
    /// Transaction hash, for chain-driven transitions.
    pub tx_hash: Option<String>,
    /// Wall clock at transition.
    pub occurred_at: DateTime<Utc>,
}

/// One frozen slate position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateEntry {
    /// Owning cycle.
    pub cycle_id: CycleId,
    /// Slate position 0..9, kickoff order then fixture id. Evaluation order.
    pub slot: u8,
    /// Fixture at this position.
    pub fixture_id: FixtureId,
    /// League, copied at freeze.
    pub league: String,
    /// Home side, copied at freeze.
    pub home_team: String,
    /// Away side, copied at freeze.
    pub away_team: String,
    /// Kickoff, copied at freeze.
    pub kickoff_at: DateTime<Utc>,
    /// Prices frozen for this cycle. Never updated afterwards.
    pub odds: FixtureOdds,
    /// Freeze instant, identical across the ten rows of one slate.
    pub frozen_at: DateTime<Utc>,
}

/// An indexed on-chain slip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slip {
    /// On-chain slip identifier.
    pub slip_id: SlipId,
    /// Cycle entered.
    pub cycle_id: CycleId,
    /// Player who placed it.
    pub player: PlayerAddress,
    /// Ten predictions aligned to slate slots.
    pub predictions: Vec<Prediction>,
    /// Block timestamp of placement. Scoring tie-break.
    pub placed_at: DateTime<Utc>,
    /// Block the placement landed in.
    pub block_number: u64,
    /// Placement transaction hash.
    pub tx_hash: String,
    /// Log index within the transaction's block.
    pub log_index: u32,
    /// Whether the projector has scored this slip.
    pub evaluated: bool,
    /// Hits across the ten positions, once evaluated.
    pub correct_count: Option<u8>,
    /// Whether the slip met the qualify threshold, once evaluated.
    pub qualified: Option<bool>,
    /// Score in odds minor units, once evaluated. Zero when unqualified.
    pub score: Option<Decimal>,
    /// Dense rank within the cycle, once evaluated.
    pub rank: Option<u32>,
}

/// Insert payload for `insert_slip`, straight from a `SlipPlaced` event.
#[derive(Debug, Clone)]
pub struct NewSlip {
    /// On-chain slip identifier.
    pub slip_id: SlipId,
    /// Cycle entered.
    pub cycle_id: CycleId,
    /// Player who placed it.
    pub player: PlayerAddress,
    /// Ten predictions aligned to slate slots.
    pub predictions: Vec<Prediction>,
    /// Block timestamp of placement.
    pub placed_at: DateTime<Utc>,
    /// Block the placement landed in.
    pub block_number: u64,
    /// Placement transaction hash.
    pub tx_hash: String,
    /// Log index within the transaction's block.
    pub log_index: u32,
}

/// Per-slip output of a cycle evaluation, written in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedSlip {
    /// Slip being scored.
    pub slip_id: SlipId,
    /// Player, denormalized into the leaderboard row.
    pub player: PlayerAddress,
    /// Hits across the ten positions.
    pub correct_count: u8,
    /// Whether the qualify threshold was met.
    pub qualified: bool,
    /// Score in odds minor units. Zero when unqualified.
    pub score: Decimal,
    /// Dense rank within the cycle.
    pub rank: u32,
    /// Placement instant, denormalized into the leaderboard row.
    pub placed_at: DateTime<Utc>,
}

/// One materialized leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// Cycle the row belongs to.
    pub cycle_id: CycleId,
    /// Dense rank, 1 is best.
    pub rank: u32,
    /// Ranked slip.
    pub slip_id: SlipId,
    /// Player who placed it.
    pub player: PlayerAddress,
    /// Hits across the ten positions.
    pub correct_count: u8,
    /// Score in odds minor units.
    pub score: Decimal,
    /// Placement instant. Tie-break metadata.
    pub placed_at: DateTime<Utc>,
}

/// Rolled-up per-player statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// Player the row describes.
    pub player: PlayerAddress,
    /// Distinct cycles entered.
    pub cycles_entered: u64,
    /// Total slips placed.
    pub slips_placed: u64,
    /// Cycles won (rank 1).
    pub wins: u64,
    /// Sum of slip scores over all evaluated cycles.
    pub lifetime_score: Decimal,
    /// Consecutive cycles, up to the latest applied one, with a qualifying
    /// slip. Zero if the latest applied cycle had none.
    pub current_streak: u32,
    /// Longest such run ever.
    pub longest_streak: u32,
    /// Most recent cycle with a qualifying slip.
    pub last_qualified_cycle: Option<CycleId>,
    /// Most recent cycle entered.
    pub last_entered_cycle: Option<CycleId>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of rolling one cycle into user statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsApply {
    /// This call applied the cycle.
    Applied,
    /// The cycle was already applied.
    AlreadyApplied,
    /// An earlier evaluated cycle is still unapplied; retry later. Keeps the
    /// roll-up order canonical so a rebuild reproduces identical rows.
    Deferred,
}

/// An indexed on-chain prize claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeClaim {
    /// Cycle the prize belongs to.
    pub cycle_id: CycleId,
    /// Winning slip.
    pub slip_id: SlipId,
    /// Claiming player.
    pub player: PlayerAddress,
    /// Claimed amount in wei, as a decimal string (can exceed u128).
    pub amount_wei: String,
    /// Block the claim landed in.
    pub block_number: u64,
    /// Block timestamp of the claim.
    pub claimed_at: DateTime<Utc>,
    /// Claim transaction hash.
    pub tx_hash: String,
    /// Log index within the transaction's block.
    pub log_index: u32,
}

/// Insert payload for `insert_claim`, straight from a `PrizeClaimed` event.
#[derive(Debug, Clone)]
pub struct NewPrizeClaim {
    /// Cycle the prize belongs to.
    pub cycle_id: CycleId,
    /// Winning slip.
    pub slip_id: SlipId,
    /// Claiming player.
    pub player: PlayerAddress,
    /// Claimed amount in wei, as a decimal string.
    pub amount_wei: String,
    /// Block the claim landed in.
    pub block_number: u64,
    /// Block timestamp of the claim.
    pub claimed_at: DateTime<Utc>,
    /// Claim transaction hash.
    pub tx_hash: String,
    /// Log index within the transaction's block.
    pub log_index: u32,
}
