//! Contest contract bindings and outbound payload encoding.
//!
//! The contract takes a fixed `Match[10]` slate and a fixed `MatchResult[10]`
//! result vector, and announces both with a keccak hash of the abi-encoded
//! payload. The hashes computed here must match the contract's, so payload
//! encoding is covered by tests against hand-checked orderings.

use alloy::primitives::{B256, keccak256};
use alloy::sol;
use alloy::sol_types::SolValue;
use fixture_store::SlateEntry;
use services_common::{CommonError, OutcomePair, Prediction};

use crate::error::{GatewayError, GatewayResult};

#[allow(missing_docs)]
sol! {
    /// One slate position as the contract takes it. Odds carry two implicit
    /// decimals.
    #[derive(Debug)]
    struct Match {
        uint64 id;
        uint64 kickoff;
        uint32 homeOdds;
        uint32 drawOdds;
        uint32 awayOdds;
        uint32 overOdds;
        uint32 underOdds;
    }

    /// Settled outcomes for one slate position.
    struct MatchResult {
        uint8 moneyline;
        uint8 overUnder;
    }

    /// One prediction, aligned to a slate slot.
    struct WirePrediction {
        uint8 market;
        uint8 selection;
    }

    /// Core cycle fields as stored by the contract.
    struct CycleView {
        uint64 id;
        uint8 phase;
        bytes32 slateHash;
        bytes32 resultHash;
        uint64 closesAt;
        uint64 slipCount;
    }

    /// One slip as stored by the contract.
    struct SlipView {
        uint64 id;
        uint64 cycleId;
        address player;
        WirePrediction[10] predictions;
        uint64 placedAt;
    }

    /// Per-player roll-up as stored by the contract.
    struct StatsView {
        uint64 cyclesEntered;
        uint64 wins;
        uint64 currentStreak;
        uint64 longestStreak;
    }

    #[sol(rpc)]
    contract TenfoldContest {
        function currentCycleId() external view returns (uint64);
        function cycle(uint64 id) external view returns (CycleView memory);
        function isCycleResolved(uint64 id) external view returns (bool);
        function slip(uint64 id) external view returns (SlipView memory);
        function userStats(address player) external view returns (StatsView memory);

        function startCycle(Match[10] calldata slate) external;
        function resolveCycle(uint64 id, MatchResult[10] calldata results) external;

        event CycleStarted(uint64 indexed cycleId, bytes32 slateHash);
        event CycleResolved(uint64 indexed cycleId, bytes32 resultHash);
        event SlipPlaced(
            uint64 indexed cycleId,
            uint64 indexed slipId,
            address indexed player,
            WirePrediction[10] predictions
        );
        event PrizeClaimed(
            uint64 indexed cycleId,
            uint64 indexed slipId,
            address player,
            uint256 amount
        );
    }
}

/// Contract payload for one frozen slate entry.
#[must_use]
pub fn match_from_entry(entry: &SlateEntry) -> Match {
    Match {
        id: entry.fixture_id.as_u64(),
        kickoff: u64::try_from(entry.kickoff_at.timestamp()).unwrap_or(0),
        homeOdds: entry.odds.home.raw(),
        drawOdds: entry.odds.draw.raw(),
        awayOdds: entry.odds.away.raw(),
        overOdds: entry.odds.over.raw(),
        underOdds: entry.odds.under.raw(),
    }
}

/// Encode a frozen slate as the contract's fixed ten-match array.
///
/// Entries must already be in canonical slot order; the store freezes them
/// that way and the hash announced by `CycleStarted` depends on it.
pub fn slate_payload(entries: &[SlateEntry]) -> GatewayResult<[Match; 10]> {
    let matches: Vec<Match> = entries.iter().map(match_from_entry).collect();
    matches
        .try_into()
        .map_err(|overflow: Vec<Match>| GatewayError::PayloadShape {
            len: overflow.len(),
        })
}

/// Contract encoding of one settled outcome pair.
#[must_use]
pub fn result_from_outcomes(pair: &OutcomePair) -> MatchResult {
    MatchResult {
        moneyline: pair.moneyline.wire(),
        overUnder: pair.totals.wire(),
    }
}

/// Encode settled outcomes as the contract's fixed ten-result array, in
/// slate slot order.
pub fn results_payload(pairs: &[OutcomePair]) -> GatewayResult<[MatchResult; 10]> {
    let results: Vec<MatchResult> = pairs.iter().map(result_from_outcomes).collect();
    results
        .try_into()
        .map_err(|overflow: Vec<MatchResult>| GatewayError::PayloadShape {
            len: overflow.len(),
        })
}

/// Canonical slate hash, `keccak256(abi.encode(slate))`.
///
/// Compared against the hash the contract announces in `CycleStarted`.
#[must_use]
pub fn slate_hash(slate: &[Match; 10]) -> B256 {
    keccak256(slate.abi_encode())
}

/// Canonical result hash, `keccak256(abi.encode(results))`.
///
/// Compared against the hash the contract announces in `CycleResolved`.
#[must_use]
pub fn result_hash(results: &[MatchResult; 10]) -> B256 {
    keccak256(results.abi_encode())
}

/// Decode the contract's prediction pairs into domain predictions, slot
/// order preserved.
pub fn decode_predictions(wire: &[WirePrediction; 10]) -> Result<Vec<Prediction>, CommonError> {
    wire.iter()
        .map(|p| Prediction::from_wire(p.market, p.selection))
        .collect()
}
