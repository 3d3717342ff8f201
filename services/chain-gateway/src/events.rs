//! Contract event decoding for confirmed-range replay.
//!
//! The poller asks the node for logs in a range that already has the
//! configured confirmation depth, so nothing here handles removal flags.
//! `(tx_hash, log_index)` is the idempotency key carried on every store
//! write derived from an event; replaying a range is a no-op.

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use services_common::{CycleId, PlayerAddress, Prediction, SlipId};

use crate::contract::{TenfoldContest, decode_predictions};
use crate::error::{GatewayError, GatewayResult};

/// One decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A cycle opened for entries.
    CycleStarted {
        /// Cycle the contract assigned.
        cycle_id: CycleId,
        /// Hash of the abi-encoded slate.
        slate_hash: B256,
    },
    /// A cycle's results were written.
    CycleResolved {
        /// Resolved cycle.
        cycle_id: CycleId,
        /// Hash of the abi-encoded result vector.
        result_hash: B256,
    },
    /// A player entered a cycle.
    SlipPlaced {
        /// Cycle entered.
        cycle_id: CycleId,
        /// Slip the contract assigned.
        slip_id: SlipId,
        /// Player who placed it.
        player: PlayerAddress,
        /// Ten predictions in slate slot order.
        predictions: Vec<Prediction>,
    },
    /// A winner withdrew a prize.
    PrizeClaimed {
        /// Cycle the prize belongs to.
        cycle_id: CycleId,
        /// Winning slip.
        slip_id: SlipId,
        /// Claiming player.
        player: PlayerAddress,
        /// Amount in wei, as a decimal string.
        amount_wei: String,
    },
}

impl ChainEvent {
    /// Stable tag for logs and counters.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "CycleStarted",
            Self::CycleResolved { .. } => "CycleResolved",
            Self::SlipPlaced { .. } => "SlipPlaced",
            Self::PrizeClaimed { .. } => "PrizeClaimed",
        }
    }

    /// Cycle the event belongs to.
    #[must_use]
    pub const fn cycle_id(&self) -> CycleId {
        match self {
            Self::CycleStarted { cycle_id, .. }
            | Self::CycleResolved { cycle_id, .. }
            | Self::SlipPlaced { cycle_id, .. }
            | Self::PrizeClaimed { cycle_id, .. } => *cycle_id,
        }
    }
}

/// A decoded event with its chain coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// The decoded event.
    pub event: ChainEvent,
    /// Block the event landed in.
    pub block_number: u64,
    /// Timestamp of that block.
    pub block_time: DateTime<Utc>,
    /// Transaction that emitted the event.
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u32,
}

/// Events decoded from one confirmed range, in `(block, log_index)` order,
/// plus the cursor for the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    /// Decoded events, oldest first.
    pub events: Vec<EventEnvelope>,
    /// First block the next poll should cover.
    pub next_from_block: u64,
}

/// A decoded log before its block timestamp is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEvent {
    pub event: ChainEvent,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub tx_hash: String,
    pub log_index: u32,
}

/// The four topic hashes the poller filters on.
pub(crate) fn event_signatures() -> Vec<B256> {
    vec![
        TenfoldContest::CycleStarted::SIGNATURE_HASH,
        TenfoldContest::CycleResolved::SIGNATURE_HASH,
        TenfoldContest::SlipPlaced::SIGNATURE_HASH,
        TenfoldContest::PrizeClaimed::SIGNATURE_HASH,
    ]
}

/// Decode one log into a raw event.
///
/// `Ok(None)` means the log carries a signature this version does not know;
/// the caller skips it. An undecodable log with a known signature is an
/// error, because silently dropping one would desynchronize projections.
pub(crate) fn decode_log(log: &Log) -> GatewayResult<Option<RawEvent>> {
    let (Some(block_number), Some(tx), Some(index)) =
        (log.block_number, log.transaction_hash, log.log_index)
    else {
        return Err(GatewayError::MalformedEvent {
            tx_hash: log
                .transaction_hash
                .map_or_else(|| "unknown".to_string(), |h| format!("{h:#x}")),
            log_index: 0,
            reason: "log missing block coordinates".to_string(),
        });
    };
    let tx_hash = format!("{tx:#x}");
    let log_index = u32::try_from(index).map_err(|_| GatewayError::MalformedEvent {
        tx_hash: tx_hash.clone(),
        log_index: u32::MAX,
        reason: format!("log index {index} out of range"),
    })?;
    let malformed = |reason: String| GatewayError::MalformedEvent {
        tx_hash: tx_hash.clone(),
        log_index,
        reason,
    };

    let Some(topic) = log.topic0().copied() else {
        return Err(malformed("log without topics".to_string()));
    };

    let event = if topic == TenfoldContest::CycleStarted::SIGNATURE_HASH {
        let data = log
            .log_decode::<TenfoldContest::CycleStarted>()
            .map_err(|e| malformed(e.to_string()))?
            .inner
            .data;
        ChainEvent::CycleStarted {
            cycle_id: CycleId::new(data.cycleId),
            slate_hash: data.slateHash,
        }
    } else if topic == TenfoldContest::CycleResolved::SIGNATURE_HASH {
        let data = log
            .log_decode::<TenfoldContest::CycleResolved>()
            .map_err(|e| malformed(e.to_string()))?
            .inner
            .data;
        ChainEvent::CycleResolved {
            cycle_id: CycleId::new(data.cycleId),
            result_hash: data.resultHash,
        }
    } else if topic == TenfoldContest::SlipPlaced::SIGNATURE_HASH {
        let data = log
            .log_decode::<TenfoldContest::SlipPlaced>()
            .map_err(|e| malformed(e.to_string()))?
            .inner
            .data;
        let predictions =
            decode_predictions(&data.predictions).map_err(|e| malformed(e.to_string()))?;
        ChainEvent::SlipPlaced {
            cycle_id: CycleId::new(data.cycleId),
            slip_id: SlipId::new(data.slipId),
            player: PlayerAddress(data.player.0.into()),
            predictions,
        }
    } else if topic == TenfoldContest::PrizeClaimed::SIGNATURE_HASH {
        let data = log
            .log_decode::<TenfoldContest::PrizeClaimed>()
            .map_err(|e| malformed(e.to_string()))?
            .inner
            .data;
        ChainEvent::PrizeClaimed {
            cycle_id: CycleId::new(data.cycleId),
            slip_id: SlipId::new(data.slipId),
            player: PlayerAddress(data.player.0.into()),
            amount_wei: data.amount.to_string(),
        }
    } else {
        return Ok(None);
    };

    Ok(Some(RawEvent {
        event,
        block_number,
        block_timestamp: log.block_timestamp,
        tx_hash,
        log_index,
    }))
}
