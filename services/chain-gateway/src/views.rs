//! Typed read models decoded from contract views.

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use services_common::{CycleId, PlayerAddress, Prediction, SlipId};

use crate::contract::{CycleView, SlipView, StatsView, decode_predictions};
use crate::error::{GatewayError, GatewayResult};

/// Contract-side cycle phase.
///
/// The contract tracks a coarser lifecycle than the orchestrator: it only
/// cares whether entries are accepted and whether results are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCyclePhase {
    /// The id has never been started.
    Absent,
    /// Accepting slips.
    Open,
    /// Entry window over, awaiting resolution.
    Closed,
    /// Results written, prizes claimable.
    Resolved,
}

impl ChainCyclePhase {
    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Absent),
            1 => Some(Self::Open),
            2 => Some(Self::Closed),
            3 => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Snapshot of one cycle's on-chain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSnapshot {
    /// Cycle the snapshot describes.
    pub cycle_id: CycleId,
    /// Contract-side phase.
    pub phase: ChainCyclePhase,
    /// Hash announced with `CycleStarted`. Zero while absent.
    pub slate_hash: B256,
    /// Hash announced with `CycleResolved`. Zero until resolved.
    pub result_hash: B256,
    /// When the contract stops accepting slips. `None` while absent.
    pub closes_at: Option<DateTime<Utc>>,
    /// Slips accepted so far.
    pub slip_count: u64,
}

impl TryFrom<CycleView> for CycleSnapshot {
    type Error = GatewayError;

    fn try_from(view: CycleView) -> GatewayResult<Self> {
        let phase =
            ChainCyclePhase::from_wire(view.phase).ok_or(GatewayError::MalformedView {
                field: "phase",
                value: u64::from(view.phase),
            })?;
        let closes_at = if view.closesAt == 0 {
            None
        } else {
            Some(timestamp(view.closesAt, "closesAt")?)
        };
        Ok(Self {
            cycle_id: CycleId::new(view.id),
            phase,
            slate_hash: view.slateHash,
            result_hash: view.resultHash,
            closes_at,
            slip_count: view.slipCount,
        })
    }
}

/// One slip as read back from the contract. Used by reconciliation, which
/// compares it against the indexed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSlip {
    /// On-chain slip identifier.
    pub slip_id: SlipId,
    /// Cycle the slip entered.
    pub cycle_id: CycleId,
    /// Player who placed it.
    pub player: PlayerAddress,
    /// Ten predictions in slot order.
    pub predictions: Vec<Prediction>,
    /// Placement instant per the contract.
    pub placed_at: DateTime<Utc>,
}

impl TryFrom<SlipView> for ChainSlip {
    type Error = GatewayError;

    fn try_from(view: SlipView) -> GatewayResult<Self> {
        Ok(Self {
            slip_id: SlipId::new(view.id),
            cycle_id: CycleId::new(view.cycleId),
            player: PlayerAddress(view.player.0.into()),
            predictions: decode_predictions(&view.predictions)?,
            placed_at: timestamp(view.placedAt, "placedAt")?,
        })
    }
}

/// Per-player roll-up as read back from the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainUserStats {
    /// Distinct cycles entered.
    pub cycles_entered: u64,
    /// Cycles won.
    pub wins: u64,
    /// Consecutive qualifying cycles, per the contract.
    pub current_streak: u64,
    /// Longest such run.
    pub longest_streak: u64,
}

impl From<StatsView> for ChainUserStats {
    fn from(view: StatsView) -> Self {
        Self {
            cycles_entered: view.cyclesEntered,
            wins: view.wins,
            current_streak: view.currentStreak,
            longest_streak: view.longestStreak,
        }
    }
}

pub(crate) fn timestamp(secs: u64, field: &'static str) -> GatewayResult<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|signed| DateTime::from_timestamp(signed, 0))
        .ok_or(GatewayError::MalformedView { field, value: secs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use pretty_assertions::assert_eq;

    use crate::contract::WirePrediction;

    #[test]
    fn cycle_view_decodes_into_a_snapshot() {
        let view = CycleView {
            id: 42,
            phase: 1,
            slateHash: B256::repeat_byte(0xaa),
            resultHash: B256::ZERO,
            closesAt: 1_748_779_200,
            slipCount: 17,
        };
        let snap = CycleSnapshot::try_from(view).unwrap();
        assert_eq!(snap.cycle_id, CycleId::new(42));
        assert_eq!(snap.phase, ChainCyclePhase::Open);
        assert_eq!(snap.slip_count, 17);
        assert_eq!(
            snap.closes_at.unwrap(),
            DateTime::from_timestamp(1_748_779_200, 0).unwrap()
        );
    }

    #[test]
    fn absent_cycles_have_no_close_time() {
        let view = CycleView {
            id: 9,
            phase: 0,
            slateHash: B256::ZERO,
            resultHash: B256::ZERO,
            closesAt: 0,
            slipCount: 0,
        };
        let snap = CycleSnapshot::try_from(view).unwrap();
        assert_eq!(snap.phase, ChainCyclePhase::Absent);
        assert_eq!(snap.closes_at, None);
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let view = CycleView {
            id: 9,
            phase: 7,
            slateHash: B256::ZERO,
            resultHash: B256::ZERO,
            closesAt: 0,
            slipCount: 0,
        };
        assert!(matches!(
            CycleSnapshot::try_from(view),
            Err(GatewayError::MalformedView { field: "phase", value: 7 })
        ));
    }

    #[test]
    fn slip_view_decodes_player_and_predictions() {
        let player = Address::repeat_byte(0x11);
        let view = SlipView {
            id: 5,
            cycleId: 42,
            player,
            predictions: std::array::from_fn(|_| {
                let (market, selection) = Prediction::Draw.wire();
                WirePrediction { market, selection }
            }),
            placedAt: 1_748_780_000,
        };
        let slip = ChainSlip::try_from(view).unwrap();
        assert_eq!(slip.slip_id, SlipId::new(5));
        assert_eq!(slip.player.to_string(), player.to_string().to_lowercase());
        assert_eq!(slip.predictions, vec![Prediction::Draw; 10]);
    }
}
