//! Projector error types.

use services_common::{CycleId, SlipId};

/// Convenience alias for projector operations.
pub type ProjectorResult<T> = Result<T, ProjectorError>;

/// Errors surfaced while projecting cycles.
#[derive(Debug, thiserror::Error)]
pub enum ProjectorError {
    /// The cycle is not on record.
    #[error("{cycle_id} is not on record")]
    UnknownCycle {
        /// Cycle requested.
        cycle_id: CycleId,
    },

    /// The cycle has no confirmed result vector to score against.
    #[error("{cycle_id} has no confirmed results")]
    ResultsMissing {
        /// Cycle awaiting results.
        cycle_id: CycleId,
    },

    /// A stored result vector does not cover the ten slate positions.
    #[error("{cycle_id} result vector has {len} positions, expected 10")]
    ResultShape {
        /// Affected cycle.
        cycle_id: CycleId,
        /// Positions found.
        len: usize,
    },

    /// A stored result entry decodes to no known outcome.
    #[error("{cycle_id} slot {slot} carries an undecodable result")]
    ResultWire {
        /// Affected cycle.
        cycle_id: CycleId,
        /// Slate slot of the bad entry.
        slot: usize,
    },

    /// A result entry is still NotSet although the cycle is resolved.
    #[error("{cycle_id} slot {slot} is unsettled in a resolved cycle")]
    UnsettledResult {
        /// Affected cycle.
        cycle_id: CycleId,
        /// Slate slot left unsettled.
        slot: usize,
    },

    /// The persisted slate does not hold exactly ten entries.
    #[error("{cycle_id} slate has {len} entries, expected 10")]
    SlateShape {
        /// Affected cycle.
        cycle_id: CycleId,
        /// Entries found.
        len: usize,
    },

    /// A stored slip does not carry exactly ten predictions.
    #[error("{slip_id} carries {len} predictions, expected 10")]
    PredictionShape {
        /// Affected slip.
        slip_id: SlipId,
        /// Predictions found.
        len: usize,
    },

    /// Statistics application fell out of cycle-id order during a rebuild.
    #[error("stats for {cycle_id} deferred during an ordered rebuild")]
    StatsOrder {
        /// Cycle that deferred.
        cycle_id: CycleId,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] fixture_store::StoreError),
}
