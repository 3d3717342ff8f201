//! Error types for the fixture store

use chrono::{DateTime, Utc};
use services_common::{CommonError, CycleId, CycleState, FixtureId, Market};
use thiserror::Error;

/// Store-specific error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Attempt to change a fixture's kickoff after first insert
    #[error("fixture {fixture_id} kickoff is immutable: stored {stored}, attempted {attempted}")]
    ImmutableKickoff {
        /// Fixture whose kickoff was being rewritten
        fixture_id: FixtureId,
        /// Kickoff recorded at first insert
        stored: DateTime<Utc>,
        /// Kickoff the caller tried to write
        attempted: DateTime<Utc>,
    },

    /// Second freeze attempt for a cycle that already has a slate
    #[error("slate for {cycle_id} is already frozen")]
    SlateAlreadyFrozen {
        /// Cycle whose slate exists
        cycle_id: CycleId,
    },

    /// A result re-submission disagreed with the stored scores
    #[error(
        "conflicting result for {fixture_id}: stored {stored_home}-{stored_away}, \
         reported {reported_home}-{reported_away}"
    )]
    ResultConflict {
        /// Fixture with the disputed result
        fixture_id: FixtureId,
        /// Home goals already on record
        stored_home: u16,
        /// Away goals already on record
        stored_away: u16,
        /// Home goals in the rejected report
        reported_home: u16,
        /// Away goals in the rejected report
        reported_away: u16,
    },

    /// Slate freeze found a fixture without a current snapshot for a market
    #[error("fixture {fixture_id} has no current odds for {market}")]
    MissingOdds {
        /// Fixture lacking the snapshot
        fixture_id: FixtureId,
        /// Market that was not priced
        market: Market,
    },

    /// Slate freeze was handed the wrong number of fixtures or a duplicate
    #[error("slate for {cycle_id} needs exactly {expected} distinct fixtures, got {actual}")]
    BadSlateShape {
        /// Cycle being frozen
        cycle_id: CycleId,
        /// Required slate size
        expected: usize,
        /// Distinct fixtures actually supplied
        actual: usize,
    },

    /// Entity lookup failed
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity class
        entity: &'static str,
        /// Identifier that missed
        id: String,
    },

    /// A state transition was requested from the wrong current state
    #[error("cycle {cycle_id} cannot move {from} -> {to}: currently {actual}")]
    InvalidTransition {
        /// Cycle being transitioned
        cycle_id: CycleId,
        /// State the caller assumed
        from: CycleState,
        /// State the caller wanted
        to: CycleState,
        /// State actually on record
        actual: CycleState,
    },

    /// A stored row failed domain validation on read
    #[error("corrupt {entity} row {id}")]
    CorruptRow {
        /// Entity class
        entity: &'static str,
        /// Identifier of the bad row
        id: String,
        /// Validation failure
        #[source]
        source: CommonError,
    },

    /// The store carries a schema version this build does not understand
    #[error("schema version {found} does not match supported version {expected}")]
    SchemaMismatch {
        /// Version this build supports
        expected: i32,
        /// Version stamped in the store
        found: i32,
    },

    /// The store has never been migrated
    #[error("store schema missing; run migrations first")]
    SchemaMissing,
}

/// Type alias for store results
pub type StoreResult<T> = Result<T, StoreError>;
