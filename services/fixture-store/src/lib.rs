//! Durable storage for fixtures, odds, results, slates, cycles and slips
//!
//! The store is the single source of truth for every cross-component
//! decision: cycle transitions are durable rows here, not in-memory flags,
//! and a restart reconstructs the orchestrator's exact position from them.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod cycles;
pub mod entities;
pub mod error;
pub mod migrations;
pub mod projections;
pub mod slips;
pub mod store;

pub use audit::{AuditEvent, AuditTrail};
pub use entities::{
    Cycle, EvaluatedSlip, Fixture, FixtureResult, LeaderboardRow, MarketQuote, NewFixture,
    NewPrizeClaim, NewSlip, PrizeClaim, ResultWrite, SlateEntry, Slip, StatsApply,
    TransitionOutcome, TransitionRecord, UserStats,
};
pub use error::{StoreError, StoreResult};
pub use migrations::{SCHEMA_VERSION, run_migrations, verify_schema};
pub use store::FixtureStore;
