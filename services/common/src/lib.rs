//! Shared types and utilities for the Tenfold cycle orchestrator
//!
//! Every component crate depends on this one and nothing here depends on a
//! component, so cross-component coordination stays in the database and the
//! typed interfaces, never in shared mutable state.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod constants;
pub mod errors;
pub mod market;
pub mod odds;
pub mod retry;
pub mod schedule;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use errors::{CommonError, CommonResult};
pub use market::{Market, MoneylineOutcome, OutcomePair, Prediction, TotalsOutcome};
pub use odds::{FixtureOdds, OddsX100};
pub use retry::Backoff;
pub use schedule::DailySchedule;
pub use types::{CycleId, CycleState, FixtureId, FixtureStatus, PlayerAddress, SlipId};
