//! Match selector service.
//!
//! Once per day, at the configured selection moment, this crate picks exactly
//! ten fixtures out of the priced candidate pool and freezes them as the
//! cycle's slate. Selection is a pure ranking over the candidates (league
//! priority, kickoff spread, odds interest) with a per-league diversity cap;
//! persistence and the atomic freeze live in the fixture store.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod policy;
pub mod selector;

pub use error::{SelectorError, SelectorResult};
pub use policy::select_fixtures;
pub use selector::{MatchSelector, SelectorConfig};
