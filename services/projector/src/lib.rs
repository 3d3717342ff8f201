//! Projector service.
//!
//! Turns raw indexed facts into the analytics surface: per-slip scores,
//! dense-ranked leaderboards and user statistic roll-ups. Scoring multiplies
//! the frozen prices of a slip's hits, so the write is a pure function of
//! slate, results and slips; the same inputs always project the same rows,
//! which is what makes `rebuild-projections` safe.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod projector;
pub mod scoring;

pub use error::{ProjectorError, ProjectorResult};
pub use projector::{EvaluationSummary, Projector, RebuildSummary};
pub use scoring::{ScoredSlip, SlipScore, rank_slips, score_slip};
