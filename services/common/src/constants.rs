//! Shared constants for the cycle contest
//!
//! Single source of truth for contest-shaped magic numbers.

/// Fixtures in every slate. The contract takes `Match[10]`, so this is not
/// configurable.
pub const SLATE_SIZE: usize = 10;

/// Implicit fractional decimals in on-chain odds (250 = 2.50x).
pub const ODDS_DECIMALS: u32 = 2;

/// Fixed-point scale matching `ODDS_DECIMALS`.
pub const ODDS_SCALE: u32 = 100;

/// Odds floor, exclusive. A price of exactly 1.00 carries no information.
pub const ODDS_X100_MIN_EXCLUSIVE: u32 = 100;

/// Odds cap, inclusive (100.00x). Ten legs at the cap stay inside a 96-bit
/// decimal mantissa, so slip scoring cannot overflow.
pub const ODDS_X100_MAX: u32 = 10_000;

/// Default minimum correct predictions for a non-zero score.
pub const DEFAULT_QUALIFY_THRESHOLD: u8 = 5;

/// Default entry grace before the earliest kickoff (seconds). Close-time is
/// `earliest kickoff - grace`.
pub const DEFAULT_ENTRY_GRACE_SECS: i64 = 15 * 60;

/// Default selection grace: candidates must kick off at least this long after
/// the selection moment (seconds).
pub const DEFAULT_SELECTION_GRACE_SECS: i64 = 60 * 60;

/// Selection window length after the selection moment (seconds).
pub const SELECTION_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Default resolve deadline: this long after the last slate kickoff, an
/// unresolved cycle is overdue and alerts (seconds).
pub const DEFAULT_RESOLVE_DEADLINE_OFFSET_SECS: i64 = 4 * 60 * 60;

/// Default block confirmations before a transaction counts as final.
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 12;

/// Ceiling for the results sweep interval (seconds).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Ceiling for the awaiting-results poll interval (seconds).
pub const MAX_RESULTS_POLL_SECS: u64 = 60;

/// How far back the collector looks for unfinished fixtures (seconds).
pub const RESULT_LOOKBACK_SECS: i64 = 6 * 60 * 60;

/// Matches are not polled until this long after kickoff (seconds).
pub const RESULT_MIN_AGE_SECS: i64 = 5 * 60;

// Retry defaults shared by the collector and the gateway.
/// First retry delay.
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
/// Retry delay cap.
pub const DEFAULT_RETRY_CAP_MS: u64 = 60_000;
/// Attempts before a retry budget is exhausted.
pub const DEFAULT_RETRY_BUDGET: u32 = 8;
