//! Errors raised by the shared types themselves

use thiserror::Error;

/// Result alias for shared-type operations.
pub type CommonResult<T> = Result<T, CommonError>;

/// Validation failures on shared domain types.
///
/// Component-level failures (store, feed, chain) live in their own crates;
/// this enum only covers parsing and range checks on the types defined here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A chain address string failed to parse.
    #[error("invalid address: {value}")]
    InvalidAddress {
        /// Offending input.
        value: String,
    },

    /// A stored enum string did not match any known variant.
    #[error("invalid {kind} value: {value}")]
    InvalidEnum {
        /// Enum being parsed.
        kind: &'static str,
        /// Offending input.
        value: String,
    },

    /// A wire discriminant did not match any known variant.
    #[error("invalid {kind} wire value: {value}")]
    InvalidWireValue {
        /// Enum being decoded.
        kind: &'static str,
        /// Offending discriminant.
        value: u8,
    },

    /// Odds outside the accepted (1.00, 100.00] band.
    #[error("odds {raw} (x100) outside (100, 10000]")]
    OddsOutOfRange {
        /// Raw hundredths value.
        raw: u32,
    },

    /// A provider odds string could not be read as two-decimal fixed point.
    #[error("unparseable odds string: {value:?}")]
    OddsUnparseable {
        /// Offending input.
        value: String,
    },

    /// A prediction list did not carry exactly ten aligned entries.
    #[error("expected 10 aligned predictions, got {count}")]
    BadPredictionCount {
        /// Entries actually present.
        count: usize,
    },

    /// A daily schedule expression could not be parsed.
    #[error("invalid schedule {expr:?}: {reason}")]
    InvalidSchedule {
        /// Offending expression.
        expr: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}
