//! Core identifier and state types shared by every component

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CommonError;

/// Contest cycle identifier. Monotonic, assigned on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId(pub u64);

impl CycleId {
    /// Create a new cycle id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Signed value for Postgres BIGINT columns.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle-{}", self.0)
    }
}

/// Stable external fixture identifier (the data provider's id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixtureId(pub u64);

impl FixtureId {
    /// Create a new fixture id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Signed value for Postgres BIGINT columns.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixture-{}", self.0)
    }
}

/// On-chain slip identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlipId(pub u64);

impl SlipId {
    /// Create a new slip id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Signed value for Postgres BIGINT columns.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for SlipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slip-{}", self.0)
    }
}

/// A player's 20-byte chain address, displayed as lowercase `0x…` hex.
///
/// Kept crate-local instead of re-exporting the chain SDK's address type so
/// the store and projector do not pick up a chain dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerAddress(pub [u8; 20]);

impl PlayerAddress {
    /// All-zero address, used as a sentinel in tests.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PlayerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for PlayerAddress {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        if hex.len() != 40 {
            return Err(CommonError::InvalidAddress {
                value: s.to_string(),
            });
        }
        let mut bytes = [0u8; 20];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| CommonError::InvalidAddress {
                value: s.to_string(),
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| CommonError::InvalidAddress {
                value: s.to_string(),
            })?;
        }
        Ok(Self(bytes))
    }
}

/// Fixture status as driven by the results collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixtureStatus {
    /// Known to the store, kickoff in the future (or feed not yet live).
    Scheduled,
    /// In play.
    Live,
    /// Concluded with a recorded score.
    Finished,
    /// Cancelled, postponed or abandoned by the provider. Terminal.
    Cancelled,
}

impl FixtureStatus {
    /// Terminal statuses are never advanced again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "Scheduled",
            Self::Live => "Live",
            Self::Finished => "Finished",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FixtureStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(Self::Scheduled),
            "Live" => Ok(Self::Live),
            "Finished" => Ok(Self::Finished),
            "Cancelled" => Ok(Self::Cancelled),
            _ => Err(CommonError::InvalidEnum {
                kind: "FixtureStatus",
                value: s.to_string(),
            }),
        }
    }
}

/// Cycle lifecycle states.
///
/// The coordinator owns transitions; everything else treats the state as
/// read-only. `Evaluated` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    /// Created by the selector, not yet opened on chain.
    Pending,
    /// `startCycle` confirmed; entries are being accepted.
    Open,
    /// Entry window elapsed.
    Closed,
    /// Waiting for all ten fixtures to finish.
    AwaitingResults,
    /// `resolveCycle` submitted, not yet confirmed.
    Resolving,
    /// Results confirmed on chain.
    Resolved,
    /// Every slip scored and ranked. Terminal.
    Evaluated,
    /// Failed cycle (slate mismatch, cancelled fixture, operator action).
    /// Terminal; slips become refund-eligible outside this system.
    Cancelled,
}

impl CycleState {
    /// Position in the forward order of the lifecycle. `Cancelled` sits
    /// outside the forward order and returns `None`.
    #[must_use]
    pub const fn forward_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Open => Some(1),
            Self::Closed => Some(2),
            Self::AwaitingResults => Some(3),
            Self::Resolving => Some(4),
            Self::Resolved => Some(5),
            Self::Evaluated => Some(6),
            Self::Cancelled => None,
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Evaluated | Self::Cancelled)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Open => "Open",
            Self::Closed => "Closed",
            Self::AwaitingResults => "AwaitingResults",
            Self::Resolving => "Resolving",
            Self::Resolved => "Resolved",
            Self::Evaluated => "Evaluated",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CycleState {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Open" => Ok(Self::Open),
            "Closed" => Ok(Self::Closed),
            "AwaitingResults" => Ok(Self::AwaitingResults),
            "Resolving" => Ok(Self::Resolving),
            "Resolved" => Ok(Self::Resolved),
            "Evaluated" => Ok(Self::Evaluated),
            "Cancelled" => Ok(Self::Cancelled),
            _ => Err(CommonError::InvalidEnum {
                kind: "CycleState",
                value: s.to_string(),
            }),
        }
    }
}
