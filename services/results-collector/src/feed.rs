//! Provider-agnostic results feed abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use services_common::{FixtureId, FixtureStatus};

use crate::error::CollectorResult;

/// Provider-side fixture state, already reduced to the phases the
/// orchestrator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not kicked off yet.
    Scheduled,
    /// In play, including breaks and extra time.
    Live,
    /// Full time reached with a final score.
    Finished,
    /// Postponed to an unknown date.
    Postponed,
    /// Called off outright.
    Cancelled,
}

impl FeedStatus {
    /// Store-side status this provider phase maps to. Postponements are
    /// treated as cancellations: the rescheduled fixture arrives from the
    /// provider under a fresh identifier.
    #[must_use]
    pub const fn as_fixture_status(self) -> FixtureStatus {
        match self {
            Self::Scheduled => FixtureStatus::Scheduled,
            Self::Live => FixtureStatus::Live,
            Self::Finished => FixtureStatus::Finished,
            Self::Postponed | Self::Cancelled => FixtureStatus::Cancelled,
        }
    }
}

/// One validated provider observation of a fixture.
///
/// Invariant: `status == Finished` implies `score` is present. Feed
/// implementations must drop entries that violate it rather than return them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSnapshot {
    /// Fixture observed.
    pub fixture_id: FixtureId,
    /// Reduced provider phase.
    pub status: FeedStatus,
    /// Final (home, away) goals, present once finished.
    pub score: Option<(u16, u16)>,
    /// When the provider says the fixture finished. Collector substitutes
    /// its own clock when the provider omits it.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Source of fixture observations.
///
/// An implementation returns at most one snapshot per requested fixture and
/// silently omits entries it could not validate; the collector treats a
/// missing snapshot as one failed attempt for that fixture.
#[async_trait]
pub trait ResultsFeed: Send + Sync {
    /// Fetch the current observation for each of the given fixtures.
    async fn fetch_updates(&self, ids: &[FixtureId]) -> CollectorResult<Vec<FeedSnapshot>>;
}
