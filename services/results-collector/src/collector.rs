//! Feed sweep over pollable fixtures.
//!
//! One `sweep_once` call is one pass; the coordinator owns the pacing and
//! the shutdown signal.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{error, info, warn};

use fixture_store::{AuditEvent, AuditTrail, FixtureStore, ResultWrite, StoreError};
use services_common::{
    Clock, FixtureId, MAX_SWEEP_INTERVAL_SECS, RESULT_LOOKBACK_SECS, RESULT_MIN_AGE_SECS,
};

use crate::error::CollectorResult;
use crate::feed::{FeedSnapshot, FeedStatus, ResultsFeed};

/// Tuning for the results sweep.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Pause between sweeps. Clamped to the five-minute ceiling so finished
    /// fixtures are never observed later than that.
    pub poll_interval: StdDuration,
    /// How far back past kickoff a fixture stays pollable on its own; older
    /// fixtures are only polled while an active slate references them.
    pub lookback: Duration,
    /// How long after kickoff before the provider is asked at all.
    pub min_age: Duration,
    /// Consecutive failed observations of one fixture before an alert.
    pub fixture_retry_budget: u32,
    /// Fixture ids per feed request.
    pub batch_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(30),
            lookback: Duration::seconds(RESULT_LOOKBACK_SECS),
            min_age: Duration::seconds(RESULT_MIN_AGE_SECS),
            fixture_retry_budget: 5,
            batch_size: 50,
        }
    }
}

impl CollectorConfig {
    /// Effective sweep pause, never slower than the ceiling.
    #[must_use]
    pub fn effective_interval(&self) -> StdDuration {
        self.poll_interval
            .min(StdDuration::from_secs(MAX_SWEEP_INTERVAL_SECS))
    }
}

/// Counters for one sweep, for logs and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Fixtures considered this sweep.
    pub polled: usize,
    /// Final results newly recorded.
    pub results_recorded: usize,
    /// Status rows changed.
    pub status_updates: usize,
    /// Conflicting re-reports rejected and flagged.
    pub conflicts: usize,
    /// Fixtures with no usable observation this sweep.
    pub failed: usize,
    /// Fixtures whose retry budget ran out this sweep.
    pub exhausted: usize,
}

/// Polls the feed and writes observations through the store.
pub struct ResultsCollector<F> {
    store: FixtureStore,
    audit: AuditTrail,
    feed: F,
    clock: Arc<dyn Clock>,
    config: CollectorConfig,
    failures: FxHashMap<FixtureId, u32>,
}

impl<F: ResultsFeed> ResultsCollector<F> {
    /// Assemble a collector.
    #[must_use]
    pub fn new(
        store: FixtureStore,
        audit: AuditTrail,
        feed: F,
        clock: Arc<dyn Clock>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            store,
            audit,
            feed,
            clock,
            config,
            failures: FxHashMap::default(),
        }
    }

    /// One pass over every fixture the store says is worth polling.
    pub async fn sweep_once(&mut self) -> CollectorResult<SweepSummary> {
        let now = self.clock.now();
        let fixtures = self
            .store
            .pollable_fixtures(now, self.config.lookback, self.config.min_age)
            .await?;
        let mut summary = SweepSummary {
            polled: fixtures.len(),
            ..SweepSummary::default()
        };
        if fixtures.is_empty() {
            return Ok(summary);
        }

        for chunk in fixtures.chunks(self.config.batch_size.max(1)) {
            let ids: Vec<FixtureId> = chunk.iter().map(|f| f.fixture_id).collect();
            match self.feed.fetch_updates(&ids).await {
                Ok(snapshots) => {
                    let mut seen: FxHashSet<FixtureId> = FxHashSet::default();
                    for snapshot in &snapshots {
                        seen.insert(snapshot.fixture_id);
                        self.apply(snapshot, &mut summary).await?;
                    }
                    // Requested but absent: the provider dropped or mangled it.
                    for id in ids.iter().filter(|id| !seen.contains(id)) {
                        self.note_failure(*id, &mut summary).await?;
                    }
                }
                Err(err) => {
                    warn!(%err, fixtures = ids.len(), "feed request failed for chunk");
                    for id in &ids {
                        self.note_failure(*id, &mut summary).await?;
                    }
                }
            }
        }
        Ok(summary)
    }

    async fn apply(
        &mut self,
        snapshot: &FeedSnapshot,
        summary: &mut SweepSummary,
    ) -> CollectorResult<()> {
        let id = snapshot.fixture_id;
        self.failures.remove(&id);

        match snapshot.status {
            FeedStatus::Scheduled => {}
            FeedStatus::Live | FeedStatus::Postponed | FeedStatus::Cancelled => {
                let status = snapshot.status.as_fixture_status();
                if self
                    .store
                    .set_fixture_status(id, status, self.clock.now())
                    .await?
                {
                    info!(fixture_id = %id, %status, "fixture status updated");
                    summary.status_updates += 1;
                }
            }
            FeedStatus::Finished => {
                // Feed implementations guarantee a score here; a violation is
                // treated as one more failed observation.
                let Some((home, away)) = snapshot.score else {
                    warn!(fixture_id = %id, "finished snapshot without score");
                    return self.note_failure(id, summary).await;
                };
                let now = self.clock.now();
                let finished_at = snapshot.finished_at.unwrap_or(now);
                match self.store.record_result(id, home, away, finished_at, now).await {
                    Ok(ResultWrite::Recorded) => {
                        info!(fixture_id = %id, home, away, "final result recorded");
                        summary.results_recorded += 1;
                    }
                    Ok(ResultWrite::Unchanged) => {}
                    Err(StoreError::ResultConflict {
                        fixture_id,
                        stored_home,
                        stored_away,
                        reported_home,
                        reported_away,
                    }) => {
                        error!(
                            fixture_id = %fixture_id,
                            stored = format!("{stored_home}-{stored_away}"),
                            reported = format!("{reported_home}-{reported_away}"),
                            "provider re-reported a different final score"
                        );
                        let event = AuditEvent::ResultConflict {
                            fixture_id: fixture_id.as_u64(),
                            stored_home,
                            stored_away,
                            reported_home,
                            reported_away,
                        };
                        self.audit.log(&event, now).await?;
                        summary.conflicts += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    async fn note_failure(
        &mut self,
        id: FixtureId,
        summary: &mut SweepSummary,
    ) -> CollectorResult<()> {
        summary.failed += 1;
        let count = self.failures.entry(id).or_insert(0);
        *count += 1;
        if *count < self.config.fixture_retry_budget {
            return Ok(());
        }
        let attempts = *count;
        // Re-arm so a fixture that stays broken alerts again after another
        // full budget, not on every sweep.
        self.failures.remove(&id);
        summary.exhausted += 1;
        error!(fixture_id = %id, attempts, "giving up on fixture until next budget");
        let event = AuditEvent::RetryExhausted {
            operation: format!("results-feed {id}"),
            attempts,
        };
        self.audit.log(&event, self.clock.now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interval_is_clamped_to_the_freshness_ceiling() {
        let slow = CollectorConfig {
            poll_interval: StdDuration::from_secs(600),
            ..CollectorConfig::default()
        };
        assert_eq!(
            slow.effective_interval(),
            StdDuration::from_secs(MAX_SWEEP_INTERVAL_SECS)
        );

        let fast = CollectorConfig {
            poll_interval: StdDuration::from_secs(15),
            ..CollectorConfig::default()
        };
        assert_eq!(fast.effective_interval(), StdDuration::from_secs(15));
    }

    #[test]
    fn defaults_track_the_shared_constants() {
        let config = CollectorConfig::default();
        assert_eq!(config.lookback, Duration::seconds(RESULT_LOOKBACK_SECS));
        assert_eq!(config.min_age, Duration::seconds(RESULT_MIN_AGE_SECS));
        assert!(config.fixture_retry_budget > 0);
    }
}
