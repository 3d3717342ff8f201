//! Selection orchestration: candidate query, ranking, atomic freeze.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use fixture_store::{AuditEvent, AuditTrail, FixtureStore, SlateEntry};
use services_common::{
    CycleId, DEFAULT_ENTRY_GRACE_SECS, DEFAULT_RESOLVE_DEADLINE_OFFSET_SECS,
    DEFAULT_SELECTION_GRACE_SECS, SELECTION_WINDOW_SECS,
};

use crate::error::{SelectorError, SelectorResult};
use crate::policy::{SelectionPolicy, select_fixtures};

/// Selection timing and policy knobs.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Ranking policy.
    pub policy: SelectionPolicy,
    /// Candidates must kick off strictly later than this after the
    /// selection moment.
    pub selection_grace: Duration,
    /// Candidates must kick off strictly earlier than this after the
    /// selection moment.
    pub window: Duration,
    /// Entries close this long before the earliest slate kickoff.
    pub entry_grace: Duration,
    /// Resolve deadline is this long after the last slate kickoff.
    pub resolve_deadline_offset: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            selection_grace: Duration::seconds(DEFAULT_SELECTION_GRACE_SECS),
            window: Duration::seconds(SELECTION_WINDOW_SECS),
            entry_grace: Duration::seconds(DEFAULT_ENTRY_GRACE_SECS),
            resolve_deadline_offset: Duration::seconds(DEFAULT_RESOLVE_DEADLINE_OFFSET_SECS),
        }
    }
}

/// Builds the daily slate.
pub struct MatchSelector {
    store: FixtureStore,
    audit: AuditTrail,
    config: SelectorConfig,
}

impl MatchSelector {
    /// Assemble a selector.
    #[must_use]
    pub const fn new(store: FixtureStore, audit: AuditTrail, config: SelectorConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Produce and freeze the slate for `cycle_id`, selecting at `now`.
    ///
    /// Creates the cycle row if this is the first attempt. On an
    /// insufficient pool the error is surfaced for alerting and the cycle
    /// stays Pending with no slate. The contract assigns cycle ids at
    /// `startCycle`, so an unopened id is re-proposed at the next selection
    /// moment and the Pending row is simply picked up again. Retrying after
    /// a crash between create and freeze is safe for the same reason: the
    /// freeze is single-shot inside the store.
    pub async fn build_slate(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> SelectorResult<Vec<SlateEntry>> {
        let window_start = now + self.config.selection_grace;
        let window_end = now + self.config.window;
        let candidates = self
            .store
            .selection_candidates(window_start, window_end)
            .await?;
        debug!(
            cycle_id = %cycle_id,
            candidates = candidates.len(),
            %window_start,
            %window_end,
            "selection pool assembled"
        );

        self.store.create_cycle(cycle_id, now).await?;

        let chosen = match select_fixtures(&candidates, &self.config.policy) {
            Ok(ids) => ids,
            Err(SelectorError::InsufficientFixtures { eligible, required }) => {
                warn!(cycle_id = %cycle_id, eligible, required, "cannot fill slate");
                let event = AuditEvent::SelectionFailed {
                    cycle_id: cycle_id.as_u64(),
                    candidates: eligible,
                };
                self.audit.log(&event, now).await?;
                return Err(SelectorError::InsufficientFixtures { eligible, required });
            }
            Err(other) => return Err(other),
        };

        let entries = self
            .store
            .freeze_slate(
                cycle_id,
                &chosen,
                self.config.entry_grace,
                self.config.resolve_deadline_offset,
                now,
            )
            .await?;
        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            info!(
                cycle_id = %cycle_id,
                first_kickoff = %first.kickoff_at,
                last_kickoff = %last.kickoff_at,
                "slate frozen"
            );
        }
        Ok(entries)
    }
}
