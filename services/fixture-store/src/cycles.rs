//! Cycle rows and durable state transitions
//!
//! Every transition is a compare-and-set on the state column plus one
//! appended transition-log row, committed together. Retrying a transition
//! that already happened reports `AlreadyApplied` instead of failing, which
//! makes the coordinator safe under at-least-once delivery.

use chrono::{DateTime, Utc};
use services_common::{CycleId, CycleState};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::info;

use crate::entities::{Cycle, TransitionOutcome, TransitionRecord};
use crate::error::{StoreError, StoreResult};
use crate::store::{FixtureStore, parse_cycle_state};

impl FixtureStore {
    /// Create a Pending cycle row. Returns `false` if the id already exists.
    pub async fn create_cycle(&self, cycle_id: CycleId, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO cycles (cycle_id, state, created_at, updated_at)
            VALUES ($1, 'Pending', $2, $2)
            ON CONFLICT (cycle_id) DO NOTHING
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(now)
        .execute(self.pool())
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            info!(%cycle_id, "cycle created");
        }
        Ok(created)
    }

    /// Load one cycle.
    pub async fn cycle(&self, cycle_id: CycleId) -> StoreResult<Option<Cycle>> {
        let row = sqlx::query(&format!(
            "{CYCLE_COLUMNS} FROM cycles WHERE cycle_id = $1"
        ))
        .bind(cycle_id.as_i64())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| cycle_from_row(&r)).transpose()
    }

    /// All cycles not yet in a terminal state, oldest first. Startup resume
    /// walks this list.
    pub async fn active_cycles(&self) -> StoreResult<Vec<Cycle>> {
        let rows = sqlx::query(&format!(
            "{CYCLE_COLUMNS} FROM cycles \
             WHERE state NOT IN ('Evaluated', 'Cancelled') ORDER BY cycle_id"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(cycle_from_row).collect()
    }

    /// Cycles currently in one state, oldest first.
    pub async fn cycles_in_state(&self, state: CycleState) -> StoreResult<Vec<Cycle>> {
        let rows = sqlx::query(&format!(
            "{CYCLE_COLUMNS} FROM cycles WHERE state = $1 ORDER BY cycle_id"
        ))
        .bind(state.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(cycle_from_row).collect()
    }

    /// Highest cycle id on record.
    pub async fn latest_cycle_id(&self) -> StoreResult<Option<CycleId>> {
        let row = sqlx::query("SELECT MAX(cycle_id) AS max_id FROM cycles")
            .fetch_one(self.pool())
            .await?;
        Ok(row
            .get::<Option<i64>, _>("max_id")
            .map(|id| CycleId::new(id as u64)))
    }

    /// Pending -> Open, recording the confirmed `startCycle` hash.
    pub async fn mark_cycle_open(
        &self,
        cycle_id: CycleId,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool().begin().await?;
        let applied = sqlx::query(
            r"
            UPDATE cycles
            SET state = 'Open', opened_at = $3, start_tx_hash = $2, updated_at = $3
            WHERE cycle_id = $1 AND state = 'Pending'
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(tx_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            return self
                .transition_noop(cycle_id, CycleState::Pending, CycleState::Open)
                .await;
        }
        log_transition(
            &mut tx,
            cycle_id,
            CycleState::Pending,
            CycleState::Open,
            "start_tx_confirmed",
            Some(tx_hash),
            now,
        )
        .await?;
        tx.commit().await?;
        info!(%cycle_id, tx_hash, "cycle opened");
        Ok(TransitionOutcome::Applied)
    }

    /// Open -> Closed, once close time has passed and the chain stopped
    /// accepting entries.
    pub async fn mark_cycle_closed(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.simple_transition(
            cycle_id,
            CycleState::Open,
            CycleState::Closed,
            "close_time_reached",
            now,
        )
        .await
    }

    /// Closed -> AwaitingResults. Unconditional follow-up to Closed.
    pub async fn mark_cycle_awaiting(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.simple_transition(
            cycle_id,
            CycleState::Closed,
            CycleState::AwaitingResults,
            "entries_closed",
            now,
        )
        .await
    }

    /// AwaitingResults -> Resolving.
    ///
    /// Recorded before the resolve transaction is broadcast, so a crash
    /// between the mark and the confirmation leaves durable evidence that a
    /// submission may be in flight. The hash lands later through
    /// [`FixtureStore::update_resolve_tx`] or the confirmation event.
    pub async fn mark_cycle_resolving(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.simple_transition(
            cycle_id,
            CycleState::AwaitingResults,
            CycleState::Resolving,
            "resolve_submission_started",
            now,
        )
        .await
    }

    /// Replace the tracked resolve hash after a fee-bump re-submission.
    /// Only valid while the cycle is still Resolving.
    pub async fn update_resolve_tx(
        &self,
        cycle_id: CycleId,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE cycles SET resolve_tx_hash = $2, updated_at = $3
            WHERE cycle_id = $1 AND state = 'Resolving'
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(tx_hash)
        .bind(now)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "resolving cycle",
                id: cycle_id.to_string(),
            });
        }
        Ok(())
    }

    /// Resolving -> Resolved, storing the confirmed result vector.
    pub async fn mark_cycle_resolved(
        &self,
        cycle_id: CycleId,
        tx_hash: &str,
        moneyline: &[i16],
        totals: &[i16],
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool().begin().await?;
        let applied = sqlx::query(
            r"
            UPDATE cycles
            SET state = 'Resolved', resolve_tx_hash = $2,
                result_moneyline = $3, result_totals = $4, updated_at = $5
            WHERE cycle_id = $1 AND state = 'Resolving'
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(tx_hash)
        .bind(moneyline)
        .bind(totals)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            return self
                .transition_noop(cycle_id, CycleState::Resolving, CycleState::Resolved)
                .await;
        }
        log_transition(
            &mut tx,
            cycle_id,
            CycleState::Resolving,
            CycleState::Resolved,
            "resolve_tx_confirmed",
            Some(tx_hash),
            now,
        )
        .await?;
        tx.commit().await?;
        info!(%cycle_id, tx_hash, "cycle resolved");
        Ok(TransitionOutcome::Applied)
    }

    /// Resolved -> Evaluated, after every slip is scored and ranked.
    pub async fn mark_cycle_evaluated(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.simple_transition(
            cycle_id,
            CycleState::Resolved,
            CycleState::Evaluated,
            "all_slips_projected",
            now,
        )
        .await
    }

    /// Move a cycle to Cancelled. Allowed from Pending, Open, Closed and
    /// AwaitingResults; once a resolve transaction is in flight the cycle
    /// must run to Resolved instead.
    ///
    /// `reason` is recorded as both the transition trigger and the cycle's
    /// cancel reason (e.g. `insufficient_fixtures`, `fixture_cancelled`,
    /// `slate_mismatch`).
    pub async fn cancel_cycle(
        &self,
        cycle_id: CycleId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT state FROM cycles WHERE cycle_id = $1 FOR UPDATE")
            .bind(cycle_id.as_i64())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "cycle",
                id: cycle_id.to_string(),
            })?;
        let current = parse_cycle_state(&row.get::<String, _>("state"), cycle_id)?;

        match current {
            CycleState::Cancelled => return Ok(TransitionOutcome::AlreadyApplied),
            CycleState::Pending
            | CycleState::Open
            | CycleState::Closed
            | CycleState::AwaitingResults => {}
            CycleState::Resolving | CycleState::Resolved | CycleState::Evaluated => {
                return Err(StoreError::InvalidTransition {
                    cycle_id,
                    from: current,
                    to: CycleState::Cancelled,
                    actual: current,
                });
            }
        }

        sqlx::query(
            r"
            UPDATE cycles SET state = 'Cancelled', cancel_reason = $2, updated_at = $3
            WHERE cycle_id = $1
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        log_transition(
            &mut tx,
            cycle_id,
            current,
            CycleState::Cancelled,
            reason,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        info!(%cycle_id, reason, "cycle cancelled");
        Ok(TransitionOutcome::Applied)
    }

    /// Full transition log for a cycle, append order.
    pub async fn transitions(&self, cycle_id: CycleId) -> StoreResult<Vec<TransitionRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, cycle_id, from_state, to_state, trigger_event, tx_hash, occurred_at
            FROM cycle_transitions
            WHERE cycle_id = $1
            ORDER BY id
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(transition_from_row).collect()
    }

    /// CAS transition with no extra column updates.
    async fn simple_transition(
        &self,
        cycle_id: CycleId,
        from: CycleState,
        to: CycleState,
        trigger: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool().begin().await?;
        let applied = sqlx::query(
            "UPDATE cycles SET state = $3, updated_at = $4 WHERE cycle_id = $1 AND state = $2",
        )
        .bind(cycle_id.as_i64())
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            return self.transition_noop(cycle_id, from, to).await;
        }
        log_transition(&mut tx, cycle_id, from, to, trigger, None, now).await?;
        tx.commit().await?;
        info!(%cycle_id, %from, %to, "cycle transitioned");
        Ok(TransitionOutcome::Applied)
    }

    /// Decide whether a failed CAS was an idempotent repeat or a real
    /// ordering violation.
    async fn transition_noop(
        &self,
        cycle_id: CycleId,
        from: CycleState,
        to: CycleState,
    ) -> StoreResult<TransitionOutcome> {
        let row = sqlx::query("SELECT state FROM cycles WHERE cycle_id = $1")
            .bind(cycle_id.as_i64())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "cycle",
                id: cycle_id.to_string(),
            })?;
        let actual = parse_cycle_state(&row.get::<String, _>("state"), cycle_id)?;
        if actual == to {
            Ok(TransitionOutcome::AlreadyApplied)
        } else {
            Err(StoreError::InvalidTransition {
                cycle_id,
                from,
                to,
                actual,
            })
        }
    }
}

const CYCLE_COLUMNS: &str = "SELECT cycle_id, state, opened_at, closes_at, resolve_deadline, \
     start_tx_hash, resolve_tx_hash, cancel_reason, result_moneyline, result_totals, \
     stats_applied, created_at, updated_at";

async fn log_transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cycle_id: CycleId,
    from: CycleState,
    to: CycleState,
    trigger: &str,
    tx_hash: Option<&str>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let conn: &mut PgConnection = &mut *tx;
    sqlx::query(
        r"
        INSERT INTO cycle_transitions (
            cycle_id, from_state, to_state, trigger_event, tx_hash, occurred_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(cycle_id.as_i64())
    .bind(from.to_string())
    .bind(to.to_string())
    .bind(trigger)
    .bind(tx_hash)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) fn cycle_from_row(row: &PgRow) -> StoreResult<Cycle> {
    let cycle_id = CycleId::new(row.get::<i64, _>("cycle_id") as u64);
    Ok(Cycle {
        cycle_id,
        state: parse_cycle_state(&row.get::<String, _>("state"), cycle_id)?,
        opened_at: row.get("opened_at"),
        closes_at: row.get("closes_at"),
        resolve_deadline: row.get("resolve_deadline"),
        start_tx_hash: row.get("start_tx_hash"),
        resolve_tx_hash: row.get("resolve_tx_hash"),
        cancel_reason: row.get("cancel_reason"),
        result_moneyline: row.get("result_moneyline"),
        result_totals: row.get("result_totals"),
        stats_applied: row.get("stats_applied"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn transition_from_row(row: &PgRow) -> StoreResult<TransitionRecord> {
    let cycle_id = CycleId::new(row.get::<i64, _>("cycle_id") as u64);
    Ok(TransitionRecord {
        id: row.get("id"),
        cycle_id,
        from_state: parse_cycle_state(&row.get::<String, _>("from_state"), cycle_id)?,
        to_state: parse_cycle_state(&row.get::<String, _>("to_state"), cycle_id)?,
        trigger_event: row.get("trigger_event"),
        tx_hash: row.get("tx_hash"),
        occurred_at: row.get("occurred_at"),
    })
}
