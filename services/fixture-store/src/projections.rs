//! Evaluation writes, leaderboards and user statistic roll-ups
//!
//! Cycle evaluation is written in one transaction per cycle so a crash can
//! never leave half a leaderboard behind. User statistics roll cycles up in
//! cycle-id order; a rebuild that replays the same order lands on identical
//! rows.

use chrono::{DateTime, Utc};
use services_common::{CycleId, PlayerAddress, SlipId};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::entities::{EvaluatedSlip, LeaderboardRow, StatsApply, UserStats};
use crate::error::{StoreError, StoreResult};
use crate::store::FixtureStore;

impl FixtureStore {
    /// Persist a full cycle evaluation: per-slip scores plus the
    /// materialized leaderboard, atomically.
    ///
    /// Safe to repeat; a re-evaluation replaces the previous rows, and with
    /// identical inputs writes identical output.
    pub async fn write_cycle_evaluation(
        &self,
        cycle_id: CycleId,
        rows: &[EvaluatedSlip],
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM leaderboard_entries WHERE cycle_id = $1")
            .bind(cycle_id.as_i64())
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r"
                UPDATE slips SET
                    evaluated = TRUE,
                    correct_count = $2,
                    qualified = $3,
                    score = $4,
                    rank = $5
                WHERE slip_id = $1
                ",
            )
            .bind(row.slip_id.as_i64())
            .bind(i16::from(row.correct_count))
            .bind(row.qualified)
            .bind(row.score)
            .bind(row.rank as i32)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                INSERT INTO leaderboard_entries (
                    cycle_id, rank, slip_id, player, correct_count, score, placed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(cycle_id.as_i64())
            .bind(row.rank as i32)
            .bind(row.slip_id.as_i64())
            .bind(row.player.to_string())
            .bind(i16::from(row.correct_count))
            .bind(row.score)
            .bind(row.placed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(%cycle_id, slips = rows.len(), "cycle evaluation written");
        Ok(())
    }

    /// The materialized leaderboard of a cycle, best rank first.
    pub async fn leaderboard(
        &self,
        cycle_id: CycleId,
        limit: i64,
    ) -> StoreResult<Vec<LeaderboardRow>> {
        let rows = sqlx::query(
            r"
            SELECT cycle_id, rank, slip_id, player, correct_count, score, placed_at
            FROM leaderboard_entries
            WHERE cycle_id = $1
            ORDER BY rank
            LIMIT $2
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(leaderboard_from_row).collect()
    }

    /// Roll one evaluated cycle into user statistics.
    ///
    /// Cycles must be applied in ascending id order to keep streak math
    /// canonical; if an earlier evaluated cycle has not been applied yet
    /// this returns `Deferred` and the caller retries later.
    pub async fn apply_cycle_to_user_stats(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> StoreResult<StatsApply> {
        let mut tx = self.pool().begin().await?;

        let cycle_row = sqlx::query(
            "SELECT stats_applied FROM cycles WHERE cycle_id = $1 FOR UPDATE",
        )
        .bind(cycle_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "cycle",
            id: cycle_id.to_string(),
        })?;
        if cycle_row.get::<bool, _>("stats_applied") {
            return Ok(StatsApply::AlreadyApplied);
        }

        let blocked = sqlx::query(
            r"
            SELECT 1 AS one FROM cycles
            WHERE cycle_id < $1 AND state = 'Evaluated' AND NOT stats_applied
            LIMIT 1
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if blocked {
            return Ok(StatsApply::Deferred);
        }

        let prev_applied: Option<i64> = sqlx::query(
            "SELECT MAX(cycle_id) AS prev FROM cycles WHERE stats_applied AND cycle_id < $1",
        )
        .bind(cycle_id.as_i64())
        .fetch_one(&mut *tx)
        .await?
        .get("prev");

        let entrants = sqlx::query(
            r"
            SELECT l.player,
                   COUNT(*) AS slips,
                   SUM(l.score) AS score_sum,
                   BOOL_OR(COALESCE(s.qualified, FALSE)) AS qualified_any,
                   MIN(l.rank) AS best_rank
            FROM leaderboard_entries l
            JOIN slips s ON s.slip_id = l.slip_id
            WHERE l.cycle_id = $1
            GROUP BY l.player
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_all(&mut *tx)
        .await?;

        for entrant in &entrants {
            let player: String = entrant.get("player");
            let slips: i64 = entrant.get("slips");
            let score_sum: rust_decimal::Decimal = entrant.get("score_sum");
            let qualified: bool = entrant.get("qualified_any");
            let won = entrant.get::<i32, _>("best_rank") == 1;

            sqlx::query(
                r"
                INSERT INTO user_stats (
                    player, cycles_entered, slips_placed, wins, lifetime_score,
                    current_streak, longest_streak, last_qualified_cycle,
                    last_entered_cycle, updated_at
                ) VALUES (
                    $1, 1, $2, $3, $4,
                    CASE WHEN $5 THEN 1 ELSE 0 END,
                    CASE WHEN $5 THEN 1 ELSE 0 END,
                    CASE WHEN $5 THEN $6 ELSE NULL END,
                    $6, $7
                )
                ON CONFLICT (player) DO UPDATE SET
                    cycles_entered = user_stats.cycles_entered + 1,
                    slips_placed = user_stats.slips_placed + $2,
                    wins = user_stats.wins + $3,
                    lifetime_score = user_stats.lifetime_score + $4,
                    current_streak = CASE
                        WHEN NOT $5 THEN 0
                        WHEN user_stats.last_qualified_cycle = $8
                            THEN user_stats.current_streak + 1
                        ELSE 1
                    END,
                    longest_streak = GREATEST(user_stats.longest_streak, CASE
                        WHEN NOT $5 THEN user_stats.longest_streak
                        WHEN user_stats.last_qualified_cycle = $8
                            THEN user_stats.current_streak + 1
                        ELSE 1
                    END),
                    last_qualified_cycle = CASE
                        WHEN $5 THEN $6 ELSE user_stats.last_qualified_cycle
                    END,
                    last_entered_cycle = $6,
                    updated_at = $7
                ",
            )
            .bind(&player)
            .bind(slips)
            .bind(i64::from(won))
            .bind(score_sum)
            .bind(qualified)
            .bind(cycle_id.as_i64())
            .bind(now)
            .bind(prev_applied)
            .execute(&mut *tx)
            .await?;
        }

        // Anyone whose latest qualification is not this cycle has had the
        // streak broken, including players who sat the cycle out.
        sqlx::query(
            r"
            UPDATE user_stats SET current_streak = 0, updated_at = $2
            WHERE last_qualified_cycle IS DISTINCT FROM $1 AND current_streak <> 0
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE cycles SET stats_applied = TRUE, updated_at = $2 WHERE cycle_id = $1")
            .bind(cycle_id.as_i64())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(%cycle_id, entrants = entrants.len(), "user stats applied");
        Ok(StatsApply::Applied)
    }

    /// Load one player's rolled-up statistics.
    pub async fn user_stats(&self, player: PlayerAddress) -> StoreResult<Option<UserStats>> {
        let row = sqlx::query(
            r"
            SELECT player, cycles_entered, slips_placed, wins, lifetime_score,
                   current_streak, longest_streak, last_qualified_cycle,
                   last_entered_cycle, updated_at
            FROM user_stats
            WHERE player = $1
            ",
        )
        .bind(player.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| user_stats_from_row(&r)).transpose()
    }

    /// Wipe every projection (slip scores, leaderboards, user stats) ahead
    /// of a rebuild from raw slips and results.
    pub async fn reset_projections(&self, now: DateTime<Utc>) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM leaderboard_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_stats").execute(&mut *tx).await?;
        sqlx::query(
            r"
            UPDATE slips SET evaluated = FALSE, correct_count = NULL,
                   qualified = NULL, score = NULL, rank = NULL
            ",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE cycles SET stats_applied = FALSE, updated_at = $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("projections reset");
        Ok(())
    }
}

fn leaderboard_from_row(row: &PgRow) -> StoreResult<LeaderboardRow> {
    let slip_id = SlipId::new(row.get::<i64, _>("slip_id") as u64);
    let player = row
        .get::<String, _>("player")
        .parse::<PlayerAddress>()
        .map_err(|source| StoreError::CorruptRow {
            entity: "leaderboard entry",
            id: slip_id.to_string(),
            source,
        })?;
    Ok(LeaderboardRow {
        cycle_id: CycleId::new(row.get::<i64, _>("cycle_id") as u64),
        rank: row.get::<i32, _>("rank") as u32,
        slip_id,
        player,
        correct_count: row.get::<i16, _>("correct_count") as u8,
        score: row.get("score"),
        placed_at: row.get("placed_at"),
    })
}

fn user_stats_from_row(row: &PgRow) -> StoreResult<UserStats> {
    let player = row
        .get::<String, _>("player")
        .parse::<PlayerAddress>()
        .map_err(|source| StoreError::CorruptRow {
            entity: "user stats",
            id: row.get::<String, _>("player"),
            source,
        })?;
    Ok(UserStats {
        player,
        cycles_entered: row.get::<i64, _>("cycles_entered") as u64,
        slips_placed: row.get::<i64, _>("slips_placed") as u64,
        wins: row.get::<i64, _>("wins") as u64,
        lifetime_score: row.get("lifetime_score"),
        current_streak: row.get::<i32, _>("current_streak") as u32,
        longest_streak: row.get::<i32, _>("longest_streak") as u32,
        last_qualified_cycle: row
            .get::<Option<i64>, _>("last_qualified_cycle")
            .map(|id| CycleId::new(id as u64)),
        last_entered_cycle: row
            .get::<Option<i64>, _>("last_entered_cycle")
            .map(|id| CycleId::new(id as u64)),
        updated_at: row.get("updated_at"),
    })
}
