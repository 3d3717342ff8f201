//! Core store handle plus fixture, odds, result and slate operations
//!
//! Optimized for correctness over throughput: the contest writes a few
//! thousand rows a day, so every guard (kickoff immutability, write-once
//! results, single-shot freezes) is enforced in SQL rather than trusted to
//! callers.

use chrono::{DateTime, Duration, Utc};
use services_common::constants::SLATE_SIZE;
use services_common::{
    CycleId, CycleState, FixtureId, FixtureOdds, FixtureStatus, Market, OddsX100,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::entities::{Fixture, FixtureResult, MarketQuote, NewFixture, ResultWrite, SlateEntry};
use crate::error::{StoreError, StoreResult};

/// Durable store handle. Cheap to clone; all methods borrow the pool.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    /// Database pool
    pool: PgPool,
}

impl FixtureStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool, for health probes.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or refresh a fixture.
    ///
    /// Teams and league follow the provider; kickoff is immutable after the
    /// first insert and a changed kickoff fails with `ImmutableKickoff`.
    pub async fn upsert_fixture(&self, new: &NewFixture, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO fixtures (
                fixture_id, league, home_team, away_team, kickoff_at,
                status, first_seen_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'Scheduled', $6, $6)
            ON CONFLICT (fixture_id) DO UPDATE SET
                league = EXCLUDED.league,
                home_team = EXCLUDED.home_team,
                away_team = EXCLUDED.away_team,
                updated_at = EXCLUDED.updated_at
            WHERE fixtures.kickoff_at = EXCLUDED.kickoff_at
            ",
        )
        .bind(new.fixture_id.as_i64())
        .bind(&new.league)
        .bind(&new.home_team)
        .bind(&new.away_team)
        .bind(new.kickoff_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored: DateTime<Utc> =
                sqlx::query("SELECT kickoff_at FROM fixtures WHERE fixture_id = $1")
                    .bind(new.fixture_id.as_i64())
                    .fetch_one(&self.pool)
                    .await?
                    .get("kickoff_at");
            return Err(StoreError::ImmutableKickoff {
                fixture_id: new.fixture_id,
                stored,
                attempted: new.kickoff_at,
            });
        }
        Ok(())
    }

    /// Load one fixture.
    pub async fn fixture(&self, fixture_id: FixtureId) -> StoreResult<Option<Fixture>> {
        let row = sqlx::query(
            r"
            SELECT fixture_id, league, home_team, away_team, kickoff_at,
                   status, first_seen_at, updated_at
            FROM fixtures
            WHERE fixture_id = $1
            ",
        )
        .bind(fixture_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| fixture_from_row(&r)).transpose()
    }

    /// Advance a fixture's status.
    ///
    /// Terminal statuses never change and a repeated write of the current
    /// status is a no-op; both return `false`. Late provider flapping
    /// (Finished back to Live) is therefore ignored rather than honored.
    pub async fn set_fixture_status(
        &self,
        fixture_id: FixtureId,
        status: FixtureStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE fixtures SET status = $2, updated_at = $3
            WHERE fixture_id = $1
              AND status NOT IN ('Finished', 'Cancelled')
              AND status <> $2
            ",
        )
        .bind(fixture_id.as_i64())
        .bind(status.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            debug!(%fixture_id, %status, "fixture status advanced");
        }
        Ok(applied)
    }

    /// Append one odds quote. The latest row per (fixture, market) is the
    /// current price; history is kept.
    pub async fn record_odds(
        &self,
        fixture_id: FixtureId,
        quote: MarketQuote,
        captured_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let (market, home, draw, away, over, under) = match quote {
            MarketQuote::Moneyline { home, draw, away } => (
                Market::OneXTwo,
                Some(home.as_i32()),
                Some(draw.as_i32()),
                Some(away.as_i32()),
                None,
                None,
            ),
            MarketQuote::Totals { over, under } => (
                Market::OverUnder25,
                None,
                None,
                None,
                Some(over.as_i32()),
                Some(under.as_i32()),
            ),
        };

        sqlx::query(
            r"
            INSERT INTO odds_snapshots (
                fixture_id, market, captured_at,
                home_odds, draw_odds, away_odds, over_odds, under_odds
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(fixture_id.as_i64())
        .bind(market_tag(market))
        .bind(captured_at)
        .bind(home)
        .bind(draw)
        .bind(away)
        .bind(over)
        .bind(under)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current composed odds for a fixture, or `None` while either market
    /// lacks a snapshot.
    pub async fn current_odds(&self, fixture_id: FixtureId) -> StoreResult<Option<FixtureOdds>> {
        let row = sqlx::query(&format!(
            r"
            SELECT m.home_odds, m.draw_odds, m.away_odds, t.over_odds, t.under_odds
            FROM ({moneyline}) m
            JOIN ({totals}) t USING (fixture_id)
            ",
            moneyline = current_market_subquery("1X2"),
            totals = current_market_subquery("OU25"),
        ))
        .bind(fixture_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| odds_from_row(&r, fixture_id)).transpose()
    }

    /// Record a final result. Write-once.
    ///
    /// An identical re-submission is a no-op; a conflicting one marks the
    /// stored result disputed and fails with `ResultConflict` so it is never
    /// silently overwritten. The first write also moves the fixture to
    /// Finished in the same transaction.
    pub async fn record_result(
        &self,
        fixture_id: FixtureId,
        home_goals: u16,
        away_goals: u16,
        finished_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<ResultWrite> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO fixture_results (
                fixture_id, home_goals, away_goals, finished_at, recorded_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (fixture_id) DO NOTHING
            ",
        )
        .bind(fixture_id.as_i64())
        .bind(i16::try_from(home_goals).unwrap_or(i16::MAX))
        .bind(i16::try_from(away_goals).unwrap_or(i16::MAX))
        .bind(finished_at)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query(
                "UPDATE fixtures SET status = 'Finished', updated_at = $2 WHERE fixture_id = $1",
            )
            .bind(fixture_id.as_i64())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            debug!(%fixture_id, home_goals, away_goals, "result recorded");
            return Ok(ResultWrite::Recorded);
        }

        let existing = sqlx::query(
            "SELECT home_goals, away_goals FROM fixture_results WHERE fixture_id = $1",
        )
        .bind(fixture_id.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        let stored_home = existing.get::<i16, _>("home_goals") as u16;
        let stored_away = existing.get::<i16, _>("away_goals") as u16;

        if stored_home == home_goals && stored_away == away_goals {
            tx.commit().await?;
            return Ok(ResultWrite::Unchanged);
        }

        sqlx::query("UPDATE fixture_results SET disputed = TRUE WHERE fixture_id = $1")
            .bind(fixture_id.as_i64())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        warn!(
            %fixture_id, stored_home, stored_away, home_goals, away_goals,
            "conflicting result report; stored result kept and marked disputed"
        );
        Err(StoreError::ResultConflict {
            fixture_id,
            stored_home,
            stored_away,
            reported_home: home_goals,
            reported_away: away_goals,
        })
    }

    /// Load one recorded result.
    pub async fn result(&self, fixture_id: FixtureId) -> StoreResult<Option<FixtureResult>> {
        let row = sqlx::query(
            r"
            SELECT fixture_id, home_goals, away_goals, finished_at, recorded_at, disputed
            FROM fixture_results
            WHERE fixture_id = $1
            ",
        )
        .bind(fixture_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| result_from_row(&r)))
    }

    /// Results for every slate position of a cycle, slate order. Positions
    /// without a result are `None`.
    pub async fn results_for_cycle(
        &self,
        cycle_id: CycleId,
    ) -> StoreResult<Vec<Option<FixtureResult>>> {
        let rows = sqlx::query(
            r"
            SELECT r.fixture_id, r.home_goals, r.away_goals, r.finished_at,
                   r.recorded_at, r.disputed
            FROM slate_entries s
            LEFT JOIN fixture_results r ON r.fixture_id = s.fixture_id
            WHERE s.cycle_id = $1
            ORDER BY s.slot
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                r.get::<Option<i64>, _>("fixture_id")
                    .map(|_| result_from_row(r))
            })
            .collect())
    }

    /// Clear the disputed flag on a result after operator review.
    pub async fn clear_dispute(&self, fixture_id: FixtureId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE fixture_results SET disputed = FALSE WHERE fixture_id = $1 AND disputed",
        )
        .bind(fixture_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fixtures the results collector should poll now: past kickoff by at
    /// least `min_age` and either a recent non-terminal fixture, or any
    /// fixture a live cycle's slate references. Slate fixtures stay pollable
    /// after finishing so late provider re-reports are still observed and
    /// disputed while the cycle can act on them.
    pub async fn pollable_fixtures(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
        min_age: Duration,
    ) -> StoreResult<Vec<Fixture>> {
        let rows = sqlx::query(
            r"
            SELECT fixture_id, league, home_team, away_team, kickoff_at,
                   status, first_seen_at, updated_at
            FROM fixtures f
            WHERE f.kickoff_at <= $1
              AND f.status <> 'Cancelled'
              AND (
                  (f.status IN ('Scheduled', 'Live') AND f.kickoff_at >= $2)
                  OR EXISTS (
                      SELECT 1 FROM slate_entries s
                      JOIN cycles c USING (cycle_id)
                      WHERE s.fixture_id = f.fixture_id
                        AND c.state IN ('Open', 'Closed', 'AwaitingResults', 'Resolving')
                  )
              )
            ORDER BY f.kickoff_at, f.fixture_id
            ",
        )
        .bind(now - min_age)
        .bind(now - lookback)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fixture_from_row).collect()
    }

    /// Scheduled fixtures strictly inside the selection window with both
    /// markets priced, ordered by kickoff then id.
    pub async fn selection_candidates(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<(Fixture, FixtureOdds)>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT f.fixture_id, f.league, f.home_team, f.away_team, f.kickoff_at,
                   f.status, f.first_seen_at, f.updated_at,
                   m.home_odds, m.draw_odds, m.away_odds, t.over_odds, t.under_odds
            FROM fixtures f
            JOIN ({moneyline}) m USING (fixture_id)
            JOIN ({totals}) t USING (fixture_id)
            WHERE f.status = 'Scheduled'
              AND f.kickoff_at > $1
              AND f.kickoff_at < $2
            ORDER BY f.kickoff_at, f.fixture_id
            ",
            moneyline = all_current_market_subquery("1X2"),
            totals = all_current_market_subquery("OU25"),
        ))
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let fixture = fixture_from_row(r)?;
                let odds = odds_from_row(r, fixture.fixture_id)?;
                Ok((fixture, odds))
            })
            .collect()
    }

    /// Atomically freeze a slate for a Pending cycle.
    ///
    /// Orders the fixtures canonically (kickoff, then id), copies their
    /// current odds, and stamps the cycle's close time and resolve deadline
    /// in the same transaction. Single-shot: a second call fails with
    /// `SlateAlreadyFrozen` even for identical input.
    pub async fn freeze_slate(
        &self,
        cycle_id: CycleId,
        fixture_ids: &[FixtureId],
        entry_grace: Duration,
        resolve_deadline_offset: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SlateEntry>> {
        let mut distinct: Vec<i64> = fixture_ids.iter().map(|f| f.as_i64()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != SLATE_SIZE {
            return Err(StoreError::BadSlateShape {
                cycle_id,
                expected: SLATE_SIZE,
                actual: distinct.len(),
            });
        }

        let mut tx = self.pool.begin().await?;

        let cycle_row = sqlx::query("SELECT state FROM cycles WHERE cycle_id = $1 FOR UPDATE")
            .bind(cycle_id.as_i64())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "cycle",
                id: cycle_id.to_string(),
            })?;
        let state = parse_cycle_state(&cycle_row.get::<String, _>("state"), cycle_id)?;
        if state != CycleState::Pending {
            return Err(StoreError::SlateAlreadyFrozen { cycle_id });
        }

        let frozen: i64 = sqlx::query("SELECT COUNT(*) AS n FROM slate_entries WHERE cycle_id = $1")
            .bind(cycle_id.as_i64())
            .fetch_one(&mut *tx)
            .await?
            .get("n");
        if frozen > 0 {
            return Err(StoreError::SlateAlreadyFrozen { cycle_id });
        }

        let rows = sqlx::query(&format!(
            r"
            SELECT f.fixture_id, f.league, f.home_team, f.away_team, f.kickoff_at,
                   f.status, f.first_seen_at, f.updated_at,
                   m.home_odds, m.draw_odds, m.away_odds, t.over_odds, t.under_odds
            FROM fixtures f
            LEFT JOIN ({moneyline}) m USING (fixture_id)
            LEFT JOIN ({totals}) t USING (fixture_id)
            WHERE f.fixture_id = ANY($1)
            ORDER BY f.kickoff_at, f.fixture_id
            ",
            moneyline = all_current_market_subquery("1X2"),
            totals = all_current_market_subquery("OU25"),
        ))
        .bind(&distinct)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() != SLATE_SIZE {
            return Err(StoreError::BadSlateShape {
                cycle_id,
                expected: SLATE_SIZE,
                actual: rows.len(),
            });
        }

        let mut entries = Vec::with_capacity(SLATE_SIZE);
        for (slot, row) in rows.iter().enumerate() {
            let fixture = fixture_from_row(row)?;
            if row.get::<Option<i32>, _>("home_odds").is_none() {
                return Err(StoreError::MissingOdds {
                    fixture_id: fixture.fixture_id,
                    market: Market::OneXTwo,
                });
            }
            if row.get::<Option<i32>, _>("over_odds").is_none() {
                return Err(StoreError::MissingOdds {
                    fixture_id: fixture.fixture_id,
                    market: Market::OverUnder25,
                });
            }
            let odds = odds_from_row(row, fixture.fixture_id)?;

            sqlx::query(
                r"
                INSERT INTO slate_entries (
                    cycle_id, slot, fixture_id, league, home_team, away_team,
                    kickoff_at, home_odds, draw_odds, away_odds, over_odds,
                    under_odds, frozen_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ",
            )
            .bind(cycle_id.as_i64())
            .bind(slot as i16)
            .bind(fixture.fixture_id.as_i64())
            .bind(&fixture.league)
            .bind(&fixture.home_team)
            .bind(&fixture.away_team)
            .bind(fixture.kickoff_at)
            .bind(odds.home.as_i32())
            .bind(odds.draw.as_i32())
            .bind(odds.away.as_i32())
            .bind(odds.over.as_i32())
            .bind(odds.under.as_i32())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            entries.push(SlateEntry {
                cycle_id,
                slot: slot as u8,
                fixture_id: fixture.fixture_id,
                league: fixture.league,
                home_team: fixture.home_team,
                away_team: fixture.away_team,
                kickoff_at: fixture.kickoff_at,
                odds,
                frozen_at: now,
            });
        }

        // Earliest kickoff is slot 0 by construction; latest is slot 9.
        let closes_at = entries[0].kickoff_at - entry_grace;
        let resolve_deadline = entries[SLATE_SIZE - 1].kickoff_at + resolve_deadline_offset;
        sqlx::query(
            r"
            UPDATE cycles SET closes_at = $2, resolve_deadline = $3, updated_at = $4
            WHERE cycle_id = $1
            ",
        )
        .bind(cycle_id.as_i64())
        .bind(closes_at)
        .bind(resolve_deadline)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%cycle_id, %closes_at, "slate frozen");
        Ok(entries)
    }

    /// The frozen slate of a cycle, slate order. Empty if never frozen.
    pub async fn slate(&self, cycle_id: CycleId) -> StoreResult<Vec<SlateEntry>> {
        let rows = sqlx::query(
            r"
            SELECT cycle_id, slot, fixture_id, league, home_team, away_team,
                   kickoff_at, home_odds, draw_odds, away_odds, over_odds,
                   under_odds, frozen_at
            FROM slate_entries
            WHERE cycle_id = $1
            ORDER BY slot
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(slate_entry_from_row).collect()
    }
}

/// Latest snapshot per fixture for one market, as a parameter-free subquery.
fn all_current_market_subquery(tag: &str) -> String {
    format!(
        "SELECT DISTINCT ON (fixture_id) fixture_id, home_odds, draw_odds, away_odds, \
         over_odds, under_odds \
         FROM odds_snapshots WHERE market = '{tag}' \
         ORDER BY fixture_id, captured_at DESC, id DESC"
    )
}

/// Latest snapshot for one fixture and market, filtered by the `$1` bind.
fn current_market_subquery(tag: &str) -> String {
    format!(
        "SELECT fixture_id, home_odds, draw_odds, away_odds, over_odds, under_odds \
         FROM odds_snapshots WHERE market = '{tag}' AND fixture_id = $1 \
         ORDER BY captured_at DESC, id DESC LIMIT 1"
    )
}

/// Stable market column tag.
pub(crate) fn market_tag(market: Market) -> &'static str {
    match market {
        Market::OneXTwo => "1X2",
        Market::OverUnder25 => "OU25",
    }
}

pub(crate) fn fixture_from_row(row: &PgRow) -> StoreResult<Fixture> {
    let fixture_id = FixtureId::new(row.get::<i64, _>("fixture_id") as u64);
    let status =
        row.get::<String, _>("status")
            .parse::<FixtureStatus>()
            .map_err(|source| StoreError::CorruptRow {
                entity: "fixture",
                id: fixture_id.to_string(),
                source,
            })?;
    Ok(Fixture {
        fixture_id,
        league: row.get("league"),
        home_team: row.get("home_team"),
        away_team: row.get("away_team"),
        kickoff_at: row.get("kickoff_at"),
        status,
        first_seen_at: row.get("first_seen_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn result_from_row(row: &PgRow) -> FixtureResult {
    FixtureResult {
        fixture_id: FixtureId::new(row.get::<i64, _>("fixture_id") as u64),
        home_goals: row.get::<i16, _>("home_goals") as u16,
        away_goals: row.get::<i16, _>("away_goals") as u16,
        finished_at: row.get("finished_at"),
        recorded_at: row.get("recorded_at"),
        disputed: row.get("disputed"),
    }
}

pub(crate) fn odds_from_row(row: &PgRow, fixture_id: FixtureId) -> StoreResult<FixtureOdds> {
    let cell = |col: &str| -> StoreResult<OddsX100> {
        OddsX100::new(row.get::<i32, _>(col) as u32).map_err(|source| StoreError::CorruptRow {
            entity: "odds",
            id: fixture_id.to_string(),
            source,
        })
    };
    Ok(FixtureOdds {
        home: cell("home_odds")?,
        draw: cell("draw_odds")?,
        away: cell("away_odds")?,
        over: cell("over_odds")?,
        under: cell("under_odds")?,
    })
}

pub(crate) fn slate_entry_from_row(row: &PgRow) -> StoreResult<SlateEntry> {
    let fixture_id = FixtureId::new(row.get::<i64, _>("fixture_id") as u64);
    Ok(SlateEntry {
        cycle_id: CycleId::new(row.get::<i64, _>("cycle_id") as u64),
        slot: row.get::<i16, _>("slot") as u8,
        fixture_id,
        league: row.get("league"),
        home_team: row.get("home_team"),
        away_team: row.get("away_team"),
        kickoff_at: row.get("kickoff_at"),
        odds: odds_from_row(row, fixture_id)?,
        frozen_at: row.get("frozen_at"),
    })
}

pub(crate) fn parse_cycle_state(s: &str, cycle_id: CycleId) -> StoreResult<CycleState> {
    s.parse::<CycleState>().map_err(|source| StoreError::CorruptRow {
        entity: "cycle",
        id: cycle_id.to_string(),
        source,
    })
}
