//! Slip projection rows, event cursors and prize claims
//!
//! Slips are owned by the chain; these rows are a projection keyed for
//! exactly-once ingestion. The (tx hash, log index) unique constraint is the
//! idempotency key, so replaying a block range can never double-insert.

use chrono::{DateTime, Utc};
use services_common::constants::SLATE_SIZE;
use services_common::{CommonError, CycleId, PlayerAddress, Prediction, SlipId};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

use crate::entities::{NewPrizeClaim, NewSlip, PrizeClaim, Slip};
use crate::error::{StoreError, StoreResult};
use crate::store::FixtureStore;

impl FixtureStore {
    /// Insert a slip from a `SlipPlaced` event. Returns `false` when the
    /// event was already indexed.
    pub async fn insert_slip(&self, new: &NewSlip, now: DateTime<Utc>) -> StoreResult<bool> {
        if new.predictions.len() != SLATE_SIZE {
            return Err(StoreError::CorruptRow {
                entity: "slip",
                id: new.slip_id.to_string(),
                source: CommonError::BadPredictionCount {
                    count: new.predictions.len(),
                },
            });
        }
        let markets: Vec<i16> = new.predictions.iter().map(|p| i16::from(p.wire().0)).collect();
        let outcomes: Vec<i16> = new.predictions.iter().map(|p| i16::from(p.wire().1)).collect();

        let result = sqlx::query(
            r"
            INSERT INTO slips (
                slip_id, cycle_id, player, markets, outcomes, placed_at,
                block_number, tx_hash, log_index, inserted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(new.slip_id.as_i64())
        .bind(new.cycle_id.as_i64())
        .bind(new.player.to_string())
        .bind(&markets)
        .bind(&outcomes)
        .bind(new.placed_at)
        .bind(new.block_number as i64)
        .bind(&new.tx_hash)
        .bind(i32::try_from(new.log_index).unwrap_or(i32::MAX))
        .bind(now)
        .execute(self.pool())
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(slip_id = %new.slip_id, cycle_id = %new.cycle_id, "slip indexed");
        }
        Ok(inserted)
    }

    /// Load one slip.
    pub async fn slip(&self, slip_id: SlipId) -> StoreResult<Option<Slip>> {
        let row = sqlx::query(&format!("{SLIP_COLUMNS} FROM slips WHERE slip_id = $1"))
            .bind(slip_id.as_i64())
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| slip_from_row(&r)).transpose()
    }

    /// Every slip of a cycle in placement order (placed-at, then slip id),
    /// which is also the scoring tie-break order.
    pub async fn slips_for_cycle(&self, cycle_id: CycleId) -> StoreResult<Vec<Slip>> {
        let rows = sqlx::query(&format!(
            "{SLIP_COLUMNS} FROM slips WHERE cycle_id = $1 ORDER BY placed_at, slip_id"
        ))
        .bind(cycle_id.as_i64())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(slip_from_row).collect()
    }

    /// Number of slips indexed for a cycle.
    pub async fn slip_count(&self, cycle_id: CycleId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM slips WHERE cycle_id = $1")
            .bind(cycle_id.as_i64())
            .fetch_one(self.pool())
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Last durably processed block for a named event stream.
    pub async fn cursor(&self, name: &str) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT last_block FROM event_cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("last_block") as u64))
    }

    /// Advance a cursor. Never moves backwards, so a racing late writer
    /// cannot rewind replay progress.
    pub async fn advance_cursor(
        &self,
        name: &str,
        last_block: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO event_cursors (name, last_block, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                last_block = GREATEST(event_cursors.last_block, EXCLUDED.last_block),
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(name)
        .bind(last_block as i64)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Insert a prize claim from a `PrizeClaimed` event. Returns `false`
    /// when the event was already indexed.
    pub async fn insert_claim(&self, new: &NewPrizeClaim) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO prize_claims (
                tx_hash, log_index, cycle_id, slip_id, player, amount_wei,
                block_number, claimed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(&new.tx_hash)
        .bind(i32::try_from(new.log_index).unwrap_or(i32::MAX))
        .bind(new.cycle_id.as_i64())
        .bind(new.slip_id.as_i64())
        .bind(new.player.to_string())
        .bind(&new.amount_wei)
        .bind(new.block_number as i64)
        .bind(new.claimed_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Claims recorded against a cycle, claim order.
    pub async fn claims_for_cycle(&self, cycle_id: CycleId) -> StoreResult<Vec<PrizeClaim>> {
        let rows = sqlx::query(
            r"
            SELECT tx_hash, log_index, cycle_id, slip_id, player, amount_wei,
                   block_number, claimed_at
            FROM prize_claims
            WHERE cycle_id = $1
            ORDER BY block_number, log_index
            ",
        )
        .bind(cycle_id.as_i64())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(claim_from_row).collect()
    }
}

const SLIP_COLUMNS: &str = "SELECT slip_id, cycle_id, player, markets, outcomes, placed_at, \
     block_number, tx_hash, log_index, evaluated, correct_count, qualified, score, rank";

pub(crate) fn slip_from_row(row: &PgRow) -> StoreResult<Slip> {
    let slip_id = SlipId::new(row.get::<i64, _>("slip_id") as u64);
    let corrupt = |source: CommonError| StoreError::CorruptRow {
        entity: "slip",
        id: slip_id.to_string(),
        source,
    };

    let markets: Vec<i16> = row.get("markets");
    let outcomes: Vec<i16> = row.get("outcomes");
    if markets.len() != SLATE_SIZE || outcomes.len() != SLATE_SIZE {
        return Err(corrupt(CommonError::BadPredictionCount {
            count: markets.len().min(outcomes.len()),
        }));
    }
    let predictions = markets
        .iter()
        .zip(&outcomes)
        .map(|(m, o)| Prediction::from_wire(*m as u8, *o as u8))
        .collect::<Result<Vec<_>, _>>()
        .map_err(corrupt)?;

    let player = row
        .get::<String, _>("player")
        .parse::<PlayerAddress>()
        .map_err(|source| StoreError::CorruptRow {
            entity: "slip",
            id: slip_id.to_string(),
            source,
        })?;

    Ok(Slip {
        slip_id,
        cycle_id: CycleId::new(row.get::<i64, _>("cycle_id") as u64),
        player,
        predictions,
        placed_at: row.get("placed_at"),
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i32, _>("log_index") as u32,
        evaluated: row.get("evaluated"),
        correct_count: row.get::<Option<i16>, _>("correct_count").map(|c| c as u8),
        qualified: row.get("qualified"),
        score: row.get("score"),
        rank: row.get::<Option<i32>, _>("rank").map(|r| r as u32),
    })
}

fn claim_from_row(row: &PgRow) -> StoreResult<PrizeClaim> {
    let slip_id = SlipId::new(row.get::<i64, _>("slip_id") as u64);
    let player = row
        .get::<String, _>("player")
        .parse::<PlayerAddress>()
        .map_err(|source| StoreError::CorruptRow {
            entity: "prize claim",
            id: slip_id.to_string(),
            source,
        })?;
    Ok(PrizeClaim {
        cycle_id: CycleId::new(row.get::<i64, _>("cycle_id") as u64),
        slip_id,
        player,
        amount_wei: row.get("amount_wei"),
        block_number: row.get::<i64, _>("block_number") as u64,
        claimed_at: row.get("claimed_at"),
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i32, _>("log_index") as u32,
    })
}
