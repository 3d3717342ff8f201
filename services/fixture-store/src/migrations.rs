//! Schema creation and version gating
//!
//! Startup refuses to run against an unmigrated or differently-versioned
//! store. `run_migrations` is only reachable through the operator CLI.

use sqlx::{PgPool, Row};
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables and stamp the schema version.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    info!("running database migrations");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS fixtures (
            fixture_id BIGINT PRIMARY KEY,
            league TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            kickoff_at TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL DEFAULT 'Scheduled',
            first_seen_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fixtures_kickoff ON fixtures (kickoff_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fixtures_status ON fixtures (status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS odds_snapshots (
            id BIGSERIAL PRIMARY KEY,
            fixture_id BIGINT NOT NULL REFERENCES fixtures(fixture_id),
            market TEXT NOT NULL,
            captured_at TIMESTAMPTZ NOT NULL,
            home_odds INTEGER,
            draw_odds INTEGER,
            away_odds INTEGER,
            over_odds INTEGER,
            under_odds INTEGER
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_odds_current \
         ON odds_snapshots (fixture_id, market, captured_at DESC, id DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS fixture_results (
            fixture_id BIGINT PRIMARY KEY REFERENCES fixtures(fixture_id),
            home_goals SMALLINT NOT NULL CHECK (home_goals >= 0),
            away_goals SMALLINT NOT NULL CHECK (away_goals >= 0),
            finished_at TIMESTAMPTZ NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL,
            disputed BOOLEAN NOT NULL DEFAULT FALSE
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS cycles (
            cycle_id BIGINT PRIMARY KEY,
            state TEXT NOT NULL DEFAULT 'Pending',
            opened_at TIMESTAMPTZ,
            closes_at TIMESTAMPTZ,
            resolve_deadline TIMESTAMPTZ,
            start_tx_hash TEXT,
            resolve_tx_hash TEXT,
            cancel_reason TEXT,
            result_moneyline SMALLINT[],
            result_totals SMALLINT[],
            stats_applied BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cycles_state ON cycles (state)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS slate_entries (
            cycle_id BIGINT NOT NULL REFERENCES cycles(cycle_id),
            slot SMALLINT NOT NULL CHECK (slot BETWEEN 0 AND 9),
            fixture_id BIGINT NOT NULL REFERENCES fixtures(fixture_id),
            league TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            kickoff_at TIMESTAMPTZ NOT NULL,
            home_odds INTEGER NOT NULL,
            draw_odds INTEGER NOT NULL,
            away_odds INTEGER NOT NULL,
            over_odds INTEGER NOT NULL,
            under_odds INTEGER NOT NULL,
            frozen_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (cycle_id, slot),
            UNIQUE (cycle_id, fixture_id)
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS cycle_transitions (
            id BIGSERIAL PRIMARY KEY,
            cycle_id BIGINT NOT NULL REFERENCES cycles(cycle_id),
            from_state TEXT NOT NULL,
            to_state TEXT NOT NULL,
            trigger_event TEXT NOT NULL,
            tx_hash TEXT,
            occurred_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transitions_cycle ON cycle_transitions (cycle_id, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS slips (
            slip_id BIGINT PRIMARY KEY,
            cycle_id BIGINT NOT NULL REFERENCES cycles(cycle_id),
            player TEXT NOT NULL,
            markets SMALLINT[] NOT NULL,
            outcomes SMALLINT[] NOT NULL,
            placed_at TIMESTAMPTZ NOT NULL,
            block_number BIGINT NOT NULL,
            tx_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL,
            evaluated BOOLEAN NOT NULL DEFAULT FALSE,
            correct_count SMALLINT,
            qualified BOOLEAN,
            score NUMERIC(32, 0),
            rank INTEGER,
            UNIQUE (tx_hash, log_index)
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_slips_cycle ON slips (cycle_id, placed_at, slip_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_slips_player ON slips (player)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS leaderboard_entries (
            cycle_id BIGINT NOT NULL REFERENCES cycles(cycle_id),
            rank INTEGER NOT NULL,
            slip_id BIGINT NOT NULL REFERENCES slips(slip_id),
            player TEXT NOT NULL,
            correct_count SMALLINT NOT NULL,
            score NUMERIC(32, 0) NOT NULL,
            placed_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (cycle_id, rank),
            UNIQUE (cycle_id, slip_id)
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_leaderboard_player ON leaderboard_entries (player)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS user_stats (
            player TEXT PRIMARY KEY,
            cycles_entered BIGINT NOT NULL DEFAULT 0,
            slips_placed BIGINT NOT NULL DEFAULT 0,
            wins BIGINT NOT NULL DEFAULT 0,
            lifetime_score NUMERIC(38, 0) NOT NULL DEFAULT 0,
            current_streak INTEGER NOT NULL DEFAULT 0,
            longest_streak INTEGER NOT NULL DEFAULT 0,
            last_qualified_cycle BIGINT,
            last_entered_cycle BIGINT,
            updated_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS prize_claims (
            tx_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            cycle_id BIGINT NOT NULL,
            slip_id BIGINT NOT NULL,
            player TEXT NOT NULL,
            amount_wei TEXT NOT NULL,
            block_number BIGINT NOT NULL,
            claimed_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (tx_hash, log_index)
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_claims_cycle ON prize_claims (cycle_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS event_cursors (
            name TEXT PRIMARY KEY,
            last_block BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS audit_log (
            id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            cycle_id BIGINT,
            event_data JSONB NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_cycle ON audit_log (cycle_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_type ON audit_log (event_type)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_meta (
            singleton BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
            version INTEGER NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r"
        INSERT INTO schema_meta (singleton, version) VALUES (TRUE, $1)
        ON CONFLICT (singleton) DO UPDATE SET version = EXCLUDED.version
        ",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    info!(version = SCHEMA_VERSION, "database migrations completed");
    Ok(())
}

/// Check the stamped schema version against this build.
///
/// A missing `schema_meta` table means the store was never migrated.
pub async fn verify_schema(pool: &PgPool) -> StoreResult<()> {
    let exists = sqlx::query(
        "SELECT 1 FROM information_schema.tables \
         WHERE table_name = 'schema_meta' AND table_schema = current_schema()",
    )
    .fetch_optional(pool)
    .await?
    .is_some();
    if !exists {
        return Err(StoreError::SchemaMissing);
    }

    let row = sqlx::query("SELECT version FROM schema_meta")
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::SchemaMissing)?;
    let found: i32 = row.get("version");
    if found != SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }
    Ok(())
}
