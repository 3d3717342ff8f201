//! Selection end-to-end against a live Postgres.
//!
//! Run with a scratch database:
//! `DATABASE_URL=postgres://localhost/tenfold_test cargo test -p match-selector -- --ignored`
//!
//! The database is shared by every ignored suite in the workspace. The
//! full-slate test tolerates foreign candidate rows; the thin-pool test
//! asserts an exact pool size, so it selects inside a private day no other
//! seeder can reach.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;

use fixture_store::{AuditTrail, FixtureStore, MarketQuote, NewFixture, run_migrations};
use match_selector::{MatchSelector, SelectorConfig, SelectorError};
use services_common::{CycleId, CycleState, FixtureId, OddsX100};

/// Id tier for the thin-pool test, so its rows never collide with the
/// full-slate test's even when both pick their base in the same microsecond.
const THIN_POOL_TIER: u64 = 1_000_000_000_000;

async fn store() -> FixtureStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for selector tests");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to test database");
    run_migrations(&pool).await.expect("migrate test database");
    FixtureStore::new(pool)
}

fn unique_base() -> u64 {
    Utc::now().timestamp_micros() as u64
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

/// Selection moment on a day derived from the run's id base. Candidate
/// eligibility is a kickoff window around the selection moment, so a private
/// day keeps every other test's fixtures out of the pool.
fn private_day(base: u64) -> DateTime<Utc> {
    let day = i64::try_from(base % 30_000).unwrap_or(0);
    Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap() + Duration::days(day)
}

fn selector(store: &FixtureStore) -> MatchSelector {
    let audit = AuditTrail::new(store.pool().clone());
    MatchSelector::new(store.clone(), audit, SelectorConfig::default())
}

async fn seed_priced_fixture(store: &FixtureStore, id: u64, league: &str, kickoff: DateTime<Utc>) {
    let now = kickoff - Duration::hours(24);
    store
        .upsert_fixture(
            &NewFixture {
                fixture_id: FixtureId::new(id),
                league: league.to_string(),
                home_team: format!("Home {id}"),
                away_team: format!("Away {id}"),
                kickoff_at: kickoff,
            },
            now,
        )
        .await
        .unwrap();
    store
        .record_odds(
            FixtureId::new(id),
            MarketQuote::Moneyline {
                home: OddsX100::new(250).unwrap(),
                draw: OddsX100::new(320).unwrap(),
                away: OddsX100::new(280).unwrap(),
            },
            now,
        )
        .await
        .unwrap();
    store
        .record_odds(
            FixtureId::new(id),
            MarketQuote::Totals {
                over: OddsX100::new(195).unwrap(),
                under: OddsX100::new(185).unwrap(),
            },
            now,
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn builds_and_freezes_a_full_slate() {
    let store = store().await;
    let base = unique_base();
    let cycle = CycleId::new(base);

    // Twelve viable candidates spread over the day and three leagues, plus
    // one outside the window and one inside the grace period; neither of
    // those may be picked.
    let leagues = ["EPL", "SERIEA", "LIGA1"];
    for i in 0..12u64 {
        let league = leagues[usize::try_from(i).unwrap() % leagues.len()];
        let kickoff = t0() + Duration::hours(2 + i64::try_from(i).unwrap());
        seed_priced_fixture(&store, base + i, league, kickoff).await;
    }
    seed_priced_fixture(&store, base + 90, "EPL", t0() + Duration::hours(30)).await;
    seed_priced_fixture(&store, base + 91, "EPL", t0()).await;

    let entries = selector(&store).build_slate(cycle, t0()).await.unwrap();

    assert_eq!(entries.len(), 10);
    for pair in entries.windows(2) {
        assert!(pair[0].kickoff_at <= pair[1].kickoff_at);
    }
    let picked: Vec<u64> = entries.iter().map(|e| e.fixture_id.as_u64()).collect();
    assert!(!picked.contains(&(base + 90)), "outside the window");
    assert!(!picked.contains(&(base + 91)), "inside the grace period");

    let stored = store.cycle(cycle).await.unwrap().unwrap();
    assert_eq!(stored.state, CycleState::Pending);
    assert!(stored.closes_at.is_some());
    assert!(stored.resolve_deadline.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn thin_pool_leaves_the_cycle_pending_for_the_next_day() {
    let store = store().await;
    let base = unique_base() + THIN_POOL_TIER;
    let day = private_day(base);
    let cycle = CycleId::new(base);

    let leagues = ["EPL", "SERIEA", "LIGA1"];
    for i in 0..9u64 {
        let league = leagues[usize::try_from(i).unwrap() % leagues.len()];
        let kickoff = day + Duration::hours(2 + i64::try_from(i).unwrap());
        seed_priced_fixture(&store, base + i, league, kickoff).await;
    }

    let err = selector(&store).build_slate(cycle, day).await.unwrap_err();
    assert!(matches!(
        err,
        SelectorError::InsufficientFixtures {
            eligible: 9,
            required: 10
        }
    ));

    // The contract never saw this id, so it must stay claimable: the row
    // sits in Pending with no slate rather than burning a Cancelled id the
    // chain would re-assign tomorrow.
    let stored = store.cycle(cycle).await.unwrap().unwrap();
    assert_eq!(stored.state, CycleState::Pending);
    assert_eq!(stored.cancel_reason, None);
    assert!(store.slate(cycle).await.unwrap().is_empty());

    // Next day the pool has filled out; the same id selects cleanly.
    seed_priced_fixture(&store, base + 9, "EPL", day + Duration::hours(11)).await;
    let entries = selector(&store).build_slate(cycle, day).await.unwrap();
    assert_eq!(entries.len(), 10);

    let reused = store.cycle(cycle).await.unwrap().unwrap();
    assert_eq!(reused.state, CycleState::Pending);
    assert!(reused.closes_at.is_some());
}
