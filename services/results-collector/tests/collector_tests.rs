//! Sweep behaviour against a live Postgres with a scripted feed.
//!
//! Run with a scratch database:
//! `DATABASE_URL=postgres://localhost/tenfold_test cargo test -p results-collector -- --ignored`
//!
//! The database is shared by every ignored suite in the workspace and the
//! polling predicate is a global kickoff-window query, so each test here
//! sweeps inside a private day derived from its id base. No other test or
//! suite seeds fixtures in that day, which keeps the exact sweep counts
//! honest.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;

use fixture_store::{AuditTrail, FixtureStore, NewFixture, run_migrations};
use results_collector::{
    CollectorConfig, CollectorError, CollectorResult, FeedSnapshot, FeedStatus, ResultsCollector,
    ResultsFeed,
};
use services_common::{FixtureId, FixtureStatus, ManualClock};

/// Id tiers for the second and third test. The private day is derived from
/// the base, so the tiers keep both the row ids and the derived days apart
/// even when two tests pick their base in the same microsecond.
const CONFLICT_TIER: u64 = 1_000_000_000_000;
const OUTAGE_TIER: u64 = 2_000_000_000_000;

/// Returns each scripted response once, then empty batches.
struct ScriptedFeed {
    script: Mutex<VecDeque<CollectorResult<Vec<FeedSnapshot>>>>,
}

impl ScriptedFeed {
    fn new(responses: Vec<CollectorResult<Vec<FeedSnapshot>>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl ResultsFeed for ScriptedFeed {
    async fn fetch_updates(&self, _ids: &[FixtureId]) -> CollectorResult<Vec<FeedSnapshot>> {
        self.script.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

async fn store() -> FixtureStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for collector tests");
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

/// Sweep moment in the evening of a day derived from the test's id base.
fn private_evening(base: u64) -> DateTime<Utc> {
    let day = i64::try_from(base % 30_000).unwrap_or(0);
    Utc.with_ymd_and_hms(2130, 1, 1, 18, 0, 0).unwrap() + Duration::days(day)
}

fn fixture(id: u64, kickoff: DateTime<Utc>) -> NewFixture {
    NewFixture {
        fixture_id: FixtureId::new(id),
        league: "EPL".to_string(),
        home_team: format!("Home {id}"),
        away_team: format!("Away {id}"),
        kickoff_at: kickoff,
    }
}

fn collector(
    store: FixtureStore,
    feed: ScriptedFeed,
    clock: &ManualClock,
    budget: u32,
) -> ResultsCollector<ScriptedFeed> {
    let audit = AuditTrail::new(store.pool().clone());
    let config = CollectorConfig {
        poll_interval: StdDuration::from_secs(30),
        lookback: Duration::hours(6),
        min_age: Duration::minutes(5),
        fixture_retry_budget: budget,
        batch_size: 10,
    };
    ResultsCollector::new(store, audit, feed, Arc::new(clock.clone()), config)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn sweep_records_results_and_status_changes() {
    let store = store().await;
    let base = unique_base();
    let sweep_at = private_evening(base);
    let clock = ManualClock::starting_at(sweep_at);
    let now = clock_now(&clock);

    let finished = FixtureId::new(base);
    let live = FixtureId::new(base + 1);
    let young = FixtureId::new(base + 2);
    store
        .upsert_fixture(&fixture(base, sweep_at - Duration::hours(2)), now)
        .await
        .unwrap();
    store
        .upsert_fixture(&fixture(base + 1, sweep_at - Duration::hours(1)), now)
        .await
        .unwrap();
    // Kicked off a minute ago: below the minimum age, must not be polled.
    store
        .upsert_fixture(&fixture(base + 2, sweep_at - Duration::minutes(1)), now)
        .await
        .unwrap();

    let feed = ScriptedFeed::new(vec![Ok(vec![
        FeedSnapshot {
            fixture_id: finished,
            status: FeedStatus::Finished,
            score: Some((2, 1)),
            finished_at: Some(sweep_at - Duration::minutes(10)),
        },
        FeedSnapshot {
            fixture_id: live,
            status: FeedStatus::Live,
            score: None,
            finished_at: None,
        },
    ])]);

    let mut collector = collector(store.clone(), feed, &clock, 5);
    let summary = collector.sweep_once().await.unwrap();

    assert_eq!(summary.polled, 2);
    assert_eq!(summary.results_recorded, 1);
    assert_eq!(summary.status_updates, 1);
    assert_eq!(summary.conflicts, 0);
    assert_eq!(summary.failed, 0);

    let result = store.result(finished).await.unwrap().unwrap();
    assert_eq!((result.home_goals, result.away_goals), (2, 1));
    assert!(!result.disputed);
    let fixture = store.fixture(live).await.unwrap().unwrap();
    assert_eq!(fixture.status, FixtureStatus::Live);
    let untouched = store.fixture(young).await.unwrap().unwrap();
    assert_eq!(untouched.status, FixtureStatus::Scheduled);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn conflicting_rereport_is_flagged_without_stopping_the_sweep() {
    let store = store().await;
    let base = unique_base() + CONFLICT_TIER;
    let sweep_at = private_evening(base);
    let clock = ManualClock::starting_at(sweep_at);
    let now = clock_now(&clock);

    let id = FixtureId::new(base);
    store
        .upsert_fixture(&fixture(base, sweep_at - Duration::hours(2)), now)
        .await
        .unwrap();
    store.record_result(id, 2, 1, now, now).await.unwrap();

    // Keep the fixture pollable after finishing by putting it on a live slate
    // shape: a single-row slate is enough for the polling predicate.
    sqlx::query("INSERT INTO cycles (cycle_id, state, created_at, updated_at) VALUES ($1, 'AwaitingResults', $2, $2)")
        .bind(i64::try_from(base).unwrap())
        .bind(now)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO slate_entries (cycle_id, slot, fixture_id, league, home_team, away_team,
         kickoff_at, home_odds, draw_odds, away_odds, over_odds, under_odds, frozen_at)
         VALUES ($1, 0, $2, 'EPL', 'H', 'A', $3, 210, 330, 360, 195, 185, $3)",
    )
    .bind(i64::try_from(base).unwrap())
    .bind(id.as_i64())
    .bind(sweep_at - Duration::hours(2))
    .execute(store.pool())
    .await
    .unwrap();

    let feed = ScriptedFeed::new(vec![Ok(vec![FeedSnapshot {
        fixture_id: id,
        status: FeedStatus::Finished,
        score: Some((0, 0)),
        finished_at: None,
    }])]);

    let mut collector = collector(store.clone(), feed, &clock, 5);
    let summary = collector.sweep_once().await.unwrap();

    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.results_recorded, 0);

    // Stored score survives, flagged disputed, audit row appended.
    let result = store.result(id).await.unwrap().unwrap();
    assert_eq!((result.home_goals, result.away_goals), (2, 1));
    assert!(result.disputed);

    let audited: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM audit_log
         WHERE event_type = 'ResultConflict'
           AND (event_data->'ResultConflict'->>'fixture_id')::BIGINT = $1",
    )
    .bind(id.as_i64())
    .fetch_one(store.pool())
    .await
    .unwrap()
    .get("n");
    assert_eq!(audited, 1);

    // Retire the hand-built cycle; an active slate keeps its fixture
    // pollable without any time bound, which would leak into later sweeps.
    sqlx::query("UPDATE cycles SET state = 'Cancelled' WHERE cycle_id = $1")
        .bind(i64::try_from(base).unwrap())
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn feed_outage_exhausts_the_budget_and_alerts_once() {
    let store = store().await;
    let base = unique_base() + OUTAGE_TIER;
    let sweep_at = private_evening(base);
    let clock = ManualClock::starting_at(sweep_at);
    let now = clock_now(&clock);

    let id = FixtureId::new(base);
    store
        .upsert_fixture(&fixture(base, sweep_at - Duration::hours(1)), now)
        .await
        .unwrap();

    let feed = ScriptedFeed::new(vec![
        Err(CollectorError::FeedStatus { status: 500 }),
        Err(CollectorError::FeedStatus { status: 500 }),
    ]);
    let mut collector = collector(store.clone(), feed, &clock, 2);

    let first = collector.sweep_once().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.exhausted, 0);

    let second = collector.sweep_once().await.unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(second.exhausted, 1);

    let alerts: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM audit_log
         WHERE event_type = 'RetryExhausted'
           AND event_data->'RetryExhausted'->>'operation' = $1",
    )
    .bind(format!("results-feed {id}"))
    .fetch_one(store.pool())
    .await
    .unwrap()
    .get("n");
    assert_eq!(alerts, 1);
}

fn clock_now(clock: &ManualClock) -> DateTime<Utc> {
    use services_common::Clock as _;
    clock.now()
}
