//! Integration tests against a live Postgres.
//!
//! Run with a scratch database:
//! `DATABASE_URL=postgres://localhost/tenfold_test cargo test -p fixture-store -- --ignored`

use chrono::{Duration, TimeZone, Utc};
use fixture_store::{
    FixtureStore, MarketQuote, NewFixture, NewSlip, ResultWrite, StoreError, TransitionOutcome,
    run_migrations,
};
use services_common::{CycleId, CycleState, FixtureId, OddsX100, Prediction, SlipId};
use sqlx::postgres::PgPoolOptions;

async fn store() -> FixtureStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for store tests");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to test database");
    run_migrations(&pool).await.expect("migrate test database");
    FixtureStore::new(pool)
}

/// Distinct id space per test run so reruns never collide.
fn unique_base() -> u64 {
    Utc::now().timestamp_micros() as u64
}

fn odds(raw: u32) -> OddsX100 {
    OddsX100::new(raw).unwrap()
}

fn fixture(id: u64, kickoff_offset_hours: i64) -> NewFixture {
    NewFixture {
        fixture_id: FixtureId::new(id),
        league: "EPL".to_string(),
        home_team: format!("Home {id}"),
        away_team: format!("Away {id}"),
        kickoff_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
            + Duration::hours(kickoff_offset_hours),
    }
}

async fn price_both_markets(store: &FixtureStore, id: FixtureId) {
    let now = Utc::now();
    store
        .record_odds(
            id,
            MarketQuote::Moneyline {
                home: odds(210),
                draw: odds(330),
                away: odds(360),
            },
            now,
        )
        .await
        .unwrap();
    store
        .record_odds(
            id,
            MarketQuote::Totals {
                over: odds(195),
                under: odds(185),
            },
            now,
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn upsert_fixture_is_idempotent_but_kickoff_is_frozen() {
    let store = store().await;
    let base = unique_base();
    let new = fixture(base, 0);
    let now = Utc::now();

    store.upsert_fixture(&new, now).await.unwrap();
    store.upsert_fixture(&new, now).await.unwrap();

    let mut moved = new.clone();
    moved.kickoff_at = moved.kickoff_at + Duration::hours(1);
    let err = store.upsert_fixture(&moved, now).await.unwrap_err();
    assert!(matches!(err, StoreError::ImmutableKickoff { .. }));

    // Team renames still land.
    let mut renamed = new.clone();
    renamed.home_team = "Renamed FC".to_string();
    store.upsert_fixture(&renamed, now).await.unwrap();
    let stored = store.fixture(new.fixture_id).await.unwrap().unwrap();
    assert_eq!(stored.home_team, "Renamed FC");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn record_result_is_write_once_and_flags_conflicts() {
    let store = store().await;
    let base = unique_base();
    let id = FixtureId::new(base);
    let now = Utc::now();
    store.upsert_fixture(&fixture(base, 0), now).await.unwrap();

    let first = store.record_result(id, 2, 1, now, now).await.unwrap();
    assert_eq!(first, ResultWrite::Recorded);

    let repeat = store.record_result(id, 2, 1, now, now).await.unwrap();
    assert_eq!(repeat, ResultWrite::Unchanged);

    let err = store.record_result(id, 1, 2, now, now).await.unwrap_err();
    assert!(matches!(err, StoreError::ResultConflict { .. }));

    // Original result kept, now disputed.
    let stored = store.result(id).await.unwrap().unwrap();
    assert_eq!((stored.home_goals, stored.away_goals), (2, 1));
    assert!(stored.disputed);

    assert!(store.clear_dispute(id).await.unwrap());
    assert!(!store.result(id).await.unwrap().unwrap().disputed);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn freeze_slate_orders_by_kickoff_and_is_single_shot() {
    let store = store().await;
    let base = unique_base();
    let cycle = CycleId::new(base);
    let now = Utc::now();
    store.create_cycle(cycle, now).await.unwrap();

    // Insert in reverse kickoff order; the slate must come out sorted.
    let mut ids = Vec::new();
    for i in 0..10u64 {
        let f = fixture(base + i, 10 - i as i64);
        store.upsert_fixture(&f, now).await.unwrap();
        price_both_markets(&store, f.fixture_id).await;
        ids.push(f.fixture_id);
    }

    let entries = store
        .freeze_slate(cycle, &ids, Duration::minutes(15), Duration::hours(6), now)
        .await
        .unwrap();
    assert_eq!(entries.len(), 10);
    for pair in entries.windows(2) {
        assert!(pair[0].kickoff_at <= pair[1].kickoff_at);
    }
    assert_eq!(entries[0].slot, 0);
    assert_eq!(entries[9].slot, 9);

    // Close time derives from the earliest kickoff.
    let stored = store.cycle(cycle).await.unwrap().unwrap();
    assert_eq!(
        stored.closes_at.unwrap(),
        entries[0].kickoff_at - Duration::minutes(15)
    );

    // Second freeze fails even with identical input.
    let err = store
        .freeze_slate(cycle, &ids, Duration::minutes(15), Duration::hours(6), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlateAlreadyFrozen { .. }));

    // Odds recorded later never propagate into the frozen slate.
    store
        .record_odds(
            ids[0],
            MarketQuote::Moneyline {
                home: odds(500),
                draw: odds(500),
                away: odds(500),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    let reread = store.slate(cycle).await.unwrap();
    assert_eq!(reread, entries);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn freeze_slate_requires_both_markets_priced() {
    let store = store().await;
    let base = unique_base();
    let cycle = CycleId::new(base);
    let now = Utc::now();
    store.create_cycle(cycle, now).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..10u64 {
        let f = fixture(base + i, i as i64 + 1);
        store.upsert_fixture(&f, now).await.unwrap();
        if i != 4 {
            price_both_markets(&store, f.fixture_id).await;
        } else {
            // Fixture 4 only has the moneyline priced.
            store
                .record_odds(
                    f.fixture_id,
                    MarketQuote::Moneyline {
                        home: odds(210),
                        draw: odds(330),
                        away: odds(360),
                    },
                    now,
                )
                .await
                .unwrap();
        }
        ids.push(f.fixture_id);
    }

    let err = store
        .freeze_slate(cycle, &ids, Duration::minutes(15), Duration::hours(6), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingOdds { .. }));
    assert!(store.slate(cycle).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn transitions_are_cas_guarded_and_idempotent() {
    let store = store().await;
    let cycle = CycleId::new(unique_base());
    let now = Utc::now();
    store.create_cycle(cycle, now).await.unwrap();

    // Skipping a state is rejected.
    let err = store.mark_cycle_closed(cycle, now).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let applied = store.mark_cycle_open(cycle, "0xabc", now).await.unwrap();
    assert_eq!(applied, TransitionOutcome::Applied);

    // Retrying the same transition is a safe no-op.
    let repeat = store.mark_cycle_open(cycle, "0xabc", now).await.unwrap();
    assert_eq!(repeat, TransitionOutcome::AlreadyApplied);

    store.mark_cycle_closed(cycle, now).await.unwrap();
    store.mark_cycle_awaiting(cycle, now).await.unwrap();

    // Cancellation is blocked once a resolve is in flight.
    store.mark_cycle_resolving(cycle, now).await.unwrap();
    let err = store.cancel_cycle(cycle, "operator", now).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store
        .mark_cycle_resolved(cycle, "0xdef", &[1; 10], &[2; 10], now)
        .await
        .unwrap();
    store.mark_cycle_evaluated(cycle, now).await.unwrap();

    // The transition log replays the full path in order.
    let log = store.transitions(cycle).await.unwrap();
    let path: Vec<(CycleState, CycleState)> =
        log.iter().map(|t| (t.from_state, t.to_state)).collect();
    assert_eq!(
        path,
        vec![
            (CycleState::Pending, CycleState::Open),
            (CycleState::Open, CycleState::Closed),
            (CycleState::Closed, CycleState::AwaitingResults),
            (CycleState::AwaitingResults, CycleState::Resolving),
            (CycleState::Resolving, CycleState::Resolved),
            (CycleState::Resolved, CycleState::Evaluated),
        ]
    );

    let stored = store.cycle(cycle).await.unwrap().unwrap();
    assert_eq!(stored.state, CycleState::Evaluated);
    assert_eq!(stored.result_moneyline.unwrap(), vec![1i16; 10]);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn slip_insert_is_idempotent_by_event_key() {
    let store = store().await;
    let base = unique_base();
    let cycle = CycleId::new(base);
    let now = Utc::now();
    store.create_cycle(cycle, now).await.unwrap();

    let new = NewSlip {
        slip_id: SlipId::new(base),
        cycle_id: cycle,
        player: "0x00000000000000000000000000000000000000aa".parse().unwrap(),
        predictions: vec![
            Prediction::Home,
            Prediction::Draw,
            Prediction::Over,
            Prediction::Away,
            Prediction::Under,
            Prediction::Home,
            Prediction::Over,
            Prediction::Draw,
            Prediction::Away,
            Prediction::Over,
        ],
        placed_at: now,
        block_number: 100,
        tx_hash: format!("0x{base:064x}"),
        log_index: 0,
    };

    assert!(store.insert_slip(&new, now).await.unwrap());
    assert!(!store.insert_slip(&new, now).await.unwrap());

    let stored = store.slip(new.slip_id).await.unwrap().unwrap();
    assert_eq!(stored.predictions, new.predictions);
    assert_eq!(stored.player, new.player);
    assert!(!stored.evaluated);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cursors_never_move_backwards() {
    let store = store().await;
    let name = format!("test_stream_{}", unique_base());
    let now = Utc::now();

    assert_eq!(store.cursor(&name).await.unwrap(), None);
    store.advance_cursor(&name, 100, now).await.unwrap();
    store.advance_cursor(&name, 90, now).await.unwrap();
    assert_eq!(store.cursor(&name).await.unwrap(), Some(100));
    store.advance_cursor(&name, 150, now).await.unwrap();
    assert_eq!(store.cursor(&name).await.unwrap(), Some(150));
}
