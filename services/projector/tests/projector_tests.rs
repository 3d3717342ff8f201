//! Integration tests against a live Postgres.
//!
//! Cycle-id order couples the tests through the shared stats gate, so run
//! them serially on a scratch database:
//! `DATABASE_URL=postgres://localhost/tenfold_test \
//!  cargo test -p projector -- --ignored --test-threads=1`

use chrono::{Duration, TimeZone, Utc};
use fixture_store::{
    FixtureStore, MarketQuote, NewFixture, NewSlip, StatsApply, run_migrations,
};
use projector::Projector;
use rust_decimal::Decimal;
use services_common::{CycleId, FixtureId, OddsX100, PlayerAddress, Prediction, SlipId};
use sqlx::postgres::PgPoolOptions;

async fn store() -> FixtureStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for projector tests");
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

/// Run-unique player so stats assertions see only this test's cycles.
fn player(base: u64, tag: u8) -> PlayerAddress {
    let mut bytes = [tag; 20];
    bytes[12..].copy_from_slice(&base.to_be_bytes());
    PlayerAddress(bytes)
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

/// Create a cycle, freeze a ten-fixture slate priced 2.10/3.30/3.60 and
/// 1.95/1.85, and walk it to Resolved with every fixture Home and Over.
async fn resolved_cycle(store: &FixtureStore, cycle_id: u64, fixture_base: u64) -> CycleId {
    let cycle = CycleId::new(cycle_id);
    let now = Utc::now();
    store.create_cycle(cycle, now).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..10u64 {
        let f = fixture(fixture_base + i, i as i64 + 1);
        store.upsert_fixture(&f, now).await.unwrap();
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
        store
            .record_odds(
                f.fixture_id,
                MarketQuote::Totals {
                    over: odds(195),
                    under: odds(185),
                },
                now,
            )
            .await
            .unwrap();
        ids.push(f.fixture_id);
    }
    store
        .freeze_slate(cycle, &ids, Duration::minutes(15), Duration::hours(6), now)
        .await
        .unwrap();

    store.mark_cycle_open(cycle, "0xstart", now).await.unwrap();
    store.mark_cycle_closed(cycle, now).await.unwrap();
    store.mark_cycle_awaiting(cycle, now).await.unwrap();
    store
        .mark_cycle_resolving(cycle, now)
        .await
        .unwrap();
    store
        .mark_cycle_resolved(cycle, "0xresolve", &[1; 10], &[1; 10], now)
        .await
        .unwrap();
    cycle
}

async fn place_slip(
    store: &FixtureStore,
    slip_id: u64,
    cycle: CycleId,
    who: PlayerAddress,
    predictions: Vec<Prediction>,
) {
    let now = Utc::now();
    let new = NewSlip {
        slip_id: SlipId::new(slip_id),
        cycle_id: cycle,
        player: who,
        predictions,
        placed_at: now,
        block_number: 100,
        tx_hash: format!("0x{slip_id:064x}"),
        log_index: 0,
    };
    assert!(store.insert_slip(&new, now).await.unwrap());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn evaluation_scores_ranks_and_is_idempotent() {
    let store = store().await;
    let base = unique_base();
    let cycle = resolved_cycle(&store, base, base + 100).await;
    let winner = player(base, 0x21);
    let loser = player(base, 0x22);

    // Every fixture resolved Home/Over: all-Home hits ten at 2.10 each,
    // all-Under hits nothing.
    place_slip(&store, base + 10, cycle, winner, vec![Prediction::Home; 10]).await;
    place_slip(&store, base + 11, cycle, loser, vec![Prediction::Under; 10]).await;

    let projector = Projector::new(store.clone());
    let summary = projector.evaluate_cycle(cycle, Utc::now()).await.unwrap();
    assert_eq!(summary.slips, 2);
    assert_eq!(summary.qualified, 1);
    assert_eq!(summary.winner, Some(SlipId::new(base + 10)));

    // 2.10^10 = 1667.9880978201, which is 166799 minor units.
    let board = store.leaderboard(cycle, 10).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[0].slip_id, SlipId::new(base + 10));
    assert_eq!(board[0].correct_count, 10);
    assert_eq!(board[0].score, Decimal::from(166_799));
    assert_eq!(board[1].rank, 2);
    assert_eq!(board[1].score, Decimal::ZERO);

    let scored = store.slip(SlipId::new(base + 11)).await.unwrap().unwrap();
    assert!(scored.evaluated);
    assert_eq!(scored.correct_count, Some(0));
    assert_eq!(scored.qualified, Some(false));

    // A second evaluation overwrites with identical rows.
    projector.evaluate_cycle(cycle, Utc::now()).await.unwrap();
    assert_eq!(store.leaderboard(cycle, 10).await.unwrap(), board);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn stats_apply_in_cycle_id_order_and_track_streaks() {
    let store = store().await;
    let base = unique_base();
    let who = player(base, 0x31);

    // Two adjacent cycle ids so no foreign cycle can land between them.
    let first = resolved_cycle(&store, base, base + 100).await;
    let second = resolved_cycle(&store, base + 1, base + 200).await;
    place_slip(&store, base + 10, first, who, vec![Prediction::Home; 10]).await;
    place_slip(&store, base + 20, second, who, vec![Prediction::Home; 10]).await;

    let projector = Projector::new(store.clone());
    let now = Utc::now();
    projector.evaluate_cycle(first, now).await.unwrap();
    projector.evaluate_cycle(second, now).await.unwrap();
    store.mark_cycle_evaluated(first, now).await.unwrap();
    store.mark_cycle_evaluated(second, now).await.unwrap();

    // The later cycle must wait for the earlier one.
    let held = projector.settle_user_stats(second, now).await.unwrap();
    assert_eq!(held, StatsApply::Deferred);

    projector.apply_pending_stats(now).await.unwrap();
    assert!(store.cycle(first).await.unwrap().unwrap().stats_applied);
    assert!(store.cycle(second).await.unwrap().unwrap().stats_applied);

    let stats = store.user_stats(who).await.unwrap().unwrap();
    assert_eq!(stats.cycles_entered, 2);
    assert_eq!(stats.slips_placed, 2);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.lifetime_score, Decimal::from(2 * 166_799));
    assert_eq!(stats.current_streak, 2);
    assert_eq!(stats.longest_streak, 2);
    assert_eq!(stats.last_qualified_cycle, Some(second));

    // Replays are no-ops.
    let repeat = projector.settle_user_stats(second, now).await.unwrap();
    assert_eq!(repeat, StatsApply::AlreadyApplied);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn rebuild_reproduces_the_incremental_rows() {
    let store = store().await;
    let base = unique_base();
    let cycle = resolved_cycle(&store, base, base + 100).await;
    let alpha = player(base, 0x41);
    let beta = player(base, 0x42);
    place_slip(&store, base + 10, cycle, alpha, vec![Prediction::Home; 10]).await;
    place_slip(&store, base + 11, cycle, beta, vec![Prediction::Over; 10]).await;

    let projector = Projector::new(store.clone());
    let now = Utc::now();
    projector.evaluate_cycle(cycle, now).await.unwrap();
    store.mark_cycle_evaluated(cycle, now).await.unwrap();
    projector.apply_pending_stats(now).await.unwrap();

    let board_before = store.leaderboard(cycle, 10).await.unwrap();
    let alpha_before = store.user_stats(alpha).await.unwrap().unwrap();

    let summary = projector.rebuild(Utc::now()).await.unwrap();
    assert!(summary.cycles >= 1);

    assert_eq!(store.leaderboard(cycle, 10).await.unwrap(), board_before);
    let alpha_after = store.user_stats(alpha).await.unwrap().unwrap();
    assert_eq!(alpha_after.cycles_entered, alpha_before.cycles_entered);
    assert_eq!(alpha_after.wins, alpha_before.wins);
    assert_eq!(alpha_after.lifetime_score, alpha_before.lifetime_score);
    let beta_after = store.user_stats(beta).await.unwrap().unwrap();
    assert_eq!(beta_after.wins, 0);
    assert_eq!(beta_after.cycles_entered, 1);
}
