//! Pure slate selection over a priced candidate pool.
//!
//! Ranking is a weighted sum of three components, each in `[0, 1]`:
//! league priority (where the fixture's league sits in the configured
//! ranking), kickoff spread (distance to the nearest already-picked kickoff,
//! so the slate covers the day instead of one afternoon block), and odds
//! interest (tight books beat foregone conclusions). Picking is greedy under
//! a per-league cap; every comparison falls back to kickoff then fixture id,
//! so the outcome is a pure function of the candidate set.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use fixture_store::Fixture;
use services_common::{FixtureId, FixtureOdds, SLATE_SIZE};

use crate::error::{SelectorError, SelectorResult};

/// A moneyline book spread this wide (in odds minor units) counts as fully
/// degenerate.
const MONEYLINE_SPREAD_CAP: f64 = 900.0;

/// An over/under gap this wide counts as fully one-sided.
const TOTALS_GAP_CAP: f64 = 200.0;

/// Moneyline share of the interest component; totals take the rest.
const MONEYLINE_SHARE: f64 = 0.7;

/// Tunable selection policy.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    /// Leagues in descending priority. Unlisted leagues score zero on the
    /// league component but remain selectable.
    pub league_priority: Vec<String>,
    /// Hard cap on fixtures from one league per slate.
    pub max_per_league: usize,
    /// Weight of the league component.
    pub league_weight: f64,
    /// Weight of the kickoff spread component.
    pub spread_weight: f64,
    /// Weight of the odds interest component.
    pub interest_weight: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            league_priority: Vec::new(),
            max_per_league: 4,
            league_weight: 0.5,
            spread_weight: 0.3,
            interest_weight: 0.2,
        }
    }
}

/// Pick exactly ten fixtures from the pool, or fail without padding.
///
/// Returned ids are in canonical slate order: kickoff, then fixture id.
pub fn select_fixtures(
    candidates: &[(Fixture, FixtureOdds)],
    policy: &SelectionPolicy,
) -> SelectorResult<Vec<FixtureId>> {
    if candidates.len() < SLATE_SIZE {
        return Err(SelectorError::InsufficientFixtures {
            eligible: candidates.len(),
            required: SLATE_SIZE,
        });
    }

    let window_secs = kickoff_span_secs(candidates);
    // Static part of the score; the spread component depends on picks made
    // so far and is recomputed each round.
    let mut pool: Vec<(&Fixture, f64)> = candidates
        .iter()
        .map(|(fixture, odds)| {
            let fixed = policy.league_weight * league_component(policy, &fixture.league)
                + policy.interest_weight * interest_component(odds);
            (fixture, fixed)
        })
        .collect();

    let mut chosen: Vec<&Fixture> = Vec::with_capacity(SLATE_SIZE);
    let mut per_league: FxHashMap<&str, usize> = FxHashMap::default();

    while chosen.len() < SLATE_SIZE {
        let mut best: Option<(usize, f64)> = None;
        for (idx, (fixture, fixed)) in pool.iter().enumerate() {
            let taken = per_league
                .get(fixture.league.as_str())
                .copied()
                .unwrap_or(0);
            if taken >= policy.max_per_league {
                continue;
            }
            let score = fixed
                + policy.spread_weight
                    * spread_component(fixture.kickoff_at, &chosen, window_secs);
            let better = match best {
                None => true,
                Some((best_idx, best_score)) => match score.total_cmp(&best_score) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        let incumbent = pool[best_idx].0;
                        (fixture.kickoff_at, fixture.fixture_id.as_u64())
                            < (incumbent.kickoff_at, incumbent.fixture_id.as_u64())
                    }
                },
            };
            if better {
                best = Some((idx, score));
            }
        }
        let Some((idx, _)) = best else { break };
        let (fixture, _) = pool.swap_remove(idx);
        *per_league.entry(fixture.league.as_str()).or_insert(0) += 1;
        chosen.push(fixture);
    }

    if chosen.len() < SLATE_SIZE {
        return Err(SelectorError::InsufficientFixtures {
            eligible: chosen.len(),
            required: SLATE_SIZE,
        });
    }

    chosen.sort_by_key(|f| (f.kickoff_at, f.fixture_id.as_u64()));
    Ok(chosen.iter().map(|f| f.fixture_id).collect())
}

fn kickoff_span_secs(candidates: &[(Fixture, FixtureOdds)]) -> f64 {
    let kickoffs = candidates.iter().map(|(f, _)| f.kickoff_at);
    match (kickoffs.clone().min(), kickoffs.max()) {
        (Some(first), Some(last)) => (last - first).num_seconds() as f64,
        _ => 0.0,
    }
}

fn league_component(policy: &SelectionPolicy, league: &str) -> f64 {
    let total = policy.league_priority.len();
    if total == 0 {
        return 0.0;
    }
    policy
        .league_priority
        .iter()
        .position(|l| l.eq_ignore_ascii_case(league))
        .map_or(0.0, |rank| (total - rank) as f64 / total as f64)
}

fn interest_component(odds: &FixtureOdds) -> f64 {
    let trio = [odds.home.raw(), odds.draw.raw(), odds.away.raw()];
    let high = trio.iter().max().copied().unwrap_or(0);
    let low = trio.iter().min().copied().unwrap_or(0);
    let moneyline = 1.0 - (f64::from(high - low) / MONEYLINE_SPREAD_CAP).min(1.0);
    let totals_gap = f64::from(odds.over.raw().abs_diff(odds.under.raw()));
    let totals = 1.0 - (totals_gap / TOTALS_GAP_CAP).min(1.0);
    MONEYLINE_SHARE * moneyline + (1.0 - MONEYLINE_SHARE) * totals
}

/// Distance to the nearest pick, normalised so one ideal gap (window over
/// slate size) or more earns full credit. First pick always scores full.
fn spread_component(kickoff: DateTime<Utc>, chosen: &[&Fixture], window_secs: f64) -> f64 {
    if chosen.is_empty() {
        return 1.0;
    }
    let ideal_gap = window_secs / SLATE_SIZE as f64;
    if ideal_gap <= 0.0 {
        return 0.0;
    }
    let nearest = chosen
        .iter()
        .map(|f| (kickoff - f.kickoff_at).num_seconds().abs())
        .min()
        .unwrap_or(0) as f64;
    (nearest / ideal_gap).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use services_common::{FixtureStatus, OddsX100};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn quote(raw: u32) -> OddsX100 {
        OddsX100::new(raw).unwrap()
    }

    fn flat_odds() -> FixtureOdds {
        FixtureOdds {
            home: quote(280),
            draw: quote(300),
            away: quote(290),
            over: quote(190),
            under: quote(190),
        }
    }

    fn candidate(id: u64, league: &str, hours: i64) -> (Fixture, FixtureOdds) {
        let fixture = Fixture {
            fixture_id: FixtureId::new(id),
            league: league.to_string(),
            home_team: format!("Home {id}"),
            away_team: format!("Away {id}"),
            kickoff_at: t0() + Duration::hours(hours),
            status: FixtureStatus::Scheduled,
            first_seen_at: t0(),
            updated_at: t0(),
        };
        (fixture, flat_odds())
    }

    fn permissive() -> SelectionPolicy {
        SelectionPolicy {
            max_per_league: SLATE_SIZE,
            ..SelectionPolicy::default()
        }
    }

    #[test]
    fn small_pools_fail_without_padding() {
        let pool: Vec<_> = (0..9).map(|i| candidate(i, "EPL", i as i64)).collect();
        let err = select_fixtures(&pool, &permissive()).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::InsufficientFixtures {
                eligible: 9,
                required: 10
            }
        ));
    }

    #[test]
    fn league_cap_can_make_a_large_pool_insufficient() {
        let pool: Vec<_> = (0..12).map(|i| candidate(i, "EPL", i as i64)).collect();
        let policy = SelectionPolicy {
            max_per_league: 4,
            ..SelectionPolicy::default()
        };
        let err = select_fixtures(&pool, &policy).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::InsufficientFixtures {
                eligible: 4,
                required: 10
            }
        ));
    }

    #[test]
    fn exact_pool_is_returned_in_kickoff_then_id_order() {
        // Present the candidates backwards; output must be canonical anyway.
        let mut pool: Vec<_> = (0..10).map(|i| candidate(i, "EPL", 10 - i as i64)).collect();
        pool.reverse();
        let ids = select_fixtures(&pool, &permissive()).unwrap();
        // Kickoffs run 10h down to 1h as ids run 0..9, so canonical order is
        // reversed ids.
        let expected: Vec<FixtureId> = (0..10).rev().map(FixtureId::new).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn prioritised_league_fills_its_cap_first() {
        let mut pool: Vec<_> = (0..6).map(|i| candidate(i, "EPL", i as i64)).collect();
        pool.extend((10..20).map(|i| candidate(i, "LIGA2", (i - 10) as i64)));
        let policy = SelectionPolicy {
            league_priority: vec!["EPL".to_string()],
            max_per_league: 6,
            ..SelectionPolicy::default()
        };
        let ids = select_fixtures(&pool, &policy).unwrap();
        assert_eq!(ids.len(), 10);
        for i in 0..6 {
            assert!(ids.contains(&FixtureId::new(i)), "EPL fixture {i} missing");
        }
    }

    #[test]
    fn spread_prefers_the_lone_evening_fixture() {
        // Twelve identical lunchtime fixtures and one ten hours later.
        let mut pool: Vec<_> = (0..12).map(|i| candidate(i, "EPL", 1)).collect();
        pool.push(candidate(99, "EPL", 11));
        let policy = SelectionPolicy {
            spread_weight: 0.5,
            league_weight: 0.0,
            interest_weight: 0.0,
            max_per_league: SLATE_SIZE + 3,
            ..SelectionPolicy::default()
        };
        let ids = select_fixtures(&pool, &policy).unwrap();
        assert!(ids.contains(&FixtureId::new(99)));
    }

    #[test]
    fn tight_books_beat_foregone_conclusions() {
        // Eleven candidates; the degenerate one must be the one left out.
        let mut pool: Vec<_> = (0..10).map(|i| candidate(i, "EPL", i as i64)).collect();
        let (fixture, _) = candidate(50, "EPL", 5);
        let degenerate = FixtureOdds {
            home: quote(105),
            draw: quote(900),
            away: quote(2500),
            over: quote(110),
            under: quote(700),
        };
        pool.push((fixture, degenerate));
        let policy = SelectionPolicy {
            interest_weight: 1.0,
            league_weight: 0.0,
            spread_weight: 0.0,
            max_per_league: SLATE_SIZE + 1,
            ..SelectionPolicy::default()
        };
        let ids = select_fixtures(&pool, &policy).unwrap();
        assert!(!ids.contains(&FixtureId::new(50)));
    }

    #[test]
    fn input_order_never_changes_the_slate() {
        let mut pool: Vec<_> = (0..15).map(|i| candidate(i, "EPL", (i % 7) as i64)).collect();
        let forward = select_fixtures(&pool, &permissive()).unwrap();
        pool.reverse();
        let backward = select_fixtures(&pool, &permissive()).unwrap();
        assert_eq!(forward, backward);
    }
}
