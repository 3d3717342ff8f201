//! Slip scoring and ranking.
//!
//! Scoring is pure arithmetic over frozen odds: a slip that hits at least
//! the qualify threshold scores the product of its hit prices, expressed in
//! integer minor units (hundredths) with half-even rounding. Below the
//! threshold the score is zero. Ranking is a total order, so every slip in
//! a cycle gets a distinct dense rank.

use chrono::{DateTime, Utc};
use fixture_store::EvaluatedSlip;
use rust_decimal::{Decimal, RoundingStrategy};
use services_common::constants::ODDS_SCALE;
use services_common::{FixtureOdds, OutcomePair, PlayerAddress, Prediction, SlipId};

/// Hit count and score for one slip, before ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlipScore {
    /// Hits across the ten positions.
    pub correct_count: u8,
    /// Whether the hit count met the qualify threshold.
    pub qualified: bool,
    /// Product of hit prices in minor units. Zero when unqualified.
    pub score: Decimal,
}

/// A scored slip awaiting its rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSlip {
    /// Slip being ranked.
    pub slip_id: SlipId,
    /// Player who placed it.
    pub player: PlayerAddress,
    /// Placement instant, the third ranking key.
    pub placed_at: DateTime<Utc>,
    /// Hits across the ten positions.
    pub correct_count: u8,
    /// Whether the hit count met the qualify threshold.
    pub qualified: bool,
    /// Score in minor units.
    pub score: Decimal,
}

/// Score one slip against the resolved outcomes and frozen prices.
///
/// The three slices are aligned by slate slot; callers validate that all of
/// them carry exactly the slate size. A hit contributes the price of the
/// predicted selection to the product; the product of zero hits is one, but
/// never surfaces because the threshold is above zero.
#[must_use]
pub fn score_slip(
    predictions: &[Prediction],
    outcomes: &[OutcomePair],
    odds: &[FixtureOdds],
    qualify_threshold: u8,
) -> SlipScore {
    let mut correct_count: u8 = 0;
    let mut product = Decimal::ONE;
    for ((prediction, outcome), prices) in predictions.iter().zip(outcomes).zip(odds) {
        if prediction.hits(outcome) {
            correct_count += 1;
            product *= prices.for_prediction(*prediction).to_decimal();
        }
    }
    let qualified = correct_count >= qualify_threshold;
    let score = if qualified {
        minor_units(product)
    } else {
        Decimal::ZERO
    };
    SlipScore {
        correct_count,
        qualified,
        score,
    }
}

/// Order a cycle's scored slips and assign dense ranks.
///
/// Higher score first, then more hits, then earlier placement, then the
/// smaller slip id. Slip ids are unique, so the order is total and ranks
/// come out 1..=n with no gaps.
#[must_use]
pub fn rank_slips(mut scored: Vec<ScoredSlip>) -> Vec<EvaluatedSlip> {
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.correct_count.cmp(&a.correct_count))
            .then_with(|| a.placed_at.cmp(&b.placed_at))
            .then_with(|| a.slip_id.cmp(&b.slip_id))
    });
    scored
        .into_iter()
        .enumerate()
        .map(|(idx, slip)| EvaluatedSlip {
            slip_id: slip.slip_id,
            player: slip.player,
            correct_count: slip.correct_count,
            qualified: slip.qualified,
            score: slip.score,
            rank: idx as u32 + 1,
            placed_at: slip.placed_at,
        })
        .collect()
}

/// Integer minor units of an odds product, rounded half-even.
fn minor_units(product: Decimal) -> Decimal {
    (product * Decimal::from(ODDS_SCALE))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use services_common::{MoneylineOutcome, OddsX100, TotalsOutcome};

    fn prices(raw: u32) -> FixtureOdds {
        let price = OddsX100::new(raw).unwrap();
        FixtureOdds {
            home: price,
            draw: price,
            away: price,
            over: price,
            under: price,
        }
    }

    fn outcome(moneyline: MoneylineOutcome, totals: TotalsOutcome) -> OutcomePair {
        OutcomePair { moneyline, totals }
    }

    /// The ten predictions 1,X,Over,2,Under,1,Over,X,2,Over.
    fn slate_predictions() -> Vec<Prediction> {
        vec![
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
        ]
    }

    fn slate_prices() -> Vec<FixtureOdds> {
        [210, 330, 195, 280, 190, 210, 195, 330, 280, 195]
            .into_iter()
            .map(prices)
            .collect()
    }

    /// Outcomes under which every prediction of `slate_predictions` hits.
    fn all_hit_outcomes() -> Vec<OutcomePair> {
        use MoneylineOutcome::{Away, Draw, Home};
        use TotalsOutcome::{Over, Under};
        vec![
            outcome(Home, Under),
            outcome(Draw, Under),
            outcome(Home, Over),
            outcome(Away, Under),
            outcome(Home, Under),
            outcome(Home, Over),
            outcome(Draw, Over),
            outcome(Draw, Under),
            outcome(Away, Over),
            outcome(Home, Over),
        ]
    }

    /// Outcomes that miss every prediction of `slate_predictions`.
    fn all_miss_outcomes() -> Vec<OutcomePair> {
        use MoneylineOutcome::{Away, Draw, Home};
        use TotalsOutcome::{Over, Under};
        vec![
            outcome(Away, Over),
            outcome(Home, Under),
            outcome(Home, Under),
            outcome(Draw, Under),
            outcome(Home, Over),
            outcome(Away, Over),
            outcome(Home, Under),
            outcome(Home, Over),
            outcome(Draw, Under),
            outcome(Away, Under),
        ]
    }

    #[test]
    fn ten_hits_score_the_full_product_in_minor_units() {
        // 2.10 * 3.30 * 1.95 * 2.80 * 1.90 * 2.10 * 1.95 * 3.30 * 2.80
        // * 1.95 = 5304.4451982522, which rounds to 530445 minor units.
        let tally = score_slip(&slate_predictions(), &all_hit_outcomes(), &slate_prices(), 5);
        assert_eq!(tally.correct_count, 10);
        assert!(tally.qualified);
        assert_eq!(tally.score, Decimal::from(530_445));
    }

    #[test]
    fn exactly_threshold_hits_qualify_and_score_only_the_hits() {
        let mut outcomes = all_hit_outcomes();
        outcomes[5..].copy_from_slice(&all_miss_outcomes()[5..]);
        // 2.10 * 3.30 * 1.95 * 2.80 * 1.90 = 71.89182 -> 7189.
        let tally = score_slip(&slate_predictions(), &outcomes, &slate_prices(), 5);
        assert_eq!(tally.correct_count, 5);
        assert!(tally.qualified);
        assert_eq!(tally.score, Decimal::from(7_189));
    }

    #[test]
    fn four_hits_stay_below_threshold_and_score_zero() {
        let mut outcomes = all_miss_outcomes();
        outcomes[..4].copy_from_slice(&all_hit_outcomes()[..4]);
        let tally = score_slip(&slate_predictions(), &outcomes, &slate_prices(), 5);
        assert_eq!(tally.correct_count, 4);
        assert!(!tally.qualified);
        assert_eq!(tally.score, Decimal::ZERO);
    }

    #[test]
    fn zero_hits_never_leak_the_empty_product() {
        let tally = score_slip(
            &slate_predictions(),
            &all_miss_outcomes(),
            &slate_prices(),
            5,
        );
        assert_eq!(tally.correct_count, 0);
        assert_eq!(tally.score, Decimal::ZERO);
    }

    #[test]
    fn a_maximum_odds_sweep_scores_without_overflow() {
        let predictions = vec![Prediction::Over; 10];
        let outcomes = vec![outcome(MoneylineOutcome::Home, TotalsOutcome::Over); 10];
        let odds = vec![prices(10_000); 10];
        let tally = score_slip(&predictions, &outcomes, &odds, 5);
        assert_eq!(tally.correct_count, 10);
        // 100^10 products, times the scale: 10^22 minor units.
        let expected = Decimal::from_i128_with_scale(10_000_000_000_000_000_000_000, 0);
        assert_eq!(tally.score, expected);
    }

    #[rstest]
    #[case("4.205", "420")]
    #[case("4.215", "422")]
    #[case("4.2051", "421")]
    #[case("2.1", "210")]
    fn products_round_half_even_to_minor_units(#[case] product: &str, #[case] expected: &str) {
        let product: Decimal = product.parse().unwrap();
        let expected: Decimal = expected.parse().unwrap();
        assert_eq!(minor_units(product), expected);
    }

    fn scored(
        slip_id: u64,
        score: i64,
        correct_count: u8,
        placed_minute: u32,
    ) -> ScoredSlip {
        ScoredSlip {
            slip_id: SlipId::new(slip_id),
            player: PlayerAddress([u8::try_from(slip_id).unwrap_or(0xff); 20]),
            placed_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, placed_minute, 0).unwrap(),
            correct_count,
            qualified: score > 0,
            score: Decimal::from(score),
        }
    }

    #[test]
    fn ranks_order_by_score_then_hits_then_placement_then_id() {
        let ranked = rank_slips(vec![
            scored(5, 500, 7, 30),
            scored(9, 500, 7, 10),
            scored(2, 500, 8, 45),
            scored(7, 600, 5, 50),
        ]);
        let order: Vec<(u64, u32)> = ranked
            .iter()
            .map(|row| (row.slip_id.as_u64(), row.rank))
            .collect();
        assert_eq!(order, vec![(7, 1), (2, 2), (9, 3), (5, 4)]);
    }

    #[test]
    fn identical_slips_fall_back_to_the_smaller_id() {
        let ranked = rank_slips(vec![scored(40, 250, 6, 15), scored(12, 250, 6, 15)]);
        assert_eq!(ranked[0].slip_id, SlipId::new(12));
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].slip_id, SlipId::new(40));
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn unqualified_slips_rank_below_and_order_by_hit_count() {
        let ranked = rank_slips(vec![
            scored(3, 0, 3, 5),
            scored(1, 7_189, 5, 20),
            scored(8, 0, 4, 40),
        ]);
        let order: Vec<u64> = ranked.iter().map(|row| row.slip_id.as_u64()).collect();
        assert_eq!(order, vec![1, 8, 3]);
    }
}
