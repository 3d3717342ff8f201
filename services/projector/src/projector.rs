//! Cycle evaluation over the fixture store.
//!
//! Evaluation reads only raw indexed facts: the frozen slate, the confirmed
//! result vector on the cycle row and the cycle's slips. Re-running an
//! evaluation, or replaying all of them during a rebuild, therefore writes
//! the same rows the incremental path wrote.

use chrono::{DateTime, Utc};
use fixture_store::{FixtureStore, StatsApply};
use services_common::constants::{DEFAULT_QUALIFY_THRESHOLD, SLATE_SIZE};
use services_common::{CycleId, CycleState, MoneylineOutcome, OutcomePair, SlipId, TotalsOutcome};
use tracing::{error, info, warn};

use crate::error::{ProjectorError, ProjectorResult};
use crate::scoring::{ScoredSlip, rank_slips, score_slip};

/// What one cycle evaluation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Slips scored and ranked.
    pub slips: usize,
    /// Slips at or above the qualify threshold.
    pub qualified: usize,
    /// Rank-1 slip, when the cycle had entrants.
    pub winner: Option<SlipId>,
}

/// What a projection rebuild covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Evaluated cycles replayed.
    pub cycles: usize,
    /// Slips re-scored across them.
    pub slips: usize,
    /// Cycles whose stored rows no longer decode. Their projections stay
    /// empty; a nonzero count needs operator attention.
    pub skipped: usize,
}

/// Scores resolved cycles and materializes their projections.
pub struct Projector {
    store: FixtureStore,
    qualify_threshold: u8,
}

impl Projector {
    /// Projector with the standard qualify threshold.
    #[must_use]
    pub const fn new(store: FixtureStore) -> Self {
        Self {
            store,
            qualify_threshold: DEFAULT_QUALIFY_THRESHOLD,
        }
    }

    /// Projector with an explicit qualify threshold.
    #[must_use]
    pub const fn with_threshold(store: FixtureStore, qualify_threshold: u8) -> Self {
        Self {
            store,
            qualify_threshold,
        }
    }

    /// Score and rank every slip of a resolved cycle, then write the
    /// projection in one transaction.
    pub async fn evaluate_cycle(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> ProjectorResult<EvaluationSummary> {
        let cycle = self
            .store
            .cycle(cycle_id)
            .await?
            .ok_or(ProjectorError::UnknownCycle { cycle_id })?;
        let outcomes = decode_result_vector(
            cycle_id,
            cycle.result_moneyline.as_deref(),
            cycle.result_totals.as_deref(),
        )?;

        let slate = self.store.slate(cycle_id).await?;
        if slate.len() != SLATE_SIZE {
            return Err(ProjectorError::SlateShape {
                cycle_id,
                len: slate.len(),
            });
        }
        let odds: Vec<_> = slate.iter().map(|entry| entry.odds).collect();

        let slips = self.store.slips_for_cycle(cycle_id).await?;
        let mut scored = Vec::with_capacity(slips.len());
        for slip in &slips {
            if slip.predictions.len() != SLATE_SIZE {
                return Err(ProjectorError::PredictionShape {
                    slip_id: slip.slip_id,
                    len: slip.predictions.len(),
                });
            }
            let tally = score_slip(&slip.predictions, &outcomes, &odds, self.qualify_threshold);
            scored.push(ScoredSlip {
                slip_id: slip.slip_id,
                player: slip.player,
                placed_at: slip.placed_at,
                correct_count: tally.correct_count,
                qualified: tally.qualified,
                score: tally.score,
            });
        }

        let ranked = rank_slips(scored);
        let qualified = ranked.iter().filter(|row| row.qualified).count();
        let winner = ranked.first().map(|row| row.slip_id);
        self.store
            .write_cycle_evaluation(cycle_id, &ranked, now)
            .await?;
        info!(%cycle_id, slips = ranked.len(), qualified, "cycle evaluated");
        Ok(EvaluationSummary {
            slips: ranked.len(),
            qualified,
            winner,
        })
    }

    /// Roll one evaluated cycle into user statistics.
    ///
    /// `Deferred` means an earlier evaluated cycle has not been applied yet;
    /// the caller retries after [`Projector::apply_pending_stats`].
    pub async fn settle_user_stats(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> ProjectorResult<StatsApply> {
        Ok(self.store.apply_cycle_to_user_stats(cycle_id, now).await?)
    }

    /// Apply statistics for every evaluated cycle that still lacks them,
    /// oldest first. Returns how many cycles were applied.
    pub async fn apply_pending_stats(&self, now: DateTime<Utc>) -> ProjectorResult<usize> {
        let evaluated = self.store.cycles_in_state(CycleState::Evaluated).await?;
        let mut applied = 0;
        for cycle in evaluated.iter().filter(|cycle| !cycle.stats_applied) {
            match self
                .store
                .apply_cycle_to_user_stats(cycle.cycle_id, now)
                .await?
            {
                StatsApply::Applied => applied += 1,
                StatsApply::AlreadyApplied => {}
                StatsApply::Deferred => {
                    // A concurrent writer slipped between the listing and
                    // the application; the next sweep picks this cycle up.
                    warn!(cycle_id = %cycle.cycle_id, "stats application deferred");
                    break;
                }
            }
        }
        Ok(applied)
    }

    /// Drop every projection and replay all evaluated cycles in id order.
    ///
    /// A cycle whose stored rows no longer decode is skipped with an error
    /// log and counted in the summary; aborting mid-replay would leave every
    /// later cycle without projections over one corrupt historical row.
    /// Store failures still abort, since nothing downstream can be trusted.
    pub async fn rebuild(&self, now: DateTime<Utc>) -> ProjectorResult<RebuildSummary> {
        let evaluated = self.store.cycles_in_state(CycleState::Evaluated).await?;
        self.store.reset_projections(now).await?;
        let mut slips = 0;
        let mut skipped = 0;
        for cycle in &evaluated {
            match self.evaluate_cycle(cycle.cycle_id, now).await {
                Ok(summary) => slips += summary.slips,
                Err(ProjectorError::Store(source)) => return Err(source.into()),
                Err(err) => {
                    error!(cycle_id = %cycle.cycle_id, error = %err, "cycle skipped in rebuild");
                    skipped += 1;
                }
            }
            // A skipped cycle applies as zero entrants, so the id-order gate
            // never wedges the cycles behind it.
            match self
                .store
                .apply_cycle_to_user_stats(cycle.cycle_id, now)
                .await?
            {
                StatsApply::Applied | StatsApply::AlreadyApplied => {}
                StatsApply::Deferred => {
                    return Err(ProjectorError::StatsOrder {
                        cycle_id: cycle.cycle_id,
                    });
                }
            }
        }
        info!(cycles = evaluated.len() - skipped, skipped, slips, "projections rebuilt");
        Ok(RebuildSummary {
            cycles: evaluated.len() - skipped,
            slips,
            skipped,
        })
    }
}

/// Decode the cycle row's confirmed result vectors into settled outcomes.
fn decode_result_vector(
    cycle_id: CycleId,
    moneyline: Option<&[i16]>,
    totals: Option<&[i16]>,
) -> ProjectorResult<Vec<OutcomePair>> {
    let (Some(moneyline), Some(totals)) = (moneyline, totals) else {
        return Err(ProjectorError::ResultsMissing { cycle_id });
    };
    if moneyline.len() != SLATE_SIZE {
        return Err(ProjectorError::ResultShape {
            cycle_id,
            len: moneyline.len(),
        });
    }
    if totals.len() != SLATE_SIZE {
        return Err(ProjectorError::ResultShape {
            cycle_id,
            len: totals.len(),
        });
    }
    moneyline
        .iter()
        .zip(totals)
        .enumerate()
        .map(|(slot, (&ml, &tot))| {
            let moneyline = u8::try_from(ml)
                .ok()
                .and_then(|wire| MoneylineOutcome::from_wire(wire).ok())
                .ok_or(ProjectorError::ResultWire { cycle_id, slot })?;
            let totals = u8::try_from(tot)
                .ok()
                .and_then(|wire| TotalsOutcome::from_wire(wire).ok())
                .ok_or(ProjectorError::ResultWire { cycle_id, slot })?;
            let pair = OutcomePair { moneyline, totals };
            if !pair.is_settled() {
                return Err(ProjectorError::UnsettledResult { cycle_id, slot });
            }
            Ok(pair)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn full_vectors() -> (Vec<i16>, Vec<i16>) {
        (vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1], vec![1, 2, 1, 2, 1, 2, 1, 2, 1, 2])
    }

    #[test]
    fn complete_vectors_decode_to_settled_pairs() {
        let (moneyline, totals) = full_vectors();
        let outcomes =
            decode_result_vector(CycleId::new(4), Some(&moneyline), Some(&totals)).unwrap();
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes[0].moneyline, MoneylineOutcome::Home);
        assert_eq!(outcomes[1].totals, TotalsOutcome::Under);
        assert!(outcomes.iter().all(OutcomePair::is_settled));
    }

    #[test]
    fn absent_vectors_are_results_missing() {
        let err = decode_result_vector(CycleId::new(4), None, None).unwrap_err();
        assert!(matches!(
            err,
            ProjectorError::ResultsMissing { cycle_id } if cycle_id == CycleId::new(4)
        ));
    }

    #[test]
    fn short_vectors_are_rejected() {
        let (moneyline, totals) = full_vectors();
        let err = decode_result_vector(CycleId::new(4), Some(&moneyline[..9]), Some(&totals))
            .unwrap_err();
        assert!(matches!(err, ProjectorError::ResultShape { len: 9, .. }));
    }

    #[test]
    fn not_set_entries_cannot_be_scored() {
        let (mut moneyline, totals) = full_vectors();
        moneyline[3] = 0;
        let err = decode_result_vector(CycleId::new(4), Some(&moneyline), Some(&totals))
            .unwrap_err();
        assert!(matches!(err, ProjectorError::UnsettledResult { slot: 3, .. }));
    }

    #[test]
    fn out_of_range_entries_are_wire_errors() {
        let (moneyline, mut totals) = full_vectors();
        totals[7] = -2;
        let err = decode_result_vector(CycleId::new(4), Some(&moneyline), Some(&totals))
            .unwrap_err();
        assert!(matches!(err, ProjectorError::ResultWire { slot: 7, .. }));
    }
}
