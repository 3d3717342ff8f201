//! Markets, outcomes and predictions
//!
//! Every fixture offers exactly two markets: the 1X2 moneyline and the
//! over/under 2.5 goals total. A slip leg picks one outcome in one market,
//! so the wire form of a prediction is a `(market, outcome)` pair of u8s.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CommonError;

/// The two markets offered per fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Home win, draw or away win.
    OneXTwo,
    /// Total goals over or under 2.5.
    OverUnder25,
}

impl Market {
    /// Wire discriminant, matching the contract's enum layout.
    #[must_use]
    pub const fn wire(&self) -> u8 {
        match self {
            Self::OneXTwo => 0,
            Self::OverUnder25 => 1,
        }
    }

    /// Parse the wire discriminant.
    pub const fn from_wire(v: u8) -> Result<Self, CommonError> {
        match v {
            0 => Ok(Self::OneXTwo),
            1 => Ok(Self::OverUnder25),
            _ => Err(CommonError::InvalidWireValue {
                kind: "Market",
                value: v,
            }),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OneXTwo => "1X2",
            Self::OverUnder25 => "O/U 2.5",
        };
        write!(f, "{s}")
    }
}

/// Settled outcome of the moneyline market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MoneylineOutcome {
    /// Fixture not yet settled.
    NotSet = 0,
    /// Home side won.
    Home = 1,
    /// Draw.
    Draw = 2,
    /// Away side won.
    Away = 3,
}

impl MoneylineOutcome {
    /// Wire discriminant.
    #[must_use]
    pub const fn wire(&self) -> u8 {
        *self as u8
    }

    /// Parse the wire discriminant.
    pub const fn from_wire(v: u8) -> Result<Self, CommonError> {
        match v {
            0 => Ok(Self::NotSet),
            1 => Ok(Self::Home),
            2 => Ok(Self::Draw),
            3 => Ok(Self::Away),
            _ => Err(CommonError::InvalidWireValue {
                kind: "MoneylineOutcome",
                value: v,
            }),
        }
    }
}

/// Settled outcome of the totals market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TotalsOutcome {
    /// Fixture not yet settled.
    NotSet = 0,
    /// Three or more goals in total.
    Over = 1,
    /// Two or fewer goals in total.
    Under = 2,
}

impl TotalsOutcome {
    /// Wire discriminant.
    #[must_use]
    pub const fn wire(&self) -> u8 {
        *self as u8
    }

    /// Parse the wire discriminant.
    pub const fn from_wire(v: u8) -> Result<Self, CommonError> {
        match v {
            0 => Ok(Self::NotSet),
            1 => Ok(Self::Over),
            2 => Ok(Self::Under),
            _ => Err(CommonError::InvalidWireValue {
                kind: "TotalsOutcome",
                value: v,
            }),
        }
    }
}

/// Settled outcomes for both markets of one fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomePair {
    /// Moneyline settlement.
    pub moneyline: MoneylineOutcome,
    /// Totals settlement.
    pub totals: TotalsOutcome,
}

impl OutcomePair {
    /// Derive both outcomes from a final score.
    ///
    /// The totals line is fixed at 2.5, so the line can never push: three or
    /// more goals is Over, otherwise Under. A 0-0 settles Draw and Under.
    #[must_use]
    pub const fn from_score(home_goals: u16, away_goals: u16) -> Self {
        let moneyline = if home_goals > away_goals {
            MoneylineOutcome::Home
        } else if home_goals < away_goals {
            MoneylineOutcome::Away
        } else {
            MoneylineOutcome::Draw
        };
        let totals = if home_goals + away_goals >= 3 {
            TotalsOutcome::Over
        } else {
            TotalsOutcome::Under
        };
        Self { moneyline, totals }
    }

    /// Pair meaning "not settled yet".
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            moneyline: MoneylineOutcome::NotSet,
            totals: TotalsOutcome::NotSet,
        }
    }

    /// True once both markets carry a real outcome.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self.moneyline, MoneylineOutcome::NotSet)
            && !matches!(self.totals, TotalsOutcome::NotSet)
    }
}

/// A player's pick for one leg of a slip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prediction {
    /// Home win on the moneyline.
    Home,
    /// Draw on the moneyline.
    Draw,
    /// Away win on the moneyline.
    Away,
    /// Over 2.5 goals.
    Over,
    /// Under 2.5 goals.
    Under,
}

impl Prediction {
    /// The market this prediction belongs to.
    #[must_use]
    pub const fn market(&self) -> Market {
        match self {
            Self::Home | Self::Draw | Self::Away => Market::OneXTwo,
            Self::Over | Self::Under => Market::OverUnder25,
        }
    }

    /// Whether the prediction hit, given settled outcomes.
    ///
    /// Unsettled outcomes never count as a hit.
    #[must_use]
    pub const fn hits(&self, outcome: &OutcomePair) -> bool {
        match self {
            Self::Home => matches!(outcome.moneyline, MoneylineOutcome::Home),
            Self::Draw => matches!(outcome.moneyline, MoneylineOutcome::Draw),
            Self::Away => matches!(outcome.moneyline, MoneylineOutcome::Away),
            Self::Over => matches!(outcome.totals, TotalsOutcome::Over),
            Self::Under => matches!(outcome.totals, TotalsOutcome::Under),
        }
    }

    /// Encode as the contract's `(market, outcome)` pair.
    #[must_use]
    pub const fn wire(&self) -> (u8, u8) {
        match self {
            Self::Home => (Market::OneXTwo.wire(), MoneylineOutcome::Home.wire()),
            Self::Draw => (Market::OneXTwo.wire(), MoneylineOutcome::Draw.wire()),
            Self::Away => (Market::OneXTwo.wire(), MoneylineOutcome::Away.wire()),
            Self::Over => (Market::OverUnder25.wire(), TotalsOutcome::Over.wire()),
            Self::Under => (Market::OverUnder25.wire(), TotalsOutcome::Under.wire()),
        }
    }

    /// Decode the contract's `(market, outcome)` pair.
    ///
    /// Rejects `NotSet` outcomes and mismatched market/outcome combinations,
    /// which a well-behaved contract never emits.
    pub const fn from_wire(market: u8, outcome: u8) -> Result<Self, CommonError> {
        match (market, outcome) {
            (0, 1) => Ok(Self::Home),
            (0, 2) => Ok(Self::Draw),
            (0, 3) => Ok(Self::Away),
            (1, 1) => Ok(Self::Over),
            (1, 2) => Ok(Self::Under),
            _ => Err(CommonError::InvalidWireValue {
                kind: "Prediction",
                value: outcome,
            }),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Home => "1",
            Self::Draw => "X",
            Self::Away => "2",
            Self::Over => "Over",
            Self::Under => "Under",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2, 1, MoneylineOutcome::Home, TotalsOutcome::Over)]
    #[case(1, 2, MoneylineOutcome::Away, TotalsOutcome::Over)]
    #[case(1, 1, MoneylineOutcome::Draw, TotalsOutcome::Under)]
    #[case(0, 0, MoneylineOutcome::Draw, TotalsOutcome::Under)]
    #[case(2, 2, MoneylineOutcome::Draw, TotalsOutcome::Over)]
    #[case(3, 0, MoneylineOutcome::Home, TotalsOutcome::Over)]
    #[case(0, 3, MoneylineOutcome::Away, TotalsOutcome::Over)]
    #[case(2, 0, MoneylineOutcome::Home, TotalsOutcome::Under)]
    fn outcomes_from_score(
        #[case] home: u16,
        #[case] away: u16,
        #[case] ml: MoneylineOutcome,
        #[case] tot: TotalsOutcome,
    ) {
        let pair = OutcomePair::from_score(home, away);
        assert_eq!(pair.moneyline, ml);
        assert_eq!(pair.totals, tot);
        assert!(pair.is_settled());
    }

    #[test]
    fn unset_pair_is_not_settled() {
        assert!(!OutcomePair::unset().is_settled());
    }

    #[rstest]
    #[case(Prediction::Home)]
    #[case(Prediction::Draw)]
    #[case(Prediction::Away)]
    #[case(Prediction::Over)]
    #[case(Prediction::Under)]
    fn prediction_wire_round_trip(#[case] pred: Prediction) {
        let (m, o) = pred.wire();
        assert_eq!(Prediction::from_wire(m, o).unwrap(), pred);
    }

    #[test]
    fn prediction_wire_rejects_unset_and_garbage() {
        assert!(Prediction::from_wire(0, 0).is_err());
        assert!(Prediction::from_wire(1, 0).is_err());
        assert!(Prediction::from_wire(1, 3).is_err());
        assert!(Prediction::from_wire(2, 1).is_err());
    }

    #[test]
    fn hits_respects_market_independence() {
        // 2-1: Home and Over both hit, Draw/Away/Under all miss.
        let pair = OutcomePair::from_score(2, 1);
        assert!(Prediction::Home.hits(&pair));
        assert!(Prediction::Over.hits(&pair));
        assert!(!Prediction::Draw.hits(&pair));
        assert!(!Prediction::Away.hits(&pair));
        assert!(!Prediction::Under.hits(&pair));
    }

    #[test]
    fn nothing_hits_an_unset_outcome() {
        let pair = OutcomePair::unset();
        for pred in [
            Prediction::Home,
            Prediction::Draw,
            Prediction::Away,
            Prediction::Over,
            Prediction::Under,
        ] {
            assert!(!pred.hits(&pair));
        }
    }
}
