//! Fixed-point decimal odds
//!
//! Odds are carried everywhere as integer hundredths (2.35 is stored as
//! 235). The projector multiplies ten of them together, so ingestion bounds
//! each price to (1.00, 100.00]; ten legs at the cap stay comfortably inside
//! a 96-bit decimal mantissa.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{ODDS_SCALE, ODDS_X100_MAX, ODDS_X100_MIN_EXCLUSIVE};
use crate::errors::CommonError;
use crate::market::Prediction;

/// Decimal odds in integer hundredths.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OddsX100(u32);

impl OddsX100 {
    /// Validate and wrap a raw hundredths value.
    ///
    /// Accepts (100, 10_000], i.e. prices strictly above even money's floor
    /// of 1.00 and at most 100.00.
    pub const fn new(raw: u32) -> Result<Self, CommonError> {
        if raw > ODDS_X100_MIN_EXCLUSIVE && raw <= ODDS_X100_MAX {
            Ok(Self(raw))
        } else {
            Err(CommonError::OddsOutOfRange { raw })
        }
    }

    /// Raw hundredths value.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Signed value for Postgres INTEGER columns.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        self.0 as i32
    }

    /// Exact decimal value (e.g. 235 becomes 2.35).
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(i64::from(self.0), 2)
    }

    /// Parse a provider string such as "2.35" into hundredths.
    ///
    /// Requires at most two fractional digits; a third decimal place means
    /// the feed changed precision under us and must be rejected, not
    /// silently rounded.
    pub fn parse(s: &str) -> Result<Self, CommonError> {
        let d: Decimal = s.trim().parse().map_err(|_| CommonError::OddsUnparseable {
            value: s.to_string(),
        })?;
        let scaled = d * Decimal::from(ODDS_SCALE);
        if scaled.fract() != Decimal::ZERO {
            return Err(CommonError::OddsUnparseable {
                value: s.to_string(),
            });
        }
        let raw = scaled.to_u32().ok_or_else(|| CommonError::OddsUnparseable {
            value: s.to_string(),
        })?;
        Self::new(raw)
    }
}

impl fmt::Display for OddsX100 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / ODDS_SCALE, self.0 % ODDS_SCALE)
    }
}

/// The five prices captured for one fixture at freeze time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureOdds {
    /// Moneyline home win.
    pub home: OddsX100,
    /// Moneyline draw.
    pub draw: OddsX100,
    /// Moneyline away win.
    pub away: OddsX100,
    /// Over 2.5 goals.
    pub over: OddsX100,
    /// Under 2.5 goals.
    pub under: OddsX100,
}

impl FixtureOdds {
    /// The price a given prediction locks in.
    #[must_use]
    pub const fn for_prediction(&self, pred: Prediction) -> OddsX100 {
        match pred {
            Prediction::Home => self.home,
            Prediction::Draw => self.draw,
            Prediction::Away => self.away,
            Prediction::Over => self.over,
            Prediction::Under => self.under,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn bounds_are_exclusive_inclusive() {
        assert!(OddsX100::new(100).is_err());
        assert!(OddsX100::new(101).is_ok());
        assert!(OddsX100::new(10_000).is_ok());
        assert!(OddsX100::new(10_001).is_err());
        assert!(OddsX100::new(0).is_err());
    }

    #[rstest]
    #[case("2.35", 235)]
    #[case("1.01", 101)]
    #[case("100.00", 10_000)]
    #[case(" 3.5 ", 350)]
    #[case("7", 700)]
    fn parses_provider_strings(#[case] s: &str, #[case] raw: u32) {
        assert_eq!(OddsX100::parse(s).unwrap().raw(), raw);
    }

    #[rstest]
    #[case("2.355")]
    #[case("1.00")]
    #[case("0.99")]
    #[case("101.0")]
    #[case("abc")]
    #[case("")]
    fn rejects_bad_provider_strings(#[case] s: &str) {
        assert!(OddsX100::parse(s).is_err());
    }

    #[test]
    fn display_pads_fraction() {
        assert_eq!(OddsX100::new(235).unwrap().to_string(), "2.35");
        assert_eq!(OddsX100::new(700).unwrap().to_string(), "7.00");
        assert_eq!(OddsX100::new(105).unwrap().to_string(), "1.05");
    }

    #[test]
    fn to_decimal_is_exact() {
        assert_eq!(OddsX100::new(235).unwrap().to_decimal(), Decimal::new(235, 2));
    }

    #[test]
    fn for_prediction_selects_the_matching_price() {
        let odds = FixtureOdds {
            home: OddsX100::new(210).unwrap(),
            draw: OddsX100::new(330).unwrap(),
            away: OddsX100::new(360).unwrap(),
            over: OddsX100::new(195).unwrap(),
            under: OddsX100::new(185).unwrap(),
        };
        assert_eq!(odds.for_prediction(Prediction::Home).raw(), 210);
        assert_eq!(odds.for_prediction(Prediction::Draw).raw(), 330);
        assert_eq!(odds.for_prediction(Prediction::Away).raw(), 360);
        assert_eq!(odds.for_prediction(Prediction::Over).raw(), 195);
        assert_eq!(odds.for_prediction(Prediction::Under).raw(), 185);
    }
}
