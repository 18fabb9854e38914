use std::fmt::{Display, Formatter};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Spot price in currency minor units (öre) per kilowatt-hour.
///
/// The price files carry öre; thresholds in the configuration are given in
/// whole crowns and multiplied by 100 before comparison.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::From,
    derive_more::Sub,
    derive_more::Sum,
)]
pub struct Ore(pub f64);

impl Ore {
    pub const ZERO: Self = Self(0.0);

    /// Total ordering key for sorting price series.
    pub const fn ordered(self) -> OrderedFloat<f64> {
        OrderedFloat(self.0)
    }

    /// The same price expressed in whole crowns.
    pub fn as_crowns(self) -> f64 {
        self.0 / 100.0
    }

    pub fn from_crowns(crowns: f64) -> Self {
        Self(crowns * 100.0)
    }
}

impl Display for Ore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} öre", self.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_crowns() {
        assert_abs_diff_eq!(Ore::from_crowns(1.5).0, 150.0);
        assert_abs_diff_eq!(Ore(38.28).as_crowns(), 0.3828);
    }

    #[test]
    fn test_ordering() {
        let mut prices = vec![Ore(80.0), Ore(300.0), Ore(150.0)];
        prices.sort_by_key(|price| price.ordered());
        assert_eq!(prices, [Ore(80.0), Ore(150.0), Ore(300.0)]);
    }
}
