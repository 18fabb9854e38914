//! Today's hourly spot prices, produced once per day by an external fetcher
//! as a plain `<hour>:<price-in-öre>` file. Read-only within a run.

use std::{collections::BTreeMap, path::Path};

use itertools::Itertools;

use crate::{prelude::*, quantity::Ore};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HourlyPrices(BTreeMap<u32, Ore>);

impl HourlyPrices {
    pub const fn new(prices: BTreeMap<u32, Ore>) -> Self {
        Self(prices)
    }

    /// Price for `hour`; hours missing from the feed count as zero, which
    /// excludes them from any optimisation.
    pub fn price(&self, hour: u32) -> Ore {
        self.0.get(&hour).copied().unwrap_or(Ore::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Ore)> + '_ {
        self.0.iter().map(|(hour, price)| (*hour, *price))
    }

    /// The `n` priciest hours of the day.
    pub fn top_hours(&self, n: usize) -> Vec<(u32, Ore)> {
        self.iter()
            .sorted_by_key(|(_, price)| std::cmp::Reverse(price.ordered()))
            .take(n)
            .collect()
    }

    /// Load and validate the price file. The file must hold exactly one
    /// record per hour of the day.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        let prices = Self::parse(&contents)
            .with_context(|| format!("malformed price file `{}`", path.display()))?;
        Ok(prices)
    }

    fn parse(contents: &str) -> Result<Self> {
        let mut prices = BTreeMap::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let (hour, price) =
                line.trim().split_once(':').with_context(|| format!("no `:` in `{line}`"))?;
            let hour: u32 = hour.parse().with_context(|| format!("bad hour in `{line}`"))?;
            ensure!(hour < 24, "hour {hour} out of range 0–23");
            let price: f64 = price.parse().with_context(|| format!("bad price in `{line}`"))?;
            ensure!(prices.insert(hour, Ore(price)).is_none(), "duplicate hour {hour}");
        }
        ensure!(prices.len() == 24, "expected 24 hourly records, found {}", prices.len());
        Ok(Self(prices))
    }
}
