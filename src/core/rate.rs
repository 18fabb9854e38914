//! Spot-price driven setpoint decreases. Two strategies share one outcome
//! type: the windowed optimizer plan, and a plain top-N-priciest-hours match.
//! The windowed plan takes priority when both are configured.

use std::fmt::{Display, Formatter};

use chrono::{NaiveDateTime, Timelike};

use crate::{
    api::prices::HourlyPrices,
    config::RatesConfig,
    core::optimizer::{self, HourSlot},
    prelude::*,
    quantity::Ore,
    store::{self, RateRecord, RecordKind, SettingsStore},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateUsage {
    Off,
    /// Decrease in effect this hour.
    Set,
    /// Plan-enforced pause between decrease hours.
    Pause,
    /// An earlier decrease must be undone.
    Reset {
        /// The undo coincides with a pause hour.
        paused: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateOutcome {
    pub usage: RateUsage,
    /// New decrease on `Set`, the stored decrease to undo on `Reset`.
    pub decrease: i32,
    /// Decrease already applied by an earlier run.
    pub previous: i32,
    /// This hour's price was under the threshold.
    pub rate_too_low: Option<Ore>,
}

impl RateOutcome {
    const fn inactive() -> Self {
        Self { usage: RateUsage::Off, decrease: 0, previous: 0, rate_too_low: None }
    }
}

impl Display for RateOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.usage {
            RateUsage::Off => write!(f, "off")?,
            RateUsage::Set => write!(f, "set_hour")?,
            RateUsage::Pause => write!(f, "hour_rate_paus")?,
            RateUsage::Reset { paused: false } => write!(f, "reset_hour")?,
            RateUsage::Reset { paused: true } => write!(f, "reset_hour:hour_rate_paus")?,
        }
        if let Some(price) = self.rate_too_low {
            write!(f, ":rate_too_low={:.2}", price.as_crowns())?;
        }
        Ok(())
    }
}

pub struct RateAdjuster<'a> {
    pub config: &'a RatesConfig,
    pub now: NaiveDateTime,
}

impl RateAdjuster<'_> {
    /// Decide this hour's rate action. `prices` is `None` when the price
    /// feed is missing or invalid, which disables both strategies for the
    /// run.
    pub fn adjust(
        &self,
        prices: Option<&HourlyPrices>,
        settings: &mut impl SettingsStore,
    ) -> Result<RateOutcome> {
        let Some(prices) = prices else {
            return Ok(RateOutcome::inactive());
        };
        if self.config.use_hourly_rates {
            self.windowed(prices, settings)
        } else if self.config.top_hours > 0 {
            self.top(prices, settings)
        } else {
            Ok(RateOutcome::inactive())
        }
    }

    fn threshold(&self) -> Ore {
        Ore::from_crowns(self.config.only_decrease_when_rate_above)
    }

    fn windowed(
        &self,
        prices: &HourlyPrices,
        settings: &mut impl SettingsStore,
    ) -> Result<RateOutcome> {
        let plan = optimizer::merged_plan(prices, &self.config.decrease_windows)?;
        let previous: Option<RateRecord> = store::load(settings, RecordKind::HourlyRate)?;
        let previous = previous.map_or(0, |record| record.decrease);

        let mut paused = false;
        let mut rate_too_low = None;
        match plan.slot(self.now.hour()) {
            // A zero price means the hour was missing from the feed; it never
            // triggers a decrease.
            HourSlot::Decrease(price) if price > Ore::ZERO => {
                if self.threshold() < price {
                    let decrease = self.config.decrease_grades;
                    self.save(settings, RecordKind::HourlyRate, decrease)?;
                    return Ok(RateOutcome {
                        usage: RateUsage::Set,
                        decrease,
                        previous,
                        rate_too_low: None,
                    });
                }
                rate_too_low = Some(price);
            }
            HourSlot::Pause => paused = true,
            HourSlot::Decrease(_) | HourSlot::Unset => {}
        }

        let outcome = if previous > 0 {
            RateOutcome {
                usage: RateUsage::Reset { paused },
                decrease: previous,
                previous,
                rate_too_low,
            }
        } else if paused {
            RateOutcome { usage: RateUsage::Pause, decrease: 0, previous, rate_too_low }
        } else {
            RateOutcome { usage: RateUsage::Off, decrease: 0, previous, rate_too_low }
        };
        Ok(outcome)
    }

    fn top(&self, prices: &HourlyPrices, settings: &mut impl SettingsStore) -> Result<RateOutcome> {
        let previous: Option<RateRecord> = store::load(settings, RecordKind::TopRate)?;
        let previous = previous.map_or(0, |record| record.decrease);

        let hour = self.now.hour();
        let top_price = prices
            .top_hours(self.config.top_hours as usize)
            .into_iter()
            .find(|(top_hour, price)| *top_hour == hour && *price != Ore::ZERO)
            .map(|(_, price)| price);
        if let Some(price) = top_price {
            if self.threshold() < price {
                let decrease = self.config.decrease_grades;
                self.save(settings, RecordKind::TopRate, decrease)?;
                return Ok(RateOutcome {
                    usage: RateUsage::Set,
                    decrease,
                    previous,
                    rate_too_low: None,
                });
            }
        }

        let outcome = if previous > 0 {
            RateOutcome {
                usage: RateUsage::Reset { paused: false },
                decrease: previous,
                previous,
                rate_too_low: None,
            }
        } else {
            RateOutcome::inactive()
        };
        Ok(outcome)
    }

    fn save(&self, settings: &mut impl SettingsStore, kind: RecordKind, decrease: i32) -> Result {
        store::save(
            settings,
            kind,
            &RateRecord { date: self.now.date(), hour: self.now.hour(), decrease },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::store::MemoryStore;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 17).unwrap().and_hms_opt(hour, 5, 0).unwrap()
    }

    fn config() -> RatesConfig {
        RatesConfig {
            use_hourly_rates: true,
            decrease_windows: vec![(7, 11)],
            decrease_grades: 2,
            top_hours: 0,
            only_decrease_when_rate_above: 1.0,
        }
    }

    fn prices() -> HourlyPrices {
        // Hour 9 is cheapest within the window, so the plan pauses there.
        let entries = [(7, 150.0), (8, 300.0), (9, 80.0), (10, 280.0)];
        HourlyPrices::new(
            (0..24)
                .map(|hour| {
                    let price = entries
                        .iter()
                        .find(|(h, _)| *h == hour)
                        .map_or(50.0, |(_, price)| *price);
                    (hour, Ore(price))
                })
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_windowed_set_hour() -> Result {
        let config = config();
        let mut settings = MemoryStore::default();
        let outcome = RateAdjuster { config: &config, now: at(8) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Set);
        assert_eq!(outcome.decrease, 2);
        assert_eq!(outcome.to_string(), "set_hour");
        assert!(store::load::<RateRecord>(&settings, RecordKind::HourlyRate)?.is_some());
        Ok(())
    }

    #[test]
    fn test_windowed_pause_after_set() -> Result {
        let config = config();
        let mut settings = MemoryStore::default();
        let adjuster = RateAdjuster { config: &config, now: at(8) };
        adjuster.adjust(Some(&prices()), &mut settings)?;

        let outcome = RateAdjuster { config: &config, now: at(9) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Reset { paused: true });
        assert_eq!(outcome.decrease, 2);
        assert_eq!(outcome.to_string(), "reset_hour:hour_rate_paus");
        Ok(())
    }

    #[test]
    fn test_windowed_pause_without_history() -> Result {
        let config = config();
        let mut settings = MemoryStore::default();
        let outcome = RateAdjuster { config: &config, now: at(9) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Pause);
        assert_eq!(outcome.to_string(), "hour_rate_paus");
        Ok(())
    }

    #[test]
    fn test_windowed_reset_outside_window() -> Result {
        let config = config();
        let mut settings = MemoryStore::default();
        RateAdjuster { config: &config, now: at(8) }.adjust(Some(&prices()), &mut settings)?;

        let outcome = RateAdjuster { config: &config, now: at(12) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Reset { paused: false });
        assert_eq!(outcome.to_string(), "reset_hour");
        Ok(())
    }

    #[test]
    fn test_windowed_rate_too_low() -> Result {
        let mut config = config();
        config.only_decrease_when_rate_above = 3.5;
        let mut settings = MemoryStore::default();
        let outcome = RateAdjuster { config: &config, now: at(8) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Off);
        assert_eq!(outcome.to_string(), "off:rate_too_low=3.00");
        assert!(store::load::<RateRecord>(&settings, RecordKind::HourlyRate)?.is_none());
        Ok(())
    }

    #[test]
    fn test_missing_prices_disable_the_strategies() -> Result {
        let config = config();
        let mut settings = MemoryStore::default();
        let outcome = RateAdjuster { config: &config, now: at(8) }.adjust(None, &mut settings)?;
        assert_eq!(outcome, RateOutcome::inactive());
        Ok(())
    }

    #[test]
    fn test_top_hours_set_and_reset() -> Result {
        let config = RatesConfig {
            use_hourly_rates: false,
            decrease_windows: vec![],
            decrease_grades: 2,
            top_hours: 2,
            only_decrease_when_rate_above: 1.0,
        };
        let mut settings = MemoryStore::default();
        let prices = prices();

        // Hour 8 is among the two priciest hours, hour 7 is not.
        let outcome = RateAdjuster { config: &config, now: at(8) }
            .adjust(Some(&prices), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Set);
        assert!(store::load::<RateRecord>(&settings, RecordKind::TopRate)?.is_some());

        let outcome = RateAdjuster { config: &config, now: at(7) }
            .adjust(Some(&prices), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Reset { paused: false });
        assert_eq!(outcome.decrease, 2);
        Ok(())
    }

    #[test]
    fn test_top_hours_below_threshold_stays_off() -> Result {
        let config = RatesConfig {
            use_hourly_rates: false,
            decrease_windows: vec![],
            decrease_grades: 2,
            top_hours: 2,
            only_decrease_when_rate_above: 9.0,
        };
        let mut settings = MemoryStore::default();
        let outcome = RateAdjuster { config: &config, now: at(8) }
            .adjust(Some(&prices()), &mut settings)?;
        assert_eq!(outcome.usage, RateUsage::Off);
        Ok(())
    }
}
