//! Windchill compensation: when the wind makes the apparent temperature fall
//! well below the forecast air temperature, the indoor setpoint is bumped so
//! the heat curve compensates before the cold arrives.

use std::fmt::{Display, Formatter};

use chrono::{NaiveDateTime, TimeDelta, Timelike};

use crate::{
    api::forecast::{ForecastPoint, ForecastSource, forecast_key},
    config::WindchillConfig,
    prelude::*,
    store::{self, RecordKind, SettingsStore, WindchillRecord},
};

/// Apparent temperature per the standard windchill formula. `wind` is the
/// (already scaled) wind speed in m/s.
pub fn apparent_temperature(air: f64, wind: f64) -> f64 {
    let w = wind.powf(0.16);
    13.12 + 0.6215 * air - 13.956 * w + 0.48669 * air * w
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Integer degrees, half away from zero. The small epsilon keeps values that
/// land exactly on .5 after float noise from flipping downwards.
pub fn round_increase(value: f64) -> i32 {
    (value + 0.001).round() as i32
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindchillPoint {
    pub apparent: f64,
    /// `apparent − air`; non-positive whenever the wind blows.
    pub diff: f64,
}

impl WindchillPoint {
    pub fn from_forecast(air: f64, scaled_wind: f64) -> Self {
        let apparent = round1(apparent_temperature(air, scaled_wind));
        Self { apparent, diff: round1(apparent - air) }
    }
}

/// Terminal outcome of one windchill evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Evaluation {
    /// Scheduled setpoint below the configured floor; no action.
    BelowFloor,
    /// Apparent-temperature depression below the configured minimum.
    DiffTooSmall,
    /// Full wanted increase granted.
    Granted,
    /// Capped so the simulated outdoor temperature stays above −25°.
    CappedBySupplyLine,
    /// Capped by the configured maximum increase.
    CappedByMax,
    /// Forecast cache exists but is empty.
    CacheEmpty,
    /// Refreshing the forecast failed.
    RefreshFailed,
    /// The forecast provider itself errored.
    ProviderFailed,
    /// The wanted hour is missing from the forecast.
    HourMissing,
}

impl Evaluation {
    pub const fn code(self) -> i8 {
        match self {
            Self::BelowFloor => 1,
            Self::DiffTooSmall => 2,
            Self::Granted => 3,
            Self::CappedBySupplyLine => 4,
            Self::CappedByMax => 5,
            Self::CacheEmpty => -1,
            Self::RefreshFailed => -2,
            Self::ProviderFailed => -3,
            Self::HourMissing => -4,
        }
    }

    /// Upstream data unavailable: no new recommendation can be made and the
    /// previously applied increase is preserved for now.
    pub const fn is_unavailable(self) -> bool {
        self.code() < 0
    }

    pub const fn grants_increase(self) -> bool {
        matches!(self, Self::Granted | Self::CappedBySupplyLine | Self::CappedByMax)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::BelowFloor => "setpoint below floor",
            Self::DiffTooSmall => "apparent diff too small",
            Self::Granted => "full increase",
            Self::CappedBySupplyLine => "capped by supply line rule",
            Self::CappedByMax => "capped by max increase",
            Self::CacheEmpty => "forecast cache empty",
            Self::RefreshFailed => "forecast refresh failed",
            Self::ProviderFailed => "forecast provider failed",
            Self::HourMissing => "forecast hour missing",
        }
    }
}

/// Everything one evaluation looked at, for the statistics log.
#[derive(Clone, Copy, Debug)]
pub struct Assessment {
    pub evaluation: Evaluation,
    pub base_setpoint: i32,
    pub forecast: Option<ForecastPoint>,
    pub point: Option<WindchillPoint>,
    pub wanted: f64,
    /// Final increase after the caps, before integer rounding.
    pub increase: f64,
}

impl Assessment {
    const fn no_action(evaluation: Evaluation, base_setpoint: i32) -> Self {
        Self { evaluation, base_setpoint, forecast: None, point: None, wanted: 0.0, increase: 0.0 }
    }
}

pub struct Evaluator<'a> {
    pub config: &'a WindchillConfig,
    pub now: NaiveDateTime,
}

impl Evaluator<'_> {
    /// Evaluate the forecast `lookahead_hours` ahead against the base
    /// setpoint currently scheduled.
    pub fn assess(&self, base_setpoint: i32, source: &dyn ForecastSource) -> Assessment {
        if base_setpoint < self.config.only_when_setpoint_above {
            debug!(
                base_setpoint,
                floor = self.config.only_when_setpoint_above,
                "scheduled setpoint below the windchill floor",
            );
            return Assessment::no_action(Evaluation::BelowFloor, base_setpoint);
        }

        if let Err(error) = source.refresh() {
            warn!(error = format!("{error:#}"), "failed to refresh the forecast");
            return Assessment::no_action(Evaluation::RefreshFailed, base_setpoint);
        }
        let points = match source.points() {
            Ok(points) => points,
            Err(error) => {
                warn!(error = format!("{error:#}"), "failed to read the forecast");
                return Assessment::no_action(Evaluation::ProviderFailed, base_setpoint);
            }
        };
        if points.is_empty() {
            return Assessment::no_action(Evaluation::CacheEmpty, base_setpoint);
        }

        // Wraps across midnight into tomorrow's forecast.
        let wanted_stamp =
            self.now + TimeDelta::hours(i64::from(self.config.lookahead_hours));
        let Some(forecast) = points.get(&forecast_key(wanted_stamp)).copied() else {
            debug!(key = forecast_key(wanted_stamp), "hour not present in the forecast");
            return Assessment::no_action(Evaluation::HourMissing, base_setpoint);
        };

        let scaled_wind = round1(forecast.wind_speed * self.config.wind_force_factor);
        let point = WindchillPoint::from_forecast(forecast.air_temp, scaled_wind);
        let looked_at = ForecastPoint { air_temp: forecast.air_temp, wind_speed: scaled_wind };

        if point.diff.abs() < self.config.min_apparent_temp_diff.abs() {
            return Assessment {
                evaluation: Evaluation::DiffTooSmall,
                base_setpoint,
                forecast: Some(looked_at),
                point: Some(point),
                wanted: 0.0,
                increase: 0.0,
            };
        }

        // The heat curve moves the supply line roughly 1° per missing outdoor
        // degree and 2.5° per indoor degree, hence the 2.5 divisors: one
        // indoor degree compensates 2.5 apparent degrees, and the simulated
        // outdoor temperature must stay above −25°.
        let wanted = point.diff.abs() / 2.5;
        let max_allowed = 25.0 - forecast.air_temp.abs() / 2.5;

        let mut increase = wanted;
        let mut evaluation = Evaluation::Granted;
        if increase > max_allowed {
            increase = max_allowed;
            evaluation = Evaluation::CappedBySupplyLine;
        }
        if increase > f64::from(self.config.max_increase) {
            increase = f64::from(self.config.max_increase);
            evaluation = Evaluation::CappedByMax;
        }

        Assessment {
            evaluation,
            base_setpoint,
            forecast: Some(looked_at),
            point: Some(point),
            wanted,
            increase,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WindchillUsage {
    Off,
    Set,
    Reset,
}

impl Display for WindchillUsage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Set => write!(f, "set_hour"),
            Self::Reset => write!(f, "reset_hour"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WindchillOutcome {
    pub usage: WindchillUsage,
    /// New increase on `Set`, the stored increase to undo on `Reset`.
    pub increase: i32,
    /// Increase already applied by an earlier run.
    pub previous: i32,
    pub assessment: Assessment,
}

/// Decide this hour's windchill action and keep the stored record in step.
pub fn adjust(
    evaluator: &Evaluator<'_>,
    base_setpoint: i32,
    source: &dyn ForecastSource,
    settings: &mut impl SettingsStore,
) -> Result<WindchillOutcome> {
    let assessment = evaluator.assess(base_setpoint, source);
    let previous: Option<WindchillRecord> = store::load(settings, RecordKind::Windchill)?;
    let previous_increase = previous.map_or(0, |record| record.increase);

    let outcome = if assessment.evaluation.grants_increase() {
        let increase = round_increase(assessment.increase);
        let point = assessment.point.context("granted evaluation without a windchill point")?;
        store::save(
            settings,
            RecordKind::Windchill,
            &WindchillRecord {
                date: evaluator.now.date(),
                hour: evaluator.now.hour(),
                code: assessment.evaluation.code(),
                apparent: point.apparent,
                diff: point.diff,
                increase,
            },
        )?;
        WindchillOutcome {
            usage: WindchillUsage::Set,
            increase,
            previous: previous_increase,
            assessment,
        }
    } else if assessment.evaluation.is_unavailable() {
        // No data to decide on: leave any applied increase alone.
        WindchillOutcome {
            usage: WindchillUsage::Off,
            increase: 0,
            previous: previous_increase,
            assessment,
        }
    } else if previous.is_some() {
        // Codes 1 and 2: the reason for the increase is gone, undo it.
        WindchillOutcome {
            usage: WindchillUsage::Reset,
            increase: previous_increase,
            previous: previous_increase,
            assessment,
        }
    } else {
        WindchillOutcome {
            usage: WindchillUsage::Off,
            increase: 0,
            previous: previous_increase,
            assessment,
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_abs_diff_eq;
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::{api::forecast::MemoryForecasts, store::MemoryStore};

    fn config() -> WindchillConfig {
        WindchillConfig {
            enabled: true,
            min_apparent_temp_diff: 3.0,
            max_increase: 4,
            only_when_setpoint_above: 18,
            wind_force_factor: 1.0,
            lookahead_hours: 1,
            latitude: 56.789,
            longitude: 12.34,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 17).unwrap().and_hms_opt(20, 5, 0).unwrap()
    }

    fn forecast_at_21(air_temp: f64, wind_speed: f64) -> MemoryForecasts {
        MemoryForecasts::from(BTreeMap::from([(
            "2023-01-17_21".to_string(),
            ForecastPoint { air_temp, wind_speed },
        )]))
    }

    #[test]
    fn test_apparent_temperature_below_air_in_wind() {
        let apparent = apparent_temperature(-5.0, 8.0);
        assert!(apparent < -5.0, "apparent {apparent} should be below air temperature");
    }

    #[test]
    fn test_formula_value() {
        assert_abs_diff_eq!(apparent_temperature(-5.0, 8.0), -12.85, epsilon = 0.01);
    }

    #[test]
    fn test_full_increase_granted() {
        // −5° with 8 m/s gives an apparent diff of −7.8: well past the 3°
        // minimum, increase = round(7.8 / 2.5) = 3.
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let assessment = evaluator.assess(20, &forecast_at_21(-5.0, 8.0));
        assert_eq!(assessment.evaluation, Evaluation::Granted);
        assert_eq!(round_increase(assessment.increase), 3);
    }

    #[test]
    fn test_below_floor() {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let assessment = evaluator.assess(15, &forecast_at_21(-5.0, 8.0));
        assert_eq!(assessment.evaluation, Evaluation::BelowFloor);
    }

    #[test]
    fn test_diff_too_small_in_calm_weather() {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let assessment = evaluator.assess(20, &forecast_at_21(-5.0, 1.0));
        assert_eq!(assessment.evaluation, Evaluation::DiffTooSmall);
    }

    #[test]
    fn test_capped_by_configured_max() {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        // Brutal cold: the wanted increase far exceeds the configured 4°.
        let assessment = evaluator.assess(20, &forecast_at_21(-20.0, 15.0));
        assert_eq!(assessment.evaluation, Evaluation::CappedByMax);
        assert_abs_diff_eq!(assessment.increase, 4.0);
    }

    #[test]
    fn test_capped_by_supply_line_rule() {
        let mut config = config();
        config.max_increase = 10;
        let evaluator = Evaluator { config: &config, now: now() };
        // At −40° the supply-line rule allows at most 25 − 16 = 9 degrees.
        let assessment = evaluator.assess(20, &forecast_at_21(-40.0, 20.0));
        assert_eq!(assessment.evaluation, Evaluation::CappedBySupplyLine);
        assert_abs_diff_eq!(assessment.increase, 9.0);
    }

    #[test]
    fn test_missing_hour() {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let source = MemoryForecasts::from(BTreeMap::from([(
            "2023-01-18_09".to_string(),
            ForecastPoint { air_temp: -5.0, wind_speed: 8.0 },
        )]));
        assert_eq!(evaluator.assess(20, &source).evaluation, Evaluation::HourMissing);
    }

    #[test]
    fn test_lookahead_wraps_past_midnight() {
        let config = config();
        let late = NaiveDate::from_ymd_opt(2023, 1, 17)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let evaluator = Evaluator { config: &config, now: late };
        let source = MemoryForecasts::from(BTreeMap::from([(
            "2023-01-18_00".to_string(),
            ForecastPoint { air_temp: -5.0, wind_speed: 8.0 },
        )]));
        assert_eq!(evaluator.assess(20, &source).evaluation, Evaluation::Granted);
    }

    #[test]
    fn test_adjust_set_then_reset() -> Result {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let mut settings = MemoryStore::default();

        let outcome = adjust(&evaluator, 20, &forecast_at_21(-5.0, 8.0), &mut settings)?;
        assert_eq!(outcome.usage, WindchillUsage::Set);
        assert_eq!(outcome.increase, 3);
        assert_eq!(outcome.previous, 0);

        // The wind has died down: the stored increase must be undone.
        let outcome = adjust(&evaluator, 20, &forecast_at_21(-5.0, 1.0), &mut settings)?;
        assert_eq!(outcome.usage, WindchillUsage::Reset);
        assert_eq!(outcome.increase, 3);
        Ok(())
    }

    #[test]
    fn test_adjust_preserves_increase_without_data() -> Result {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let mut settings = MemoryStore::default();
        adjust(&evaluator, 20, &forecast_at_21(-5.0, 8.0), &mut settings)?;

        // Forecast gone: no reset, the stored record stays untouched.
        let outcome = adjust(&evaluator, 20, &MemoryForecasts::default(), &mut settings)?;
        assert_eq!(outcome.usage, WindchillUsage::Off);
        assert_eq!(outcome.assessment.evaluation, Evaluation::CacheEmpty);
        assert_eq!(outcome.previous, 3);
        assert!(store::load::<WindchillRecord>(&settings, RecordKind::Windchill)?.is_some());
        Ok(())
    }

    #[test]
    fn test_adjust_is_idempotent() -> Result {
        let config = config();
        let evaluator = Evaluator { config: &config, now: now() };
        let mut settings = MemoryStore::default();
        let source = forecast_at_21(-5.0, 8.0);

        let first = adjust(&evaluator, 20, &source, &mut settings)?;
        let second = adjust(&evaluator, 20, &source, &mut settings)?;
        assert_eq!(second.usage, WindchillUsage::Set);
        assert_eq!(second.increase, first.increase);
        // Unchanged recommendation: the engine's delta application nets zero.
        assert_eq!(second.increase - second.previous, 0);
        Ok(())
    }
}
