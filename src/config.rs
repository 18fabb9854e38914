//! TOML configuration, validated at startup. Validation failures are fatal:
//! the run must not reach the pump with a half-understood configuration.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::Weekday;
use serde::Deserialize;

use crate::{core::schedule::DaySchedule, prelude::*};

pub const MIN_SETPOINT: i32 = 5;
pub const MAX_SETPOINT: i32 = 25;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Months during which the steering runs at all.
    pub months: Vec<u32>,

    /// Hard upper bound on anything written to the pump.
    #[serde(default = "default_max_indoor_temp")]
    pub max_indoor_temp: i32,

    pub schedule: ScheduleConfig,
    pub rates: RatesConfig,
    pub windchill: WindchillConfig,
    pub pump: PumpConfig,
    pub paths: PathsConfig,
}

const fn default_max_indoor_temp() -> i32 {
    25
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Default day plan, hour → setpoint. TOML keys are strings.
    pub default: BTreeMap<String, i32>,

    /// Weekday-specific overrides keyed `mon`…`sun`.
    #[serde(default)]
    pub weekdays: BTreeMap<String, BTreeMap<String, i32>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatesConfig {
    /// Windowed-optimizer strategy. Takes priority over `top_hours`.
    #[serde(default)]
    pub use_hourly_rates: bool,

    /// `[start, stop)` hour windows for the optimizer.
    #[serde(default)]
    pub decrease_windows: Vec<(u32, u32)>,

    /// Degrees to shave off during a decrease hour.
    pub decrease_grades: i32,

    /// Top-N-priciest-hours strategy; 0 disables it.
    #[serde(default)]
    pub top_hours: u32,

    /// Threshold in crowns; no decrease at or below it.
    pub only_decrease_when_rate_above: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindchillConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Minimum apparent-temperature depression before any action.
    pub min_apparent_temp_diff: f64,

    /// Cap on the increase in whole degrees.
    pub max_increase: i32,

    /// No windchill action when the scheduled setpoint is below this.
    pub only_when_setpoint_above: i32,

    /// Forecast wind speed is scaled by this before the formula.
    #[serde(default = "default_wind_force_factor")]
    pub wind_force_factor: f64,

    /// Which future hour's forecast to evaluate.
    #[serde(default = "default_lookahead_hours")]
    pub lookahead_hours: u32,

    pub latitude: f64,
    pub longitude: f64,
}

const fn default_wind_force_factor() -> f64 {
    1.0
}

const fn default_lookahead_hours() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase", deny_unknown_fields)]
pub enum PumpConfig {
    /// Thermia Modbus TCP, e.g. `address = "192.168.1.20:502"`.
    Modbus { address: String },

    /// Thermia online REST API. The bearer token comes from the
    /// `THERMIA_ACCESS_TOKEN` environment variable when not set here.
    Online {
        api_base_url: String,
        installation_id: u64,
        access_token: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory holding the settings file, price/forecast caches and logs.
    pub state_dir: PathBuf,

    /// Optional external indoor sensor reading file.
    #[serde(default)]
    pub indoor_sensor_file: Option<PathBuf>,
}

impl PathsConfig {
    pub fn settings_file(&self) -> PathBuf {
        self.state_dir.join("settings.json")
    }

    pub fn hourly_rates_file(&self) -> PathBuf {
        self.state_dir.join("hourly_rates")
    }

    pub fn forecast_file(&self) -> PathBuf {
        self.state_dir.join("forecast_short")
    }

    pub fn run_summary_file(&self) -> PathBuf {
        self.state_dir.join("run_summary.log")
    }

    pub fn windchill_stats_file(&self) -> PathBuf {
        self.state_dir.join("windchill_stats.log")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("malformed configuration `{}`", path.display()))?;
        config.validate().with_context(|| format!("invalid configuration `{}`", path.display()))?;
        Ok(config)
    }

    /// The day plan for `weekday`, and whether it came from a
    /// weekday-specific table.
    pub fn schedule_for(&self, weekday: Weekday) -> Result<(DaySchedule, bool)> {
        let key = weekday_key(weekday);
        match self.schedule.weekdays.get(key) {
            Some(entries) => Ok((parse_day_schedule(entries)?, true)),
            None => Ok((parse_day_schedule(&self.schedule.default)?, false)),
        }
    }

    pub fn validate(&self) -> Result {
        ensure!(!self.months.is_empty(), "no active months configured");
        for month in &self.months {
            ensure!((1..=12).contains(month), "month {month} out of range");
        }
        ensure!(
            (MIN_SETPOINT..=MAX_SETPOINT).contains(&self.max_indoor_temp),
            "max_indoor_temp {} out of range {MIN_SETPOINT}–{MAX_SETPOINT}",
            self.max_indoor_temp,
        );

        let default = parse_day_schedule(&self.schedule.default)?;
        ensure!(!default.is_empty(), "the default schedule has no entries");
        for (key, entries) in &self.schedule.weekdays {
            ensure!(
                ["mon", "tue", "wed", "thu", "fri", "sat", "sun"].contains(&key.as_str()),
                "unknown weekday `{key}`",
            );
            let schedule = parse_day_schedule(entries)
                .with_context(|| format!("weekday `{key}` schedule"))?;
            ensure!(!schedule.is_empty(), "weekday `{key}` schedule has no entries");
        }

        self.validate_rates()?;
        self.validate_windchill()
    }

    fn validate_rates(&self) -> Result {
        let rates = &self.rates;
        ensure!(
            (0..=5).contains(&rates.decrease_grades),
            "decrease_grades {} out of range 0–5",
            rates.decrease_grades,
        );
        ensure!(rates.top_hours <= 24, "top_hours {} out of range 0–24", rates.top_hours);
        if rates.use_hourly_rates {
            ensure!(!rates.decrease_windows.is_empty(), "use_hourly_rates without windows");
        }
        let mut covered = [false; 24];
        for &(start, stop) in &rates.decrease_windows {
            ensure!(start < stop, "window {start}-{stop}: start must precede stop");
            ensure!(stop <= 24, "window {start}-{stop}: stop beyond 24");
            for hour in start..stop {
                ensure!(!covered[hour as usize], "window {start}-{stop} overlaps hour {hour}");
                covered[hour as usize] = true;
            }
        }
        Ok(())
    }

    fn validate_windchill(&self) -> Result {
        let windchill = &self.windchill;
        ensure!(
            (0.5..=1.5).contains(&windchill.wind_force_factor),
            "wind_force_factor {} out of range 0.5–1.5",
            windchill.wind_force_factor,
        );
        ensure!(
            windchill.lookahead_hours < 24,
            "lookahead_hours {} out of range 0–23",
            windchill.lookahead_hours,
        );
        ensure!(
            (0..=10).contains(&windchill.max_increase),
            "windchill max_increase {} out of range 0–10",
            windchill.max_increase,
        );
        ensure!(windchill.min_apparent_temp_diff >= 0.0, "min_apparent_temp_diff is negative");
        Ok(())
    }
}

fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn parse_day_schedule(entries: &BTreeMap<String, i32>) -> Result<DaySchedule> {
    let mut schedule = BTreeMap::new();
    for (key, &setpoint) in entries {
        let hour: u32 =
            key.parse().with_context(|| format!("schedule hour `{key}` is not a number"))?;
        ensure!(hour < 24, "schedule hour {hour} out of range 0–23");
        ensure!(
            (MIN_SETPOINT..=MAX_SETPOINT).contains(&setpoint),
            "setpoint {setpoint} at hour {hour} out of range {MIN_SETPOINT}–{MAX_SETPOINT}",
        );
        schedule.insert(hour, setpoint);
    }
    Ok(DaySchedule::new(schedule))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            months = [1, 2, 3, 4, 10, 11, 12]

            [schedule]
            default = { "6" = 20, "20" = 15 }
            [schedule.weekdays]
            sat = { "8" = 21, "22" = 16 }

            [rates]
            use_hourly_rates = true
            decrease_windows = [[7, 11], [17, 21]]
            decrease_grades = 2
            only_decrease_when_rate_above = 1.5

            [windchill]
            enabled = true
            min_apparent_temp_diff = 3.0
            max_increase = 4
            only_when_setpoint_above = 18
            latitude = 56.789
            longitude = 12.34

            [pump]
            transport = "modbus"
            address = "192.168.1.20:502"

            [paths]
            state_dir = "/var/lib/gradvis"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() -> Result {
        base_config().validate()
    }

    #[test]
    fn test_weekday_schedule_selected() -> Result {
        let config = base_config();
        let (saturday, specific) = config.schedule_for(Weekday::Sat)?;
        assert!(specific);
        assert_eq!(saturday.get(8), Some(21));

        let (monday, specific) = config.schedule_for(Weekday::Mon)?;
        assert!(!specific);
        assert_eq!(monday.get(6), Some(20));
        Ok(())
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let mut config = base_config();
        config.rates.decrease_windows = vec![(7, 11), (10, 12)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_setpoint_out_of_range_rejected() {
        let mut config = base_config();
        config.schedule.default.insert("12".to_string(), 30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backwards_window_rejected() {
        let mut config = base_config();
        config.rates.decrease_windows = vec![(11, 7)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wind_force_factor_bounds() {
        let mut config = base_config();
        config.windchill.wind_force_factor = 2.0;
        assert!(config.validate().is_err());
    }
}
