//! Short-range forecast cache: one line per forecast hour, keyed
//! `<date>_<hour>` and carrying the raw air temperature and wind speed.

use std::{collections::BTreeMap, path::PathBuf};

use chrono::NaiveDateTime;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForecastPoint {
    /// Air temperature in °C.
    pub air_temp: f64,
    /// Wind speed in m/s, unscaled.
    pub wind_speed: f64,
}

/// Cache key for the forecast hour, for example `2023-01-17_20`.
pub fn forecast_key(stamp: NaiveDateTime) -> String {
    stamp.format("%Y-%m-%d_%H").to_string()
}

/// Hourly forecast points, refreshable from a provider.
pub trait ForecastSource {
    fn refresh(&self) -> Result;
    fn points(&self) -> Result<BTreeMap<String, ForecastPoint>>;
}

/// Cache file alone, with no provider behind it. Also the storage layer of
/// the live source.
pub struct FileForecasts {
    path: PathBuf,
}

impl FileForecasts {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn store(&self, points: &BTreeMap<String, ForecastPoint>) -> Result {
        std::fs::write(&self.path, render_cache(points))
            .with_context(|| format!("failed to write `{}`", self.path.display()))
    }
}

impl ForecastSource for FileForecasts {
    /// The file is maintained by someone else; nothing to refresh.
    fn refresh(&self) -> Result {
        Ok(())
    }

    fn points(&self) -> Result<BTreeMap<String, ForecastPoint>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read `{}`", self.path.display()))?;
        parse_cache(&contents)
            .with_context(|| format!("malformed forecast cache `{}`", self.path.display()))
    }
}

fn parse_cache(contents: &str) -> Result<BTreeMap<String, ForecastPoint>> {
    let mut points = BTreeMap::new();
    for line in contents.lines().filter(|line| !line.trim().is_empty()) {
        let (key, values) =
            line.trim().split_once(':').with_context(|| format!("no `:` in `{line}`"))?;
        let (air_temp, wind_speed) =
            values.split_once(',').with_context(|| format!("no `,` in `{line}`"))?;
        let point = ForecastPoint {
            air_temp: air_temp.parse().with_context(|| format!("bad temperature in `{line}`"))?,
            wind_speed: wind_speed.parse().with_context(|| format!("bad wind in `{line}`"))?,
        };
        points.insert(key.to_string(), point);
    }
    Ok(points)
}

fn render_cache(points: &BTreeMap<String, ForecastPoint>) -> String {
    points
        .iter()
        .map(|(key, point)| format!("{key}:{},{}\n", point.air_temp, point.wind_speed))
        .collect()
}

/// In-memory substitute for tests.
#[derive(Default)]
pub struct MemoryForecasts {
    points: BTreeMap<String, ForecastPoint>,
    pub fail_refresh: bool,
}

impl From<BTreeMap<String, ForecastPoint>> for MemoryForecasts {
    fn from(points: BTreeMap<String, ForecastPoint>) -> Self {
        Self { points, fail_refresh: false }
    }
}

impl ForecastSource for MemoryForecasts {
    fn refresh(&self) -> Result {
        if self.fail_refresh {
            bail!("refresh failed on purpose");
        }
        Ok(())
    }

    fn points(&self) -> Result<BTreeMap<String, ForecastPoint>> {
        Ok(self.points.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_forecast_key_zero_pads_the_hour() {
        let stamp =
            NaiveDate::from_ymd_opt(2023, 1, 17).unwrap().and_hms_opt(9, 0, 0).unwrap();
        assert_eq!(forecast_key(stamp), "2023-01-17_09");
    }

    #[test]
    fn test_parse_cache() -> Result {
        let points = parse_cache("2023-01-17_20:0.8,6.8\n2023-01-17_21:-1.2,7.4\n")?;
        assert_eq!(points.len(), 2);
        assert_eq!(
            points.get("2023-01-17_21"),
            Some(&ForecastPoint { air_temp: -1.2, wind_speed: 7.4 }),
        );
        Ok(())
    }

    #[test]
    fn test_render_round_trips() -> Result {
        let points = BTreeMap::from([(
            "2023-01-17_20".to_string(),
            ForecastPoint { air_temp: 0.8, wind_speed: 6.8 },
        )]);
        assert_eq!(parse_cache(&render_cache(&points))?, points);
        Ok(())
    }

    #[test]
    fn test_malformed_line_rejected() {
        assert!(parse_cache("2023-01-17_20 0.8 6.8\n").is_err());
        assert!(parse_cache("2023-01-17_20:0.8;6.8\n").is_err());
    }
}
