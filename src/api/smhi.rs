//! SMHI point forecast. Each refresh pulls the full forecast for the
//! configured coordinates and rewrites the local cache with today's and
//! tomorrow's hours.

use std::{collections::BTreeMap, thread::sleep, time::Duration};

use chrono::{Local, NaiveDate};
use serde::Deserialize;

use crate::{
    api::forecast::{FileForecasts, ForecastPoint, ForecastSource},
    prelude::*,
};

const ATTEMPTS: usize = 2;
const RETRY_DELAY: Duration = Duration::from_secs(55);

pub struct Smhi {
    cache: FileForecasts,
    url: String,
}

impl Smhi {
    pub fn new(cache: FileForecasts, latitude: f64, longitude: f64) -> Self {
        let url = format!(
            "https://opendata-download-metfcst.smhi.se/api/category/pmp3g/version/2/geotype/point/lon/{longitude}/lat/{latitude}/data.json",
        );
        Self { cache, url }
    }

    fn fetch(&self) -> Result<Forecast> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_fetch() {
                Ok(forecast) => break Ok(forecast),
                Err(error) if attempts < ATTEMPTS => {
                    warn!(attempts, error = format!("{error:#}"), "fetch failed, will retry");
                    sleep(RETRY_DELAY);
                }
                Err(error) => break Err(error),
            }
        }
    }

    fn try_fetch(&self) -> Result<Forecast> {
        let forecast = ureq::get(&self.url)
            .call()
            .context("failed to call the forecast service")?
            .body_mut()
            .read_json()
            .context("failed to deserialize the forecast")?;
        Ok(forecast)
    }
}

impl ForecastSource for Smhi {
    fn refresh(&self) -> Result {
        let forecast = self.fetch()?;
        let points = extract_points(&forecast, Local::now().date_naive())?;
        info!(n_points = points.len(), "refreshed the forecast");
        self.cache.store(&points)
    }

    fn points(&self) -> Result<BTreeMap<String, ForecastPoint>> {
        self.cache.points()
    }
}

#[derive(Deserialize)]
struct Forecast {
    #[serde(rename = "timeSeries")]
    time_series: Vec<TimeSeriesEntry>,
}

#[derive(Deserialize)]
struct TimeSeriesEntry {
    /// For example, `2023-01-17T20:00:00Z`.
    #[serde(rename = "validTime")]
    valid_time: String,

    parameters: Vec<Parameter>,
}

impl TimeSeriesEntry {
    fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .and_then(|parameter| parameter.values.first().copied())
    }
}

#[derive(Deserialize)]
struct Parameter {
    name: String,
    values: Vec<f64>,
}

/// Today's and tomorrow's hours, keyed the way the cache and the evaluator
/// expect. The key is taken verbatim from the timestamp.
fn extract_points(forecast: &Forecast, today: NaiveDate) -> Result<BTreeMap<String, ForecastPoint>> {
    let tomorrow = today.succ_opt().context("no tomorrow")?.to_string();
    let today = today.to_string();

    let mut points = BTreeMap::new();
    for entry in &forecast.time_series {
        let (date, time) = entry
            .valid_time
            .split_once('T')
            .with_context(|| format!("malformed timestamp `{}`", entry.valid_time))?;
        if date != today && date != tomorrow {
            continue;
        }
        let hour = time.split(':').next().unwrap_or_default();
        let (Some(air_temp), Some(wind_speed)) =
            (entry.parameter("t"), entry.parameter("ws"))
        else {
            continue;
        };
        points.insert(format!("{date}_{hour}"), ForecastPoint { air_temp, wind_speed });
    }
    Ok(points)
}
