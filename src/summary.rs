//! Append-only run logs: one fixed-width line per hourly run, plus a
//! separate statistics line per windchill evaluation.

use std::{
    fmt::{Display, Formatter},
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
};

use chrono::NaiveDateTime;

use crate::{core::windchill::Assessment, prelude::*};

/// What the run changed, one digit per mechanism in the summary line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChangeFlags {
    /// `1` scheduled change applied, `-1` retry of a failed run, `0` neither.
    pub scheduled: i8,
    pub rate_reset: bool,
    pub windchill_reset: bool,
    pub rate_set: bool,
    pub windchill_set: bool,
    pub manual: bool,
}

impl Display for ChangeFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}",
            self.scheduled,
            u8::from(self.rate_reset),
            u8::from(self.windchill_reset),
            u8::from(self.rate_set),
            u8::from(self.windchill_set),
            u8::from(self.manual),
        )
    }
}

impl ChangeFlags {
    fn label(self) -> &'static str {
        if self.manual {
            "Set_manually"
        } else if self.scheduled == 1 {
            "New_schema"
        } else {
            "No_schema"
        }
    }
}

/// One line of the run summary log.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub stamp: NaiveDateTime,
    /// `L1` manual override, `L2` idle hour, `L3` a full run.
    pub call_id: &'static str,
    pub flags: ChangeFlags,
    pub outdoor_temp: i32,
    pub room_temp: i32,
    pub sensor_temp: Option<f64>,
    pub pump_setpoint: i32,
    pub new_setpoint: i32,
    /// The applied rate delta, not the full decrease.
    pub rate_decrease: i32,
    pub rate_usage: String,
    pub windchill_increase: i32,
    pub windchill_usage: String,
}

impl RunSummary {
    pub fn render(&self) -> String {
        let sensor = self.sensor_temp.map_or_else(|| "-273".to_string(), |temp| temp.to_string());
        format!(
            "{:16} {:2} {:6} {:12} out:{:<3} room:{:<3} sensor:{:3} pump:{:<2} new:{:<2} hr_rate:{} {:8} windchill:{} {:10}",
            self.stamp.format("%Y-%m-%d_%H:%M"),
            self.call_id,
            self.flags.to_string(),
            self.flags.label(),
            self.outdoor_temp,
            self.room_temp,
            sensor,
            self.pump_setpoint,
            self.new_setpoint,
            self.rate_decrease,
            self.rate_usage,
            self.windchill_increase,
            self.windchill_usage,
        )
    }
}

/// One line of the windchill statistics log. `applied_increase` is the
/// integer degrees actually in effect after the evaluation.
pub fn windchill_stats_line(
    stamp: NaiveDateTime,
    hour: u32,
    assessment: &Assessment,
    wind_force_factor: f64,
    applied_increase: i32,
) -> String {
    let (forecast_temp, forecast_wind) =
        assessment.forecast.map_or((0.0, 0.0), |point| (point.air_temp, point.wind_speed));
    let (apparent, diff) =
        assessment.point.map_or((0.0, 0.0), |point| (point.apparent, point.diff));
    format!(
        "{} h:{hour:>2} last_indoor_t:{:>2} forec_t:{forecast_temp:>4.1} forec_wind:{forecast_wind:>4.1} factor:{wind_force_factor:>2.1} windchill_t:{apparent:>4.1} diff:{diff:>4.1} wanted_inc:{:>4.1} got_inc:{applied_increase:>4} {}",
        stamp.format("%Y-%m-%d_%H:%M"),
        assessment.base_setpoint,
        assessment.wanted,
        assessment.evaluation.label(),
    )
}

/// Append-only log destination.
pub trait LogSink {
    fn append(&mut self, line: &str) -> Result;
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LogSink for FileSink {
    fn append(&mut self, line: &str) -> Result {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open `{}`", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to `{}`", self.path.display()))
    }
}

/// In-memory substitute for tests.
#[derive(Default)]
pub struct MemorySink(pub Vec<String>);

impl LogSink for MemorySink {
    fn append(&mut self, line: &str) -> Result {
        self.0.push(line.to_string());
        Ok(())
    }
}
