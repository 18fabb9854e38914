//! The hourly decision engine. One run reads the pump, asks the rate and
//! windchill adjusters what this hour needs, resolves the base setpoint from
//! the schedule and commits the result, leaving the settings store in a
//! state the next run can pick up from.

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::{
    api::{
        forecast::ForecastSource,
        prices::HourlyPrices,
        pump::{Pump, PumpReading},
        sensor::SensorReading,
    },
    config::Config,
    core::{
        rate::{RateAdjuster, RateUsage},
        schedule::DaySchedule,
        windchill::{self, Evaluator, WindchillUsage},
    },
    prelude::*,
    store::{self, PendingRecord, RecordKind, SetpointRecord, SettingsStore},
    summary::{ChangeFlags, LogSink, RunSummary, windchill_stats_line},
};

pub struct Engine<'a> {
    pub config: &'a Config,
    pub schedule: &'a DaySchedule,
    pub now: NaiveDateTime,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub call_id: &'static str,
    pub new_setpoint: i32,
    pub wrote_pump: bool,
}

/// Everything one commit needs: the decided setpoint plus the summary line
/// ingredients.
struct Commit {
    flags: ChangeFlags,
    outdoor_temp: i32,
    room_temp: i32,
    sensor_temp: Option<f64>,
    /// Zero when the live value is unknown, which forces the write.
    pump_setpoint: i32,
    new_setpoint: i32,
    rate_usage: String,
    rate_decrease: i32,
    windchill_usage: String,
    windchill_increase: i32,
}

impl Engine<'_> {
    pub fn run<S, P, F, L, M>(
        &self,
        settings: &mut S,
        pump: &mut P,
        forecasts: &F,
        prices: Option<&HourlyPrices>,
        sensor: Option<SensorReading>,
        summary: &mut L,
        stats: &mut M,
    ) -> Result<RunOutcome>
    where
        S: SettingsStore,
        P: Pump,
        F: ForecastSource,
        L: LogSink,
        M: LogSink,
    {
        let hour = self.now.hour();
        let sensor_temp = sensor.map(|reading| reading.temperature);
        let reading = pump.read()?;
        debug!(?reading, hour, "starting the run");

        let rates_configured =
            self.config.rates.use_hourly_rates || self.config.rates.top_hours > 0;
        let rates_active = prices.is_some() && rates_configured;
        let scheduled = self.schedule.get(hour);

        if scheduled.is_none() && !rates_active && !self.config.windchill.enabled {
            return self.idle_or_retry(settings, pump, reading, sensor_temp, summary);
        }

        let rate =
            RateAdjuster { config: &self.config.rates, now: self.now }.adjust(prices, settings)?;
        let windchill = if self.config.windchill.enabled {
            let base = self.schedule.active_at(hour).context("the schedule is empty")?;
            let evaluator = Evaluator { config: &self.config.windchill, now: self.now };
            let outcome = windchill::adjust(&evaluator, base, forecasts, settings)?;
            if outcome.assessment.evaluation.code() > 0 {
                stats.append(&windchill_stats_line(
                    self.now,
                    hour,
                    &outcome.assessment,
                    self.config.windchill.wind_force_factor,
                    outcome.increase,
                ))?;
            }
            Some(outcome)
        } else {
            None
        };

        let mut rate_usage = rate.to_string();
        let mut rate_action = rate.usage;
        let mut rate_decrease = rate.decrease;
        let mut last_rate_decrease = rate.previous;

        let (mut windchill_usage, mut windchill_action, mut windchill_increase) =
            windchill.as_ref().map_or_else(
                || ("off".to_string(), WindchillUsage::Off, 0),
                |outcome| (outcome.usage.to_string(), outcome.usage, outcome.increase),
            );
        let mut last_windchill_increase =
            windchill.as_ref().map_or(0, |outcome| outcome.previous);

        let mut flags = ChangeFlags::default();
        if self.schedule.last_hour() == Some(hour) {
            // The night run: whatever was adjusted during the day is over
            // now, the evening setpoint goes in untouched.
            self.clear_adjustments(settings, "obsolete-because-last-run-of-the-day")?;
            store::clear(settings, RecordKind::IndoorTemp, "obsolete-because-last-run-of-the-day")?;
            rate_decrease = 0;
            windchill_increase = 0;
            rate_action = RateUsage::Off;
            windchill_action = WindchillUsage::Off;
            rate_usage = "off".to_string();
            windchill_usage = "off".to_string();
            info!(setpoint = reading.setpoint, "last run of the day");
        } else if let Some(last) = store::load::<SetpointRecord>(settings, RecordKind::IndoorTemp)? {
            if last.setpoint != reading.setpoint {
                // Someone turned the wheel since the last run; hands off
                // until the night run.
                self.clear_adjustments(settings, "obsolete-because-manual-set-temp")?;
                store::clear(settings, RecordKind::StartUpdate, "obsolete-because-manual-set-temp")?;
                warn!(
                    pump = reading.setpoint,
                    last_set = last.setpoint,
                    "the setpoint was changed manually",
                );
                let run = RunSummary {
                    stamp: self.now,
                    call_id: "L1",
                    flags: ChangeFlags { manual: true, ..Default::default() },
                    outdoor_temp: reading.outdoor_temp,
                    room_temp: reading.room_temp,
                    sensor_temp,
                    pump_setpoint: reading.setpoint,
                    new_setpoint: reading.setpoint,
                    rate_decrease: 0,
                    rate_usage,
                    windchill_increase,
                    windchill_usage,
                };
                summary.append(&run.render())?;
                return Ok(RunOutcome {
                    call_id: "L1",
                    new_setpoint: reading.setpoint,
                    wrote_pump: false,
                });
            }
        }

        let mut new_setpoint;
        if let Some(setpoint) = scheduled {
            new_setpoint = setpoint;
            // Old deltas must not leak into a fresh scheduled value.
            last_rate_decrease = 0;
            last_windchill_increase = 0;
            if matches!(rate_action, RateUsage::Reset { .. }) {
                self.clear_rate_records(settings, "scheduled_change_reset_hour_obsolete")?;
                flags.rate_reset = true;
            }
            if windchill_action == WindchillUsage::Reset {
                store::clear(settings, RecordKind::Windchill, "scheduled_change_reset_hour_obsolete")?;
                flags.windchill_reset = true;
            }
            flags.scheduled = 1;
            info!(new_setpoint, "scheduled change");
        } else {
            new_setpoint = reading.setpoint;
            if matches!(rate_action, RateUsage::Reset { .. }) {
                new_setpoint += rate_decrease;
                self.clear_rate_records(settings, "reset_back_to_normal")?;
                flags.rate_reset = true;
            }
            if windchill_action == WindchillUsage::Reset {
                new_setpoint -= windchill_increase;
                store::clear(settings, RecordKind::Windchill, "reset_back_to_normal")?;
                flags.windchill_reset = true;
            }
        }

        let mut applied_rate_delta = 0;
        if rate_action == RateUsage::Set {
            // Normally the full decrease, or the difference when the
            // configured grades changed between two runs.
            applied_rate_delta = (last_rate_decrease - rate_decrease).abs();
            new_setpoint += last_rate_decrease - rate_decrease;
            flags.rate_set = true;
        }
        if windchill_action == WindchillUsage::Set {
            new_setpoint += windchill_increase - last_windchill_increase;
            flags.windchill_set = true;
        }

        self.commit(
            settings,
            pump,
            summary,
            Commit {
                flags,
                outdoor_temp: reading.outdoor_temp,
                room_temp: reading.room_temp,
                sensor_temp,
                pump_setpoint: reading.setpoint,
                new_setpoint,
                rate_usage,
                rate_decrease: applied_rate_delta,
                windchill_usage,
                windchill_increase,
            },
        )
    }

    /// No mechanism is active this hour. Either replay an update that failed
    /// last run, or record the idle hour and leave.
    fn idle_or_retry<S, P, L>(
        &self,
        settings: &mut S,
        pump: &mut P,
        reading: PumpReading,
        sensor_temp: Option<f64>,
        summary: &mut L,
    ) -> Result<RunOutcome>
    where
        S: SettingsStore,
        P: Pump,
        L: LogSink,
    {
        if let Some(pending) = store::load::<PendingRecord>(settings, RecordKind::StartUpdate)? {
            info!(
                date = %pending.date,
                hour = pending.hour,
                setpoint = pending.setpoint,
                "retrying an update that failed last run",
            );
            return self.commit(
                settings,
                pump,
                summary,
                Commit {
                    flags: ChangeFlags { scheduled: -1, ..Default::default() },
                    outdoor_temp: reading.outdoor_temp,
                    room_temp: reading.room_temp,
                    sensor_temp,
                    pump_setpoint: 0,
                    new_setpoint: pending.setpoint,
                    rate_usage: "-".to_string(),
                    rate_decrease: 0,
                    windchill_usage: "-".to_string(),
                    windchill_increase: 0,
                },
            );
        }

        debug!("nothing to do this hour");
        let run = RunSummary {
            stamp: self.now,
            call_id: "L2",
            flags: ChangeFlags::default(),
            outdoor_temp: reading.outdoor_temp,
            room_temp: reading.room_temp,
            sensor_temp,
            pump_setpoint: reading.setpoint,
            new_setpoint: reading.setpoint,
            rate_decrease: 0,
            rate_usage: "-".to_string(),
            windchill_increase: 0,
            windchill_usage: "-".to_string(),
        };
        summary.append(&run.render())?;
        Ok(RunOutcome { call_id: "L2", new_setpoint: reading.setpoint, wrote_pump: false })
    }

    /// Persist the decision, touch the pump only when needed. The pending
    /// record goes in before the write so a transport failure is replayed
    /// next hour.
    fn commit<S, P, L>(
        &self,
        settings: &mut S,
        pump: &mut P,
        summary: &mut L,
        mut commit: Commit,
    ) -> Result<RunOutcome>
    where
        S: SettingsStore,
        P: Pump,
        L: LogSink,
    {
        let hour = self.now.hour();
        if commit.new_setpoint > self.config.max_indoor_temp {
            warn!(
                new_setpoint = commit.new_setpoint,
                max_indoor_temp = self.config.max_indoor_temp,
                "clamping the new setpoint",
            );
            commit.new_setpoint = self.config.max_indoor_temp;
        }

        let note = format!(
            "hr_rate_usage:{} hr_rate_temp_decr/incr:{} windchill_temp_usage:{} windchill_temp_incr/decr:{} if_new_failure_this_temp:{}",
            commit.rate_usage,
            commit.rate_decrease,
            commit.windchill_usage,
            commit.windchill_increase,
            commit.new_setpoint,
        );
        store::save(
            settings,
            RecordKind::StartUpdate,
            &PendingRecord { date: self.now.date(), hour, setpoint: commit.new_setpoint, note },
        )?;

        let wrote_pump = if commit.new_setpoint == commit.pump_setpoint {
            debug!(setpoint = commit.new_setpoint, "the pump is already at the wanted setpoint");
            false
        } else {
            pump.write_setpoint(commit.new_setpoint)?;
            true
        };

        store::save(
            settings,
            RecordKind::IndoorTemp,
            &SetpointRecord { date: self.now.date(), hour, setpoint: commit.new_setpoint },
        )?;

        let run = RunSummary {
            stamp: self.now,
            call_id: "L3",
            flags: commit.flags,
            outdoor_temp: commit.outdoor_temp,
            room_temp: commit.room_temp,
            sensor_temp: commit.sensor_temp,
            pump_setpoint: commit.pump_setpoint,
            new_setpoint: commit.new_setpoint,
            rate_decrease: commit.rate_decrease,
            rate_usage: commit.rate_usage,
            windchill_increase: commit.windchill_increase,
            windchill_usage: commit.windchill_usage,
        };
        summary.append(&run.render())?;

        store::clear(settings, RecordKind::StartUpdate, "done")?;
        Ok(RunOutcome { call_id: "L3", new_setpoint: commit.new_setpoint, wrote_pump })
    }

    fn clear_adjustments(&self, settings: &mut impl SettingsStore, reason: &str) -> Result {
        self.clear_rate_records(settings, reason)?;
        store::clear(settings, RecordKind::Windchill, reason)
    }

    fn clear_rate_records(&self, settings: &mut impl SettingsStore, reason: &str) -> Result {
        store::clear(settings, RecordKind::HourlyRate, reason)?;
        store::clear(settings, RecordKind::TopRate, reason)
    }
}

/// Startup housekeeping: records of disabled mechanisms must not influence a
/// run, and yesterday's applied setpoint is only noise today.
pub fn startup_cleanup(
    config: &Config,
    settings: &mut impl SettingsStore,
    today: NaiveDate,
) -> Result {
    if config.rates.use_hourly_rates {
        // The windowed plan takes priority over top hours.
        store::clear(settings, RecordKind::TopRate, "cleanup_not_active")?;
    } else {
        store::clear(settings, RecordKind::HourlyRate, "cleanup_not_active")?;
        if config.rates.top_hours == 0 {
            store::clear(settings, RecordKind::TopRate, "cleanup_not_active")?;
        }
    }
    if !config.windchill.enabled {
        store::clear(settings, RecordKind::Windchill, "cleanup_not_active")?;
    }
    if let Some(record) = store::load::<SetpointRecord>(settings, RecordKind::IndoorTemp)? {
        if record.date < today {
            store::clear(settings, RecordKind::IndoorTemp, "too-old")?;
        }
    }
    Ok(())
}
