mod api;
mod cli;
mod config;
mod core;
mod prelude;
mod quantity;
mod store;
mod summary;
mod tables;

use chrono::{Datelike, Local};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{
        forecast::{FileForecasts, ForecastSource},
        prices::HourlyPrices,
        pump::Pump,
        sensor::{SensorReading, read_sensor},
        smhi::Smhi,
        thermia_modbus::ThermiaModbus,
        thermia_online::ThermiaOnline,
    },
    cli::{Args, Command, ProbeCommand},
    config::{Config, PumpConfig},
    core::{
        engine::{Engine, startup_cleanup},
        optimizer,
    },
    prelude::*,
    quantity::Ore,
    store::FileStore,
    summary::FileSink,
};

fn main() -> Result {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    match args.command {
        Command::Run => run(&config),
        Command::Plan => plan(&config),
        Command::Probe(probe) => match probe.command {
            ProbeCommand::Pump => probe_pump(&config),
            ProbeCommand::Forecast => probe_forecast(&config),
            ProbeCommand::Rates => probe_rates(&config),
        },
    }
}

fn run(config: &Config) -> Result {
    let now = Local::now().naive_local();
    let mut settings = FileStore::new(config.paths.settings_file());
    startup_cleanup(config, &mut settings, now.date())?;

    if !config.months.contains(&now.date().month()) {
        info!(month = now.date().month(), "not an active month, nothing to do");
        return Ok(());
    }

    let (schedule, weekday_specific) = config.schedule_for(now.date().weekday())?;
    debug!(weekday = %now.date().weekday(), weekday_specific, "resolved the day schedule");

    let prices = load_prices(config);
    let sensor = read_sensor_or_warn(config);
    let forecasts = forecast_source(config);
    let mut pump = connect_pump(config)?;
    let mut summary = FileSink::new(config.paths.run_summary_file());
    let mut stats = FileSink::new(config.paths.windchill_stats_file());

    let engine = Engine { config, schedule: &schedule, now };
    let outcome = engine.run(
        &mut settings,
        &mut pump,
        &forecasts,
        prices.as_ref(),
        sensor,
        &mut summary,
        &mut stats,
    )?;
    info!(
        call_id = outcome.call_id,
        new_setpoint = outcome.new_setpoint,
        wrote_pump = outcome.wrote_pump,
        "run finished",
    );
    Ok(())
}

fn plan(config: &Config) -> Result {
    let now = Local::now();
    let (schedule, _) = config.schedule_for(now.date_naive().weekday())?;
    let prices = HourlyPrices::load(&config.paths.hourly_rates_file())?;
    let mask = optimizer::merged_plan(&prices, &config.rates.decrease_windows)?;
    let table = tables::build_plan_table(
        &prices,
        &mask,
        &schedule,
        Ore::from_crowns(config.rates.only_decrease_when_rate_above),
    );
    println!("{table}");
    Ok(())
}

fn probe_pump(config: &Config) -> Result {
    let mut pump = connect_pump(config)?;
    let reading = pump.read()?;
    info!(
        outdoor_temp = reading.outdoor_temp,
        room_temp = reading.room_temp,
        setpoint = reading.setpoint,
        "pump reachable",
    );
    Ok(())
}

fn probe_forecast(config: &Config) -> Result {
    let forecasts = forecast_source(config);
    forecasts.refresh()?;
    for (key, point) in forecasts.points()? {
        info!(key, air_temp = point.air_temp, wind_speed = point.wind_speed, "forecast hour");
    }
    Ok(())
}

fn probe_rates(config: &Config) -> Result {
    let prices = HourlyPrices::load(&config.paths.hourly_rates_file())?;
    let n_hours = if config.rates.top_hours > 0 { config.rates.top_hours as usize } else { 5 };
    println!("{}", tables::build_top_hours_table(&prices, n_hours));
    Ok(())
}

fn connect_pump(config: &Config) -> Result<Box<dyn Pump>> {
    match &config.pump {
        PumpConfig::Modbus { address } => Ok(Box::new(ThermiaModbus::connect(address)?)),
        PumpConfig::Online { api_base_url, installation_id, access_token } => Ok(Box::new(
            ThermiaOnline::new(api_base_url.clone(), *installation_id, access_token.clone())?,
        )),
    }
}

fn forecast_source(config: &Config) -> Smhi {
    Smhi::new(
        FileForecasts::new(config.paths.forecast_file()),
        config.windchill.latitude,
        config.windchill.longitude,
    )
}

/// The price feed is produced by an external fetcher; when it is missing or
/// malformed, rate steering sits the run out.
fn load_prices(config: &Config) -> Option<HourlyPrices> {
    match HourlyPrices::load(&config.paths.hourly_rates_file()) {
        Ok(prices) => Some(prices),
        Err(error) => {
            warn!(error = format!("{error:#}"), "price feed unavailable, rate steering disabled");
            None
        }
    }
}

fn read_sensor_or_warn(config: &Config) -> Option<SensorReading> {
    match read_sensor(config.paths.indoor_sensor_file.as_deref()) {
        Ok(reading) => reading,
        Err(error) => {
            warn!(error = format!("{error:#}"), "ignoring the indoor sensor");
            None
        }
    }
}
