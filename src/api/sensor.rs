//! Optional external indoor temperature sensor, read from a one-line file
//! maintained by a separate reader: `<timestamp>,<temperature>`, for example
//! `2023-01-17_20:02:01,20.4`. Display-only; it never steers anything.

use std::path::Path;

use chrono::NaiveDateTime;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorReading {
    pub stamp: NaiveDateTime,
    pub temperature: f64,
}

/// `Ok(None)` when no sensor file is configured or present; a present but
/// malformed file is an error.
pub fn read_sensor(path: Option<&Path>) -> Result<Option<SensorReading>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    let line = contents.trim();
    if line.is_empty() {
        return Ok(None);
    }
    parse_reading(line).with_context(|| format!("malformed sensor file `{}`", path.display()))
}

fn parse_reading(line: &str) -> Result<Option<SensorReading>> {
    let line: String = line.split_whitespace().collect();
    let (stamp, temperature) =
        line.split_once(',').with_context(|| format!("no `,` in `{line}`"))?;
    let reading = SensorReading {
        stamp: NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H:%M:%S")
            .with_context(|| format!("bad timestamp in `{line}`"))?,
        temperature: temperature
            .parse()
            .with_context(|| format!("bad temperature in `{line}`"))?,
    };
    Ok(Some(reading))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_parse_reading() -> Result {
        let reading =
            parse_reading("2023-01-17_20:02:01,20.4")?.context("expected a reading")?;
        assert_abs_diff_eq!(reading.temperature, 20.4);
        assert_eq!(reading.stamp.format("%H:%M:%S").to_string(), "20:02:01");
        Ok(())
    }

    #[test]
    fn test_embedded_whitespace_is_ignored() -> Result {
        assert!(parse_reading(" 2023-01-17_20:02:01 , 20.4 ")?.is_some());
        Ok(())
    }

    #[test]
    fn test_malformed_reading_rejected() {
        assert!(parse_reading("2023-01-17 20:02:01 20.4").is_err());
        assert!(parse_reading("yesterday,20.4").is_err());
    }

    #[test]
    fn test_unconfigured_sensor_is_none() -> Result {
        assert_eq!(read_sensor(None)?, None);
        Ok(())
    }
}
