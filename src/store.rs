//! The settings store: one small JSON file holding the "last applied" facts
//! that make each hourly run idempotent and resumable.
//!
//! One entry per record kind, each value encoded as
//! `"<date> <space-separated fields>"`. Last write wins; the date lets the
//! engine detect records left over from a previous day.

use std::{collections::BTreeMap, fmt::Display, path::PathBuf, str::FromStr};

use chrono::NaiveDate;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// Durability marker written before every pump write.
    StartUpdate,
    /// Active windowed-optimizer decrease.
    HourlyRate,
    /// Active top-N-hours decrease.
    TopRate,
    /// Active windchill increase.
    Windchill,
    /// Last setpoint this program wrote to the pump.
    IndoorTemp,
}

impl RecordKind {
    pub const fn key(self) -> &'static str {
        match self {
            Self::StartUpdate => "start_update",
            Self::HourlyRate => "hourly_rate",
            Self::TopRate => "top_rate",
            Self::Windchill => "windchill",
            Self::IndoorTemp => "indoor_temp",
        }
    }
}

/// Read-then-write key-value store, at most one process instance active at a
/// time, so no locking.
pub trait SettingsStore {
    fn read(&self, kind: RecordKind) -> Result<Option<String>>;
    fn write(&mut self, kind: RecordKind, value: &str) -> Result<()>;
    fn remove(&mut self, kind: RecordKind) -> Result<()>;
}

pub fn load<R: FromStr<Err = Error>>(
    store: &impl SettingsStore,
    kind: RecordKind,
) -> Result<Option<R>> {
    store.read(kind)?.map(|value| {
        value.parse().with_context(|| format!("malformed `{}` record: `{value}`", kind.key()))
    }).transpose()
}

pub fn save<R: Display>(store: &mut impl SettingsStore, kind: RecordKind, record: &R) -> Result {
    let value = record.to_string();
    debug!(key = kind.key(), value, "Saving record");
    store.write(kind, &value)
}

pub fn clear(store: &mut impl SettingsStore, kind: RecordKind, reason: &str) -> Result {
    debug!(key = kind.key(), reason, "Removing record");
    store.remove(kind)
}

/// Pending-start marker: `<date> <hour> <setpoint> <note…>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub setpoint: i32,
    pub note: String,
}

impl Display for PendingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} {}", self.date, self.hour, self.setpoint, self.note)
    }
}

impl FromStr for PendingRecord {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut fields = value.splitn(4, ' ');
        Ok(Self {
            date: parse_date(&mut fields)?,
            hour: parse_field(&mut fields, "hour")?,
            setpoint: parse_field(&mut fields, "setpoint")?,
            note: fields.next().unwrap_or_default().to_string(),
        })
    }
}

/// Rate decrease in effect: `<date> <hour> <decrease>`. Used for both the
/// `hourly_rate` and `top_rate` kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub decrease: i32,
}

impl Display for RateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.date, self.hour, self.decrease)
    }
}

impl FromStr for RateRecord {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut fields = value.split(' ');
        Ok(Self {
            date: parse_date(&mut fields)?,
            hour: parse_field(&mut fields, "hour")?,
            decrease: parse_field(&mut fields, "decrease")?,
        })
    }
}

/// Windchill increase in effect:
/// `<date> <hour> <code> <apparent> <diff> <increase>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindchillRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub code: i8,
    pub apparent: f64,
    pub diff: f64,
    pub increase: i32,
}

impl Display for WindchillRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.date, self.hour, self.code, self.apparent, self.diff, self.increase,
        )
    }
}

impl FromStr for WindchillRecord {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut fields = value.split(' ');
        Ok(Self {
            date: parse_date(&mut fields)?,
            hour: parse_field(&mut fields, "hour")?,
            code: parse_field(&mut fields, "code")?,
            apparent: parse_field(&mut fields, "apparent")?,
            diff: parse_field(&mut fields, "diff")?,
            increase: parse_field(&mut fields, "increase")?,
        })
    }
}

/// Last applied setpoint: `<date> <hour> <setpoint>`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetpointRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub setpoint: i32,
}

impl Display for SetpointRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.date, self.hour, self.setpoint)
    }
}

impl FromStr for SetpointRecord {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut fields = value.split(' ');
        Ok(Self {
            date: parse_date(&mut fields)?,
            hour: parse_field(&mut fields, "hour")?,
            setpoint: parse_field(&mut fields, "setpoint")?,
        })
    }
}

fn parse_date<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<NaiveDate> {
    fields.next().context("missing date field")?.parse().context("invalid date field")
}

fn parse_field<'a, T>(fields: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fields
        .next()
        .with_context(|| format!("missing `{name}` field"))?
        .parse()
        .with_context(|| format!("invalid `{name}` field"))
}

/// Settings persisted as a single JSON object, rewritten wholesale on every
/// update.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read `{}`", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("malformed settings file `{}`", self.path.display()))
    }

    fn store_all(&self, settings: &BTreeMap<String, String>) -> Result {
        let contents = serde_json::to_string(settings)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write `{}`", self.path.display()))
    }
}

impl SettingsStore for FileStore {
    fn read(&self, kind: RecordKind) -> Result<Option<String>> {
        Ok(self.load_all()?.remove(kind.key()))
    }

    fn write(&mut self, kind: RecordKind, value: &str) -> Result {
        let mut settings = self.load_all()?;
        settings.insert(kind.key().to_string(), value.to_string());
        self.store_all(&settings)
    }

    fn remove(&mut self, kind: RecordKind) -> Result {
        let mut settings = self.load_all()?;
        if settings.remove(kind.key()).is_some() {
            self.store_all(&settings)?;
        }
        Ok(())
    }
}

/// In-memory substitute for tests.
#[derive(Default)]
pub struct MemoryStore(BTreeMap<&'static str, String>);

impl SettingsStore for MemoryStore {
    fn read(&self, kind: RecordKind) -> Result<Option<String>> {
        Ok(self.0.get(kind.key()).cloned())
    }

    fn write(&mut self, kind: RecordKind, value: &str) -> Result {
        self.0.insert(kind.key(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, kind: RecordKind) -> Result {
        self.0.remove(kind.key());
        Ok(())
    }
}
