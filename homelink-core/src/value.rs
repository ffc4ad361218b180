//! Typed object values
//!
//! Every group object carries a value of one of eight semantic kinds
//! (switching, dimming, time of day, date, 2-byte float, 8-bit scaling,
//! heating mode, 14-character string). Each kind defines a canonical text
//! form and validation rules; the wire representation lives in
//! [`crate::codec`].
//!
//! The canonical form is unpadded: `"0:0:0"`, `"2007-10-31"`, floats via
//! the shortest `Display` rendering. Any text accepted by [`TypedValue::
//! parse`] round-trips: formatting the parsed value and parsing it again
//! yields an equal value.

use std::fmt;

use chrono::{Datelike, Local, NaiveDate, Timelike};

use crate::error::{CoreError, CoreResult};

/// Smallest value representable by the 2-byte float encoding.
pub const FLOAT_MIN: f64 = -671088.64;
/// Largest value representable by the 2-byte float encoding.
pub const FLOAT_MAX: f64 = 670760.96;

/// Semantic type tag of a group object.
///
/// Configuration names follow the EIS numbering of the original daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// EIS1 - on/off switching (1 bit)
    Switching,
    /// EIS2 - 4-bit dimming control
    Dimming,
    /// EIS3 - time of day (3 bytes)
    Time,
    /// EIS4 - date (3 bytes)
    Date,
    /// EIS5 - 2-byte floating point
    Float,
    /// EIS6 - 8-bit scaled value
    Scaling,
    /// heat-mode - comfort/standby/night/frost
    HeatingMode,
    /// EIS15 - 14-byte character string
    Text,
}

impl ObjectKind {
    /// Resolves a configuration `type` attribute.
    pub fn from_config_name(name: &str) -> CoreResult<Self> {
        match name {
            "EIS1" => Ok(ObjectKind::Switching),
            "EIS2" => Ok(ObjectKind::Dimming),
            "EIS3" => Ok(ObjectKind::Time),
            "EIS4" => Ok(ObjectKind::Date),
            "EIS5" => Ok(ObjectKind::Float),
            "EIS6" => Ok(ObjectKind::Scaling),
            "EIS15" => Ok(ObjectKind::Text),
            "heat-mode" => Ok(ObjectKind::HeatingMode),
            other => Err(CoreError::UnsupportedType(other.to_string())),
        }
    }

    /// The configuration `type` attribute for this kind.
    pub fn config_name(self) -> &'static str {
        match self {
            ObjectKind::Switching => "EIS1",
            ObjectKind::Dimming => "EIS2",
            ObjectKind::Time => "EIS3",
            ObjectKind::Date => "EIS4",
            ObjectKind::Float => "EIS5",
            ObjectKind::Scaling => "EIS6",
            ObjectKind::Text => "EIS15",
            ObjectKind::HeatingMode => "heat-mode",
        }
    }

    fn grammar_name(self) -> &'static str {
        match self {
            ObjectKind::Switching => "switching",
            ObjectKind::Dimming => "dimming",
            ObjectKind::Time => "time",
            ObjectKind::Date => "date",
            ObjectKind::Float => "value",
            ObjectKind::Scaling => "scaling",
            ObjectKind::HeatingMode => "heating mode",
            ObjectKind::Text => "string",
        }
    }
}

/// A 4-bit dimming command: stop, or a step of 1..=7 in either direction.
///
/// `Up(1)` is the canonical form of plain `up` and prints without the step
/// suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimCommand {
    Stop,
    Up(u8),
    Down(u8),
}

impl DimCommand {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "stop" => return Some(DimCommand::Stop),
            "up" => return Some(DimCommand::Up(1)),
            "down" => return Some(DimCommand::Down(1)),
            _ => {}
        }
        let (dir, step) = text.split_once(':')?;
        let step: u8 = step.parse().ok()?;
        if !(1..=7).contains(&step) {
            return None;
        }
        match dir {
            "up" => Some(DimCommand::Up(step)),
            "down" => Some(DimCommand::Down(step)),
            _ => None,
        }
    }
}

impl fmt::Display for DimCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimCommand::Stop => write!(f, "stop"),
            DimCommand::Up(1) => write!(f, "up"),
            DimCommand::Up(step) => write!(f, "up:{step}"),
            DimCommand::Down(1) => write!(f, "down"),
            DimCommand::Down(step) => write!(f, "down:{step}"),
        }
    }
}

/// A bus time of day: weekday (0 = unset, 1 = Monday .. 7 = Sunday) plus
/// hour, minute and second.
///
/// The weekday is carried on the wire and participates in change detection
/// but does not appear in the canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOfDay {
    pub wday: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

impl TimeOfDay {
    pub fn new(wday: u8, hour: u8, min: u8, sec: u8) -> CoreResult<Self> {
        if wday > 7 || hour > 23 || min > 59 || sec > 59 {
            return Err(CoreError::parse(
                "time",
                format!("{wday} {hour}:{min}:{sec}"),
            ));
        }
        Ok(TimeOfDay {
            wday,
            hour,
            min,
            sec,
        })
    }

    /// The current local wall-clock time, weekday included.
    pub fn now() -> Self {
        let now = Local::now();
        TimeOfDay {
            wday: now.weekday().number_from_monday() as u8,
            hour: now.hour() as u8,
            min: now.minute() as u8,
            sec: now.second() as u8,
        }
    }

    fn parse(text: &str) -> Option<Self> {
        if text == "now" {
            return Some(TimeOfDay::now());
        }
        let mut parts = text.split(':');
        let hour: u8 = parts.next()?.parse().ok()?;
        let min: u8 = parts.next()?.parse().ok()?;
        let sec: u8 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        TimeOfDay::new(0, hour, min, sec).ok()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hour, self.min, self.sec)
    }
}

/// A bus date with a full (four-digit) year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusDate {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl BusDate {
    pub fn new(day: u8, month: u8, year: u16) -> CoreResult<Self> {
        // NaiveDate rejects impossible dates such as February 30th.
        if NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).is_none() {
            return Err(CoreError::parse("date", format!("{year}-{month}-{day}")));
        }
        Ok(BusDate { day, month, year })
    }

    /// Today's local date.
    pub fn today() -> Self {
        let now = Local::now();
        BusDate {
            day: now.day() as u8,
            month: now.month() as u8,
            year: now.year() as u16,
        }
    }

    fn parse(text: &str) -> Option<Self> {
        if text == "now" {
            return Some(BusDate::today());
        }
        let mut parts = text.split('-');
        let year: u16 = parts.next()?.parse().ok()?;
        let month: u8 = parts.next()?.parse().ok()?;
        let day: u8 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        BusDate::new(day, month, year).ok()
    }
}

impl fmt::Display for BusDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}

/// Heating operating mode, numbered 1..=4 on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeatingMode {
    Comfort = 1,
    Standby = 2,
    Night = 3,
    Frost = 4,
}

impl HeatingMode {
    /// Resolves a bus byte; unknown values yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(HeatingMode::Comfort),
            2 => Some(HeatingMode::Standby),
            3 => Some(HeatingMode::Night),
            4 => Some(HeatingMode::Frost),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Accepts only the four canonical words; numeric strings are invalid.
    fn parse(text: &str) -> Option<Self> {
        match text {
            "comfort" => Some(HeatingMode::Comfort),
            "standby" => Some(HeatingMode::Standby),
            "night" => Some(HeatingMode::Night),
            "frost" => Some(HeatingMode::Frost),
            _ => None,
        }
    }
}

impl fmt::Display for HeatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HeatingMode::Comfort => "comfort",
            HeatingMode::Standby => "standby",
            HeatingMode::Night => "night",
            HeatingMode::Frost => "frost",
        };
        write!(f, "{text}")
    }
}

/// An ASCII string of at most 14 bytes, as carried by the 14-byte string
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct String14(String);

impl String14 {
    pub fn new(text: &str) -> CoreResult<Self> {
        if text.len() > 14 || !text.is_ascii() {
            return Err(CoreError::parse("string", text));
        }
        Ok(String14(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for String14 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A detached, typed object value.
///
/// Equality is the change-detection relation of the object model: two
/// values are equal iff writing one over the other must not notify
/// listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Switch(bool),
    Dimming(DimCommand),
    Time(TimeOfDay),
    Date(BusDate),
    Float(f64),
    Scaling(u8),
    HeatingMode(HeatingMode),
    Text(String14),
}

impl TypedValue {
    /// The kind this value belongs to.
    pub fn kind(&self) -> ObjectKind {
        match self {
            TypedValue::Switch(_) => ObjectKind::Switching,
            TypedValue::Dimming(_) => ObjectKind::Dimming,
            TypedValue::Time(_) => ObjectKind::Time,
            TypedValue::Date(_) => ObjectKind::Date,
            TypedValue::Float(_) => ObjectKind::Float,
            TypedValue::Scaling(_) => ObjectKind::Scaling,
            TypedValue::HeatingMode(_) => ObjectKind::HeatingMode,
            TypedValue::Text(_) => ObjectKind::Text,
        }
    }

    /// The initial value a freshly created object of `kind` holds.
    pub fn default_for(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Switching => TypedValue::Switch(false),
            ObjectKind::Dimming => TypedValue::Dimming(DimCommand::Stop),
            ObjectKind::Time => TypedValue::Time(TimeOfDay::default()),
            ObjectKind::Date => TypedValue::Date(BusDate {
                day: 1,
                month: 1,
                year: 1900,
            }),
            ObjectKind::Float => TypedValue::Float(0.0),
            ObjectKind::Scaling => TypedValue::Scaling(0),
            ObjectKind::HeatingMode => TypedValue::HeatingMode(HeatingMode::Comfort),
            ObjectKind::Text => TypedValue::Text(String14::default()),
        }
    }

    /// Parses canonical (or accepted alternate) text for the given kind.
    pub fn parse(kind: ObjectKind, text: &str) -> CoreResult<Self> {
        let reject = || CoreError::parse(kind.grammar_name(), text);
        match kind {
            ObjectKind::Switching => match text {
                "on" | "1" | "true" => Ok(TypedValue::Switch(true)),
                "off" | "0" | "false" => Ok(TypedValue::Switch(false)),
                _ => Err(reject()),
            },
            ObjectKind::Dimming => DimCommand::parse(text)
                .map(TypedValue::Dimming)
                .ok_or_else(reject),
            ObjectKind::Time => TimeOfDay::parse(text)
                .map(TypedValue::Time)
                .ok_or_else(reject),
            ObjectKind::Date => BusDate::parse(text)
                .map(TypedValue::Date)
                .ok_or_else(reject),
            ObjectKind::Float => {
                let value: f64 = text.parse().map_err(|_| reject())?;
                if value.is_nan() || !(FLOAT_MIN..=FLOAT_MAX).contains(&value) {
                    return Err(reject());
                }
                Ok(TypedValue::Float(value))
            }
            ObjectKind::Scaling => {
                let value: u8 = text.parse().map_err(|_| reject())?;
                Ok(TypedValue::Scaling(value))
            }
            ObjectKind::HeatingMode => HeatingMode::parse(text)
                .map(TypedValue::HeatingMode)
                .ok_or_else(reject),
            ObjectKind::Text => String14::new(text)
                .map(TypedValue::Text)
                .map_err(|_| reject()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Switch(true) => write!(f, "on"),
            TypedValue::Switch(false) => write!(f, "off"),
            TypedValue::Dimming(cmd) => write!(f, "{cmd}"),
            TypedValue::Time(t) => write!(f, "{t}"),
            TypedValue::Date(d) => write!(f, "{d}"),
            TypedValue::Float(v) => write!(f, "{v}"),
            TypedValue::Scaling(v) => write!(f, "{v}"),
            TypedValue::HeatingMode(m) => write!(f, "{m}"),
            TypedValue::Text(s) => write!(f, "{s}"),
        }
    }
}
