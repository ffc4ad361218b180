//! Time specifications and the next-instant resolver
//!
//! A [`TimeSpec`] is a partially-constrained wall-clock instant: any of
//! year, month, day, hour and minute may be pinned or left free, a weekday
//! mask may restrict the day, and an exception policy can tie firing to
//! the holiday calendar. [`find_next`] resolves the earliest instant at
//! least one minute after a start time that satisfies a spec, walking the
//! date fields top-down and backtracking through the closest free field
//! when a pinned field falls behind.
//!
//! Variable specs substitute their free fields from referenced time/date
//! objects at resolution time; the solar variants ask the [`SolarTimes`]
//! collaborator for hour and minute once the day is fixed.

use std::rc::Rc;

use bitflags::bitflags;
use chrono::{
    Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Weekday,
};
use tracing::{debug, error, info};
use xmltree::Element;

use crate::config;
use crate::error::{CoreError, CoreResult};
use crate::object::{ChangeListener, GroupObject, ObjectRegistry};
use crate::sun::SolarTimes;
use crate::value::ObjectKind;

bitflags! {
    /// Weekday constraint mask; empty means "any day".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WeekdayMask: u8 {
        const MON = 0x01;
        const TUE = 0x02;
        const WED = 0x04;
        const THU = 0x08;
        const FRI = 0x10;
        const SAT = 0x20;
        const SUN = 0x40;
    }
}

impl WeekdayMask {
    /// Parses the configuration digit string (`1` = Monday .. `7` =
    /// Sunday); characters outside `1..7` are ignored.
    pub fn from_digits(text: &str) -> Self {
        let mut mask = WeekdayMask::empty();
        for digit in text.chars() {
            if let Some(index) = digit.to_digit(10).filter(|d| (1..=7).contains(d)) {
                mask |= WeekdayMask::from_bits_truncate(1 << (index - 1));
            }
        }
        mask
    }

    /// Renders the digit string form.
    pub fn to_digits(self) -> String {
        (1..=7u8)
            .filter(|d| self.bits() & (1 << (d - 1)) != 0)
            .map(|d| char::from(b'0' + d))
            .collect()
    }

    pub fn contains_weekday(self, weekday: Weekday) -> bool {
        self.bits() & (1 << weekday.num_days_from_monday()) != 0
    }
}

/// Relation between a schedule and the exception-day calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionPolicy {
    /// Fire regardless of the calendar.
    #[default]
    DontCare,
    /// Fire only on listed days (`exception="yes"`).
    OnlyOnException,
    /// Never fire on listed days (`exception="no"`).
    SkipExceptions,
}

impl ExceptionPolicy {
    fn from_config(text: &str) -> Self {
        match text {
            "yes" | "true" => ExceptionPolicy::OnlyOnException,
            "no" | "false" => ExceptionPolicy::SkipExceptions,
            _ => ExceptionPolicy::DontCare,
        }
    }

    fn accepts(self, is_exception: bool) -> bool {
        match self {
            ExceptionPolicy::DontCare => true,
            ExceptionPolicy::OnlyOnException => is_exception,
            ExceptionPolicy::SkipExceptions => !is_exception,
        }
    }
}

/// One calendar day pattern; `None` fields are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaySpec {
    pub day: Option<u8>,
    pub month: Option<u8>,
    pub year: Option<u16>,
}

impl DaySpec {
    pub fn from_element(element: &Element) -> CoreResult<Self> {
        let read = |name| -> CoreResult<Option<u8>> {
            match config::attr_or::<i32>(element, name, -1)? {
                -1 => Ok(None),
                v if (0..=255).contains(&v) => Ok(Some(v as u8)),
                v => Err(CoreError::config(format!("{name} out of range: {v}"))),
            }
        };
        let year = match config::attr_or::<i32>(element, "year", -1)? {
            -1 => None,
            v => Some(v as u16),
        };
        Ok(DaySpec {
            day: read("day")?,
            month: read("month")?,
            year,
        })
    }

    pub fn export_xml(&self) -> Element {
        let mut element = config::new_element("date");
        if let Some(day) = self.day {
            config::set_attr(&mut element, "day", day);
        }
        if let Some(month) = self.month {
            config::set_attr(&mut element, "month", month);
        }
        if let Some(year) = self.year {
            config::set_attr(&mut element, "year", year);
        }
        element
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        self.year.map_or(true, |y| y as i32 == date.year())
            && self.month.map_or(true, |m| m as u32 == date.month())
            && self.day.map_or(true, |d| d as u32 == date.day())
    }
}

/// Ordered list of exception (holiday) days.
#[derive(Debug, Default)]
pub struct ExceptionDays {
    days: Vec<DaySpec>,
}

impl ExceptionDays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, day: DaySpec) {
        self.days.push(day);
    }

    pub fn clear(&mut self) {
        self.days.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Whether the local calendar day of `timestamp` is listed.
    pub fn is_exception(&self, timestamp: i64) -> bool {
        let Some(local) = Local.timestamp_opt(timestamp, 0).single() else {
            return false;
        };
        self.is_exception_date(local.date_naive())
    }

    pub fn is_exception_date(&self, date: NaiveDate) -> bool {
        let listed = self.days.iter().any(|d| d.matches(date));
        if listed {
            info!("{date} is an exception day");
        }
        listed
    }

    /// Imports an `<exceptiondays>` section; `clear="true"` empties the
    /// list first.
    pub fn import_xml(&mut self, parent: &Element) -> CoreResult<()> {
        if config::attr(parent, "clear") == Some("true") {
            self.clear();
        }
        for child in config::children(parent) {
            if child.name != "date" {
                return Err(CoreError::config(format!(
                    "unexpected <{}> inside <exceptiondays>",
                    child.name
                )));
            }
            self.add(DaySpec::from_element(child)?);
        }
        Ok(())
    }

    pub fn export_xml(&self) -> Element {
        let mut parent = config::new_element("exceptiondays");
        for day in &self.days {
            parent
                .children
                .push(xmltree::XMLNode::Element(day.export_xml()));
        }
        parent
    }
}

/// Variant behaviour of a time spec.
enum SpecKind {
    /// Constraints come from the spec fields alone.
    Fixed,
    /// Free fields are substituted from referenced objects, then shifted
    /// by an offset.
    Variable {
        time: Option<GroupObject>,
        date: Option<GroupObject>,
        /// Seconds; decomposed into day/hour/minute carries.
        offset: i64,
        listener: Option<Rc<dyn ChangeListener>>,
    },
    Sunrise(Rc<dyn SolarTimes>),
    Sunset(Rc<dyn SolarTimes>),
    SolarNoon(Rc<dyn SolarTimes>),
}

/// A partially-constrained schedule instant.
pub struct TimeSpec {
    pub min: Option<i32>,
    pub hour: Option<i32>,
    pub mday: Option<i32>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub wdays: WeekdayMask,
    pub exception: ExceptionPolicy,
    kind: SpecKind,
}

impl Default for TimeSpec {
    fn default() -> Self {
        TimeSpec {
            min: None,
            hour: None,
            mday: None,
            month: None,
            year: None,
            wdays: WeekdayMask::empty(),
            exception: ExceptionPolicy::DontCare,
            kind: SpecKind::Fixed,
        }
    }
}

impl TimeSpec {
    /// A fixed spec with the given constrained fields; `None` leaves a
    /// field free.
    pub fn new(
        min: Option<i32>,
        hour: Option<i32>,
        mday: Option<i32>,
        month: Option<i32>,
        year: Option<i32>,
    ) -> Self {
        let mut spec = TimeSpec::default();
        spec.min = min;
        spec.hour = hour;
        spec.mday = mday;
        spec.month = month;
        spec.year = year;
        spec
    }

    /// A daily spec at the given hour and minute.
    pub fn at_time(hour: i32, min: i32) -> Self {
        TimeSpec::new(Some(min), Some(hour), None, None, None)
    }

    /// A weekday-masked spec at the given hour and minute.
    pub fn on_weekdays(hour: i32, min: i32, wdays: WeekdayMask) -> Self {
        let mut spec = TimeSpec::at_time(hour, min);
        spec.wdays = wdays;
        spec
    }

    /// Builds a spec from its configuration element.
    ///
    /// The `type` attribute selects the variant (`variable`, `sunrise`,
    /// `sunset`, `noon`, or empty for a fixed spec). Variable specs look
    /// their `time`/`date` object references up in the registry and
    /// register `listener` on them so schedules follow object changes.
    pub fn from_element(
        element: &Element,
        objects: &ObjectRegistry,
        solar: Option<Rc<dyn SolarTimes>>,
        listener: Option<Rc<dyn ChangeListener>>,
    ) -> CoreResult<Self> {
        let kind_name = config::attr(element, "type").unwrap_or("");
        let kind = match kind_name {
            "" => SpecKind::Fixed,
            "variable" => {
                let time = match config::attr(element, "time") {
                    Some(id) => {
                        let object = objects.get(id)?;
                        if object.kind() != ObjectKind::Time {
                            return Err(CoreError::WrongObjectType {
                                id: id.to_string(),
                                role: "variable time spec",
                            });
                        }
                        Some(object)
                    }
                    None => None,
                };
                let date = match config::attr(element, "date") {
                    Some(id) => {
                        let object = objects.get(id)?;
                        if object.kind() != ObjectKind::Date {
                            return Err(CoreError::WrongObjectType {
                                id: id.to_string(),
                                role: "variable date spec",
                            });
                        }
                        Some(object)
                    }
                    None => None,
                };
                let offset = match config::attr(element, "offset") {
                    Some(text) => config::parse_duration(text, true)?,
                    None => 0,
                };
                if let Some(listener) = &listener {
                    if let Some(object) = &time {
                        object.add_change_listener(listener.clone());
                    }
                    if let Some(object) = &date {
                        object.add_change_listener(listener.clone());
                    }
                }
                SpecKind::Variable {
                    time,
                    date,
                    offset,
                    listener,
                }
            }
            "sunrise" | "sunset" | "noon" => {
                let solar = solar.ok_or_else(|| {
                    CoreError::config(format!("no solar calculator for '{kind_name}' spec"))
                })?;
                match kind_name {
                    "sunrise" => SpecKind::Sunrise(solar),
                    "sunset" => SpecKind::Sunset(solar),
                    _ => SpecKind::SolarNoon(solar),
                }
            }
            other => return Err(CoreError::UnsupportedType(other.to_string())),
        };

        let field = |name| -> CoreResult<Option<i32>> {
            Ok(match config::attr_or::<i32>(element, name, -1)? {
                -1 => None,
                value => Some(value),
            })
        };
        let spec = TimeSpec {
            min: field("min")?,
            hour: field("hour")?,
            mday: field("day")?,
            month: field("month")?,
            year: field("year")?,
            wdays: WeekdayMask::from_digits(config::attr(element, "wdays").unwrap_or("")),
            exception: ExceptionPolicy::from_config(config::attr(element, "exception").unwrap_or("")),
            kind,
        };
        debug!(
            "time spec {:?}-{:?}-{:?} {:?}:{:?} (wdays={}, exception={:?})",
            spec.year,
            spec.month,
            spec.mday,
            spec.hour,
            spec.min,
            spec.wdays.to_digits(),
            spec.exception,
        );
        Ok(spec)
    }

    pub fn export_xml(&self, name: &str) -> Element {
        let mut element = config::new_element(name);
        match &self.kind {
            SpecKind::Fixed => {}
            SpecKind::Variable {
                time,
                date,
                offset,
                ..
            } => {
                config::set_attr(&mut element, "type", "variable");
                if let Some(object) = time {
                    config::set_attr(&mut element, "time", object.id());
                }
                if let Some(object) = date {
                    config::set_attr(&mut element, "date", object.id());
                }
                if *offset != 0 {
                    config::set_attr(&mut element, "offset", config::format_duration(*offset));
                }
            }
            SpecKind::Sunrise(_) => config::set_attr(&mut element, "type", "sunrise"),
            SpecKind::Sunset(_) => config::set_attr(&mut element, "type", "sunset"),
            SpecKind::SolarNoon(_) => config::set_attr(&mut element, "type", "noon"),
        }
        if let Some(hour) = self.hour {
            config::set_attr(&mut element, "hour", hour);
        }
        if let Some(min) = self.min {
            config::set_attr(&mut element, "min", min);
        }
        if let Some(day) = self.mday {
            config::set_attr(&mut element, "day", day);
        }
        if let Some(month) = self.month {
            config::set_attr(&mut element, "month", month);
        }
        if let Some(year) = self.year {
            config::set_attr(&mut element, "year", year);
        }
        match self.exception {
            ExceptionPolicy::OnlyOnException => config::set_attr(&mut element, "exception", "yes"),
            ExceptionPolicy::SkipExceptions => config::set_attr(&mut element, "exception", "no"),
            ExceptionPolicy::DontCare => {}
        }
        if !self.wdays.is_empty() {
            config::set_attr(&mut element, "wdays", self.wdays.to_digits());
        }
        element
    }

    /// Day-level constraints `(day, month, year, weekday mask)`, with
    /// variable substitution and the day part of the offset applied.
    fn day_constraints(&self) -> (Option<i32>, Option<i32>, Option<i32>, WeekdayMask) {
        let mut mday = self.mday;
        let mut month = self.month;
        let mut year = self.year;
        let mut wdays = self.wdays;
        if let SpecKind::Variable {
            time,
            date,
            offset,
            ..
        } = &self.kind
        {
            if let Some(t) = time.as_ref().and_then(|o| o.time_parts()) {
                if wdays.is_empty() && t.wday > 0 {
                    wdays = WeekdayMask::from_bits_truncate(1 << (t.wday - 1));
                }
            }
            if let Some(d) = date.as_ref().and_then(|o| o.date_parts()) {
                mday = mday.or(Some(d.day as i32));
                month = month.or(Some(d.month as i32));
                year = year.or(Some(d.year as i32));
            }
            let off_day = offset / 86400;
            if let Some(day) = mday.as_mut() {
                *day += off_day as i32;
            }
        }
        (mday, month, year, wdays)
    }

    /// Hour/minute constraints for the already-resolved day, as
    /// `(minute, hour)`. `None` means the spec cannot produce a time for
    /// that day (solar collaborator failure).
    fn time_constraints(&self, day: i32, month: i32, year: i32) -> Option<(Option<i32>, Option<i32>)> {
        match &self.kind {
            SpecKind::Fixed => Some((self.min, self.hour)),
            SpecKind::Variable { time, offset, .. } => {
                let mut min = self.min;
                let mut hour = self.hour;
                if let Some(t) = time.as_ref().and_then(|o| o.time_parts()) {
                    min = min.or(Some(t.min as i32));
                    hour = hour.or(Some(t.hour as i32));
                }
                let off_min = offset / 60;
                let off_hour = off_min / 60;
                if let Some(hour) = hour.as_mut() {
                    *hour += (off_hour % 24) as i32;
                }
                if let Some(min) = min.as_mut() {
                    *min += (off_min % 60) as i32;
                }
                Some((min, hour))
            }
            SpecKind::Sunrise(solar) => {
                let (hour, min) = solar.sunrise(resolve_date(year, month, day)?)?;
                Some((Some(min as i32), Some(hour as i32)))
            }
            SpecKind::Sunset(solar) => {
                let (hour, min) = solar.sunset(resolve_date(year, month, day)?)?;
                Some((Some(min as i32), Some(hour as i32)))
            }
            SpecKind::SolarNoon(solar) => {
                let (hour, min) = solar.noon(resolve_date(year, month, day)?)?;
                Some((Some(min as i32), Some(hour as i32)))
            }
        }
    }
}

impl Drop for TimeSpec {
    fn drop(&mut self) {
        if let SpecKind::Variable {
            time,
            date,
            listener: Some(listener),
            ..
        } = &self.kind
        {
            if let Some(object) = time {
                object.remove_change_listener(listener);
            }
            if let Some(object) = date {
                object.remove_change_listener(listener);
            }
        }
    }
}

/// Normalises possibly-overflowed day/month values into a date.
fn resolve_date(year: i32, month: i32, day: i32) -> Option<NaiveDate> {
    let month0 = month - 1;
    let year = year + month0.div_euclid(12);
    let month = month0.rem_euclid(12) + 1;
    let first = NaiveDate::from_ymd_opt(year, month as u32, 1)?;
    first.checked_add_signed(Duration::days(day as i64 - 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Year = 0,
    Month = 1,
    Day = 2,
    Hour = 3,
    Minute = 4,
}

impl Field {
    fn higher(self) -> Option<Field> {
        match self {
            Field::Year => None,
            Field::Month => Some(Field::Year),
            Field::Day => Some(Field::Month),
            Field::Hour => Some(Field::Day),
            Field::Minute => Some(Field::Hour),
        }
    }

    fn lower(self) -> Option<Field> {
        match self {
            Field::Year => Some(Field::Month),
            Field::Month => Some(Field::Day),
            Field::Day => Some(Field::Hour),
            Field::Hour => Some(Field::Minute),
            Field::Minute => None,
        }
    }

    fn minimum(self) -> i32 {
        match self {
            Field::Month | Field::Day => 1,
            _ => 0,
        }
    }
}

/// Broken-down date-time with a free/pinned bit per field.
///
/// Pinning a field resets every free field below it to its minimum; the
/// reset pins those fields too, so later substitution must explicitly
/// free them again. Values may run out of calendar range while the walker
/// operates; [`DateFields::to_naive`] normalises overflow.
#[derive(Debug, Clone)]
struct DateFields {
    fields: [i32; 5],
    free: u8,
}

impl DateFields {
    fn from_naive(t: NaiveDateTime) -> Self {
        DateFields {
            fields: [
                t.year(),
                t.month() as i32,
                t.day() as i32,
                t.hour() as i32,
                t.minute() as i32,
            ],
            free: 0x1F,
        }
    }

    fn get(&self, field: Field) -> i32 {
        self.fields[field as usize]
    }

    fn is_free(&self, field: Field) -> bool {
        self.free & (1 << field as usize) != 0
    }

    fn set(&mut self, field: Field, value: Option<i32>) {
        match value {
            None => self.free |= 1 << field as usize,
            Some(value) => {
                self.free &= !(1 << field as usize);
                self.fields[field as usize] = value;
                let mut below = field.lower();
                while let Some(f) = below {
                    if self.is_free(f) {
                        self.set(f, Some(f.minimum()));
                    }
                    below = f.lower();
                }
            }
        }
    }

    fn increase(&mut self, field: Field) -> i32 {
        let value = self.get(field) + 1;
        self.set(field, Some(value));
        value
    }

    /// Closest free field at or above `field`, towards the year.
    fn closest_free_at_or_above(&self, field: Field) -> Option<Field> {
        let mut candidate = Some(field);
        while let Some(f) = candidate {
            if self.is_free(f) {
                return Some(f);
            }
            candidate = f.higher();
        }
        None
    }

    /// Drives this value to be at least `current` over the field range
    /// `from..=to`: free violated fields snap to the current value, pinned
    /// violated fields bump the closest free field above and stop.
    /// Returns `false` when no free field exists to bump (unreachable
    /// schedule).
    fn resolve_against(&mut self, current: &DateFields, from: Field, to: Field) -> bool {
        let mut field = Some(from);
        while let Some(f) = field {
            if self.get(f) < current.get(f) {
                if self.is_free(f) {
                    self.set(f, Some(current.get(f)));
                } else {
                    match self.closest_free_at_or_above(f) {
                        None => return false,
                        Some(free) => {
                            self.increase(free);
                        }
                    }
                    // Lower fields already sit at their minima; this value
                    // is now past `current`.
                    break;
                }
            }
            if f == to {
                break;
            }
            field = f.lower();
        }
        true
    }

    /// Normalised calendar form; `None` if the year leaves chrono's range.
    fn to_naive(&self) -> Option<NaiveDateTime> {
        let month0 = self.get(Field::Month) - 1;
        let year = self.get(Field::Year) + month0.div_euclid(12);
        let month = month0.rem_euclid(12) + 1;
        let date = NaiveDate::from_ymd_opt(year, month as u32, 1)?;
        date.and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::days(self.get(Field::Day) as i64 - 1))?
            .checked_add_signed(Duration::hours(self.get(Field::Hour) as i64))?
            .checked_add_signed(Duration::minutes(self.get(Field::Minute) as i64))
    }
}

/// Converts a local broken-down instant to a timestamp with the DST rules
/// of the scheduler: an ambiguous fall-back instant resolves to its
/// earlier occurrence, a spring-forward gap pins to 03:00:00.
fn local_timestamp(naive: NaiveDateTime) -> Option<i64> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => {
            info!("DST change detected around {naive}");
            let pinned = naive.date().and_hms_opt(3, 0, 0)?;
            match Local.from_local_datetime(&pinned) {
                LocalResult::Single(t) => Some(t.timestamp()),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
                LocalResult::None => None,
            }
        }
    }
}

/// Earliest instant at least one minute after `start` satisfying `spec`,
/// or `None` when the schedule is unreachable.
pub fn find_next(start: i64, spec: &TimeSpec, exceptions: &ExceptionDays) -> Option<i64> {
    let mut start = start;
    // The exception fast-forward re-enters with a new start; bounded by
    // the calendar because each pass advances at least to the next day.
    for _ in 0..MAX_EXCEPTION_SKIPS {
        let begin = Local.timestamp_opt(start, 0).single()?.naive_local() + Duration::minutes(1);
        let current = DateFields::from_naive(begin);
        let mut target = DateFields::from_naive(begin);

        let (mday, month, year, wdays) = spec.day_constraints();
        // Weekday mask and explicit day/month/year are mutually exclusive;
        // the mask wins.
        let (mday, month, year) = if wdays.is_empty() {
            (mday, month, year)
        } else {
            (None, None, None)
        };
        target.set(Field::Year, year);
        target.set(Field::Month, month);
        target.set(Field::Day, mday);

        if wdays.is_empty() {
            if !target.resolve_against(&current, Field::Year, Field::Day) {
                info!("no more schedule available");
                return None;
            }
        } else {
            if target.to_naive()? < current.to_naive()? {
                target.increase(Field::Day);
            }
            loop {
                let weekday = target.to_naive()?.date().weekday();
                if wdays.contains_weekday(weekday) {
                    break;
                }
                if target.increase(Field::Day) > 40 {
                    info!("wrong weekday specification");
                    return None;
                }
            }
        }

        let Some((min, hour)) = spec.time_constraints(
            target.get(Field::Day),
            target.get(Field::Month),
            target.get(Field::Year),
        ) else {
            info!("no solar time available, schedule unreachable");
            return None;
        };
        target.set(Field::Hour, hour);
        target.set(Field::Minute, min);
        if !target.resolve_against(&current, Field::Hour, Field::Minute) {
            info!("no more schedule available");
            return None;
        }

        // The hour/minute backtrack may have bumped the day off the mask;
        // advance onto it again. Hour and minute are pinned by now, so
        // the day increments leave them alone.
        if !wdays.is_empty() {
            let mut probes = 0;
            while !wdays.contains_weekday(target.to_naive()?.date().weekday()) {
                if probes == 7 {
                    info!("wrong weekday specification");
                    return None;
                }
                target.increase(Field::Day);
                probes += 1;
            }
        }

        let resolved = target.to_naive()?;
        let next = local_timestamp(resolved)?;
        if next <= start {
            error!("timer error, next execution ({next}) is before start ({start})");
            return None;
        }

        if spec
            .exception
            .accepts(exceptions.is_exception_date(resolved.date()))
        {
            return Some(next);
        }
        // Fast forward to 23:59 the same day so the next pass switches to
        // the following day.
        debug!("exception-day mismatch at {resolved}, retrying next day");
        start = local_timestamp(resolved.date().and_hms_opt(23, 59, 0)?)?;
    }
    error!("giving up schedule resolution after {MAX_EXCEPTION_SKIPS} exception skips");
    None
}

const MAX_EXCEPTION_SKIPS: usize = 1500;

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn weekday_mask_digits() {
        let mask = WeekdayMask::from_digits("135");
        assert!(mask.contains(WeekdayMask::MON));
        assert!(mask.contains(WeekdayMask::WED));
        assert!(mask.contains(WeekdayMask::FRI));
        assert!(!mask.contains(WeekdayMask::SUN));
        assert_eq!(mask.to_digits(), "135");
        assert_eq!(WeekdayMask::from_digits("x9").bits(), 0);
        assert_eq!(WeekdayMask::from_digits("7654321").to_digits(), "1234567");
    }

    #[test]
    fn weekday_mask_matches_chrono() {
        assert!(WeekdayMask::MON.contains_weekday(Weekday::Mon));
        assert!(WeekdayMask::SUN.contains_weekday(Weekday::Sun));
        assert!(!WeekdayMask::SUN.contains_weekday(Weekday::Sat));
    }

    #[test]
    fn day_spec_wildcards() {
        let spec = DaySpec {
            day: Some(1),
            month: Some(5),
            year: None,
        };
        assert!(spec.matches(NaiveDate::from_ymd_opt(2007, 5, 1).unwrap()));
        assert!(spec.matches(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        assert!(!spec.matches(NaiveDate::from_ymd_opt(2007, 6, 1).unwrap()));

        let exact = DaySpec {
            day: Some(30),
            month: Some(5),
            year: Some(2007),
        };
        assert!(exact.matches(NaiveDate::from_ymd_opt(2007, 5, 30).unwrap()));
        assert!(!exact.matches(NaiveDate::from_ymd_opt(2008, 5, 30).unwrap()));
    }

    #[test]
    fn pinning_resets_lower_free_fields() {
        let mut fields = DateFields::from_naive(naive(2007, 5, 29, 6, 31));
        fields.set(Field::Day, Some(5));
        assert_eq!(fields.get(Field::Hour), 0);
        assert_eq!(fields.get(Field::Minute), 0);
        assert!(!fields.is_free(Field::Hour));
        // Substitution frees the field again but keeps the reset value.
        fields.set(Field::Hour, None);
        assert!(fields.is_free(Field::Hour));
        assert_eq!(fields.get(Field::Hour), 0);
    }

    #[test]
    fn resolve_snaps_free_fields_to_current() {
        let current = DateFields::from_naive(naive(2007, 5, 29, 6, 31));
        let mut target = DateFields::from_naive(naive(2007, 5, 29, 6, 31));
        target.set(Field::Hour, Some(6));
        target.set(Field::Minute, Some(30));
        assert!(target.resolve_against(&current, Field::Hour, Field::Minute));
        // 06:30 is in the past; the free day bumps.
        assert_eq!(target.get(Field::Day), 30);
        assert_eq!(target.to_naive().unwrap(), naive(2007, 5, 30, 6, 30));
    }

    #[test]
    fn resolve_fails_when_everything_is_pinned() {
        let current = DateFields::from_naive(naive(2007, 5, 29, 6, 31));
        let mut target = DateFields::from_naive(naive(2007, 5, 29, 6, 31));
        target.set(Field::Year, Some(2006));
        target.set(Field::Month, Some(1));
        target.set(Field::Day, Some(1));
        assert!(!target.resolve_against(&current, Field::Year, Field::Day));
    }

    #[test]
    fn normalisation_carries_overflow() {
        let mut fields = DateFields::from_naive(naive(2007, 12, 31, 23, 59));
        fields.increase(Field::Minute);
        assert_eq!(fields.to_naive().unwrap(), naive(2008, 1, 1, 0, 0));

        let mut fields = DateFields::from_naive(naive(2007, 5, 29, 6, 0));
        fields.set(Field::Day, Some(40));
        assert_eq!(fields.to_naive().unwrap(), naive(2007, 6, 9, 0, 0));
    }
}
