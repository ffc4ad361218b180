//! Scheduler contract: next-instant resolution, exception days, periodic
//! task phases and the timer queue discipline.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{Datelike, Local, TimeZone, Timelike, Weekday};
use homelink_core::object::{ChangeListener, GroupObject, ObjectRegistry};
use homelink_core::timer::{FixedTimeTask, PeriodicTask, TimerManager, TimerTask};
use homelink_core::timespec::{
    find_next, DaySpec, ExceptionDays, ExceptionPolicy, TimeSpec, WeekdayMask,
};
use homelink_core::bus::NullBus;
use xmltree::Element;

fn ts(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> i64 {
    Local
        .with_ymd_and_hms(year, month, day, hour, min, sec)
        .unwrap()
        .timestamp()
}

fn element(xml: &str) -> Element {
    Element::parse(xml.as_bytes()).unwrap()
}

fn no_exceptions() -> ExceptionDays {
    ExceptionDays::new()
}

#[derive(Default)]
struct Counter {
    count: Cell<usize>,
}

impl ChangeListener for Counter {
    fn on_change(&self, _object: Option<&GroupObject>) {
        self.count.set(self.count.get() + 1);
    }
}

#[test]
fn daily_schedule_rolls_to_the_next_day() {
    let spec = TimeSpec::at_time(6, 30);
    let next = find_next(ts(2007, 5, 29, 6, 30, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 30, 6, 30, 0));
}

#[test]
fn daily_schedule_fires_same_day_when_still_ahead() {
    let spec = TimeSpec::at_time(6, 30);
    let next = find_next(ts(2007, 5, 29, 5, 0, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 29, 6, 30, 0));
}

#[test]
fn resolution_is_monotonic_and_never_in_the_past() {
    let spec = TimeSpec::at_time(6, 30);
    let exceptions = no_exceptions();
    let mut at = ts(2007, 5, 29, 3, 14, 15);
    for _ in 0..5 {
        let next = find_next(at, &spec, &exceptions).unwrap();
        assert!(next > at);
        at = next;
    }
}

#[test]
fn weekday_mask_is_honoured() {
    // 2007-05-29 was a Tuesday.
    let spec = TimeSpec::on_weekdays(8, 0, WeekdayMask::WED | WeekdayMask::FRI);
    let next = find_next(ts(2007, 5, 29, 9, 0, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 30, 8, 0, 0));

    // Same weekday with the time already past: a full week ahead.
    let spec = TimeSpec::on_weekdays(8, 0, WeekdayMask::TUE);
    let next = find_next(ts(2007, 5, 29, 9, 0, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 6, 5, 8, 0, 0));
    assert_eq!(
        Local
            .timestamp_opt(next, 0)
            .unwrap()
            .date_naive()
            .weekday(),
        Weekday::Tue
    );
}

#[test]
fn weekday_mask_holds_over_a_chain() {
    let mask = WeekdayMask::MON | WeekdayMask::SAT;
    let spec = TimeSpec::on_weekdays(12, 0, mask);
    let exceptions = no_exceptions();
    let mut at = ts(2007, 5, 29, 9, 0, 0);
    for _ in 0..10 {
        let next = find_next(at, &spec, &exceptions).unwrap();
        let weekday = Local.timestamp_opt(next, 0).unwrap().date_naive().weekday();
        assert!(mask.contains_weekday(weekday), "{weekday} not in mask");
        at = next;
    }
}

#[test]
fn past_year_is_unreachable() {
    let spec = TimeSpec::new(Some(30), Some(6), None, None, Some(2006));
    assert_eq!(
        find_next(ts(2007, 5, 29, 6, 30, 0), &spec, &no_exceptions()),
        None
    );
}

#[test]
fn exception_day_is_skipped() {
    let mut exceptions = ExceptionDays::new();
    exceptions.add(DaySpec {
        day: Some(30),
        month: Some(5),
        year: Some(2007),
    });

    let mut spec = TimeSpec::at_time(6, 30);
    spec.exception = ExceptionPolicy::SkipExceptions;
    let next = find_next(ts(2007, 5, 29, 6, 30, 0), &spec, &exceptions).unwrap();
    assert_eq!(next, ts(2007, 5, 31, 6, 30, 0));
}

#[test]
fn exception_only_schedule_waits_for_a_listed_day() {
    let mut exceptions = ExceptionDays::new();
    exceptions.add(DaySpec {
        day: Some(1),
        month: Some(6),
        year: Some(2007),
    });

    let mut spec = TimeSpec::at_time(10, 0);
    spec.exception = ExceptionPolicy::OnlyOnException;
    let next = find_next(ts(2007, 5, 29, 6, 30, 0), &spec, &exceptions).unwrap();
    assert_eq!(next, ts(2007, 6, 1, 10, 0, 0));
}

#[test]
fn wildcard_exception_days_match_monthly() {
    let mut exceptions = ExceptionDays::new();
    exceptions.add(DaySpec {
        day: Some(1),
        month: None,
        year: None,
    });
    assert!(exceptions.is_exception(ts(2007, 6, 1, 12, 0, 0)));
    assert!(exceptions.is_exception(ts(2008, 2, 1, 0, 30, 0)));
    assert!(!exceptions.is_exception(ts(2007, 6, 2, 12, 0, 0)));
}

fn registry_with_time_object() -> (ObjectRegistry, GroupObject) {
    let registry = ObjectRegistry::new(None, Rc::new(NullBus));
    registry
        .import_xml(&element(
            r#"<objects>
                 <object id="wakeup" type="EIS3"/>
                 <object id="holiday" type="EIS4"/>
               </objects>"#,
        ))
        .unwrap();
    let time = registry.get("wakeup").unwrap();
    (registry, time)
}

#[test]
fn variable_spec_reads_time_object_with_offset() {
    let (registry, time) = registry_with_time_object();
    time.set_value("6:30:00").unwrap();

    let spec = TimeSpec::from_element(
        &element(r#"<at type="variable" time="wakeup" offset="10m"/>"#),
        &registry,
        None,
        None,
    )
    .unwrap();
    let next = find_next(ts(2007, 5, 29, 5, 0, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 29, 6, 40, 0));
}

#[test]
fn variable_spec_reads_date_object() {
    let (registry, time) = registry_with_time_object();
    time.set_value("6:30:00").unwrap();
    registry.get("holiday").unwrap().set_value("2007-6-29").unwrap();

    let spec = TimeSpec::from_element(
        &element(r#"<at type="variable" time="wakeup" date="holiday"/>"#),
        &registry,
        None,
        None,
    )
    .unwrap();
    let next = find_next(ts(2007, 5, 29, 5, 0, 0), &spec, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 6, 29, 6, 30, 0));
}

struct TableSun;

impl homelink_core::sun::SolarTimes for TableSun {
    fn sunrise(&self, _date: chrono::NaiveDate) -> Option<(u8, u8)> {
        Some((5, 58))
    }

    fn sunset(&self, _date: chrono::NaiveDate) -> Option<(u8, u8)> {
        Some((21, 12))
    }

    fn noon(&self, _date: chrono::NaiveDate) -> Option<(u8, u8)> {
        Some((13, 35))
    }
}

#[test]
fn solar_specs_take_their_time_from_the_calculator() {
    let (registry, _) = registry_with_time_object();
    let solar: Rc<dyn homelink_core::sun::SolarTimes> = Rc::new(TableSun);

    let sunrise = TimeSpec::from_element(
        &element(r#"<at type="sunrise"/>"#),
        &registry,
        Some(solar.clone()),
        None,
    )
    .unwrap();
    let next = find_next(ts(2007, 5, 29, 9, 0, 0), &sunrise, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 30, 5, 58, 0));

    let sunset = TimeSpec::from_element(
        &element(r#"<at type="sunset"/>"#),
        &registry,
        Some(solar.clone()),
        None,
    )
    .unwrap();
    let next = find_next(ts(2007, 5, 29, 9, 0, 0), &sunset, &no_exceptions()).unwrap();
    assert_eq!(next, ts(2007, 5, 29, 21, 12, 0));

    // Without a calculator the spec does not even import.
    assert!(TimeSpec::from_element(
        &element(r#"<at type="noon"/>"#),
        &registry,
        None,
        None
    )
    .is_err());
}

fn manager() -> Rc<TimerManager> {
    TimerManager::new(Rc::new(RefCell::new(ExceptionDays::new())))
}

#[test]
fn first_schedule_inside_a_pulse_window_turns_on() {
    let manager = manager();
    let task = PeriodicTask::new(&manager);
    task.set_at(TimeSpec::at_time(6, 30));
    task.set_during(3600);

    let now = ts(2007, 5, 30, 7, 0, 0);
    let task_dyn: Rc<dyn TimerTask> = task.clone();
    manager.reschedule_task(&task_dyn, now);

    // 06:30 + 1h pulse covers 07:00: the pulse is on and ends at 07:30.
    assert!(task.value());
    assert_eq!(task.exec_time(), ts(2007, 5, 30, 7, 30, 0));
    assert_eq!(manager.task_count(), 1);

    // Firing at the window end turns the pulse off and schedules the next
    // activation.
    manager.check_task_list(ts(2007, 5, 30, 7, 30, 0));
    assert!(!task.value());
    assert_eq!(task.exec_time(), ts(2007, 5, 31, 6, 30, 0));
    assert_eq!(manager.task_count(), 1);
}

#[test]
fn first_schedule_outside_a_pulse_window_stays_off() {
    let manager = manager();
    let task = PeriodicTask::new(&manager);
    task.set_at(TimeSpec::at_time(6, 30));
    task.set_during(3600);

    let now = ts(2007, 5, 30, 9, 0, 0);
    let task_dyn: Rc<dyn TimerTask> = task.clone();
    manager.reschedule_task(&task_dyn, now);

    assert!(!task.value());
    assert_eq!(task.exec_time(), ts(2007, 5, 31, 6, 30, 0));
}

#[test]
fn instantaneous_task_produces_an_edge_pulse() {
    let manager = manager();
    let task = PeriodicTask::new(&manager);
    task.set_at(TimeSpec::at_time(6, 30));

    let listener = Rc::new(Counter::default());
    task.set_listener(Rc::downgrade(&listener) as std::rc::Weak<dyn ChangeListener>);

    let task_dyn: Rc<dyn TimerTask> = task.clone();
    manager.reschedule_task(&task_dyn, ts(2007, 5, 30, 5, 0, 0));
    assert_eq!(task.exec_time(), ts(2007, 5, 30, 6, 30, 0));

    manager.check_task_list(ts(2007, 5, 30, 6, 30, 0));
    // On then immediately off again: two notifications, value back off.
    assert_eq!(listener.count.get(), 2);
    assert!(!task.value());
    assert_eq!(task.exec_time(), ts(2007, 5, 31, 6, 30, 0));
}

#[test]
fn late_tasks_are_dropped_with_a_skew_warning() {
    let manager = manager();
    let task = PeriodicTask::new(&manager);
    task.set_at(TimeSpec::at_time(6, 30));

    let listener = Rc::new(Counter::default());
    task.set_listener(Rc::downgrade(&listener) as std::rc::Weak<dyn ChangeListener>);

    let task_dyn: Rc<dyn TimerTask> = task.clone();
    manager.reschedule_task(&task_dyn, ts(2007, 5, 30, 5, 0, 0));

    // Two and a half minutes late: outside the 60-second fire window.
    manager.check_task_list(ts(2007, 5, 30, 6, 32, 30));
    assert_eq!(listener.count.get(), 0);
    assert_eq!(task.exec_time(), ts(2007, 5, 31, 6, 30, 0));

    // One fired within the window still runs.
    manager.check_task_list(ts(2007, 5, 31, 6, 30, 45));
    assert_eq!(listener.count.get(), 2);
}

#[test]
fn tasks_sharing_an_instant_fire_in_insertion_order() {
    struct Tag {
        log: Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    }
    impl ChangeListener for Tag {
        fn on_change(&self, _object: Option<&GroupObject>) {
            self.log.borrow_mut().push(self.name);
        }
    }

    let manager = manager();
    let log = Rc::new(RefCell::new(Vec::new()));
    let when = ts(2007, 5, 30, 12, 0, 0);

    let first_tag = Rc::new(Tag {
        log: log.clone(),
        name: "first",
    });
    let second_tag = Rc::new(Tag {
        log: log.clone(),
        name: "second",
    });

    let first = FixedTimeTask::new(when);
    first.set_listener(Rc::downgrade(&first_tag) as std::rc::Weak<dyn ChangeListener>);
    let second = FixedTimeTask::new(when);
    second.set_listener(Rc::downgrade(&second_tag) as std::rc::Weak<dyn ChangeListener>);

    manager.add_task(first.clone());
    manager.add_task(second.clone());

    manager.check_task_list(when);
    manager.check_task_list(when);
    assert_eq!(*log.borrow(), vec!["first", "second"]);
    // Both were one-shot: nothing rescheduled.
    assert_eq!(manager.task_count(), 0);
}

#[test]
fn status_dump_lists_tasks_in_fire_order() {
    let manager = manager();
    let late = FixedTimeTask::new(ts(2007, 5, 30, 18, 0, 0));
    let early = FixedTimeTask::new(ts(2007, 5, 30, 6, 0, 0));
    manager.add_task(late);
    manager.add_task(early);

    let status = manager.status_xml();
    let execs: Vec<&str> = status
        .children
        .iter()
        .filter_map(|node| node.as_element())
        .map(|task| task.attributes["next-exec"].as_str())
        .collect();
    assert_eq!(execs.len(), 2);
    assert!(execs[0].contains("06:00:00"), "{execs:?}");
    assert!(execs[1].contains("18:00:00"), "{execs:?}");
}

#[test]
fn changing_a_variable_input_reschedules_the_task() {
    let (registry, time) = registry_with_time_object();
    time.set_value("6:30:00").unwrap();

    let manager = manager();
    let task = PeriodicTask::new(&manager);
    task.configure(
        &element(r#"<task><at type="variable" time="wakeup"/></task>"#),
        &registry,
        None,
    )
    .unwrap();
    let task_dyn: Rc<dyn TimerTask> = task.clone();
    manager.reschedule_task(&task_dyn, 0);
    let before = task.exec_time();
    assert_ne!(before, 0);

    // Mutating the referenced object re-resolves the schedule.
    time.set_value("7:45:00").unwrap();
    let after = task.exec_time();
    assert_ne!(after, 0);
    assert_ne!(after, before);
    let local = Local.timestamp_opt(after, 0).unwrap();
    assert_eq!((local.hour(), local.minute()), (7, 45));
    assert_eq!(manager.task_count(), 1);
}
