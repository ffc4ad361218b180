//! Timer tasks and the scheduler loop
//!
//! The [`TimerManager`] keeps one list of pending tasks sorted ascending
//! by fire instant and drives it from a dedicated cooperative task. A
//! [`PeriodicTask`] produces an on/off pulse from its `at`/`until`/
//! `during`/`after` phases; a [`FixedTimeTask`] fires once at an absolute
//! instant.
//!
//! Internally instants are epoch seconds with `0` meaning "no instant":
//! a task whose next fire resolves to zero simply leaves the schedule.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::{Local, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xmltree::Element;

use crate::config;
use crate::error::{CoreError, CoreResult};
use crate::object::{ChangeListener, GroupObject, ObjectRegistry};
use crate::sun::SolarTimes;
use crate::timespec::{find_next, ExceptionDays, TimeSpec};
use crate::value::{BusDate, ObjectKind, TimeOfDay, TypedValue};

fn current_time() -> i64 {
    Utc::now().timestamp()
}

/// `YYYY-M-D H:MM:SS` in local time, as used by the status dump and the
/// reschedule log lines.
fn format_local(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0).single() {
        Some(t) => t.format("%Y-%-m-%-d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

fn find_next_or_zero(start: i64, spec: Option<&TimeSpec>, exceptions: &ExceptionDays) -> i64 {
    match spec {
        None => {
            info!("no more schedule available");
            0
        }
        Some(spec) => find_next(start, spec, exceptions).unwrap_or(0),
    }
}

/// A schedulable entity owned by the [`TimerManager`].
pub trait TimerTask {
    /// Next fire instant; zero when unscheduled.
    fn exec_time(&self) -> i64;

    /// Fires the task. Runs synchronously inside the timer loop.
    fn on_timer(&self, now: i64);

    /// Recomputes the next fire instant and returns it (zero removes the
    /// task from the schedule).
    fn reschedule(&self, now: i64, exceptions: &ExceptionDays) -> i64;

    fn status_xml(&self) -> Element;
}

fn same_task(a: &Rc<dyn TimerTask>, b: &Rc<dyn TimerTask>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// A task firing once at an absolute instant.
pub struct FixedTimeTask {
    exec_time: Cell<i64>,
    listener: RefCell<Option<Weak<dyn ChangeListener>>>,
}

impl FixedTimeTask {
    pub fn new(exec_time: i64) -> Rc<Self> {
        Rc::new(FixedTimeTask {
            exec_time: Cell::new(exec_time),
            listener: RefCell::new(None),
        })
    }

    pub fn set_listener(&self, listener: Weak<dyn ChangeListener>) {
        *self.listener.borrow_mut() = Some(listener);
    }
}

impl TimerTask for FixedTimeTask {
    fn exec_time(&self) -> i64 {
        self.exec_time.get()
    }

    fn on_timer(&self, _now: i64) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.on_change(None);
        }
    }

    fn reschedule(&self, now: i64, _exceptions: &ExceptionDays) -> i64 {
        let now = if now == 0 { current_time() } else { now };
        if self.exec_time.get() > now {
            info!("rescheduled at {}", format_local(self.exec_time.get()));
            self.exec_time.get()
        } else {
            info!("not rescheduled");
            0
        }
    }

    fn status_xml(&self) -> Element {
        let mut element = config::new_element("task");
        config::set_attr(&mut element, "next-exec", format_local(self.exec_time.get()));
        element
    }
}

/// A pulse-producing task: `at`/`after` starts the pulse, `during`/`until`
/// ends it.
///
/// `during` and `after` keep the original sentinel encoding: `-1` means
/// "driven by the `at`/`until` spec", `during == 0` marks an
/// instantaneous (edge) pulse.
pub struct PeriodicTask {
    me: Weak<PeriodicTask>,
    manager: Weak<TimerManager>,
    at: RefCell<Option<TimeSpec>>,
    until: RefCell<Option<TimeSpec>>,
    during: Cell<i64>,
    after: Cell<i64>,
    value: Cell<bool>,
    next_exec: Cell<i64>,
    listener: RefCell<Option<Weak<dyn ChangeListener>>>,
}

impl PeriodicTask {
    pub fn new(manager: &Rc<TimerManager>) -> Rc<Self> {
        Rc::new_cyclic(|me| PeriodicTask {
            me: me.clone(),
            manager: Rc::downgrade(manager),
            at: RefCell::new(None),
            until: RefCell::new(None),
            during: Cell::new(0),
            after: Cell::new(-1),
            value: Cell::new(false),
            next_exec: Cell::new(0),
            listener: RefCell::new(None),
        })
    }

    /// Current pulse state.
    pub fn value(&self) -> bool {
        self.value.get()
    }

    pub fn set_listener(&self, listener: Weak<dyn ChangeListener>) {
        *self.listener.borrow_mut() = Some(listener);
    }

    /// Configures start phase: fire `after` seconds from scheduling.
    pub fn set_after(&self, seconds: i64) {
        self.after.set(seconds);
    }

    /// Configures start phase: fire when `spec` matches.
    pub fn set_at(&self, spec: TimeSpec) {
        *self.at.borrow_mut() = Some(spec);
        self.after.set(-1);
    }

    /// Configures pulse length in seconds (`0` = instantaneous edge).
    pub fn set_during(&self, seconds: i64) {
        self.during.set(seconds);
    }

    /// Configures pulse end by spec.
    pub fn set_until(&self, spec: TimeSpec) {
        *self.until.borrow_mut() = Some(spec);
        self.during.set(-1);
    }

    /// Parses the phase configuration of a `<task>` element: `<at>` /
    /// `<until>` children, `during` / `after` duration attributes.
    /// Variable specs register this task as change listener on their
    /// referenced objects so mutated inputs trigger a reschedule.
    pub fn configure(
        self: &Rc<Self>,
        element: &Element,
        objects: &ObjectRegistry,
        solar: Option<Rc<dyn SolarTimes>>,
    ) -> CoreResult<()> {
        let listener: Rc<dyn ChangeListener> = self.clone();
        for child in config::children(element) {
            match child.name.as_str() {
                "at" => self.set_at(TimeSpec::from_element(
                    child,
                    objects,
                    solar.clone(),
                    Some(listener.clone()),
                )?),
                "until" => self.set_until(TimeSpec::from_element(
                    child,
                    objects,
                    solar.clone(),
                    Some(listener.clone()),
                )?),
                other => {
                    return Err(CoreError::config(format!(
                        "unexpected <{other}> inside <task>"
                    )))
                }
            }
        }
        if let Some(text) = config::attr(element, "during") {
            self.during.set(config::parse_duration(text, false)?);
        }
        if let Some(text) = config::attr(element, "after") {
            self.after.set(config::parse_duration(text, false)?);
        }
        Ok(())
    }

    pub fn export_xml(&self) -> Element {
        let mut element = config::new_element("task");
        if let Some(at) = self.at.borrow().as_ref() {
            element
                .children
                .push(xmltree::XMLNode::Element(at.export_xml("at")));
        }
        if let Some(until) = self.until.borrow().as_ref() {
            element
                .children
                .push(xmltree::XMLNode::Element(until.export_xml("until")));
        }
        if self.during.get() > 0 {
            config::set_attr(
                &mut element,
                "during",
                config::format_duration(self.during.get()),
            );
        }
        if self.after.get() != -1 {
            config::set_attr(
                &mut element,
                "after",
                config::format_duration(self.after.get()),
            );
        }
        element
    }

    fn notify(&self) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.on_change(None);
        }
    }
}

impl TimerTask for PeriodicTask {
    fn exec_time(&self) -> i64 {
        self.next_exec.get()
    }

    fn on_timer(&self, _now: i64) {
        self.value.set(!self.value.get());
        self.notify();
        if self.during.get() == 0 && self.value.get() {
            // Instantaneous pulse: flip straight back so listeners observe
            // an edge.
            self.value.set(false);
            self.notify();
        }
    }

    fn reschedule(&self, now: i64, exceptions: &ExceptionDays) -> i64 {
        let now = if now == 0 { current_time() } else { now };
        let at = self.at.borrow();
        let until = self.until.borrow();
        let during = self.during.get();
        let after = self.after.get();

        let next = if self.next_exec.get() == 0 && during != 0 {
            // First scheduling: decide whether we are currently inside a
            // pulse window.
            let stop = if during != -1 {
                if after == -1 {
                    find_next_or_zero(now - during, at.as_ref(), exceptions) + during
                } else {
                    now + during
                }
            } else {
                find_next_or_zero(now, until.as_ref(), exceptions)
            };
            let start = if after != -1 {
                now + after
            } else {
                find_next_or_zero(now, at.as_ref(), exceptions)
            };
            if stop < start {
                self.value.set(true);
                stop
            } else {
                self.value.set(false);
                start
            }
        } else if self.value.get() {
            if during != -1 {
                now + during
            } else {
                find_next_or_zero(now, until.as_ref(), exceptions)
            }
        } else if after != -1 {
            now + after
        } else {
            find_next_or_zero(now, at.as_ref(), exceptions)
        };

        self.next_exec.set(next);
        if next != 0 {
            info!("rescheduled at {} ({next})", format_local(next));
        } else {
            info!("not rescheduled");
        }
        next
    }

    fn status_xml(&self) -> Element {
        let mut element = config::new_element("task");
        config::set_attr(&mut element, "next-exec", format_local(self.next_exec.get()));
        let listener = self.listener.borrow().clone();
        if let Some(owner) = listener
            .and_then(|l| l.upgrade())
            .and_then(|l| l.listener_id())
        {
            config::set_attr(&mut element, "owner", owner);
        }
        element
    }
}

/// A mutated schedule input removes the task from the queue and
/// recomputes its phases from scratch.
impl ChangeListener for PeriodicTask {
    fn on_change(&self, _object: Option<&GroupObject>) {
        let (Some(me), Some(manager)) = (self.me.upgrade(), self.manager.upgrade()) else {
            return;
        };
        let task: Rc<dyn TimerTask> = me;
        manager.remove_task(&task);
        manager.reschedule_task(&task, 0);
    }
}

/// Fires the referenced switching object with the task's pulse state.
///
/// This is the listener configured by `<task object="…">`: every pulse
/// transition writes the new boolean to the object.
pub struct PulseOutput {
    object: GroupObject,
    task: RefCell<Option<Weak<PeriodicTask>>>,
}

impl PulseOutput {
    pub fn new(object: GroupObject) -> CoreResult<Rc<Self>> {
        if object.kind() != ObjectKind::Switching {
            return Err(CoreError::WrongObjectType {
                id: object.id(),
                role: "timer task output",
            });
        }
        Ok(Rc::new(PulseOutput {
            object,
            task: RefCell::new(None),
        }))
    }

    pub fn attach(&self, task: &Rc<PeriodicTask>) {
        *self.task.borrow_mut() = Some(Rc::downgrade(task));
    }
}

impl ChangeListener for PulseOutput {
    fn on_change(&self, _object: Option<&GroupObject>) {
        let task = self.task.borrow().clone();
        if let Some(task) = task.and_then(|t| t.upgrade()) {
            if let Err(err) = self.object.set_bool_value(task.value()) {
                warn!("timer output '{}' rejected value: {err}", self.object.id());
            }
        }
    }

    fn listener_id(&self) -> Option<String> {
        Some(self.object.id())
    }
}

/// Outcome of one pass over the task list, deciding the loop cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCheck {
    /// A task fired; look again immediately.
    Immediate,
    /// The head is pending; look again in a second.
    Short,
    /// The list is empty; look again in ten seconds.
    Long,
}

/// Ordered queue of pending tasks plus the loop driving it.
pub struct TimerManager {
    tasks: RefCell<Vec<Rc<dyn TimerTask>>>,
    exceptions: Rc<RefCell<ExceptionDays>>,
}

impl TimerManager {
    pub fn new(exceptions: Rc<RefCell<ExceptionDays>>) -> Rc<Self> {
        Rc::new(TimerManager {
            tasks: RefCell::new(Vec::new()),
            exceptions,
        })
    }

    pub fn exception_days(&self) -> Rc<RefCell<ExceptionDays>> {
        self.exceptions.clone()
    }

    /// Inserts before the first task with a strictly later fire instant,
    /// so tasks sharing an instant fire in insertion order.
    pub fn add_task(&self, task: Rc<dyn TimerTask>) {
        let exec_time = task.exec_time();
        let mut tasks = self.tasks.borrow_mut();
        let position = tasks
            .iter()
            .position(|t| exec_time < t.exec_time())
            .unwrap_or(tasks.len());
        tasks.insert(position, task);
    }

    /// Removes a task by identity.
    pub fn remove_task(&self, task: &Rc<dyn TimerTask>) {
        self.tasks.borrow_mut().retain(|t| !same_task(t, task));
    }

    /// Recomputes a task's next fire instant and queues it when one
    /// exists.
    pub fn reschedule_task(&self, task: &Rc<dyn TimerTask>, now: i64) {
        let next = task.reschedule(now, &self.exceptions.borrow());
        if next != 0 {
            self.add_task(task.clone());
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// One pass over the schedule: fires the head when due (or drops it
    /// with a warning when more than a minute late) and reschedules it.
    pub fn check_task_list(&self, now: i64) -> TimerCheck {
        let first = match self.tasks.borrow().first() {
            Some(task) => task.clone(),
            None => return TimerCheck::Long,
        };
        let next_exec = first.exec_time();
        if next_exec > now {
            return TimerCheck::Short;
        }

        if next_exec > now - 60 {
            info!("timer task execution at {next_exec}");
            first.on_timer(now);
        } else {
            warn!("timer task skipped due to clock skew or heavy load ({next_exec})");
        }

        // The callback may have mutated the list; only pop when the head
        // is still the task we just fired.
        let head_unchanged = self
            .tasks
            .borrow()
            .first()
            .is_some_and(|head| same_task(head, &first));
        if head_unchanged {
            self.tasks.borrow_mut().remove(0);
            self.reschedule_task(&first, now);
        }
        TimerCheck::Immediate
    }

    /// The scheduler loop. Runs until `shutdown` is cancelled.
    pub async fn run(self: Rc<Self>, shutdown: CancellationToken) {
        debug!("starting timer manager loop");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let delay = match self.check_task_list(current_time()) {
                TimerCheck::Immediate => {
                    tokio::task::yield_now().await;
                    continue;
                }
                TimerCheck::Short => std::time::Duration::from_secs(1),
                TimerCheck::Long => std::time::Duration::from_secs(10),
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("out of timer manager loop");
    }

    /// Dumps the upcoming schedule in fire order.
    pub fn status_xml(&self) -> Element {
        let mut parent = config::new_element("timer");
        for task in self.tasks.borrow().iter() {
            parent
                .children
                .push(xmltree::XMLNode::Element(task.status_xml()));
        }
        parent
    }

    /// Imports a `<timer>` section of `<task>` elements.
    ///
    /// A `<task>` with phase children builds a [`PeriodicTask`]; a
    /// `<task date="…" time="…">` builds a [`FixedTimeTask`]. Either kind
    /// drives the switching object named by its `object` attribute.
    pub fn import_xml(
        self: &Rc<Self>,
        parent: &Element,
        objects: &ObjectRegistry,
        solar: Option<Rc<dyn SolarTimes>>,
        outputs: &mut Vec<Rc<PulseOutput>>,
    ) -> CoreResult<()> {
        for child in config::children(parent) {
            if child.name != "task" {
                return Err(CoreError::config(format!(
                    "unexpected <{}> inside <timer>",
                    child.name
                )));
            }
            if let (Some(date), Some(time)) =
                (config::attr(child, "date"), config::attr(child, "time"))
            {
                let TypedValue::Date(date) = TypedValue::parse(ObjectKind::Date, date)? else {
                    unreachable!()
                };
                let TypedValue::Time(time) = TypedValue::parse(ObjectKind::Time, time)? else {
                    unreachable!()
                };
                let task = FixedTimeTask::new(fixed_instant(date, time)?);
                let task_dyn: Rc<dyn TimerTask> = task;
                self.reschedule_task(&task_dyn, 0);
                continue;
            }

            let task = PeriodicTask::new(self);
            task.configure(child, objects, solar.clone())?;
            if let Some(id) = config::attr(child, "object") {
                let output = PulseOutput::new(objects.get(id)?)?;
                output.attach(&task);
                task.set_listener(Rc::downgrade(&output) as Weak<dyn ChangeListener>);
                outputs.push(output);
            }
            let task_dyn: Rc<dyn TimerTask> = task;
            self.reschedule_task(&task_dyn, 0);
        }
        Ok(())
    }
}

fn fixed_instant(date: BusDate, time: TimeOfDay) -> CoreResult<i64> {
    use chrono::NaiveDate;
    let naive = NaiveDate::from_ymd_opt(date.year as i32, date.month as u32, date.day as u32)
        .and_then(|d| d.and_hms_opt(time.hour as u32, time.min as u32, time.sec as u32))
        .ok_or_else(|| CoreError::config(format!("invalid task instant {date} {time}")))?;
    match Local.from_local_datetime(&naive).earliest() {
        Some(t) => Ok(t.timestamp()),
        None => Err(CoreError::config(format!(
            "task instant {date} {time} does not exist locally"
        ))),
    }
}
