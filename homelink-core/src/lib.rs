//! homelink core runtime
//!
//! The core of a KNX home-automation daemon:
//!
//! - **Typed group objects** mirroring bus values, with bit-exact payload
//!   codecs, canonical text forms and synchronous change notification
//!   ([`object`], [`value`], [`codec`]).
//! - **A wall-clock scheduler** driving an ordered task queue from
//!   partially-constrained [`timespec::TimeSpec`] descriptors, with
//!   weekday masks, exception-day policies, variable (object-driven) and
//!   solar specs, and DST-aware resolution ([`timer`], [`timespec`]).
//! - **UDP I/O ports** with listener fan-out, delayed transmit actions
//!   and receive conditions ([`ioport`]).
//!
//! # Concurrency model
//!
//! Everything runs on one OS thread under a tokio `current_thread`
//! runtime with a `LocalSet`: the timer loop, the per-port reader loops
//! and delayed transmissions are cooperative tasks that suspend only at
//! their designated await points (socket receive, timer sleep, transmit
//! delay). Shared state is `Rc<RefCell<_>>`; value updates and listener
//! notification never suspend, so no locking is needed.
//!
//! External collaborators are consumed through seams: the KNX link layer
//! ([`bus::KnxBus`]), value persistence ([`persist::ValueStore`]) and
//! astronomical times ([`sun::SolarTimes`]).

pub mod addr;
pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod ioport;
pub mod object;
pub mod persist;
pub mod services;
pub mod sun;
pub mod timer;
pub mod timespec;
pub mod value;

pub use addr::GroupAddress;
pub use error::{CoreError, CoreResult};
pub use object::{ChangeListener, GroupObject, InitPolicy, ObjectRegistry};
pub use services::Services;
pub use timer::{FixedTimeTask, PeriodicTask, TimerCheck, TimerManager, TimerTask};
pub use timespec::{find_next, ExceptionDays, ExceptionPolicy, TimeSpec, WeekdayMask};
pub use value::{ObjectKind, TypedValue};
