//! Top-level runtime wiring
//!
//! [`Services`] owns the process-wide registries (objects, I/O ports,
//! timers, exception days) and the collaborator handles (persistence,
//! bus driver, solar calculator). There are no ambient globals: the
//! daemon builds one `Services` value and passes it by reference through
//! construction and configuration import.

use std::cell::RefCell;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use xmltree::Element;

use crate::addr::GroupAddress;
use crate::bus::{KnxBus, NullBus};
use crate::error::{CoreError, CoreResult};
use crate::ioport::IoPortManager;
use crate::object::ObjectRegistry;
use crate::persist::ValueStore;
use crate::sun::SolarTimes;
use crate::timer::{PulseOutput, TimerManager};
use crate::timespec::ExceptionDays;

/// Assembles a [`Services`] value with optional collaborators.
#[derive(Default)]
pub struct ServicesBuilder {
    store: Option<Rc<dyn ValueStore>>,
    bus: Option<Rc<dyn KnxBus>>,
    solar: Option<Rc<dyn SolarTimes>>,
}

impl ServicesBuilder {
    pub fn store(mut self, store: Rc<dyn ValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Rc<dyn KnxBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn solar(mut self, solar: Rc<dyn SolarTimes>) -> Self {
        self.solar = Some(solar);
        self
    }

    pub fn build(self) -> Services {
        let bus = self.bus.unwrap_or_else(|| Rc::new(NullBus));
        let exceptions = Rc::new(RefCell::new(ExceptionDays::new()));
        Services {
            objects: Rc::new(ObjectRegistry::new(self.store.clone(), bus.clone())),
            ports: Rc::new(IoPortManager::new()),
            timers: TimerManager::new(exceptions.clone()),
            exceptions,
            solar: self.solar,
            shutdown: CancellationToken::new(),
            outputs: RefCell::new(Vec::new()),
        }
    }
}

/// The daemon core's runtime state.
pub struct Services {
    objects: Rc<ObjectRegistry>,
    ports: Rc<IoPortManager>,
    timers: Rc<TimerManager>,
    exceptions: Rc<RefCell<ExceptionDays>>,
    solar: Option<Rc<dyn SolarTimes>>,
    shutdown: CancellationToken,
    outputs: RefCell<Vec<Rc<PulseOutput>>>,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    pub fn objects(&self) -> &Rc<ObjectRegistry> {
        &self.objects
    }

    pub fn ports(&self) -> &Rc<IoPortManager> {
        &self.ports
    }

    pub fn timers(&self) -> &Rc<TimerManager> {
        &self.timers
    }

    pub fn exception_days(&self) -> &Rc<RefCell<ExceptionDays>> {
        &self.exceptions
    }

    pub fn solar(&self) -> Option<Rc<dyn SolarTimes>> {
        self.solar.clone()
    }

    /// Token observed by every long-running task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests cooperative termination of all loops.
    pub fn shutdown(&self) {
        info!("shutting down services");
        self.shutdown.cancel();
    }

    /// Entry point for the KNX link-layer driver: routes an inbound group
    /// write to the bound objects.
    pub fn dispatch_telegram(&self, dest: GroupAddress, payload: &[u8], source: u16) {
        self.objects.dispatch_write(dest, payload, source);
    }

    /// Spawns the timer loop on the current `LocalSet`.
    pub fn spawn_timer_loop(&self) -> tokio::task::JoinHandle<()> {
        let timers = self.timers.clone();
        let shutdown = self.shutdown.clone();
        tokio::task::spawn_local(timers.run(shutdown))
    }

    /// Imports a full configuration document. Recognised sections:
    /// `<objects>`, `<ioports>`, `<exceptiondays>`, `<timer>`.
    pub fn import_config(&self, root: &Element) -> CoreResult<()> {
        for section in crate::config::children(root) {
            match section.name.as_str() {
                "objects" => self.objects.import_xml(section)?,
                "ioports" => self.ports.import_xml(section, &self.shutdown)?,
                "exceptiondays" => self.exceptions.borrow_mut().import_xml(section)?,
                "timer" => self.timers.import_xml(
                    section,
                    &self.objects,
                    self.solar.clone(),
                    &mut self.outputs.borrow_mut(),
                )?,
                other => {
                    return Err(CoreError::config(format!(
                        "unknown configuration section <{other}>"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Exports the current configuration as one document.
    pub fn export_config(&self) -> Element {
        let mut root = crate::config::new_element("homelink");
        root.children
            .push(xmltree::XMLNode::Element(self.objects.export_xml()));
        root.children
            .push(xmltree::XMLNode::Element(self.ports.export_xml()));
        root.children.push(xmltree::XMLNode::Element(
            self.exceptions.borrow().export_xml(),
        ));
        root
    }

    /// Dumps runtime status (currently the upcoming timer schedule).
    pub fn status_xml(&self) -> Element {
        let mut root = crate::config::new_element("status");
        root.children
            .push(xmltree::XMLNode::Element(self.timers.status_xml()));
        root
    }
}
