//! Group objects and the object registry
//!
//! A [`GroupObject`] mirrors one typed value on the KNX bus: it decodes
//! inbound telegram payloads, encodes outbound ones, validates textual
//! updates and notifies registered [`ChangeListener`]s whenever the value
//! actually changes.
//!
//! Objects are shared: time specs, conditions and actions all hold cloned
//! handles next to the registry's own. A handle is a cheap `Rc` clone; the
//! object lives until the last handle drops. Listener back-references are
//! installed by the holder and removed on its teardown, so no reference
//! cycles form through the listener list.
//!
//! # Notification contract
//!
//! `set_value`/`on_write` first store the new value, then iterate a
//! snapshot of the listener list. Listeners added during iteration do not
//! receive the in-flight notification; listeners removed during iteration
//! are not called after removal. Notification is synchronous and must not
//! suspend.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, warn};
use xmltree::Element;

use crate::addr::GroupAddress;
use crate::bus::{KnxBus, NullBus};
use crate::codec;
use crate::config;
use crate::error::{CoreError, CoreResult};
use crate::persist::ValueStore;
use crate::value::{BusDate, HeatingMode, ObjectKind, TimeOfDay, TypedValue};

/// Observer of object value changes.
///
/// `object` is the mutated object, or `None` when the notification
/// originates from a timer pulse or receive condition rather than an
/// object write.
pub trait ChangeListener {
    fn on_change(&self, object: Option<&GroupObject>);

    /// Identifier shown as the owner of scheduled work, when the listener
    /// has one.
    fn listener_id(&self) -> Option<String> {
        None
    }
}

fn same_listener(a: &Rc<dyn ChangeListener>, b: &Rc<dyn ChangeListener>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// How an object obtains its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPolicy {
    /// Type default.
    #[default]
    Default,
    /// Restore from the persistence collaborator; write back every change.
    Persist,
    /// Issue a group read on the bus at creation.
    Request,
}

impl InitPolicy {
    fn from_config(text: &str) -> CoreResult<Self> {
        match text {
            "" | "default" => Ok(InitPolicy::Default),
            "persist" => Ok(InitPolicy::Persist),
            "request" => Ok(InitPolicy::Request),
            other => Err(CoreError::config(format!("unknown init policy '{other}'"))),
        }
    }

    fn config_name(self) -> &'static str {
        match self {
            InitPolicy::Default => "default",
            InitPolicy::Persist => "persist",
            InitPolicy::Request => "request",
        }
    }
}

struct ObjectInner {
    id: String,
    kind: ObjectKind,
    gad: Option<GroupAddress>,
    init: InitPolicy,
    value: TypedValue,
    listeners: Vec<Rc<dyn ChangeListener>>,
    store: Option<Rc<dyn ValueStore>>,
    bus: Rc<dyn KnxBus>,
}

/// Shared handle to a group object.
#[derive(Clone)]
pub struct GroupObject {
    inner: Rc<RefCell<ObjectInner>>,
}

impl GroupObject {
    /// Creates a detached object with the kind's default value, no group
    /// address and no collaborators.
    pub fn new(id: impl Into<String>, kind: ObjectKind) -> Self {
        GroupObject {
            inner: Rc::new(RefCell::new(ObjectInner {
                id: id.into(),
                kind,
                gad: None,
                init: InitPolicy::Default,
                value: TypedValue::default_for(kind),
                listeners: Vec::new(),
                store: None,
                bus: Rc::new(NullBus),
            })),
        }
    }

    /// Builds an object from its configuration element.
    ///
    /// Recognised attributes: `id`, `type`, `gad`, `init`. The initial
    /// value comes from the init policy: a persisted value is restored
    /// silently, `request` issues a group read through the bus.
    pub fn from_element(
        element: &Element,
        store: Option<Rc<dyn ValueStore>>,
        bus: Rc<dyn KnxBus>,
    ) -> CoreResult<Self> {
        let id = config::require_attr(element, "id")?.to_string();
        let kind = ObjectKind::from_config_name(config::require_attr(element, "type")?)?;
        let gad = match config::attr(element, "gad") {
            Some(text) => Some(text.parse()?),
            None => None,
        };
        let init = InitPolicy::from_config(config::attr(element, "init").unwrap_or(""))?;

        let mut value = TypedValue::default_for(kind);
        if init == InitPolicy::Persist {
            if let Some(stored) = store.as_ref().and_then(|s| s.read(&id)) {
                match TypedValue::parse(kind, &stored) {
                    Ok(restored) => value = restored,
                    Err(err) => warn!("ignoring persisted value of '{id}': {err}"),
                }
            }
        }
        if init == InitPolicy::Request {
            if let Some(gad) = gad {
                bus.group_read(gad);
            }
        }

        debug!("object '{id}' configured as {}", kind.config_name());
        Ok(GroupObject {
            inner: Rc::new(RefCell::new(ObjectInner {
                id,
                kind,
                gad,
                init,
                value,
                listeners: Vec::new(),
                store,
                bus,
            })),
        })
    }

    /// Serialises the object description (not its value).
    pub fn export_xml(&self) -> Element {
        let inner = self.inner.borrow();
        let mut element = config::new_element("object");
        config::set_attr(&mut element, "id", &inner.id);
        config::set_attr(&mut element, "type", inner.kind.config_name());
        if let Some(gad) = inner.gad {
            config::set_attr(&mut element, "gad", gad);
        }
        if inner.init != InitPolicy::Default {
            config::set_attr(&mut element, "init", inner.init.config_name());
        }
        element
    }

    pub fn id(&self) -> String {
        self.inner.borrow().id.clone()
    }

    pub fn kind(&self) -> ObjectKind {
        self.inner.borrow().kind
    }

    pub fn group_address(&self) -> Option<GroupAddress> {
        self.inner.borrow().gad
    }

    pub fn init_policy(&self) -> InitPolicy {
        self.inner.borrow().init
    }

    /// Canonical text of the current value.
    pub fn value_text(&self) -> String {
        self.inner.borrow().value.to_string()
    }

    /// A detached copy of the current value.
    pub fn typed_value(&self) -> TypedValue {
        self.inner.borrow().value.clone()
    }

    /// Parses text into a detached value of this object's kind.
    pub fn create_value(&self, text: &str) -> CoreResult<TypedValue> {
        TypedValue::parse(self.kind(), text)
    }

    /// Compares the current value against a detached one.
    pub fn equals(&self, other: &TypedValue) -> bool {
        self.inner.borrow().value == *other
    }

    /// Parses and applies a textual update, publishing to the bus on
    /// change.
    pub fn set_value(&self, text: &str) -> CoreResult<()> {
        let value = TypedValue::parse(self.kind(), text)?;
        self.update_local(value);
        Ok(())
    }

    /// Applies a detached value of the correct kind, publishing to the bus
    /// on change.
    pub fn set_typed_value(&self, value: TypedValue) -> CoreResult<()> {
        if value.kind() != self.kind() {
            return Err(CoreError::WrongObjectType {
                id: self.id(),
                role: "value update",
            });
        }
        self.update_local(value);
        Ok(())
    }

    pub fn set_bool_value(&self, on: bool) -> CoreResult<()> {
        self.set_typed_value(TypedValue::Switch(on))
    }

    pub fn bool_value(&self) -> Option<bool> {
        match self.inner.borrow().value {
            TypedValue::Switch(on) => Some(on),
            _ => None,
        }
    }

    pub fn set_float_value(&self, value: f64) -> CoreResult<()> {
        self.set_typed_value(TypedValue::Float(value))
    }

    pub fn float_value(&self) -> Option<f64> {
        match self.inner.borrow().value {
            TypedValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Raw integer of scaling and heating-mode objects.
    pub fn int_value(&self) -> Option<u8> {
        match self.inner.borrow().value {
            TypedValue::Scaling(v) => Some(v),
            TypedValue::HeatingMode(m) => Some(m.as_byte()),
            _ => None,
        }
    }

    /// Sets a scaling or heating-mode object from its raw integer.
    pub fn set_int_value(&self, value: u8) -> CoreResult<()> {
        match self.kind() {
            ObjectKind::Scaling => self.set_typed_value(TypedValue::Scaling(value)),
            ObjectKind::HeatingMode => {
                let mode = HeatingMode::from_byte(value).ok_or_else(|| {
                    CoreError::parse("heating mode", value.to_string())
                })?;
                self.set_typed_value(TypedValue::HeatingMode(mode))
            }
            _ => Err(CoreError::WrongObjectType {
                id: self.id(),
                role: "integer update",
            }),
        }
    }

    pub fn set_time(&self, wday: u8, hour: u8, min: u8, sec: u8) -> CoreResult<()> {
        self.set_typed_value(TypedValue::Time(TimeOfDay::new(wday, hour, min, sec)?))
    }

    pub fn time_parts(&self) -> Option<TimeOfDay> {
        match self.inner.borrow().value {
            TypedValue::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn set_date(&self, day: u8, month: u8, year: u16) -> CoreResult<()> {
        self.set_typed_value(TypedValue::Date(BusDate::new(day, month, year)?))
    }

    pub fn date_parts(&self) -> Option<BusDate> {
        match self.inner.borrow().value {
            TypedValue::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Applies an inbound bus write.
    ///
    /// The payload is decoded according to the object kind; listeners are
    /// notified iff the decoded value differs from the current one.
    /// Undecodable payloads are logged and dropped. Bus-originated updates
    /// are never echoed back to the bus.
    pub fn on_write(&self, payload: &[u8], source: u16) {
        let kind = self.kind();
        let value = match codec::decode(kind, payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "dropping write from {source:#06x} to '{}': {err}",
                    self.inner.borrow().id
                );
                return;
            }
        };
        let changed = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                false
            } else {
                inner.value = value;
                true
            }
        };
        if changed {
            self.persist_current();
            self.notify_listeners();
        }
    }

    /// Registers a listener. It will first be notified by the *next*
    /// change.
    pub fn add_change_listener(&self, listener: Rc<dyn ChangeListener>) {
        self.inner.borrow_mut().listeners.push(listener);
    }

    /// Removes a previously registered listener by identity.
    pub fn remove_change_listener(&self, listener: &Rc<dyn ChangeListener>) {
        self.inner
            .borrow_mut()
            .listeners
            .retain(|l| !same_listener(l, listener));
    }

    /// Applies a locally originated value, persisting and publishing on
    /// change.
    fn update_local(&self, value: TypedValue) {
        let (changed, publish) = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                (false, None)
            } else {
                inner.value = value;
                (true, inner.gad)
            }
        };
        if changed {
            self.persist_current();
            if let Some(gad) = publish {
                let (payload, bus) = {
                    let inner = self.inner.borrow();
                    (codec::encode(&inner.value), inner.bus.clone())
                };
                bus.group_write(gad, &payload);
            }
            self.notify_listeners();
        }
    }

    fn persist_current(&self) {
        let inner = self.inner.borrow();
        if inner.init == InitPolicy::Persist {
            if let Some(store) = &inner.store {
                store.write(&inner.id, &inner.value.to_string());
            }
        }
    }

    fn notify_listeners(&self) {
        let snapshot = self.inner.borrow().listeners.clone();
        for listener in snapshot {
            let still_registered = self
                .inner
                .borrow()
                .listeners
                .iter()
                .any(|l| same_listener(l, &listener));
            if still_registered {
                listener.on_change(Some(self));
            }
        }
    }
}

/// Registry of all configured group objects, indexed by id and by group
/// address.
pub struct ObjectRegistry {
    objects: RefCell<HashMap<String, GroupObject>>,
    store: Option<Rc<dyn ValueStore>>,
    bus: Rc<dyn KnxBus>,
}

impl ObjectRegistry {
    pub fn new(store: Option<Rc<dyn ValueStore>>, bus: Rc<dyn KnxBus>) -> Self {
        ObjectRegistry {
            objects: RefCell::new(HashMap::new()),
            store,
            bus,
        }
    }

    /// Registers an externally built object.
    pub fn register(&self, object: GroupObject) -> CoreResult<()> {
        let id = object.id();
        let mut objects = self.objects.borrow_mut();
        if objects.contains_key(&id) {
            return Err(CoreError::DuplicateId(id));
        }
        objects.insert(id, object);
        Ok(())
    }

    /// Looks an object up by id.
    pub fn get(&self, id: &str) -> CoreResult<GroupObject> {
        self.objects
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Removes an object; outstanding handles keep it alive until dropped.
    pub fn remove(&self, id: &str) -> CoreResult<()> {
        self.objects
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.borrow().is_empty()
    }

    /// Routes an inbound group write to every object bound to `gad`.
    pub fn dispatch_write(&self, gad: GroupAddress, payload: &[u8], source: u16) {
        let targets: Vec<GroupObject> = self
            .objects
            .borrow()
            .values()
            .filter(|o| o.group_address() == Some(gad))
            .cloned()
            .collect();
        if targets.is_empty() {
            debug!("no object bound to {gad}, ignoring write");
        }
        for object in targets {
            object.on_write(payload, source);
        }
    }

    /// Imports an `<objects>` section: new ids are created, existing ids
    /// are updated in place, `delete="true"` removes.
    pub fn import_xml(&self, parent: &Element) -> CoreResult<()> {
        for child in config::children(parent) {
            if child.name != "object" {
                return Err(CoreError::config(format!(
                    "unexpected <{}> inside <{}>",
                    child.name, parent.name
                )));
            }
            let id = config::require_attr(child, "id")?;
            let delete = config::attr(child, "delete") == Some("true");
            let existing = self.objects.borrow().get(id).cloned();
            match (existing, delete) {
                (Some(_), true) => self.remove(id)?,
                (None, true) => return Err(CoreError::NotFound(id.to_string())),
                (Some(object), false) => {
                    let kind = ObjectKind::from_config_name(config::require_attr(child, "type")?)?;
                    if kind != object.kind() {
                        return Err(CoreError::WrongObjectType {
                            id: id.to_string(),
                            role: "re-import",
                        });
                    }
                    let mut inner = object.inner.borrow_mut();
                    inner.gad = match config::attr(child, "gad") {
                        Some(text) => Some(text.parse()?),
                        None => None,
                    };
                    inner.init =
                        InitPolicy::from_config(config::attr(child, "init").unwrap_or(""))?;
                }
                (None, false) => {
                    let object =
                        GroupObject::from_element(child, self.store.clone(), self.bus.clone())?;
                    self.register(object)?;
                }
            }
        }
        info!("object registry holds {} objects", self.len());
        Ok(())
    }

    /// Exports every object description, sorted by id.
    pub fn export_xml(&self) -> Element {
        let mut parent = config::new_element("objects");
        let mut ids: Vec<String> = self.objects.borrow().keys().cloned().collect();
        ids.sort();
        for id in ids {
            let object = self.objects.borrow()[&id].clone();
            parent
                .children
                .push(xmltree::XMLNode::Element(object.export_xml()));
        }
        parent
    }
}
