//! UDP I/O ports and listener dispatch
//!
//! An [`IoPort`] owns a UDP socket with a fixed peer for sends and a
//! shared local receive port. A reader task runs while at least one
//! [`IoListener`] is registered: it blocks on the socket and fans every
//! datagram out to the listeners in insertion order, fully processing one
//! datagram before the next. [`TxAction`] sends a fixed payload after a
//! configurable delay; [`RxCondition`] matches inbound data against an
//! expected byte string and pulses its owning change listener.
//!
//! Every port attempts to bind the shared local port 21001. A conflict is
//! logged and the port falls back to an ephemeral bind so sends keep
//! working.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::rc::{Rc, Weak};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xmltree::Element;

use crate::config;
use crate::error::{CoreError, CoreResult};
use crate::object::ChangeListener;

/// Local receive port shared by every UDP I/O port.
pub const LOCAL_RECEIVE_PORT: u16 = 21001;

const RECEIVE_BUFFER: usize = 1024;

/// Receiver of raw datagrams from an I/O port.
pub trait IoListener {
    fn on_data_received(&self, data: &[u8]);
}

fn same_io_listener(a: &Rc<dyn IoListener>, b: &Rc<dyn IoListener>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

struct PortShared {
    listeners: Vec<Rc<dyn IoListener>>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

/// A UDP I/O port with a fixed peer.
pub struct IoPort {
    me: Weak<IoPort>,
    id: String,
    url: String,
    host: String,
    peer: SocketAddr,
    socket: Option<Rc<UdpSocket>>,
    shared: RefCell<PortShared>,
    shutdown: CancellationToken,
}

impl IoPort {
    /// Builds a port from its configuration element. Must run inside the
    /// runtime so the socket can register with the reactor.
    ///
    /// Recognised attributes: `id`, `type` (only `udp`), `url`, `host`,
    /// `port`.
    pub fn from_element(element: &Element, shutdown: CancellationToken) -> CoreResult<Rc<Self>> {
        match config::attr(element, "type") {
            None | Some("udp") => {}
            Some(other) => return Err(CoreError::UnsupportedType(other.to_string())),
        }
        let id = config::require_attr(element, "id")?.to_string();
        let url = config::attr(element, "url").unwrap_or("").to_string();
        let host = config::require_attr(element, "host")?.to_string();
        let port: u16 = config::attr_or(element, "port", 0)?;
        let ip: IpAddr = host
            .parse()
            .map_err(|_| CoreError::config(format!("invalid host address '{host}'")))?;

        let socket = match bind_local(&id) {
            Ok(socket) => Some(Rc::new(socket)),
            Err(err) => {
                error!("unable to create socket for ioport {id}: {err}");
                None
            }
        };
        info!("udp ioport '{id}' configured for host {host} and port {port}");

        Ok(Rc::new_cyclic(|me| IoPort {
            me: me.clone(),
            id,
            url,
            host,
            peer: SocketAddr::new(ip, port),
            socket,
            shared: RefCell::new(PortShared {
                listeners: Vec::new(),
                reader: None,
            }),
            shutdown,
        }))
    }

    pub fn export_xml(&self) -> Element {
        let mut element = config::new_element("ioport");
        config::set_attr(&mut element, "id", &self.id);
        config::set_attr(&mut element, "type", "udp");
        if !self.url.is_empty() {
            config::set_attr(&mut element, "url", &self.url);
        }
        config::set_attr(&mut element, "host", &self.host);
        config::set_attr(&mut element, "port", self.peer.port());
        element
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The address the socket actually bound (the shared port, or the
    /// ephemeral fallback).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    /// Sends one datagram to the configured peer.
    pub async fn send(&self, data: &[u8]) -> CoreResult<usize> {
        info!("send(len={}) on ioport {}", data.len(), self.id);
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| {
                error!("no socket for ioport {}", self.id);
                CoreError::config(format!("ioport '{}' has no socket", self.id))
            })?
            .clone();
        let sent = socket.send_to(data, self.peer).await?;
        Ok(sent)
    }

    /// Registers a listener; the reader task starts with the first one.
    pub fn add_listener(&self, listener: Rc<dyn IoListener>) {
        let mut shared = self.shared.borrow_mut();
        if shared.listeners.is_empty() {
            shared.reader = self.spawn_reader();
        }
        shared.listeners.push(listener);
    }

    /// Removes a listener by identity; the reader task stops with the
    /// last one.
    pub fn remove_listener(&self, listener: &Rc<dyn IoListener>) {
        let mut shared = self.shared.borrow_mut();
        shared.listeners.retain(|l| !same_io_listener(l, listener));
        if shared.listeners.is_empty() {
            if let Some(reader) = shared.reader.take() {
                reader.abort();
            }
        }
    }

    /// Fans a datagram out to every listener, in registration order.
    pub fn dispatch(&self, data: &[u8]) {
        let snapshot = self.shared.borrow().listeners.clone();
        for listener in snapshot {
            debug!("calling on_data_received on listener for {}", self.id);
            listener.on_data_received(data);
        }
    }

    fn spawn_reader(&self) -> Option<tokio::task::JoinHandle<()>> {
        let port = self.me.upgrade()?;
        let socket = self.socket.as_ref()?.clone();
        let shutdown = self.shutdown.clone();
        Some(tokio::task::spawn_local(async move {
            debug!("start io port loop for {}", port.id);
            let mut buf = [0u8; RECEIVE_BUFFER];
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                match received {
                    Ok((len, _peer)) if len > 0 => port.dispatch(&buf[..len]),
                    Ok(_) => {}
                    Err(err) => {
                        error!("receive failed on ioport {}: {err}", port.id);
                        break;
                    }
                }
            }
            debug!("out of io port loop for {}", port.id);
        }))
    }
}

/// Binds the shared receive port, falling back to an ephemeral port when
/// it is taken.
fn bind_local(id: &str) -> std::io::Result<UdpSocket> {
    let bound = std::net::UdpSocket::bind(("0.0.0.0", LOCAL_RECEIVE_PORT)).or_else(|err| {
        error!("unable to bind socket for ioport {id}: {err}");
        std::net::UdpSocket::bind(("0.0.0.0", 0))
    })?;
    bound.set_nonblocking(true)?;
    UdpSocket::from_std(bound)
}

/// Registry of configured I/O ports.
#[derive(Default)]
pub struct IoPortManager {
    ports: RefCell<HashMap<String, Rc<IoPort>>>,
}

impl IoPortManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&self, port: Rc<IoPort>) -> CoreResult<()> {
        let mut ports = self.ports.borrow_mut();
        if ports.contains_key(port.id()) {
            return Err(CoreError::DuplicateId(port.id().to_string()));
        }
        ports.insert(port.id().to_string(), port);
        Ok(())
    }

    pub fn get_port(&self, id: &str) -> CoreResult<Rc<IoPort>> {
        self.ports
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn remove_port(&self, id: &str) -> CoreResult<()> {
        self.ports
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Imports an `<ioports>` section.
    pub fn import_xml(
        &self,
        parent: &Element,
        shutdown: &CancellationToken,
    ) -> CoreResult<()> {
        for child in config::children(parent) {
            if child.name != "ioport" {
                return Err(CoreError::config(format!(
                    "unexpected <{}> inside <{}>",
                    child.name, parent.name
                )));
            }
            let id = config::require_attr(child, "id")?;
            let delete = config::attr(child, "delete") == Some("true");
            let exists = self.ports.borrow().contains_key(id);
            match (exists, delete) {
                (true, true) => self.remove_port(id)?,
                (false, true) => return Err(CoreError::NotFound(id.to_string())),
                (exists, false) => {
                    if exists {
                        // Re-import replaces the port wholesale.
                        self.remove_port(id)?;
                    }
                    self.add_port(IoPort::from_element(child, shutdown.clone())?)?;
                }
            }
        }
        Ok(())
    }

    pub fn export_xml(&self) -> Element {
        let mut parent = config::new_element("ioports");
        let mut ids: Vec<String> = self.ports.borrow().keys().cloned().collect();
        ids.sort();
        for id in ids {
            let port = self.ports.borrow()[&id].clone();
            parent
                .children
                .push(xmltree::XMLNode::Element(port.export_xml()));
        }
        parent
    }
}

/// Sends a fixed payload to an I/O port after a delay.
pub struct TxAction {
    port: Rc<IoPort>,
    data: Vec<u8>,
    delay: i64,
}

impl TxAction {
    pub fn new(port: Rc<IoPort>, data: impl Into<Vec<u8>>, delay: i64) -> Self {
        TxAction {
            port,
            data: data.into(),
            delay,
        }
    }

    /// Builds the action from configuration: `ioport` references a port
    /// id, `data` is the literal byte string, `delay` an optional
    /// duration.
    pub fn from_element(element: &Element, ports: &IoPortManager) -> CoreResult<Self> {
        let port = ports.get_port(config::require_attr(element, "ioport")?)?;
        let data = config::attr(element, "data").unwrap_or("").as_bytes().to_vec();
        let delay = match config::attr(element, "delay") {
            Some(text) => config::parse_duration(text, false)?,
            None => 0,
        };
        info!(
            "tx action configured to send {} bytes to ioport {}",
            data.len(),
            port.id()
        );
        Ok(TxAction::new(port, data, delay))
    }

    pub fn export_xml(&self) -> Element {
        let mut element = config::new_element("action");
        config::set_attr(&mut element, "type", "ioport-tx");
        config::set_attr(
            &mut element,
            "data",
            String::from_utf8_lossy(&self.data).into_owned(),
        );
        config::set_attr(&mut element, "ioport", self.port.id());
        if self.delay != 0 {
            config::set_attr(&mut element, "delay", config::format_duration(self.delay));
        }
        element
    }

    /// Sleeps the configured delay, then sends. Errors are logged and
    /// swallowed.
    pub async fn execute(&self) {
        if self.delay > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(self.delay as u64)).await;
        }
        match self.port.send(&self.data).await {
            Ok(_) => info!(
                "tx action sent {} bytes to ioport {}",
                self.data.len(),
                self.port.id()
            ),
            Err(err) => warn!("error in tx action: {err}"),
        }
    }
}

/// Flags inbound data matching an expected byte string.
///
/// On a match the condition flips true, notifies its owner, then flips
/// back and notifies again, so downstream rules observe a transition. A
/// datagram shorter than the expected bytes never matches; longer
/// datagrams are compared on the expected prefix only.
pub struct RxCondition {
    me: Weak<RxCondition>,
    owner: Weak<dyn ChangeListener>,
    port: Weak<IoPort>,
    expected: Vec<u8>,
    value: Cell<bool>,
}

impl RxCondition {
    /// Builds the condition from configuration (`ioport`, `expected`
    /// attributes) and registers it as listener on the port.
    pub fn from_element(
        element: &Element,
        ports: &IoPortManager,
        owner: Weak<dyn ChangeListener>,
    ) -> CoreResult<Rc<Self>> {
        let port = ports.get_port(config::require_attr(element, "ioport")?)?;
        let expected = config::attr(element, "expected")
            .unwrap_or("")
            .as_bytes()
            .to_vec();
        let condition = Rc::new_cyclic(|me| RxCondition {
            me: me.clone(),
            owner,
            port: Rc::downgrade(&port),
            expected,
            value: Cell::new(false),
        });
        port.add_listener(condition.clone());
        Ok(condition)
    }

    /// Current value; true only inside the notification pulse.
    pub fn evaluate(&self) -> bool {
        self.value.get()
    }

    /// Unregisters from the port. Must be called on teardown since the
    /// port holds the condition strongly while registered.
    pub fn detach(&self) {
        if let (Some(me), Some(port)) = (self.me.upgrade(), self.port.upgrade()) {
            port.remove_listener(&(me as Rc<dyn IoListener>));
        }
    }

    pub fn export_xml(&self) -> Element {
        let mut element = config::new_element("condition");
        config::set_attr(&mut element, "type", "ioport-rx");
        if let Some(port) = self.port.upgrade() {
            config::set_attr(&mut element, "ioport", port.id());
        }
        config::set_attr(
            &mut element,
            "expected",
            String::from_utf8_lossy(&self.expected).into_owned(),
        );
        element
    }
}

impl IoListener for RxCondition {
    fn on_data_received(&self, data: &[u8]) {
        let received = &data[..data.len().min(self.expected.len())];
        info!(
            "rx condition received {} bytes, comparing against {}",
            data.len(),
            self.expected.len()
        );
        if received.len() == self.expected.len() && received == self.expected.as_slice() {
            if let Some(owner) = self.owner.upgrade() {
                self.value.set(true);
                owner.on_change(None);
                self.value.set(false);
                owner.on_change(None);
            }
        }
    }
}
