//! I/O port contract: listener fan-out order, receive-condition edge
//! pulses and delayed transmission over real UDP sockets.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use homelink_core::ioport::{IoListener, IoPortManager, RxCondition, TxAction};
use homelink_core::object::{ChangeListener, GroupObject};
use tokio_util::sync::CancellationToken;
use xmltree::Element;

fn element(xml: &str) -> Element {
    Element::parse(xml.as_bytes()).unwrap()
}

struct Tag {
    log: Rc<RefCell<Vec<&'static str>>>,
    name: &'static str,
}

impl IoListener for Tag {
    fn on_data_received(&self, _data: &[u8]) {
        self.log.borrow_mut().push(self.name);
    }
}

fn manager_with_port(peer: std::net::SocketAddr) -> (IoPortManager, Rc<homelink_core::ioport::IoPort>) {
    let ports = IoPortManager::new();
    let config = format!(
        r#"<ioports><ioport id="peer" type="udp" host="{}" port="{}"/></ioports>"#,
        peer.ip(),
        peer.port()
    );
    ports
        .import_xml(&element(&config), &CancellationToken::new())
        .unwrap();
    let port = ports.get_port("peer").unwrap();
    (ports, port)
}

#[tokio::test(flavor = "current_thread")]
async fn listeners_receive_in_insertion_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let peer = "127.0.0.1:19999".parse().unwrap();
            let (_ports, port) = manager_with_port(peer);

            let log = Rc::new(RefCell::new(Vec::new()));
            let first = Rc::new(Tag {
                log: log.clone(),
                name: "first",
            });
            let second = Rc::new(Tag {
                log: log.clone(),
                name: "second",
            });
            port.add_listener(first.clone());
            port.add_listener(second.clone());

            port.dispatch(b"ping");
            port.dispatch(b"pong");
            assert_eq!(*log.borrow(), vec!["first", "second", "first", "second"]);

            // Removing one keeps the other receiving.
            port.remove_listener(&(first as Rc<dyn IoListener>));
            log.borrow_mut().clear();
            port.dispatch(b"again");
            assert_eq!(*log.borrow(), vec!["second"]);
        })
        .await;
}

struct PulseProbe {
    condition: RefCell<Option<Rc<RxCondition>>>,
    observed: RefCell<Vec<bool>>,
}

impl ChangeListener for PulseProbe {
    fn on_change(&self, _object: Option<&GroupObject>) {
        if let Some(condition) = self.condition.borrow().as_ref() {
            self.observed.borrow_mut().push(condition.evaluate());
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn rx_condition_pulses_on_expected_prefix() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let peer = "127.0.0.1:19998".parse().unwrap();
            let (ports, port) = manager_with_port(peer);

            let probe = Rc::new(PulseProbe {
                condition: RefCell::new(None),
                observed: RefCell::new(Vec::new()),
            });
            let condition = RxCondition::from_element(
                &element(r#"<condition type="ioport-rx" ioport="peer" expected="OPEN"/>"#),
                &ports,
                Rc::downgrade(&probe) as std::rc::Weak<dyn ChangeListener>,
            )
            .unwrap();
            *probe.condition.borrow_mut() = Some(condition.clone());

            // Exact match and longer datagrams with the right prefix pulse
            // true-then-false.
            port.dispatch(b"OPEN");
            assert_eq!(*probe.observed.borrow(), vec![true, false]);
            probe.observed.borrow_mut().clear();
            port.dispatch(b"OPEN+extra");
            assert_eq!(*probe.observed.borrow(), vec![true, false]);

            // Mismatches and short datagrams never notify.
            probe.observed.borrow_mut().clear();
            port.dispatch(b"SHUT");
            port.dispatch(b"OPE");
            assert!(probe.observed.borrow().is_empty());

            // Outside the pulse the condition reads false.
            assert!(!condition.evaluate());
            condition.detach();
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn tx_action_sends_after_delay() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            // A plain std socket stands in for the remote peer.
            let remote = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            remote
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let (ports, _port) = manager_with_port(remote.local_addr().unwrap());

            let action = TxAction::from_element(
                &element(r#"<action type="ioport-tx" ioport="peer" data="hello peer"/>"#),
                &ports,
            )
            .unwrap();
            action.execute().await;

            let mut buf = [0u8; 64];
            let (len, _) = remote.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], b"hello peer");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn reader_task_dispatches_inbound_datagrams() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            let (_ports, port) = manager_with_port(sender.local_addr().unwrap());

            let received = Rc::new(ReceivedFlag::default());
            port.add_listener(received.clone());

            let mut target = port.local_addr().unwrap();
            target.set_ip("127.0.0.1".parse().unwrap());
            sender.send_to(b"knock", target).unwrap();

            // The reader runs as a local task; give it time to wake up.
            for _ in 0..50 {
                if received.seen.get() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            assert!(received.seen.get(), "datagram was not dispatched");
        })
        .await;
}

#[derive(Default)]
struct ReceivedFlag {
    seen: Cell<bool>,
}

impl IoListener for ReceivedFlag {
    fn on_data_received(&self, data: &[u8]) {
        if data == b"knock" {
            self.seen.set(true);
        }
    }
}
