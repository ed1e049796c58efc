use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use canopen_common::cob_id::{self, HEARTBEAT, TPDO1, TPDO2};
use canopen_common::{DictionarySource, NmtState};
use canopen_network::{Bus, BusConfig, Frame, Network, NetworkConfig, Node, VirtualBus};

type Calls = Arc<Mutex<Vec<(u8, u16, Vec<u8>)>>>;

fn fast_config() -> NetworkConfig {
    NetworkConfig {
        tx_poll_timeout_ms: 10,
        rx_poll_timeout_ms: 10,
        join_timeout_ms: 1000,
    }
}

fn record(node: &Node, function_code: u16, calls: &Calls) {
    let calls = Arc::clone(calls);
    let id = node.id();
    node.register_service(function_code, move |cob_id, data| {
        calls.lock().push((id, cob_id, data.to_vec()));
    });
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn decomposition_is_independent() {
    for id in 0..=0x7FFu16 {
        let node = cob_id::node_id(id);
        let function = cob_id::function_code(id);
        assert_eq!(node as u16 & function, 0);
        assert_eq!(cob_id::cob_id(function, node), id);
    }
}

#[test]
fn broadcast_reaches_only_nodes_with_matching_service() {
    let network = Network::new();
    let calls: Calls = Arc::default();
    for id in [1u8, 2, 3] {
        let node = network.add_node(id, DictionarySource::Empty).unwrap();
        if id != 3 {
            record(&node, TPDO1, &calls);
        }
    }

    assert_eq!(network.route_inbound(0x180, &[0xAA]), 3);

    let mut seen: Vec<u8> = calls.lock().iter().map(|(id, _, _)| *id).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2]);
    assert!(calls
        .lock()
        .iter()
        .all(|(_, cob_id, data)| *cob_id == 0x180 && data == &[0xAA]));
}

#[test]
fn unicast_reaches_only_the_addressed_node() {
    let network = Network::new();
    let calls: Calls = Arc::default();
    for id in [10u8, 11] {
        let node = network.add_node(id, DictionarySource::Empty).unwrap();
        record(&node, TPDO2, &calls);
    }

    network.route_inbound(0x28B, &[1, 2, 3]);

    assert_eq!(*calls.lock(), vec![(11, 0x28B, vec![1, 2, 3])]);
}

#[test]
fn misses_are_silent() {
    let network = Network::new();
    let calls: Calls = Arc::default();
    let node = network.add_node(4u8, DictionarySource::Empty).unwrap();
    record(&node, TPDO1, &calls);

    // unregistered address
    assert_eq!(network.route_inbound(0x185, &[1]), 0);
    // registered address, no service for the function code
    assert_eq!(network.route_inbound(0x384, &[1]), 1);

    assert!(calls.lock().is_empty());
}

#[test]
fn heartbeat_round_trip_through_routing() {
    let network = Network::new();
    let node = network.add_node(5u8, DictionarySource::Empty).unwrap();
    let calls: Calls = Arc::default();
    record(&node, HEARTBEAT, &calls);

    network.route_inbound(0x705, &[0x05]);

    assert_eq!(*calls.lock(), vec![(5, 0x705, vec![0x05])]);
}

#[test]
fn heartbeat_round_trip_through_the_bus() {
    let network = Network::with_config(fast_config());
    let node = network.add_node(5u8, DictionarySource::Empty).unwrap();
    network
        .connect(&BusConfig::Virtual {
            channel: "routing-loopback".into(),
            receive_own_messages: true,
        })
        .unwrap();

    network.send_message(0x705, &[0x05]);

    assert!(wait_until(|| node.nmt().heartbeat_count() == 1));
    assert_eq!(node.nmt().state(), Some(NmtState::Operational));

    network.disconnect().unwrap();
    assert_eq!(node.nmt().heartbeat_count(), 1);
}

#[test]
fn frames_from_a_peer_are_dispatched() {
    let network = Network::with_config(fast_config());
    let calls: Calls = Arc::default();
    let node = network.add_node(7u8, DictionarySource::Empty).unwrap();
    record(&node, TPDO1, &calls);
    network
        .connect(&BusConfig::Virtual {
            channel: "routing-peer".into(),
            receive_own_messages: false,
        })
        .unwrap();

    let peer = VirtualBus::open("routing-peer");
    peer.send_frame(&Frame::extended(0x187, &[9])).unwrap();
    peer.send_frame(&Frame::remote(0x187)).unwrap();
    peer.send(0x187, &[1]).unwrap();
    peer.send(0x187, &[2]).unwrap();

    assert!(wait_until(|| calls.lock().len() == 2));
    assert_eq!(
        *calls.lock(),
        vec![(7, 0x187, vec![1]), (7, 0x187, vec![2])]
    );
    network.disconnect().unwrap();
}

#[test]
fn re_registering_an_address_replaces_the_node() {
    let network = Network::new();
    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));

    let first = network.add_node(6u8, DictionarySource::Empty).unwrap();
    let counter = Arc::clone(&first_calls);
    first.register_service(TPDO1, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let second = network.add_node(6u8, DictionarySource::Empty).unwrap();
    let counter = Arc::clone(&second_calls);
    second.register_service(TPDO1, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    network.route_inbound(0x186, &[]);
    network.route_inbound(0x180, &[]);

    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    assert_eq!(network.len(), 1);
    assert!(Arc::ptr_eq(&network.get(6).unwrap(), &second));
    assert!(!first.is_attached());
    assert!(second.is_attached());
}

#[test]
fn node_access() {
    let network = Network::new();
    assert!(network.is_empty());
    for id in [30u8, 3, 12] {
        network.add_node(id, DictionarySource::Empty).unwrap();
    }

    assert_eq!(network.node_ids(), vec![3, 12, 30]);
    assert_eq!(network.len(), 3);
    assert!(network.contains(12));
    assert!(!network.contains(13));
    assert!(network.get(13).is_err());

    let removed = network.remove_node(12).unwrap();
    assert!(!removed.is_attached());
    assert_eq!(
        network.nodes().iter().map(|n| n.id()).collect::<Vec<_>>(),
        vec![3, 30]
    );
}

#[test]
fn node_built_elsewhere_can_be_added() {
    let network = Network::new();
    let node = Arc::new(Node::new(20, DictionarySource::Empty).unwrap());
    assert!(!node.is_attached());

    let added = network.add_node(Arc::clone(&node), DictionarySource::Empty).unwrap();
    assert!(Arc::ptr_eq(&node, &added));
    assert!(node.is_attached());

    node.send_message(0x614, &[0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0]).unwrap();
    assert_eq!(network.pending_messages(), 1);
}

#[test]
fn callbacks_may_register_nodes_during_broadcast() {
    let network = Arc::new(Network::new());
    let node = network.add_node(1u8, DictionarySource::Empty).unwrap();
    let weak = Arc::downgrade(&network);
    node.register_service(TPDO1, move |_, _| {
        if let Some(network) = weak.upgrade() {
            network.add_node(99u8, DictionarySource::Empty).unwrap();
        }
    });

    network.route_inbound(0x180, &[]);
    assert!(network.contains(99));
}
