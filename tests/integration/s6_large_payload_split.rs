//! S6: a message whose encoded body exceeds `MAX_SINGLE_PACKET_DATA`
//! is split into a First/Normal/.../Last packet sequence on send and
//! reassembled byte-for-byte before it reaches application code.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig};
use jaus_messages::messages::discovery::{ReportIdentification, ReportSubsystemList};
use jaus_test_support::LoopbackTransport;
use jaus_wire::{Address, MAX_SINGLE_PACKET_DATA};

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[test]
fn split_message_reassembles_intact_across_many_packets() {
    let (sender_transport, receiver_transport) = LoopbackTransport::pair();

    let sender = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), sender_transport, Callbacks::default());

    let received: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let received_cb = Arc::clone(&received);
    let mut receiver_callbacks = Callbacks::default();
    receiver_callbacks.on_discovery = Arc::new(move |platform, event| {
        if matches!(event, jaus_core::DiscoveryEvent::Update) {
            *received_cb.lock().unwrap() = platform.identification;
        }
    });
    let receiver = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), receiver_transport, receiver_callbacks);

    // Register subsystem 1 with the receiver's discovery engine first —
    // an identification update for an unknown subsystem is dropped.
    let subsystem_list = ReportSubsystemList { subsystem_ids: vec![1] };
    sender.send(receiver.address(), &subsystem_list, false).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    // Three packets' worth of payload, well past the single-packet limit.
    let long_name: String = "x".repeat(MAX_SINGLE_PACKET_DATA * 2 + 500);
    let report = ReportIdentification {
        subsystem_id: 1,
        identification: long_name.clone(),
    };
    sender.send(receiver.address(), &report, false).unwrap();

    std::thread::sleep(Duration::from_millis(150));

    let reassembled = received.lock().unwrap().clone();
    assert_eq!(reassembled, Some(long_name), "reassembled identification should match the original byte-for-byte");

    assert_eq!(sender.counters().header_decode_errors.load(std::sync::atomic::Ordering::Relaxed), 0);
    assert_eq!(receiver.counters().header_decode_errors.load(std::sync::atomic::Ordering::Relaxed), 0);

    sender.shutdown();
    receiver.shutdown();
}
