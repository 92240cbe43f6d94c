//! S1: a consumer creates a Service Connection against a periodic
//! producer and receives a run of SC-flagged deliveries at the
//! confirmed rate, without ever having to poll.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig, ScAdmissionDecision};
use jaus_messages::codes;
use jaus_messages::messages::pose::ReportGlobalPose;
use jaus_messages::messages::service_connection::CreateServiceConnection;
use jaus_messages::Message;
use jaus_test_support::LoopbackTransport;
use jaus_wire::Address;

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[test]
fn consumer_receives_periodic_service_connection_deliveries() {
    let (provider_transport, consumer_transport) = LoopbackTransport::pair();

    let mut provider_callbacks = Callbacks::default();
    provider_callbacks.process_sc_request = Arc::new(|create, _requester| ScAdmissionDecision::Ok {
        confirmed_rate_hz: create.rate_hz,
    });
    provider_callbacks.generate = Some(Arc::new(|_code, _pv| {
        Box::new(ReportGlobalPose {
            x: Some(12.0),
            y: Some(-4.0),
            z: None,
            yaw: None,
        })
    }));
    let provider = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), provider_transport, provider_callbacks);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let delivered_for_cb = Arc::clone(&delivered);
    let mut consumer_callbacks = Callbacks::default();
    consumer_callbacks.deliver = Arc::new(move |_source, msg| {
        if let Some(pose) = msg.as_any().downcast_ref::<ReportGlobalPose>() {
            delivered_for_cb.lock().unwrap().push(*pose);
        }
    });
    let consumer = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), consumer_transport, consumer_callbacks);

    let create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0011,
        rate_hz: 10.0,
    };
    consumer.send(provider.address(), &create, false).unwrap();

    std::thread::sleep(Duration::from_millis(400));

    let received = delivered.lock().unwrap();
    assert!(received.len() >= 3, "expected several periodic deliveries, got {}", received.len());
    assert_eq!(received[0].x, Some(12.0));

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn confirmed_rate_is_reported_back_to_the_requester() {
    let (provider_transport, consumer_transport) = LoopbackTransport::pair();
    let provider = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), provider_transport, Callbacks::default());
    let consumer = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), consumer_transport, Callbacks::default());

    let create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0011,
        rate_hz: 5.0,
    };
    let reply = consumer
        .send_with_receipt(
            provider.address(),
            &create,
            jaus_core::ReceiptKey::ServiceConnection { provider: provider.address() },
            &[codes::CONFIRM_SERVICE_CONNECTION],
            false,
            500,
            1,
        )
        .unwrap();
    let confirm = reply
        .as_any()
        .downcast_ref::<jaus_messages::messages::service_connection::ConfirmServiceConnection>()
        .unwrap();
    assert_eq!(confirm.confirmed_rate_hz, 5.0);

    provider.shutdown();
    consumer.shutdown();
}
