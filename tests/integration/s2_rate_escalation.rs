//! S2: two consumers share one provided Service Connection. The
//! confirmed rate for each is the max of every outstanding request, and
//! a late-arriving faster requester raises the shared delivery rate
//! without the slower requester having to re-request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig, ReceiptKey};
use jaus_messages::codes;
use jaus_messages::messages::pose::ReportGlobalPose;
use jaus_messages::messages::service_connection::{ConfirmServiceConnection, CreateServiceConnection};
use jaus_messages::Message;
use jaus_test_support::LoopbackBus;
use jaus_wire::Address;

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[test]
fn shared_service_connection_rate_tracks_the_fastest_requester() {
    let bus = LoopbackBus::new();

    let mut provider_callbacks = Callbacks::default();
    provider_callbacks.generate = Some(Arc::new(|_code, _pv| {
        Box::new(ReportGlobalPose {
            x: Some(1.0),
            y: None,
            z: None,
            yaw: None,
        })
    }));
    let provider = Component::new(
        ComponentConfig::new(addr(1), 6, addr(255)),
        bus.connect(addr(1)),
        provider_callbacks,
    );

    let slow = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), bus.connect(addr(2)), Callbacks::default());

    let fast_deliveries = Arc::new(AtomicUsize::new(0));
    let fast_deliveries_cb = Arc::clone(&fast_deliveries);
    let mut fast_callbacks = Callbacks::default();
    fast_callbacks.deliver = Arc::new(move |_source, msg| {
        if msg.as_any().downcast_ref::<ReportGlobalPose>().is_some() {
            fast_deliveries_cb.fetch_add(1, Ordering::Relaxed);
        }
    });
    let fast = Component::new(ComponentConfig::new(addr(3), 6, addr(255)), bus.connect(addr(3)), fast_callbacks);

    let slow_create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0001,
        rate_hz: 2.0,
    };
    let reply = slow
        .send_with_receipt(
            provider.address(),
            &slow_create,
            ReceiptKey::ServiceConnection { provider: provider.address() },
            &[codes::CONFIRM_SERVICE_CONNECTION],
            false,
            500,
            1,
        )
        .unwrap();
    let confirm = reply.as_any().downcast_ref::<ConfirmServiceConnection>().unwrap();
    assert_eq!(confirm.confirmed_rate_hz, 2.0);

    let fast_create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0001,
        rate_hz: 20.0,
    };
    fast.send(provider.address(), &fast_create, false).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(provider.counters().header_decode_errors.load(Ordering::Relaxed), 0);
    assert_eq!(
        provider.counters().unknown_command_codes.load(Ordering::Relaxed),
        0,
        "provider should recognize every code exchanged in this scenario"
    );

    std::thread::sleep(Duration::from_millis(300));
    assert!(
        fast_deliveries.load(Ordering::Relaxed) >= 4,
        "fast requester should see deliveries at the escalated shared rate, got {}",
        fast_deliveries.load(Ordering::Relaxed)
    );

    provider.shutdown();
    slow.shutdown();
    fast.shutdown();
}
