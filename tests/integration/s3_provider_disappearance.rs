//! S3: a requested Service Connection goes stale once its provider
//! stops updating. The subscription loop's liveness pass notices and,
//! per the `re_establish_sc` hook's verdict, either re-requests it or
//! drops it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig};
use jaus_messages::codes;
use jaus_messages::messages::pose::ReportGlobalPose;
use jaus_messages::messages::service_connection::CreateServiceConnection;
use jaus_test_support::LoopbackTransport;
use jaus_wire::Address;

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[test]
fn stale_service_connection_is_re_requested_when_the_hook_allows_it() {
    let (provider_transport, consumer_transport) = LoopbackTransport::pair();

    let generate_calls = Arc::new(AtomicUsize::new(0));
    let generate_calls_cb = Arc::clone(&generate_calls);
    let mut provider_callbacks = Callbacks::default();
    provider_callbacks.generate = Some(Arc::new(move |_code, _pv| {
        generate_calls_cb.fetch_add(1, Ordering::Relaxed);
        Box::new(ReportGlobalPose {
            x: Some(7.0),
            y: None,
            z: None,
            yaw: None,
        })
    }));
    let provider = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), provider_transport, provider_callbacks);

    let re_establish_calls = Arc::new(AtomicUsize::new(0));
    let re_establish_calls_cb = Arc::clone(&re_establish_calls);
    let mut consumer_callbacks = Callbacks::default();
    consumer_callbacks.re_establish_sc = Arc::new(move |_sc| {
        re_establish_calls_cb.fetch_add(1, Ordering::Relaxed);
        true
    });
    let consumer = Component::new(
        ComponentConfig::new(addr(2), 6, addr(255)).with_discovery_ttl(Duration::from_millis(30)),
        consumer_transport,
        consumer_callbacks,
    );

    let create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0001,
        rate_hz: 2.0,
    };
    consumer.send(provider.address(), &create, false).unwrap();

    // Let at least two periodic deliveries land so the connection has a
    // real `last_update` baseline, then stop the provider's generation
    // by tearing it down — its reader thread keeps accepting bytes, but
    // nothing fires new deliveries, so the connection goes stale.
    std::thread::sleep(Duration::from_millis(1200));
    provider.shutdown();

    std::thread::sleep(Duration::from_millis(1300));
    assert!(
        re_establish_calls.load(Ordering::Relaxed) >= 1,
        "liveness pass should have detected the stale connection and asked the re-establish hook"
    );

    consumer.shutdown();
}

#[test]
fn stale_service_connection_is_dropped_when_the_hook_declines() {
    let (provider_transport, consumer_transport) = LoopbackTransport::pair();
    let mut provider_callbacks = Callbacks::default();
    provider_callbacks.generate = Some(Arc::new(|_code, _pv| {
        Box::new(ReportGlobalPose {
            x: Some(3.0),
            y: None,
            z: None,
            yaw: None,
        })
    }));
    let provider = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), provider_transport, provider_callbacks);

    let re_establish_calls = Arc::new(AtomicUsize::new(0));
    let re_establish_calls_cb = Arc::clone(&re_establish_calls);
    let mut consumer_callbacks = Callbacks::default();
    consumer_callbacks.re_establish_sc = Arc::new(move |_sc| {
        re_establish_calls_cb.fetch_add(1, Ordering::Relaxed);
        false
    });
    let consumer = Component::new(
        ComponentConfig::new(addr(2), 6, addr(255)).with_discovery_ttl(Duration::from_millis(30)),
        consumer_transport,
        consumer_callbacks,
    );

    let create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b0001,
        rate_hz: 50.0,
    };
    consumer.send(provider.address(), &create, false).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    provider.shutdown();

    // No HPT deliveries arrive after the provider is gone, so the entry
    // ages past its `500ms + 1000/rate` staleness threshold quickly at
    // 50 Hz and should be pruned on the next liveness pass.
    std::thread::sleep(Duration::from_millis(700));
    assert!(
        re_establish_calls.load(Ordering::Relaxed) >= 1,
        "liveness pass should have consulted the hook before dropping the connection"
    );

    consumer.shutdown();
}
