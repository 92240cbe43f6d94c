//! S4: an EveryChange event never fires on its own — it only goes out
//! when the producing service calls `notify_state_changed`, and then
//! only to components currently subscribed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig};
use jaus_messages::messages::discovery::ReportIdentification;
use jaus_messages::messages::event::{CreateEventRequest, EventRequestBody, EventType};
use jaus_messages::Message;
use jaus_test_support::LoopbackTransport;
use jaus_wire::Address;

const IDENTIFICATION_CODE: u16 = jaus_messages::codes::REPORT_IDENTIFICATION;

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[test]
fn every_change_event_only_fires_on_explicit_notification() {
    let (producer_transport, subscriber_transport) = LoopbackTransport::pair();

    let identification = Arc::new(Mutex::new("unnamed".to_string()));
    let identification_for_gen = Arc::clone(&identification);
    let mut producer_callbacks = Callbacks::default();
    producer_callbacks.generate = Some(Arc::new(move |_code, _pv| {
        Box::new(ReportIdentification {
            subsystem_id: 1,
            identification: identification_for_gen.lock().unwrap().clone(),
        })
    }));
    let producer = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), producer_transport, producer_callbacks);

    let deliveries: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let deliveries_cb = Arc::clone(&deliveries);
    let mut subscriber_callbacks = Callbacks::default();
    subscriber_callbacks.deliver = Arc::new(move |_source, msg| {
        if let Some(report) = msg.as_any().downcast_ref::<ReportIdentification>() {
            deliveries_cb.lock().unwrap().push(report.identification.clone());
        }
    });
    let subscriber = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), subscriber_transport, subscriber_callbacks);

    let request = CreateEventRequest(EventRequestBody {
        message_code: IDENTIFICATION_CODE,
        event_type: EventType::EveryChange,
        requested_rate_hz: None,
        query_filter: None,
        boundary: None,
        request_id: 0,
    });
    subscriber.send(producer.address(), &request, false).unwrap();
    std::thread::sleep(Duration::from_millis(80));
    assert!(deliveries.lock().unwrap().is_empty(), "no delivery should happen before the producer's state changes");

    *identification.lock().unwrap() = "rover-7".to_string();
    producer.notify_state_changed(IDENTIFICATION_CODE);
    std::thread::sleep(Duration::from_millis(80));

    let received = deliveries.lock().unwrap();
    assert_eq!(received.as_slice(), ["rover-7"]);

    producer.shutdown();
    subscriber.shutdown();
}

#[test]
fn every_change_notification_reaches_every_current_subscriber() {
    let bus = jaus_test_support::LoopbackBus::new();

    let mut producer_callbacks = Callbacks::default();
    producer_callbacks.generate = Some(Arc::new(|_code, _pv| {
        Box::new(ReportIdentification {
            subsystem_id: 1,
            identification: "shared-name".to_string(),
        })
    }));
    let producer = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), bus.connect(addr(1)), producer_callbacks);

    let hits = Arc::new(AtomicUsize::new(0));

    let mut make_subscriber = |component_id: u8| {
        let hits_cb = Arc::clone(&hits);
        let mut callbacks = Callbacks::default();
        callbacks.deliver = Arc::new(move |_source, msg| {
            if msg.as_any().downcast_ref::<ReportIdentification>().is_some() {
                hits_cb.fetch_add(1, Ordering::Relaxed);
            }
        });
        Component::new(ComponentConfig::new(addr(component_id), 6, addr(255)), bus.connect(addr(component_id)), callbacks)
    };
    let subscriber_a = make_subscriber(2);
    let subscriber_b = make_subscriber(3);

    for subscriber in [&subscriber_a, &subscriber_b] {
        let request = CreateEventRequest(EventRequestBody {
            message_code: IDENTIFICATION_CODE,
            event_type: EventType::EveryChange,
            requested_rate_hz: None,
            query_filter: None,
            boundary: None,
            request_id: 0,
        });
        subscriber.send(producer.address(), &request, false).unwrap();
    }
    std::thread::sleep(Duration::from_millis(80));

    producer.notify_state_changed(IDENTIFICATION_CODE);
    std::thread::sleep(Duration::from_millis(80));

    assert_eq!(hits.load(Ordering::Relaxed), 2);

    producer.shutdown();
    subscriber_a.shutdown();
    subscriber_b.shutdown();
}

#[test]
fn first_change_event_fires_once_then_is_retired() {
    let (producer_transport, subscriber_transport) = LoopbackTransport::pair();

    let name = Arc::new(Mutex::new("a".to_string()));
    let name_for_gen = Arc::clone(&name);
    let mut producer_callbacks = Callbacks::default();
    producer_callbacks.generate = Some(Arc::new(move |_code, _pv| {
        Box::new(ReportIdentification {
            subsystem_id: 1,
            identification: name_for_gen.lock().unwrap().clone(),
        })
    }));
    let producer = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), producer_transport, producer_callbacks);

    let deliveries: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let deliveries_cb = Arc::clone(&deliveries);
    let mut subscriber_callbacks = Callbacks::default();
    subscriber_callbacks.deliver = Arc::new(move |_source, msg| {
        if let Some(report) = msg.as_any().downcast_ref::<ReportIdentification>() {
            deliveries_cb.lock().unwrap().push(report.identification.clone());
        }
    });
    let subscriber = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), subscriber_transport, subscriber_callbacks);

    let request = CreateEventRequest(EventRequestBody {
        message_code: IDENTIFICATION_CODE,
        event_type: EventType::FirstChange,
        requested_rate_hz: None,
        query_filter: None,
        boundary: None,
        request_id: 0,
    });
    subscriber.send(producer.address(), &request, false).unwrap();
    std::thread::sleep(Duration::from_millis(80));

    *name.lock().unwrap() = "b".to_string();
    producer.notify_state_changed(IDENTIFICATION_CODE);
    *name.lock().unwrap() = "c".to_string();
    producer.notify_state_changed(IDENTIFICATION_CODE);
    std::thread::sleep(Duration::from_millis(80));

    assert_eq!(deliveries.lock().unwrap().as_slice(), ["b"], "FirstChange should deliver once and then retire");

    producer.shutdown();
    subscriber.shutdown();
}
