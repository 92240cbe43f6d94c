//! jaus-core: a JAUS v3.4 subscription engine — Service Connections,
//! Event subscriptions, and subsystem discovery over a pluggable
//! transport.
//!
//! The crate is organized the way the reference architecture splits its
//! responsibilities (spec §4): wire codec and addressing live in
//! `jaus-wire`, the message registry in `jaus-messages`, the transport
//! contract in `jaus-transport`, and this crate (`jaus-core`) owns
//! everything that runs once a byte stream is in hand — send/receive
//! dispatch, the event and service-connection tables, discovery state,
//! and the background subscription loop that keeps periodic deliveries
//! and stale subscriptions alive.
//!
//! `Component::new` is the only entry point: it wires a `Transport`'s
//! receive/connection callbacks to the engine, starts the subscription
//! loop, and (if configured) subscribes to the Node Manager's subsystem
//! list. Call `Component::shutdown` to tear everything down in reverse.

mod component;
mod discovery;
mod engine;
mod error;
mod events;
mod service_connections;
mod subscription_loop;

use std::sync::Arc;

use jaus_transport::{ConnectionEvent, Transport};
use tracing::{debug, info};

pub use component::{ComponentConfig, Counters, CountersSnapshot, DEFAULT_DISCOVERY_TTL, DEFAULT_HPT_THRESHOLD_HZ};
pub use discovery::{DiscoveryEngine, DiscoveryEvent, GlobalPose, Platform, SubsystemListDiff};
pub use engine::{Callbacks, Component, EventAdmissionDecision, ReceiptKey, ScAdmissionDecision};
pub use error::CoreError;
pub use events::{EventAdmission, EventId, EventManager, ProducedEvent, ProducedEventKey, SubscribedEvent, SubscribedEventKey};
pub use service_connections::{
    Commander, CommanderSet, ProvidedServiceConnection, RequestedScKey, RequestedServiceConnection, ScAdmission, ScKey, ScStatus,
    ServiceConnectionTable,
};

impl Component {
    /// Build a component atop `transport`, registering it as the
    /// transport's receive and connection callback target, then start
    /// its background subscription loop.
    ///
    /// Held via `Weak` inside the transport's callbacks so a component
    /// can be dropped (and its threads joined via `shutdown`) without
    /// the transport keeping it alive forever.
    pub fn new(config: ComponentConfig, transport: Arc<dyn Transport>, callbacks: Callbacks) -> Arc<Component> {
        let discovery = DiscoveryEngine::new(config.discovery_subsystem_filter.clone());
        let component = Arc::new(Component::new_inner(
            config.address,
            config.authority,
            config.node_manager,
            config.hpt_threshold_hz,
            config.discovery_ttl,
            Arc::clone(&transport),
            discovery,
            callbacks,
        ));

        let receive_target = Arc::downgrade(&component);
        transport.set_receive_callback(Box::new(move |stream, header, tag| {
            if let Some(component) = receive_target.upgrade() {
                component.on_receive(stream, header, tag);
            }
        }));

        let connection_target = Arc::downgrade(&component);
        transport.set_connection_callback(Box::new(move |event| {
            if let Some(component) = connection_target.upgrade() {
                component.on_connection_event(event);
            }
        }));

        if config.discovery_enabled {
            component.request_subsystem_discovery();
        }

        component.start_subscription_loop();
        component
    }

    /// React to the transport's link to the Node Manager coming up or
    /// down. A dropped link is left to the subscription loop's existing
    /// liveness pass to detect (every held subscription eventually goes
    /// stale once no more updates arrive) rather than an immediate
    /// invalidation sweep — the two would otherwise race on the same
    /// tables under two different triggers.
    fn on_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                info!(address = ?self.address(), "transport connected");
            }
            ConnectionEvent::Disconnected => {
                debug!(address = ?self.address(), "transport disconnected; stale subscriptions will be re-established by the liveness pass");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use jaus_messages::messages::pose::{QueryGlobalPose, ReportGlobalPose};
    use jaus_messages::Message;
    use jaus_test_support::LoopbackTransport;
    use jaus_wire::Address;

    use super::*;

    fn addr(component: u8) -> Address {
        Address::new(1, 1, component, 1)
    }

    #[test]
    fn new_component_starts_and_shuts_down_cleanly() {
        let (provider_transport, requester_transport) = LoopbackTransport::pair();
        let config = ComponentConfig::new(addr(1), 6, addr(255));
        let component = Component::new(config, provider_transport, Callbacks::default());
        let _requester = requester_transport;
        assert_eq!(component.address(), addr(1));
        component.shutdown();
    }

    #[test]
    fn delivered_messages_reach_the_deliver_callback() {
        let (a_transport, b_transport) = LoopbackTransport::pair();

        let received: Arc<StdMutex<Vec<u16>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_for_cb = Arc::clone(&received);
        let mut callbacks_b = Callbacks::default();
        callbacks_b.deliver = Arc::new(move |_source, msg| {
            received_for_cb.lock().unwrap().push(msg.command_code());
        });

        let a = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), a_transport, Callbacks::default());
        let b = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), b_transport, callbacks_b);

        let query = QueryGlobalPose { presence_vector_filter: 0b1111 };
        a.send(b.address(), &query, false).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(*received.lock().unwrap(), vec![query.command_code()]);

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn hpt_threshold_installs_dedicated_timer_for_fast_events() {
        let (a_transport, b_transport) = LoopbackTransport::pair();

        let generate_calls = Arc::new(AtomicUsize::new(0));
        let generate_for_cb = Arc::clone(&generate_calls);
        let mut callbacks_a = Callbacks::default();
        callbacks_a.generate = Some(Arc::new(move |_code, _pv| {
            generate_for_cb.fetch_add(1, Ordering::Relaxed);
            Box::new(ReportGlobalPose {
                x: Some(1.0),
                y: None,
                z: None,
                yaw: None,
            })
        }));

        let a = Component::new(
            ComponentConfig::new(addr(1), 6, addr(255)).with_hpt_threshold_hz(30.0),
            a_transport,
            callbacks_a,
        );
        let b = Component::new(ComponentConfig::new(addr(2), 6, addr(255)), b_transport, Callbacks::default());

        let request = jaus_messages::messages::event::CreateEventRequest(jaus_messages::messages::event::EventRequestBody {
            message_code: jaus_messages::codes::REPORT_GLOBAL_POSE,
            event_type: jaus_messages::messages::event::EventType::Periodic,
            requested_rate_hz: Some(50.0),
            query_filter: None,
            boundary: None,
            request_id: 0,
        });
        b.send(a.address(), &request, false).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(generate_calls.load(Ordering::Relaxed) >= 3, "expected several HPT-driven generations");

        a.shutdown();
        b.shutdown();
    }
}
