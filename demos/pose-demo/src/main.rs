//! Standalone demo: a Global Pose provider and a subscribing consumer
//! talking over an in-process loopback link, driven by a TOML config.

mod config;

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig};
use jaus_messages::codes;
use jaus_messages::messages::pose::ReportGlobalPose;
use jaus_messages::messages::service_connection::CreateServiceConnection;
use jaus_messages::Message;
use jaus_test_support::LoopbackTransport;
use jaus_wire::Address;
use tracing::info;

use config::{ComponentSpec, DemoConfig};

fn address_of(spec: &ComponentSpec) -> Address {
    Address::new(spec.subsystem, spec.node, spec.component, spec.instance)
}

fn main() {
    tracing_subscriber::fmt::init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "demo.toml".to_string());
    let demo = config::load_config_from_path(Path::new(&config_path)).unwrap_or_else(|err| {
        eprintln!("failed to load {config_path}: {err}");
        std::process::exit(1);
    });

    run(&demo);
}

fn run(demo: &DemoConfig) {
    let (provider_transport, consumer_transport) = LoopbackTransport::pair();

    let mut provider_callbacks = Callbacks::default();
    provider_callbacks.generate = Some(Arc::new(|_code, _pv| {
        Box::new(ReportGlobalPose {
            x: Some(1.0),
            y: Some(2.0),
            z: Some(0.0),
            yaw: Some(0.0),
        })
    }));
    let provider = Component::new(
        ComponentConfig::new(address_of(&demo.provider), demo.provider.authority, Address::BROADCAST),
        provider_transport,
        provider_callbacks,
    );

    let mut consumer_callbacks = Callbacks::default();
    consumer_callbacks.deliver = Arc::new(|source, msg| {
        if let Some(pose) = msg.as_any().downcast_ref::<ReportGlobalPose>() {
            info!(?source, ?pose, "received pose");
        }
    });
    let consumer = Component::new(
        ComponentConfig::new(address_of(&demo.consumer), demo.consumer.authority, Address::BROADCAST),
        consumer_transport,
        consumer_callbacks,
    );

    let create = CreateServiceConnection {
        message_code: codes::REPORT_GLOBAL_POSE,
        presence_vector_filter: 0b1111,
        rate_hz: demo.rate_hz,
    };
    consumer.send(provider.address(), &create, false).expect("send create service connection");

    std::thread::sleep(Duration::from_secs(demo.run_seconds));

    provider.shutdown();
    consumer.shutdown();
}
