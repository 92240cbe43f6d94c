//! S5: the header's experimental bit tracks the command code range, set
//! for codes at or above `EXPERIMENTAL_CODE_MIN` and clear otherwise.

use std::any::Any;
use std::sync::mpsc;
use std::time::Duration;

use jaus_core::{Callbacks, Component, ComponentConfig};
use jaus_messages::codes;
use jaus_messages::message::Message;
use jaus_messages::messages::pose::QueryGlobalPose;
use jaus_test_support::LoopbackTransport;
use jaus_transport::Transport;
use jaus_wire::header::{Header, Version};
use jaus_wire::{Address, EXPERIMENTAL_CODE_MIN};

fn addr(component: u8) -> Address {
    Address::new(1, 1, component, 1)
}

#[derive(Debug)]
struct ExperimentalProbe;

impl Message for ExperimentalProbe {
    fn command_code(&self) -> u16 {
        0xD001
    }

    fn presence_vector(&self) -> u16 {
        0
    }

    fn write_body(&self, _version: Version, _out: &mut Vec<u8>) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(ExperimentalProbe)
    }
}

#[test]
fn experimental_flag_is_set_for_codes_in_the_experimental_range() {
    let (component_transport, raw_transport) = LoopbackTransport::pair();

    let (headers_tx, headers_rx) = mpsc::channel::<Header>();
    raw_transport.set_receive_callback(Box::new(move |_stream, header, _tag| {
        let _ = headers_tx.send(header);
    }));

    let component = Component::new(ComponentConfig::new(addr(1), 6, addr(255)), component_transport, Callbacks::default());

    component.send(addr(2), &ExperimentalProbe, false).unwrap();
    let header = headers_rx.recv_timeout(Duration::from_millis(200)).unwrap();
    assert!(header.experimental, "command code 0x{:04X} is above EXPERIMENTAL_CODE_MIN", ExperimentalProbe.command_code());
    assert!(ExperimentalProbe.command_code() >= EXPERIMENTAL_CODE_MIN);

    let query = QueryGlobalPose {
        presence_vector_filter: 0b1111,
    };
    component.send(addr(2), &query, false).unwrap();
    let header = headers_rx.recv_timeout(Duration::from_millis(200)).unwrap();
    assert!(!header.experimental, "{:#06X} is a standard command code", codes::QUERY_GLOBAL_POSE);

    component.shutdown();
}
