//! Subsystem discovery messages: subsystem list, configuration,
//! identification, and services.

use std::any::Any;

use jaus_wire::header::Version;

use crate::codes;
use crate::error::MessageError;
use crate::message::{BodyReader, BodyWriter, Message};

macro_rules! empty_query {
    ($name:ident, $code:path, $decode_fn:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl Message for $name {
            fn command_code(&self) -> u16 {
                $code
            }
            fn presence_vector(&self) -> u16 {
                0
            }
            fn write_body(&self, _version: Version, _out: &mut Vec<u8>) {}
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn clone_box(&self) -> Box<dyn Message> {
                Box::new(*self)
            }
        }

        pub fn $decode_fn(
            _body: &[u8],
            _presence_vector: u16,
            _version: Version,
        ) -> Result<Box<dyn Message>, MessageError> {
            Ok(Box::new($name))
        }
    };
}

/// Query the subsystem IDs visible from this node, per the
/// `subsystem_filter` allow-list (no body).
empty_query!(QuerySubsystemList, codes::QUERY_SUBSYSTEM_LIST, decode_query_subsystem_list);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSubsystemList {
    pub subsystem_ids: Vec<u8>,
}

impl Message for ReportSubsystemList {
    fn command_code(&self) -> u16 {
        codes::REPORT_SUBSYSTEM_LIST
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.subsystem_ids.len() as u8);
        for id in &self.subsystem_ids {
            w.u8(*id);
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_report_subsystem_list(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let count = r.u8()? as usize;
    let mut subsystem_ids = Vec::with_capacity(count);
    for _ in 0..count {
        subsystem_ids.push(r.u8()?);
    }
    Ok(Box::new(ReportSubsystemList { subsystem_ids }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfiguration {
    pub subsystem_id: u8,
}

impl Message for QueryConfiguration {
    fn command_code(&self) -> u16 {
        codes::QUERY_CONFIGURATION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        BodyWriter::new(out).u8(self.subsystem_id);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }
}

pub fn decode_query_configuration(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    Ok(Box::new(QueryConfiguration {
        subsystem_id: r.u8()?,
    }))
}

/// Flat `(node_id, component_id, instance_id)` triples, one per component
/// in the subsystem. This is a simplification of the reference
/// architecture's nested node/component tree, kept flat because nothing
/// downstream of discovery needs to walk the tree structure itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfiguration {
    pub subsystem_id: u8,
    pub entries: Vec<(u8, u8, u8)>,
}

impl Message for ReportConfiguration {
    fn command_code(&self) -> u16 {
        codes::REPORT_CONFIGURATION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.subsystem_id);
        w.u8(self.entries.len() as u8);
        for (node, component, instance) in &self.entries {
            w.u8(*node);
            w.u8(*component);
            w.u8(*instance);
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_report_configuration(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let subsystem_id = r.u8()?;
    let count = r.u8()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push((r.u8()?, r.u8()?, r.u8()?));
    }
    Ok(Box::new(ReportConfiguration {
        subsystem_id,
        entries,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryIdentification {
    pub subsystem_id: u8,
}

impl Message for QueryIdentification {
    fn command_code(&self) -> u16 {
        codes::QUERY_IDENTIFICATION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        BodyWriter::new(out).u8(self.subsystem_id);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }
}

pub fn decode_query_identification(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    Ok(Box::new(QueryIdentification {
        subsystem_id: r.u8()?,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportIdentification {
    pub subsystem_id: u8,
    pub identification: String,
}

impl Message for ReportIdentification {
    fn command_code(&self) -> u16 {
        codes::REPORT_IDENTIFICATION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.subsystem_id);
        let bytes = self.identification.as_bytes();
        w.u16(bytes.len() as u16);
        w.bytes(bytes);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_report_identification(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let subsystem_id = r.u8()?;
    let len = r.u16()? as usize;
    let identification = String::from_utf8_lossy(r.take(len)?).into_owned();
    Ok(Box::new(ReportIdentification {
        subsystem_id,
        identification,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryServices {
    pub subsystem_id: u8,
    pub node_id: u8,
    pub component_id: u8,
}

impl Message for QueryServices {
    fn command_code(&self) -> u16 {
        codes::QUERY_SERVICES
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.subsystem_id);
        w.u8(self.node_id);
        w.u8(self.component_id);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }
}

pub fn decode_query_services(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    Ok(Box::new(QueryServices {
        subsystem_id: r.u8()?,
        node_id: r.u8()?,
        component_id: r.u8()?,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportServices {
    pub services: Vec<u16>,
}

impl Message for ReportServices {
    fn command_code(&self) -> u16 {
        codes::REPORT_SERVICES
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.services.len() as u8);
        for code in &self.services {
            w.u16(*code);
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_report_services(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let count = r.u8()? as usize;
    let mut services = Vec::with_capacity(count);
    for _ in 0..count {
        services.push(r.u16()?);
    }
    Ok(Box::new(ReportServices { services }))
}
