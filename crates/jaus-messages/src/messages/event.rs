//! Event subscription lifecycle messages and the generic `Event` envelope.

use std::any::Any;

use jaus_wire::header::Version;

use crate::codes;
use crate::error::MessageError;
use crate::message::{BodyReader, BodyWriter, Message};

/// The six event trigger kinds from the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OneTime,
    EveryChange,
    FirstChange,
    Periodic,
    PeriodicWithoutReplacement,
    Boundary,
}

impl EventType {
    fn wire_value(self) -> u8 {
        match self {
            EventType::OneTime => 0,
            EventType::EveryChange => 1,
            EventType::FirstChange => 2,
            EventType::Periodic => 3,
            EventType::PeriodicWithoutReplacement => 4,
            EventType::Boundary => 5,
        }
    }

    fn from_wire(v: u8) -> Result<EventType, MessageError> {
        Ok(match v {
            0 => EventType::OneTime,
            1 => EventType::EveryChange,
            2 => EventType::FirstChange,
            3 => EventType::Periodic,
            4 => EventType::PeriodicWithoutReplacement,
            5 => EventType::Boundary,
            _ => return Err(MessageError::ShortRead),
        })
    }
}

/// Boundary-trigger kinds for `Boundary` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    UpperLimit,
    LowerLimit,
    EventBoundary,
    LimitDataField,
    State,
}

impl BoundaryKind {
    fn wire_value(self) -> u8 {
        match self {
            BoundaryKind::UpperLimit => 0,
            BoundaryKind::LowerLimit => 1,
            BoundaryKind::EventBoundary => 2,
            BoundaryKind::LimitDataField => 3,
            BoundaryKind::State => 4,
        }
    }

    fn from_wire(v: u8) -> Result<BoundaryKind, MessageError> {
        Ok(match v {
            0 => BoundaryKind::UpperLimit,
            1 => BoundaryKind::LowerLimit,
            2 => BoundaryKind::EventBoundary,
            3 => BoundaryKind::LimitDataField,
            4 => BoundaryKind::State,
            _ => return Err(MessageError::ShortRead),
        })
    }
}

/// A boundary expression: which field, which kind of crossing, and the
/// limit value. Floats are written by bitcast to their matching unsigned
/// width (spec §4.1), not scaled-integer, since the limit's own range is
/// not known ahead of time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryExpr {
    pub kind: BoundaryKind,
    pub limit_field_id: u8,
    pub limit_value: f64,
}

impl BoundaryExpr {
    fn write(&self, w: &mut BodyWriter) {
        w.u8(self.kind.wire_value());
        w.u8(self.limit_field_id);
        w.bytes(&self.limit_value.to_bits().to_le_bytes());
    }

    fn read(r: &mut BodyReader) -> Result<BoundaryExpr, MessageError> {
        let kind = BoundaryKind::from_wire(r.u8()?)?;
        let limit_field_id = r.u8()?;
        let bits = u64::from_le_bytes(r.take(8)?.try_into().unwrap());
        Ok(BoundaryExpr {
            kind,
            limit_field_id,
            limit_value: f64::from_bits(bits),
        })
    }
}

const PV_RATE: u16 = 1 << 0;
const PV_QUERY_FILTER: u16 = 1 << 1;
const PV_BOUNDARY: u16 = 1 << 2;

/// Fields shared by `Create Event Request` and `Update Event`: both
/// identify the target message and trigger, and carry the same optional
/// rate/filter/boundary fields (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequestBody {
    pub message_code: u16,
    pub event_type: EventType,
    pub requested_rate_hz: Option<f64>,
    pub query_filter: Option<Vec<u8>>,
    pub boundary: Option<BoundaryExpr>,
    pub request_id: u8,
}

impl EventRequestBody {
    fn presence_vector(&self) -> u16 {
        let mut pv = 0;
        if self.requested_rate_hz.is_some() {
            pv |= PV_RATE;
        }
        if self.query_filter.is_some() {
            pv |= PV_QUERY_FILTER;
        }
        if self.boundary.is_some() {
            pv |= PV_BOUNDARY;
        }
        pv
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u16(self.message_code);
        w.u8(self.event_type.wire_value());
        w.u8(self.request_id);
        if let Some(rate) = self.requested_rate_hz {
            w.u16(jaus_wire::scaled::encode_rate_hz(rate));
        }
        if let Some(filter) = &self.query_filter {
            w.u16(filter.len() as u16);
            w.bytes(filter);
        }
        if let Some(boundary) = &self.boundary {
            boundary.write(&mut w);
        }
    }

    fn read(body: &[u8], presence_vector: u16) -> Result<EventRequestBody, MessageError> {
        let mut r = BodyReader::new(body);
        let message_code = r.u16()?;
        let event_type = EventType::from_wire(r.u8()?)?;
        let request_id = r.u8()?;
        let requested_rate_hz = if presence_vector & PV_RATE != 0 {
            Some(jaus_wire::scaled::decode_rate_hz(r.u16()?))
        } else {
            None
        };
        let query_filter = if presence_vector & PV_QUERY_FILTER != 0 {
            let len = r.u16()? as usize;
            Some(r.take(len)?.to_vec())
        } else {
            None
        };
        let boundary = if presence_vector & PV_BOUNDARY != 0 {
            Some(BoundaryExpr::read(&mut r)?)
        } else {
            None
        };
        Ok(EventRequestBody {
            message_code,
            event_type,
            requested_rate_hz,
            query_filter,
            boundary,
            request_id,
        })
    }
}

macro_rules! event_request_message {
    ($name:ident, $code:path, $decode_fn:ident) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(pub EventRequestBody);

        impl Message for $name {
            fn command_code(&self) -> u16 {
                $code
            }
            fn presence_vector(&self) -> u16 {
                self.0.presence_vector()
            }
            fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
                self.0.write(out)
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn clone_box(&self) -> Box<dyn Message> {
                Box::new(self.clone())
            }
        }

        pub fn $decode_fn(
            body: &[u8],
            presence_vector: u16,
            _version: Version,
        ) -> Result<Box<dyn Message>, MessageError> {
            Ok(Box::new($name(EventRequestBody::read(body, presence_vector)?)))
        }
    };
}

event_request_message!(CreateEventRequest, codes::CREATE_EVENT_REQUEST, decode_create_event_request);
event_request_message!(UpdateEvent, codes::UPDATE_EVENT, decode_update_event);

/// Cancel a previously created/joined event by its provider-assigned ID.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelEvent {
    pub event_id: u8,
    pub message_code: u16,
    pub request_id: u8,
}

impl Message for CancelEvent {
    fn command_code(&self) -> u16 {
        codes::CANCEL_EVENT
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.event_id);
        w.u16(self.message_code);
        w.u8(self.request_id);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_cancel_event(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let event_id = r.u8()?;
    let message_code = r.u16()?;
    let request_id = r.u8()?;
    Ok(Box::new(CancelEvent {
        event_id,
        message_code,
        request_id,
    }))
}

/// `Confirm/Reject Event Request` response codes. Mirrors
/// `ConfirmCode` with an additional `InvalidEventSetup` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponseCode {
    Created = 0,
    NodeNotSupported = 1,
    ComponentNotSupported = 2,
    Refused = 4,
    InvalidParameters = 5,
    MessageNotSupported = 6,
    InvalidEventSetup = 7,
}

impl EventResponseCode {
    pub fn from_wire(v: u8) -> EventResponseCode {
        match v {
            1 => EventResponseCode::NodeNotSupported,
            2 => EventResponseCode::ComponentNotSupported,
            4 => EventResponseCode::Refused,
            5 => EventResponseCode::InvalidParameters,
            6 => EventResponseCode::MessageNotSupported,
            7 => EventResponseCode::InvalidEventSetup,
            _ => EventResponseCode::Created,
        }
    }
}

const PV_CONFIRMED_RATE: u16 = 1 << 0;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmEventRequest {
    pub response_code: EventResponseCode,
    pub event_id: u8,
    pub confirmed_rate_hz: Option<f64>,
    pub request_id: u8,
}

impl Message for ConfirmEventRequest {
    fn command_code(&self) -> u16 {
        codes::CONFIRM_EVENT_REQUEST
    }
    fn presence_vector(&self) -> u16 {
        if self.confirmed_rate_hz.is_some() {
            PV_CONFIRMED_RATE
        } else {
            0
        }
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.response_code as u8);
        w.u8(self.event_id);
        w.u8(self.request_id);
        if let Some(rate) = self.confirmed_rate_hz {
            w.u16(jaus_wire::scaled::encode_rate_hz(rate));
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_confirm_event_request(
    body: &[u8],
    presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let response_code = EventResponseCode::from_wire(r.u8()?);
    let event_id = r.u8()?;
    let request_id = r.u8()?;
    let confirmed_rate_hz = if presence_vector & PV_CONFIRMED_RATE != 0 {
        Some(jaus_wire::scaled::decode_rate_hz(r.u16()?))
    } else {
        None
    };
    Ok(Box::new(ConfirmEventRequest {
        response_code,
        event_id,
        confirmed_rate_hz,
        request_id,
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectEventRequest {
    pub response_code: EventResponseCode,
    pub request_id: u8,
    pub error_message: String,
}

impl Message for RejectEventRequest {
    fn command_code(&self) -> u16 {
        codes::REJECT_EVENT_REQUEST
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.response_code as u8);
        w.u8(self.request_id);
        let bytes = self.error_message.as_bytes();
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

pub fn decode_reject_event_request(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let response_code = EventResponseCode::from_wire(r.u8()?);
    let request_id = r.u8()?;
    let len = r.u16()? as usize;
    let bytes = r.take(len)?;
    let error_message = String::from_utf8_lossy(bytes).into_owned();
    Ok(Box::new(RejectEventRequest {
        response_code,
        request_id,
        error_message,
    }))
}

/// The generic envelope wrapping a triggered inform message, delivered to
/// event subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: u8,
    pub inner_message_code: u16,
    pub sequence_number: u16,
    pub inner_payload: Vec<u8>,
}

impl Message for EventEnvelope {
    fn command_code(&self) -> u16 {
        codes::EVENT
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.event_id);
        w.u16(self.inner_message_code);
        w.u16(self.sequence_number);
        w.u16(self.inner_payload.len() as u16);
        w.bytes(&self.inner_payload);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_event_envelope(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let event_id = r.u8()?;
    let inner_message_code = r.u16()?;
    let sequence_number = r.u16()?;
    let len = r.u16()? as usize;
    let inner_payload = r.take(len)?.to_vec();
    Ok(Box::new(EventEnvelope {
        event_id,
        inner_message_code,
        sequence_number,
        inner_payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_event_request_round_trips_with_all_optionals() {
        let msg = CreateEventRequest(EventRequestBody {
            message_code: codes::REPORT_GLOBAL_POSE,
            event_type: EventType::Periodic,
            requested_rate_hz: Some(5.0),
            query_filter: Some(vec![1, 2, 3]),
            boundary: Some(BoundaryExpr {
                kind: BoundaryKind::UpperLimit,
                limit_field_id: 2,
                limit_value: 12.5,
            }),
            request_id: 7,
        });
        let pv = msg.presence_vector();
        let mut buf = Vec::new();
        msg.write_body(Version::V3_4, &mut buf);
        let decoded = decode_create_event_request(&buf, pv, Version::V3_4).unwrap();
        let decoded = decoded.as_any().downcast_ref::<CreateEventRequest>().unwrap();
        assert_eq!(decoded.0.message_code, msg.0.message_code);
        assert_eq!(decoded.0.query_filter, msg.0.query_filter);
        assert_eq!(decoded.0.boundary.unwrap().limit_value, 12.5);
    }

    #[test]
    fn event_envelope_round_trips() {
        let msg = EventEnvelope {
            event_id: 3,
            inner_message_code: codes::REPORT_GLOBAL_POSE,
            sequence_number: 42,
            inner_payload: vec![9, 9, 9],
        };
        let mut buf = Vec::new();
        msg.write_body(Version::V3_4, &mut buf);
        let decoded = decode_event_envelope(&buf, 0, Version::V3_4).unwrap();
        let decoded = decoded.as_any().downcast_ref::<EventEnvelope>().unwrap();
        assert_eq!(decoded, &msg);
    }
}
