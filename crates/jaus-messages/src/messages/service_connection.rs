//! Service-connection lifecycle messages (command class).

use std::any::Any;

use jaus_wire::header::Version;

use crate::codes;
use crate::error::MessageError;
use crate::message::{BodyReader, BodyWriter, Message};

/// `Confirm Service Connection` response codes (spec §6). `3` is unused
/// in the reference architecture and intentionally absent here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmCode {
    Created = 0,
    NodeNotSupported = 1,
    ComponentNotSupported = 2,
    Refused = 4,
    InvalidParameters = 5,
    MessageNotSupported = 6,
}

impl ConfirmCode {
    pub fn from_wire(v: u8) -> ConfirmCode {
        match v {
            1 => ConfirmCode::NodeNotSupported,
            2 => ConfirmCode::ComponentNotSupported,
            4 => ConfirmCode::Refused,
            5 => ConfirmCode::InvalidParameters,
            6 => ConfirmCode::MessageNotSupported,
            _ => ConfirmCode::Created,
        }
    }
}

/// Request to establish (or join) a periodic service connection for
/// `message_code` filtered by `presence_vector_filter`, at `rate_hz`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateServiceConnection {
    pub message_code: u16,
    pub presence_vector_filter: u16,
    pub rate_hz: f64,
}

impl Message for CreateServiceConnection {
    fn command_code(&self) -> u16 {
        codes::CREATE_SERVICE_CONNECTION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u16(self.message_code);
        w.u16(self.presence_vector_filter);
        w.u16(jaus_wire::scaled::encode_rate_hz(self.rate_hz));
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_create_service_connection(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let message_code = r.u16()?;
    let presence_vector_filter = r.u16()?;
    let rate_hz = jaus_wire::scaled::decode_rate_hz(r.u16()?);
    Ok(Box::new(CreateServiceConnection {
        message_code,
        presence_vector_filter,
        rate_hz,
    }))
}

/// Provider's response to `Create Service Connection`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmServiceConnection {
    pub response_code: ConfirmCode,
    pub instance_id: u8,
    pub confirmed_rate_hz: f64,
}

impl Message for ConfirmServiceConnection {
    fn command_code(&self) -> u16 {
        codes::CONFIRM_SERVICE_CONNECTION
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        w.u8(self.response_code as u8);
        w.u8(self.instance_id);
        w.u16(jaus_wire::scaled::encode_rate_hz(self.confirmed_rate_hz));
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }
}

pub fn decode_confirm_service_connection(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let response_code = ConfirmCode::from_wire(r.u8()?);
    let instance_id = r.u8()?;
    let confirmed_rate_hz = jaus_wire::scaled::decode_rate_hz(r.u16()?);
    Ok(Box::new(ConfirmServiceConnection {
        response_code,
        instance_id,
        confirmed_rate_hz,
    }))
}

/// Shared shape for Terminate/Suspend/Activate Service Connection: all
/// three identify a service connection by `(message_code,
/// presence_vector_filter)` plus the `instance_id` the provider assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConnectionCommand {
    pub message_code: u16,
    pub presence_vector_filter: u16,
    pub instance_id: u8,
}

macro_rules! sc_lifecycle_message {
    ($name:ident, $code:path, $decode_fn:ident) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(pub ServiceConnectionCommand);

        impl Message for $name {
            fn command_code(&self) -> u16 {
                $code
            }
            fn presence_vector(&self) -> u16 {
                0
            }
            fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
                let mut w = BodyWriter::new(out);
                w.u16(self.0.message_code);
                w.u16(self.0.presence_vector_filter);
                w.u8(self.0.instance_id);
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
            _presence_vector: u16,
            _version: Version,
        ) -> Result<Box<dyn Message>, MessageError> {
            let mut r = BodyReader::new(body);
            let message_code = r.u16()?;
            let presence_vector_filter = r.u16()?;
            let instance_id = r.u8()?;
            Ok(Box::new($name(ServiceConnectionCommand {
                message_code,
                presence_vector_filter,
                instance_id,
            })))
        }
    };
}

sc_lifecycle_message!(
    TerminateServiceConnection,
    codes::TERMINATE_SERVICE_CONNECTION,
    decode_terminate_service_connection
);
sc_lifecycle_message!(
    SuspendServiceConnection,
    codes::SUSPEND_SERVICE_CONNECTION,
    decode_suspend_service_connection
);
sc_lifecycle_message!(
    ActivateServiceConnection,
    codes::ACTIVATE_SERVICE_CONNECTION,
    decode_activate_service_connection
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sc_round_trips() {
        let msg = CreateServiceConnection {
            message_code: codes::REPORT_GLOBAL_POSE,
            presence_vector_filter: 0x0F,
            rate_hz: 10.0,
        };
        let mut buf = Vec::new();
        msg.write_body(Version::V3_4, &mut buf);
        let decoded = decode_create_service_connection(&buf, 0, Version::V3_4).unwrap();
        let decoded = decoded.as_any().downcast_ref::<CreateServiceConnection>().unwrap();
        assert_eq!(decoded.message_code, msg.message_code);
        assert_eq!(decoded.presence_vector_filter, msg.presence_vector_filter);
        assert!((decoded.rate_hz - msg.rate_hz).abs() < 0.01);
    }
}
