//! The message registry: command code -> decode function, presence-vector
//! mask, service-connection eligibility, and query/inform pairing.

use std::collections::HashMap;

use crate::codes;
use crate::error::MessageError;
use crate::message::{DecodeFn, Message};
use crate::messages::{discovery, event, heartbeat, pose, service_connection};

/// Metadata about one registered message type.
#[derive(Clone, Copy)]
pub struct RegistryEntry {
    /// Human-readable name for `tracing` fields and `Debug` output, e.g.
    /// when logging an `UnknownCommandCode` decode failure.
    pub name: &'static str,
    /// Bits a presence vector may legally set for this command code.
    pub presence_vector_mask: u16,
    /// Whether a service connection may target this message (spec §4.3:
    /// only inform/report messages are SC-eligible).
    pub is_sc_eligible: bool,
    /// The paired query or inform code, if this message has one.
    pub paired_code: Option<u16>,
    decode: DecodeFn,
}

pub struct Registry {
    entries: HashMap<u16, RegistryEntry>,
}

impl Registry {
    /// Build the full message table. Called once, at component
    /// construction time (spec §9 DESIGN NOTE forbids lazy global init) —
    /// cheap enough that an `Arc<Registry>` per `Component` costs nothing
    /// worth sharing across instances.
    pub fn new() -> Registry {
        let mut entries = HashMap::new();

        let mut insert = |code: u16, name: &'static str, mask: u16, is_sc_eligible: bool, paired_code: Option<u16>, decode: DecodeFn| {
            entries.insert(
                code,
                RegistryEntry {
                    name,
                    presence_vector_mask: mask,
                    is_sc_eligible,
                    paired_code,
                    decode,
                },
            );
        };

        insert(
            codes::CREATE_SERVICE_CONNECTION,
            "CreateServiceConnection",
            0,
            false,
            None,
            service_connection::decode_create_service_connection,
        );
        insert(
            codes::CONFIRM_SERVICE_CONNECTION,
            "ConfirmServiceConnection",
            0,
            false,
            None,
            service_connection::decode_confirm_service_connection,
        );
        insert(
            codes::TERMINATE_SERVICE_CONNECTION,
            "TerminateServiceConnection",
            0,
            false,
            None,
            service_connection::decode_terminate_service_connection,
        );
        insert(
            codes::SUSPEND_SERVICE_CONNECTION,
            "SuspendServiceConnection",
            0,
            false,
            None,
            service_connection::decode_suspend_service_connection,
        );
        insert(
            codes::ACTIVATE_SERVICE_CONNECTION,
            "ActivateServiceConnection",
            0,
            false,
            None,
            service_connection::decode_activate_service_connection,
        );
        insert(
            codes::CREATE_EVENT_REQUEST,
            "CreateEventRequest",
            0b111,
            false,
            None,
            event::decode_create_event_request,
        );
        insert(codes::UPDATE_EVENT, "UpdateEvent", 0b111, false, None, event::decode_update_event);
        insert(codes::CANCEL_EVENT, "CancelEvent", 0, false, None, event::decode_cancel_event);
        insert(
            codes::CONFIRM_EVENT_REQUEST,
            "ConfirmEventRequest",
            0b1,
            false,
            None,
            event::decode_confirm_event_request,
        );
        insert(
            codes::REJECT_EVENT_REQUEST,
            "RejectEventRequest",
            0,
            false,
            None,
            event::decode_reject_event_request,
        );
        insert(codes::EVENT, "Event", 0, false, None, event::decode_event_envelope);

        insert(
            codes::QUERY_SUBSYSTEM_LIST,
            "QuerySubsystemList",
            0,
            false,
            Some(codes::REPORT_SUBSYSTEM_LIST),
            discovery::decode_query_subsystem_list,
        );
        insert(
            codes::REPORT_SUBSYSTEM_LIST,
            "ReportSubsystemList",
            0,
            true,
            Some(codes::QUERY_SUBSYSTEM_LIST),
            discovery::decode_report_subsystem_list,
        );
        insert(
            codes::QUERY_CONFIGURATION,
            "QueryConfiguration",
            0,
            false,
            Some(codes::REPORT_CONFIGURATION),
            discovery::decode_query_configuration,
        );
        insert(
            codes::REPORT_CONFIGURATION,
            "ReportConfiguration",
            0,
            true,
            Some(codes::QUERY_CONFIGURATION),
            discovery::decode_report_configuration,
        );
        insert(
            codes::QUERY_IDENTIFICATION,
            "QueryIdentification",
            0,
            false,
            Some(codes::REPORT_IDENTIFICATION),
            discovery::decode_query_identification,
        );
        insert(
            codes::REPORT_IDENTIFICATION,
            "ReportIdentification",
            0,
            true,
            Some(codes::QUERY_IDENTIFICATION),
            discovery::decode_report_identification,
        );
        insert(
            codes::QUERY_SERVICES,
            "QueryServices",
            0,
            false,
            Some(codes::REPORT_SERVICES),
            discovery::decode_query_services,
        );
        insert(
            codes::REPORT_SERVICES,
            "ReportServices",
            0,
            true,
            Some(codes::QUERY_SERVICES),
            discovery::decode_report_services,
        );

        insert(
            codes::QUERY_GLOBAL_POSE,
            "QueryGlobalPose",
            0b1111,
            false,
            Some(codes::REPORT_GLOBAL_POSE),
            pose::decode_query_global_pose,
        );
        insert(
            codes::REPORT_GLOBAL_POSE,
            "ReportGlobalPose",
            0b1111,
            true,
            Some(codes::QUERY_GLOBAL_POSE),
            pose::decode_report_global_pose,
        );

        insert(
            codes::REPORT_HEARTBEAT_PULSE,
            "ReportHeartbeatPulse",
            0,
            true,
            None,
            heartbeat::decode_report_heartbeat_pulse,
        );

        Registry { entries }
    }

    pub fn lookup(&self, command_code: u16) -> Option<&RegistryEntry> {
        self.entries.get(&command_code)
    }

    /// Serialize a message: a leading little-endian presence-vector word
    /// when the command code declares one, then the message's own body.
    /// This is the framing the registered `decode` functions expect to be
    /// stripped before they see `body`.
    pub fn encode(&self, message: &dyn Message, version: jaus_wire::header::Version) -> Vec<u8> {
        let mut out = Vec::new();
        let mask = self.lookup(message.command_code()).map_or(0, |e| e.presence_vector_mask);
        if mask != 0 {
            out.extend_from_slice(&message.presence_vector().to_le_bytes());
        }
        message.write_body(version, &mut out);
        out
    }

    /// Decode a wire body: strips the leading presence-vector word when the
    /// command code declares one, rejecting any bit set outside the
    /// registered mask (spec §4.1's wire-decode invariant: malformed input
    /// is rejected locally, never panics).
    pub fn decode(
        &self,
        command_code: u16,
        version: jaus_wire::header::Version,
        body: &[u8],
    ) -> Result<Box<dyn Message>, MessageError> {
        let entry = self
            .entries
            .get(&command_code)
            .ok_or(MessageError::UnknownCode(command_code))?;
        let (presence_vector, rest) = if entry.presence_vector_mask != 0 {
            let mut r = crate::message::BodyReader::new(body);
            let pv = r.u16()?;
            (pv, r.remaining())
        } else {
            (0, body)
        };
        if presence_vector & !entry.presence_vector_mask != 0 {
            return Err(MessageError::InvalidPresenceVector {
                code: command_code,
                mask: entry.presence_vector_mask,
                got: presence_vector,
            });
        }
        (entry.decode)(rest, presence_vector, version)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_codes_carry_a_human_readable_name() {
        let registry = Registry::new();
        assert_eq!(registry.lookup(codes::REPORT_GLOBAL_POSE).unwrap().name, "ReportGlobalPose");
        assert_eq!(registry.lookup(codes::CREATE_SERVICE_CONNECTION).unwrap().name, "CreateServiceConnection");
    }

    #[test]
    fn global_pose_pair_is_sc_eligible_on_the_inform_side_only() {
        let registry = Registry::new();
        let query = registry.lookup(codes::QUERY_GLOBAL_POSE).unwrap();
        let report = registry.lookup(codes::REPORT_GLOBAL_POSE).unwrap();
        assert!(!query.is_sc_eligible);
        assert!(report.is_sc_eligible);
        assert_eq!(query.paired_code, Some(codes::REPORT_GLOBAL_POSE));
        assert_eq!(report.paired_code, Some(codes::QUERY_GLOBAL_POSE));
    }

    #[test]
    fn unknown_code_is_rejected() {
        let registry = Registry::new();
        let err = registry.decode(0xFFFF, jaus_wire::header::Version::V3_4, &[]).unwrap_err();
        assert_eq!(err, MessageError::UnknownCode(0xFFFF));
    }

    #[test]
    fn presence_vector_outside_mask_is_rejected() {
        let registry = Registry::new();
        let err = registry
            .decode(codes::REPORT_GLOBAL_POSE, jaus_wire::header::Version::V3_4, &0xFFFFu16.to_le_bytes())
            .unwrap_err();
        assert!(matches!(err, MessageError::InvalidPresenceVector { .. }));
    }

    #[test]
    fn encode_then_decode_round_trips_a_presence_vector_message() {
        use crate::messages::pose::ReportGlobalPose;
        let registry = Registry::new();
        let msg = ReportGlobalPose {
            x: Some(1.0),
            y: None,
            z: None,
            yaw: Some(0.5),
        };
        let wire = registry.encode(&msg, jaus_wire::header::Version::V3_4);
        let decoded = registry.decode(codes::REPORT_GLOBAL_POSE, jaus_wire::header::Version::V3_4, &wire).unwrap();
        let decoded = decoded.as_any().downcast_ref::<ReportGlobalPose>().unwrap();
        assert_eq!(decoded.y, None);
        assert!((decoded.x.unwrap() - 1.0).abs() < 0.01);
    }

    #[test]
    fn encode_omits_presence_vector_word_for_zero_mask_codes() {
        use crate::messages::service_connection::CreateServiceConnection;
        let registry = Registry::new();
        let msg = CreateServiceConnection {
            message_code: codes::REPORT_GLOBAL_POSE,
            presence_vector_filter: 0,
            rate_hz: 10.0,
        };
        let wire = registry.encode(&msg, jaus_wire::header::Version::V3_4);
        let mut direct = Vec::new();
        msg.write_body(jaus_wire::header::Version::V3_4, &mut direct);
        assert_eq!(wire, direct);
    }
}
