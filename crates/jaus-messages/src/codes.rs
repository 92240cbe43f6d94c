//! Command-code constants.
//!
//! Query/inform pairs share their low-order bits (spec §3): a pair is
//! built from a shared sub-code OR'd onto the class base
//! (`0x2000` query, `0x4000` inform).

/// Command-class command codes (0x0000-0x1FFF): service connections and
/// event subscription lifecycle.
pub const CREATE_SERVICE_CONNECTION: u16 = 0x0001;
pub const CONFIRM_SERVICE_CONNECTION: u16 = 0x0002;
pub const TERMINATE_SERVICE_CONNECTION: u16 = 0x0003;
pub const SUSPEND_SERVICE_CONNECTION: u16 = 0x0004;
pub const ACTIVATE_SERVICE_CONNECTION: u16 = 0x0005;
pub const CREATE_EVENT_REQUEST: u16 = 0x0006;
pub const UPDATE_EVENT: u16 = 0x0007;
pub const CANCEL_EVENT: u16 = 0x0008;
pub const CONFIRM_EVENT_REQUEST: u16 = 0x0009;
pub const REJECT_EVENT_REQUEST: u16 = 0x000A;
/// Generic envelope wrapping a triggered inform message.
pub const EVENT: u16 = 0x000B;

const SUBSYSTEM_LIST_SUBCODE: u16 = 0x01;
const CONFIGURATION_SUBCODE: u16 = 0x02;
const IDENTIFICATION_SUBCODE: u16 = 0x03;
const SERVICES_SUBCODE: u16 = 0x04;
const GLOBAL_POSE_SUBCODE: u16 = 0x08;

const QUERY_BASE: u16 = 0x2000;
const INFORM_BASE: u16 = 0x4000;

pub const QUERY_SUBSYSTEM_LIST: u16 = QUERY_BASE | SUBSYSTEM_LIST_SUBCODE;
pub const QUERY_CONFIGURATION: u16 = QUERY_BASE | CONFIGURATION_SUBCODE;
pub const QUERY_IDENTIFICATION: u16 = QUERY_BASE | IDENTIFICATION_SUBCODE;
pub const QUERY_SERVICES: u16 = QUERY_BASE | SERVICES_SUBCODE;
pub const QUERY_GLOBAL_POSE: u16 = QUERY_BASE | GLOBAL_POSE_SUBCODE;

pub const REPORT_SUBSYSTEM_LIST: u16 = INFORM_BASE | SUBSYSTEM_LIST_SUBCODE;
pub const REPORT_CONFIGURATION: u16 = INFORM_BASE | CONFIGURATION_SUBCODE;
pub const REPORT_IDENTIFICATION: u16 = INFORM_BASE | IDENTIFICATION_SUBCODE;
pub const REPORT_SERVICES: u16 = INFORM_BASE | SERVICES_SUBCODE;
pub const REPORT_GLOBAL_POSE: u16 = INFORM_BASE | GLOBAL_POSE_SUBCODE;

pub use jaus_wire::header::HEARTBEAT_PULSE_CODE as REPORT_HEARTBEAT_PULSE;

/// Component ID of the Global Pose Sensor service, per the JAUS reference
/// architecture and this spec's GLOSSARY.
pub const GLOBAL_POSE_SENSOR_COMPONENT_ID: u8 = 38;
