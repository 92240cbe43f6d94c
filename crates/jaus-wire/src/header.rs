use crate::address::Address;
use crate::error::WireError;
use crate::HEADER_SIZE;

/// Command code of `Report Heartbeat Pulse`, the one message exempt from
/// the "non-zero sequence number implies multi-packet stream" validity
/// rule together with service-connection traffic.
pub const HEARTBEAT_PULSE_CODE: u16 = 0x4018;

/// Supported protocol versions. Wire value is the enum's ordinal below;
/// decode enforces a v3.3 minimum even though `V2_0` remains constructible
/// in memory for callers that need to represent a legacy peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V2_0,
    V3_3,
    V3_4,
}

impl Version {
    fn wire_value(self) -> u8 {
        match self {
            Version::V2_0 => 2,
            Version::V3_3 => 3,
            Version::V3_4 => 4,
        }
    }

    fn from_wire(value: u8) -> Option<Version> {
        match value {
            2 => Some(Version::V2_0),
            3 => Some(Version::V3_3),
            4 => Some(Version::V3_4),
            _ => None,
        }
    }

    fn meets_decode_minimum(self) -> bool {
        matches!(self, Version::V3_3 | Version::V3_4)
    }
}

/// Message priority (0-15), with the named bands from the JAUS reference
/// architecture. `Default` is what a component should use absent a
/// specific reason to deviate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const MAX_VALUE: u8 = 15;
    pub const LOW: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(6);
    pub const HIGH: Priority = Priority(11);
    pub const LOW_SAFETY_CRITICAL: Priority = Priority(12);
    pub const HIGH_SAFETY_CRITICAL: Priority = Priority(15);

    /// Construct a priority, clamping to the legal `0..=15` range.
    pub fn new(value: u8) -> Priority {
        Priority(value.min(Self::MAX_VALUE))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// Acknowledge/negative-acknowledge request state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckNack {
    None,
    Request,
    Nack,
    Ack,
}

impl AckNack {
    fn wire_value(self) -> u8 {
        match self {
            AckNack::None => 0,
            AckNack::Request => 1,
            AckNack::Nack => 2,
            AckNack::Ack => 3,
        }
    }

    fn from_wire(value: u8) -> AckNack {
        match value {
            1 => AckNack::Request,
            2 => AckNack::Nack,
            3 => AckNack::Ack,
            _ => AckNack::None,
        }
    }
}

/// Multi-packet stream position, carried in the top 4 bits of the
/// data-control word. Values are the JAUS reference architecture's flag
/// codes, not sequential (`3`, `5`-`7`, `9`-`15` are reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataControl {
    Single,
    First,
    Normal,
    Retransmit,
    Last,
}

impl DataControl {
    fn flag_code(self) -> u16 {
        match self {
            DataControl::Single => 0,
            DataControl::First => 1,
            DataControl::Normal => 2,
            DataControl::Retransmit => 4,
            DataControl::Last => 8,
        }
    }

    fn from_flag_code(code: u16) -> Option<DataControl> {
        match code {
            0 => Some(DataControl::Single),
            1 => Some(DataControl::First),
            2 => Some(DataControl::Normal),
            4 => Some(DataControl::Retransmit),
            8 => Some(DataControl::Last),
            _ => None,
        }
    }
}

/// The fixed 16-byte JAUS message header.
///
/// `data_size` is the payload length in bytes, excluding these 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    pub experimental: bool,
    pub service_connection: bool,
    pub ack_nack: AckNack,
    pub priority: Priority,
    pub command_code: u16,
    pub destination: Address,
    pub source: Address,
    pub data_size: u16,
    pub data_flag: DataControl,
    pub sequence_number: u16,
}

impl Header {
    /// True per the data-model validity rules in §3: no zero-byte
    /// addresses, ack/nack and service-connection not both set,
    /// experimental bit consistent with the command-code range, and a
    /// zero sequence number for single-packet non-SC non-heartbeat
    /// messages.
    pub fn is_valid(&self) -> bool {
        if !self.source.has_no_zero_byte() || self.source.is_broadcast() {
            return false;
        }
        if !self.destination.has_no_zero_byte() {
            return false;
        }
        if self.service_connection && !matches!(self.ack_nack, AckNack::None) {
            return false;
        }
        if self.experimental != (self.command_code >= crate::EXPERIMENTAL_CODE_MIN) {
            return false;
        }
        let is_single_packet = matches!(self.data_flag, DataControl::Single);
        let is_heartbeat = self.command_code == HEARTBEAT_PULSE_CODE;
        if is_single_packet && !self.service_connection && !is_heartbeat && self.sequence_number != 0
        {
            return false;
        }
        true
    }

    /// A copy of this header with source and destination swapped, for
    /// constructing a reply (Confirm/Reject/Report) back to a request's
    /// sender.
    pub fn swapped_source_and_destination(&self) -> Header {
        Header {
            destination: self.source,
            source: self.destination,
            ..*self
        }
    }

    fn write_message_properties(&self) -> u16 {
        (self.priority.value() as u16 & 0x000F)
            | ((self.ack_nack.wire_value() as u16 & 0x0003) << 4)
            | ((self.service_connection as u16) << 6)
            | ((self.experimental as u16) << 7)
            | ((self.version.wire_value() as u16 & 0x003F) << 8)
    }

    fn write_data_control(&self) -> u16 {
        (self.data_size & 0x0FFF) | (self.data_flag.flag_code() << 12)
    }

    /// Serialize to the fixed 16-byte wire layout. Does not validate —
    /// callers should check `is_valid()` first if the header may be
    /// attacker- or application-controlled.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.write_message_properties().to_le_bytes());
        buf[2..4].copy_from_slice(&self.command_code.to_le_bytes());
        let dest = self.destination.to_bytes();
        buf[4] = dest[3]; // instance
        buf[5] = dest[2]; // component
        buf[6] = dest[1]; // node
        buf[7] = dest[0]; // subsystem
        let src = self.source.to_bytes();
        buf[8] = src[3];
        buf[9] = src[2];
        buf[10] = src[1];
        buf[11] = src[0];
        buf[12..14].copy_from_slice(&self.write_data_control().to_le_bytes());
        buf[14..16].copy_from_slice(&self.sequence_number.to_le_bytes());
        buf
    }

    /// Decode a header from the start of `bytes`, returning the header
    /// and the remaining (payload) bytes. Rejects reserved bits, an
    /// unsupported version, or a header violating `is_valid()`.
    pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8]), WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::ShortRead);
        }
        let properties = u16::from_le_bytes([bytes[0], bytes[1]]);
        if properties & 0xC000 != 0 {
            return Err(WireError::InvalidHeader("reserved properties bits set".into()));
        }
        let priority = Priority::new((properties & 0x000F) as u8);
        let ack_nack = AckNack::from_wire(((properties >> 4) & 0x0003) as u8);
        let service_connection = (properties >> 6) & 0x0001 != 0;
        let experimental = (properties >> 7) & 0x0001 != 0;
        let version_wire = ((properties >> 8) & 0x003F) as u8;
        let version = Version::from_wire(version_wire)
            .ok_or_else(|| WireError::InvalidHeader(format!("unknown version {}", version_wire)))?;
        if !version.meets_decode_minimum() {
            return Err(WireError::InvalidHeader(format!(
                "version {:?} below v3.3 minimum",
                version
            )));
        }

        let command_code = u16::from_le_bytes([bytes[2], bytes[3]]);

        let destination = Address::from_bytes([bytes[7], bytes[6], bytes[5], bytes[4]]);
        let source = Address::from_bytes([bytes[11], bytes[10], bytes[9], bytes[8]]);

        let data_control = u16::from_le_bytes([bytes[12], bytes[13]]);
        let data_size = data_control & 0x0FFF;
        let flag_code = data_control >> 12;
        let data_flag = DataControl::from_flag_code(flag_code)
            .ok_or_else(|| WireError::InvalidHeader(format!("unknown data-flag code {}", flag_code)))?;

        let sequence_number = u16::from_le_bytes([bytes[14], bytes[15]]);

        let header = Header {
            version,
            experimental,
            service_connection,
            ack_nack,
            priority,
            command_code,
            destination,
            source,
            data_size,
            data_flag,
            sequence_number,
        };

        if !header.is_valid() {
            return Err(WireError::InvalidHeader(format!("{:?} fails validity rules", header)));
        }

        Ok((header, &bytes[HEADER_SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header() -> Header {
        Header {
            version: Version::V3_4,
            experimental: false,
            service_connection: false,
            ack_nack: AckNack::None,
            priority: Priority::DEFAULT,
            command_code: 0x4002,
            destination: Address::new(1, 1, 38, 1),
            source: Address::new(1, 1, 40, 1),
            data_size: 12,
            data_flag: DataControl::Single,
            sequence_number: 0,
        }
    }

    #[test]
    fn round_trip_encode_decode() {
        let h = base_header();
        let bytes = h.encode();
        let (decoded, rest) = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, h);
        assert!(rest.is_empty());
    }

    #[test]
    fn round_trip_with_payload_remainder() {
        let h = base_header();
        let mut bytes = h.encode().to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let (decoded, rest) = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(rest, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn reserved_bits_rejected() {
        let h = base_header();
        let mut bytes = h.encode();
        bytes[1] |= 0xC0; // set bits 14-15 of properties (high byte bits 6-7)
        assert!(matches!(Header::decode(&bytes), Err(WireError::InvalidHeader(_))));
    }

    #[test]
    fn experimental_bit_must_match_code_range() {
        let mut h = base_header();
        h.command_code = 0x5000;
        h.experimental = true;
        assert!(!h.is_valid());

        let mut h2 = base_header();
        h2.command_code = 0xD100;
        h2.experimental = false;
        assert!(!h2.is_valid());

        let mut h3 = base_header();
        h3.command_code = 0xD100;
        h3.experimental = true;
        assert!(h3.is_valid());
    }

    #[test]
    fn ack_nack_and_sc_flag_mutually_exclusive() {
        let mut h = base_header();
        h.service_connection = true;
        h.ack_nack = AckNack::Request;
        assert!(!h.is_valid());
    }

    #[test]
    fn zero_byte_addresses_are_invalid() {
        let mut h = base_header();
        h.destination = Address::new(0, 1, 38, 1);
        assert!(!h.is_valid());
    }

    #[test]
    fn broadcast_source_is_invalid() {
        let mut h = base_header();
        h.source = Address::BROADCAST;
        assert!(!h.is_valid());
    }

    #[test]
    fn nonzero_sequence_on_single_packet_non_sc_is_invalid() {
        let mut h = base_header();
        h.sequence_number = 1;
        assert!(!h.is_valid());
    }

    #[test]
    fn nonzero_sequence_allowed_for_sc_and_heartbeat() {
        let mut h = base_header();
        h.service_connection = true;
        h.ack_nack = AckNack::None;
        h.sequence_number = 7;
        assert!(h.is_valid());

        let mut hb = base_header();
        hb.command_code = HEARTBEAT_PULSE_CODE;
        hb.sequence_number = 3;
        assert!(hb.is_valid());
    }

    #[test]
    fn swap_source_and_destination() {
        let h = base_header();
        let swapped = h.swapped_source_and_destination();
        assert_eq!(swapped.source, h.destination);
        assert_eq!(swapped.destination, h.source);
    }

    #[test]
    fn v2_0_rejected_on_decode_minimum() {
        let mut h = base_header();
        h.version = Version::V2_0;
        let bytes = h.encode();
        assert!(matches!(Header::decode(&bytes), Err(WireError::InvalidHeader(_))));
    }
}
