//! Global pose query/inform pair — the example periodic-data service
//! exercised by the subscription-engine integration scenarios.

use std::any::Any;

use jaus_wire::header::Version;
use jaus_wire::scaled::{decode_i16, decode_i32, encode_i16, encode_i32};

use crate::codes;
use crate::error::MessageError;
use crate::message::{BodyReader, BodyWriter, Message};

const POSITION_LO: f64 = -100_000.0;
const POSITION_HI: f64 = 100_000.0;
const YAW_LO: f64 = -std::f64::consts::PI;
const YAW_HI: f64 = std::f64::consts::PI;

const PV_X: u16 = 1 << 0;
const PV_Y: u16 = 1 << 1;
const PV_Z: u16 = 1 << 2;
const PV_YAW: u16 = 1 << 3;

/// Query Global Pose, filtered to the fields named by
/// `presence_vector_filter` (spec §3's presence-vector-as-filter idiom).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryGlobalPose {
    pub presence_vector_filter: u16,
}

impl Message for QueryGlobalPose {
    fn command_code(&self) -> u16 {
        codes::QUERY_GLOBAL_POSE
    }
    fn presence_vector(&self) -> u16 {
        0
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        BodyWriter::new(out).u16(self.presence_vector_filter);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }
}

pub fn decode_query_global_pose(
    body: &[u8],
    _presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    Ok(Box::new(QueryGlobalPose {
        presence_vector_filter: r.u16()?,
    }))
}

/// Global Pose Sensor's report: position in meters and heading in
/// radians, each independently optional via the presence vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportGlobalPose {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub yaw: Option<f64>,
}

impl Message for ReportGlobalPose {
    fn command_code(&self) -> u16 {
        codes::REPORT_GLOBAL_POSE
    }
    fn presence_vector(&self) -> u16 {
        let mut pv = 0;
        if self.x.is_some() {
            pv |= PV_X;
        }
        if self.y.is_some() {
            pv |= PV_Y;
        }
        if self.z.is_some() {
            pv |= PV_Z;
        }
        if self.yaw.is_some() {
            pv |= PV_YAW;
        }
        pv
    }
    fn write_body(&self, _version: Version, out: &mut Vec<u8>) {
        let mut w = BodyWriter::new(out);
        if let Some(x) = self.x {
            w.bytes(&encode_i32(x, POSITION_LO, POSITION_HI).to_le_bytes());
        }
        if let Some(y) = self.y {
            w.bytes(&encode_i32(y, POSITION_LO, POSITION_HI).to_le_bytes());
        }
        if let Some(z) = self.z {
            w.bytes(&encode_i32(z, POSITION_LO, POSITION_HI).to_le_bytes());
        }
        if let Some(yaw) = self.yaw {
            w.bytes(&encode_i16(yaw, YAW_LO, YAW_HI).to_le_bytes());
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }
}

pub fn decode_report_global_pose(
    body: &[u8],
    presence_vector: u16,
    _version: Version,
) -> Result<Box<dyn Message>, MessageError> {
    let mut r = BodyReader::new(body);
    let x = if presence_vector & PV_X != 0 {
        Some(decode_i32(
            i32::from_le_bytes(r.take(4)?.try_into().unwrap()),
            POSITION_LO,
            POSITION_HI,
        ))
    } else {
        None
    };
    let y = if presence_vector & PV_Y != 0 {
        Some(decode_i32(
            i32::from_le_bytes(r.take(4)?.try_into().unwrap()),
            POSITION_LO,
            POSITION_HI,
        ))
    } else {
        None
    };
    let z = if presence_vector & PV_Z != 0 {
        Some(decode_i32(
            i32::from_le_bytes(r.take(4)?.try_into().unwrap()),
            POSITION_LO,
            POSITION_HI,
        ))
    } else {
        None
    };
    let yaw = if presence_vector & PV_YAW != 0 {
        Some(decode_i16(
            i16::from_le_bytes(r.take(2)?.try_into().unwrap()),
            YAW_LO,
            YAW_HI,
        ))
    } else {
        None
    };
    Ok(Box::new(ReportGlobalPose { x, y, z, yaw }))
}
