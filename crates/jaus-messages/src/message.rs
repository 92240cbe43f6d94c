use std::any::Any;
use std::fmt::Debug;

use jaus_wire::header::Version;

use crate::error::MessageError;

/// A registered message type: owns its presence vector and field values,
/// and knows how to serialize/deserialize itself for a given protocol
/// version.
///
/// Implementors live behind `Box<dyn Message>` in the registry and
/// dispatch path; `as_any`/`as_any_mut` let call sites downcast to a
/// concrete leaf type once the command code has identified it.
pub trait Message: Debug + Send + Sync {
    /// The command code identifying this message's wire type.
    fn command_code(&self) -> u16;

    /// Bitmask of which optional fields this instance carries. Must be a
    /// subset of the registry's mask for `(command_code(), version)`.
    fn presence_vector(&self) -> u16;

    /// Append this message's body (excluding the 16-byte header) to `out`,
    /// in the command code's canonical field order.
    fn write_body(&self, version: Version, out: &mut Vec<u8>);

    fn as_any(&self) -> &dyn Any;

    fn clone_box(&self) -> Box<dyn Message>;
}

impl Clone for Box<dyn Message> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Per-message decode function stored in the registry.
pub type DecodeFn =
    fn(body: &[u8], presence_vector: u16, version: Version) -> Result<Box<dyn Message>, MessageError>;

/// Helper for reading/writing little-endian primitives from a message
/// body in canonical field order, mirroring the wire header's byte
/// layout conventions.
pub struct BodyWriter<'a> {
    pub out: &'a mut Vec<u8>,
}

impl<'a> BodyWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        BodyWriter { out }
    }

    pub fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.out.extend_from_slice(v);
    }
}

/// Helper for reading little-endian primitives from a message body,
/// tracking a cursor and returning `ShortRead` on underrun.
pub struct BodyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BodyReader { bytes, pos: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, MessageError> {
        let v = *self.bytes.get(self.pos).ok_or(MessageError::ShortRead)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16, MessageError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(MessageError::ShortRead)?;
        self.pos += 2;
        Ok(u16::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32, MessageError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or(MessageError::ShortRead)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], MessageError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(MessageError::ShortRead)?;
        self.pos += n;
        Ok(slice)
    }
}
