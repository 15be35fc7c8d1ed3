// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The sample wire message a tap publishes and a mug decodes
//! (`spec.md` §4.D/§4.E, grounded on `original_source/src/tap.cpp`'s
//! `publisherThread` and `original_source/src/mug.cpp`'s
//! `subscriberThread`).
//!
//! Frame layout: `uuid (16 bytes)`, `version (UTF-8 string)`,
//! `compression flag (u16 LE)`, `timestamp_ns (u64 LE)`, then one frame per
//! data field, each 1, 2, 4, or 8 bytes wide.

use crate::chp::ids::Uuid;
use crate::wire::{self, scalar, Frame};
use std::io;

pub const UUID_SIZE_BYTES: usize = 16;
pub const TIMESTAMP_SIZE_BYTES: usize = 8;

/// Widths a data field frame is allowed to be, matching every integer type
/// the reference tap can originate (`u8`, `u16`, `u32`, `u64`).
const VALID_FIELD_SIZES: [usize; 4] = [1, 2, 4, 8];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMessage {
    pub uuid: Uuid,
    pub version: String,
    pub compression: u16,
    pub timestamp_ns: u64,
    pub fields: Vec<Frame>,
}

impl SampleMessage {
    pub fn new(uuid: Uuid, version: impl Into<String>, timestamp_ns: u64, fields: Vec<Frame>) -> Self {
        Self {
            uuid,
            version: version.into(),
            compression: 0,
            timestamp_ns,
            fields,
        }
    }

    pub fn encode(&self) -> Vec<Frame> {
        let mut frames = vec![
            self.uuid.as_bytes().to_vec(),
            self.version.clone().into_bytes(),
            scalar::encode_u16(self.compression).to_vec(),
            scalar::encode_u64(self.timestamp_ns).to_vec(),
        ];
        frames.extend(self.fields.iter().cloned());
        frames
    }

    pub fn decode(frames: &[Frame]) -> io::Result<Self> {
        if frames.len() < 4 {
            return Err(invalid(format!(
                "sample expected at least 4 frames, got {}",
                frames.len()
            )));
        }

        let uuid = Uuid::from_slice(&frames[0])
            .map_err(|e| invalid(format!("malformed sample uuid frame: {e}")))?;
        let version = String::from_utf8(frames[1].clone())
            .map_err(|e| invalid(format!("malformed sample version frame: {e}")))?;
        let compression = scalar::decode_u16(&frames[2])
            .ok_or_else(|| invalid("malformed sample compression frame"))?;
        let timestamp_ns = scalar::decode_u64(&frames[3])
            .ok_or_else(|| invalid("malformed sample timestamp frame"))?;

        let mut fields = Vec::with_capacity(frames.len() - 4);
        for field in &frames[4..] {
            if !VALID_FIELD_SIZES.contains(&field.len()) {
                return Err(invalid(format!(
                    "received unsupported sample field size {}",
                    field.len()
                )));
            }
            fields.push(field.clone());
        }

        Ok(Self {
            uuid,
            version,
            compression,
            timestamp_ns,
            fields,
        })
    }

    pub fn write_to<W: std::io::Write>(&self, w: &mut W) -> io::Result<()> {
        wire::write_message(w, &self.encode())
    }

    pub fn read_from<R: std::io::Read>(r: &mut R) -> io::Result<Self> {
        let frames = wire::read_message(r)?;
        Self::decode(&frames)
    }

    /// The `uuid ++ timestamp_ns` prefix a keg file begins with, before any
    /// data fields are appended — mirrors the buffer `Mug::subscriberThread`
    /// builds ahead of its per-field `keg->write` calls.
    pub fn keg_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UUID_SIZE_BYTES + TIMESTAMP_SIZE_BYTES);
        buf.extend_from_slice(self.uuid.as_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sample_with_mixed_field_widths() {
        let msg = SampleMessage::new(
            Uuid::nil(),
            "BEERR01",
            123_456_789,
            vec![vec![1u8], vec![2u8, 3], vec![4u8; 4], vec![5u8; 8]],
        );
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = SampleMessage::read_from(&mut cursor).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_an_unsupported_field_width() {
        let frames: Vec<Frame> = vec![
            Uuid::nil().as_bytes().to_vec(),
            b"v".to_vec(),
            scalar::encode_u16(0).to_vec(),
            scalar::encode_u64(0).to_vec(),
            vec![0u8; 3],
        ];
        assert!(SampleMessage::decode(&frames).is_err());
    }

    #[test]
    fn keg_prefix_is_uuid_then_timestamp() {
        let msg = SampleMessage::new(Uuid::nil(), "v", 42, vec![]);
        let prefix = msg.keg_prefix();
        assert_eq!(prefix.len(), UUID_SIZE_BYTES + TIMESTAMP_SIZE_BYTES);
        assert_eq!(&prefix[UUID_SIZE_BYTES..], &42u64.to_le_bytes());
    }
}
