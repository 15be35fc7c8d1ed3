// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CHP wire message shapes: the snapshot request, and the common 5-frame
//! entry/update/heartbeat/terminator shape described in `spec.md` §6.

use crate::wire::{scalar, Frame};
use std::io;

/// Sentinel key that begins a snapshot request and prefixes every reply entry.
pub const ICANHAZ: &str = "ICANHAZ?";
/// Sentinel key that terminates a snapshot reply stream.
pub const KTHXBAI: &str = "KTHXBAI";
/// Sentinel key used for content-free liveness frames.
pub const HUGZ: &str = "HUGZ";

/// A 2-frame snapshot request: `"ICANHAZ?"` + subtree filter.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub subtree: String,
}

impl SnapshotRequest {
    pub fn encode(&self) -> Vec<Frame> {
        vec![ICANHAZ.as_bytes().to_vec(), self.subtree.clone().into_bytes()]
    }

    pub fn decode(frames: &[Frame]) -> io::Result<Self> {
        if frames.len() != 2 {
            return Err(bad_shape("snapshot request", 2, frames.len()));
        }
        if frames[0] != ICANHAZ.as_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "snapshot request missing ICANHAZ? frame",
            ));
        }
        Ok(Self {
            subtree: decode_string(&frames[1])?,
        })
    }
}

/// The common 5-frame shape shared by snapshot entries, the snapshot
/// terminator, publisher updates, heartbeats, and client mutations.
///
/// `spec.md` §6 gives each use site a different interpretation of these same
/// five frames; this type is the one wire shape all of them share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChpMessage {
    pub key: String,
    pub sequence: u64,
    pub owner_uuid: Vec<u8>,
    pub properties: String,
    pub value: String,
}

impl ChpMessage {
    /// Builds the heartbeat frame `("HUGZ", 0, "", "", "")` (`spec.md` §6).
    pub fn heartbeat() -> Self {
        Self {
            key: HUGZ.to_string(),
            sequence: 0,
            owner_uuid: Vec::new(),
            properties: String::new(),
            value: String::new(),
        }
    }

    /// Builds the snapshot terminator `("KTHXBAI", current_seq, "", "", subtree)`.
    pub fn terminator(current_sequence: u64, subtree: &str) -> Self {
        Self {
            key: KTHXBAI.to_string(),
            sequence: current_sequence,
            owner_uuid: Vec::new(),
            properties: String::new(),
            value: subtree.to_string(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.key == HUGZ
    }

    pub fn is_terminator(&self) -> bool {
        self.key == KTHXBAI
    }

    pub fn encode(&self) -> Vec<Frame> {
        vec![
            self.key.clone().into_bytes(),
            scalar::encode_sequence(self.sequence).to_vec(),
            self.owner_uuid.clone(),
            self.properties.clone().into_bytes(),
            self.value.clone().into_bytes(),
        ]
    }

    pub fn decode(frames: &[Frame]) -> io::Result<Self> {
        if frames.len() != 5 {
            return Err(bad_shape("CHP message", 5, frames.len()));
        }
        let sequence = scalar::decode_sequence(&frames[1]).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed CHP sequence frame")
        })?;
        Ok(Self {
            key: decode_string(&frames[0])?,
            sequence,
            owner_uuid: frames[2].clone(),
            properties: decode_string(&frames[3])?,
            value: decode_string(&frames[4])?,
        })
    }
}

fn decode_string(frame: &[u8]) -> io::Result<String> {
    String::from_utf8(frame.to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.utf8_error()))
}

fn bad_shape(what: &str, expected: usize, got: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{what} expected {expected} frames, got {got}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_entry() {
        let msg = ChpMessage {
            key: "testkey".into(),
            sequence: 7,
            owner_uuid: vec![1, 2, 3, 4],
            properties: String::new(),
            value: "testvalue".into(),
        };
        let decoded = ChpMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn heartbeat_round_trips_and_is_recognized() {
        let msg = ChpMessage::heartbeat();
        let decoded = ChpMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_heartbeat());
        assert_eq!(decoded.sequence, 0);
    }

    #[test]
    fn terminator_round_trips_and_is_recognized() {
        let msg = ChpMessage::terminator(42, "sub");
        let decoded = ChpMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_terminator());
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.value, "sub");
    }

    #[test]
    fn snapshot_request_round_trips() {
        let req = SnapshotRequest {
            subtree: "topics/".into(),
        };
        let decoded = SnapshotRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.subtree, "topics/");
    }

    #[test]
    fn wrong_frame_count_is_rejected() {
        assert!(ChpMessage::decode(&[b"only one".to_vec()]).is_err());
    }
}
