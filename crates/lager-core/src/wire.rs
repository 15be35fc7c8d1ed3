// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multi-frame wire codec.
//!
//! `spec.md` §4.A: messages are multi-frame sequences with explicit
//! "more-frames-follow" semantics; integers are little-endian, fixed-width,
//! never varint; strings are raw UTF-8 with no terminator. The reference
//! implementation rode on ZeroMQ's native multipart framing, which carries
//! per-frame length and a more-flag for free. Running over plain TCP here,
//! [`write_message`]/[`read_message`] reproduce that framing explicitly so
//! every other module can keep thinking in terms of "a message is a Vec of
//! frames" exactly as the original did.
//!
//! Wire shape per frame: `[len: u32 LE][more: u8][payload; len bytes]`.

use std::io::{self, Read, Write};

/// One frame of a multi-frame message: an opaque byte string.
pub type Frame = Vec<u8>;

/// Writes a single frame, with `more` indicating whether further frames
/// belonging to the same message follow.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8], more: bool) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&[u8::from(more)])?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads a single frame, returning the payload and whether more frames follow.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<(Frame, bool)> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut more_buf = [0u8; 1];
    r.read_exact(&mut more_buf)?;
    let more = more_buf[0] != 0;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    Ok((payload, more))
}

/// Writes every frame in `frames` as one message, marking all but the last
/// frame as "more follows".
pub fn write_message<W: Write>(w: &mut W, frames: &[Frame]) -> io::Result<()> {
    if frames.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a message must have at least one frame",
        ));
    }
    let last = frames.len() - 1;
    for (i, frame) in frames.iter().enumerate() {
        write_frame(w, frame, i != last)?;
    }
    w.flush()
}

/// Reads frames until one arrives with `more == false`, returning the full message.
pub fn read_message<R: Read>(r: &mut R) -> io::Result<Vec<Frame>> {
    let mut frames = Vec::new();
    loop {
        let (frame, more) = read_frame(r)?;
        frames.push(frame);
        if !more {
            break;
        }
    }
    Ok(frames)
}

/// Little-endian, fixed-width scalar encode/decode helpers used by the CHP
/// and sample wire formats (`spec.md` §4.A: "not varint").
pub mod scalar {
    /// Encodes a CHP sequence number as an 8-byte IEEE-754 double, the
    /// documented on-the-wire contract (`spec.md` §3/§4.A).
    pub fn encode_sequence(seq: u64) -> [u8; 8] {
        (seq as f64).to_le_bytes()
    }

    /// Decodes a CHP sequence number from its 8-byte double representation.
    ///
    /// Values beyond 2^53 lose precision in the round-trip; callers should
    /// treat that as the practical ceiling for a single CHP server's
    /// lifetime (`spec.md` §9).
    pub fn decode_sequence(bytes: &[u8]) -> Option<u64> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(f64::from_le_bytes(arr) as u64)
    }

    pub fn encode_u16(v: u16) -> [u8; 2] {
        v.to_le_bytes()
    }

    pub fn decode_u16(bytes: &[u8]) -> Option<u16> {
        Some(u16::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn encode_u64(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_multi_frame_message() {
        let frames: Vec<Frame> = vec![b"key".to_vec(), b"".to_vec(), b"value".to_vec()];
        let mut buf = Vec::new();
        write_message(&mut buf, &frames).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn rejects_empty_message() {
        let mut buf = Vec::new();
        assert!(write_message(&mut buf, &[]).is_err());
    }

    #[test]
    fn sequence_round_trips_through_the_double_encoding() {
        let seq = 42u64;
        let bytes = scalar::encode_sequence(seq);
        assert_eq!(scalar::decode_sequence(&bytes), Some(seq));
    }

    #[test]
    fn two_messages_back_to_back_on_one_stream_are_distinguishable() {
        let mut buf = Vec::new();
        write_message(&mut buf, &[b"a".to_vec()]).unwrap();
        write_message(&mut buf, &[b"bb".to_vec(), b"ccc".to_vec()]).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_message(&mut cursor).unwrap(), vec![b"a".to_vec()]);
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            vec![b"bb".to_vec(), b"ccc".to_vec()]
        );
    }
}
