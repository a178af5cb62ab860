//! Cast v2 `CastMessage` framing: 4-byte big-endian length followed by a
//! protobuf body with string payloads.

use std::io::{ErrorKind, Read};

const PROTOCOL_VERSION_CASTV2_1_0: u64 = 0;
const PAYLOAD_TYPE_STRING: u64 = 0;
/// Frames larger than this are rejected by receivers.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastFrame {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload_utf8: String,
}

pub fn encode_cast_frame(frame: &CastFrame) -> Result<Vec<u8>, String> {
    let mut protobuf = Vec::new();
    write_varint_field(&mut protobuf, 1, PROTOCOL_VERSION_CASTV2_1_0);
    write_string_field(&mut protobuf, 2, &frame.source_id);
    write_string_field(&mut protobuf, 3, &frame.destination_id);
    write_string_field(&mut protobuf, 4, &frame.namespace);
    write_varint_field(&mut protobuf, 5, PAYLOAD_TYPE_STRING);
    write_string_field(&mut protobuf, 6, &frame.payload_utf8);

    if protobuf.len() > MAX_FRAME_LEN {
        return Err(format!("cast frame too large: {} bytes", protobuf.len()));
    }
    let len = u32::try_from(protobuf.len()).map_err(|_| "cast frame too large".to_string())?;
    let mut out = Vec::with_capacity(4 + protobuf.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&protobuf);
    Ok(out)
}

pub fn decode_cast_frame(bytes: &[u8]) -> Result<CastFrame, String> {
    let mut cursor = 0usize;
    let mut frame = CastFrame {
        source_id: String::new(),
        destination_id: String::new(),
        namespace: String::new(),
        payload_utf8: String::new(),
    };

    while cursor < bytes.len() {
        let key = read_varint(bytes, &mut cursor)
            .ok_or_else(|| "invalid cast protobuf key".to_string())?;
        let field_number = (key >> 3) as u32;
        let wire_type = (key & 0x07) as u8;
        match wire_type {
            0 => {
                read_varint(bytes, &mut cursor)
                    .ok_or_else(|| "invalid cast protobuf varint field".to_string())?;
            }
            2 => {
                let len = read_varint(bytes, &mut cursor)
                    .ok_or_else(|| "invalid cast protobuf length".to_string())?
                    as usize;
                let end = cursor
                    .checked_add(len)
                    .filter(|end| *end <= bytes.len())
                    .ok_or_else(|| "cast protobuf field out of bounds".to_string())?;
                let field = &bytes[cursor..end];
                cursor = end;
                let target = match field_number {
                    2 => &mut frame.source_id,
                    3 => &mut frame.destination_id,
                    4 => &mut frame.namespace,
                    6 => &mut frame.payload_utf8,
                    // Binary payloads and unknown fields are skipped.
                    _ => continue,
                };
                *target = String::from_utf8(field.to_vec())
                    .map_err(|_| "cast protobuf invalid utf8".to_string())?;
            }
            other => return Err(format!("unsupported cast protobuf wire type {}", other)),
        }
    }

    Ok(frame)
}

/// Reassembles frames from a blocking stream that has a read timeout.
///
/// Bytes that arrived before a timeout stay buffered, so a frame split
/// across several reads is decoded once its last byte is in.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next complete frame, or `Ok(None)` when the read timed
    /// out first.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<CastFrame>, String> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }
            match reader.read(&mut chunk) {
                Ok(0) => return Err("cast connection closed by peer".to_string()),
                Ok(read) => self.buffer.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(err) => return Err(format!("failed to read cast frame: {err}")),
            }
        }
    }

    fn take_frame(&mut self) -> Result<Option<CastFrame>, String> {
        loop {
            let Some(prefix) = self.buffer.get(..4) else {
                return Ok(None);
            };
            let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(format!("cast frame length {} exceeds limit", len));
            }
            if len == 0 {
                self.buffer.drain(..4);
                continue;
            }
            if self.buffer.len() < 4 + len {
                return Ok(None);
            }
            let body: Vec<u8> = self.buffer.drain(..4 + len).skip(4).collect();
            return decode_cast_frame(&body).map(Some);
        }
    }
}

fn write_varint_field(out: &mut Vec<u8>, field_number: u32, value: u64) {
    write_varint(out, (field_number as u64) << 3);
    write_varint(out, value);
}

fn write_string_field(out: &mut Vec<u8>, field_number: u32, value: &str) {
    write_varint(out, ((field_number as u64) << 3) | 2);
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Option<u64> {
    let mut shift = 0u32;
    let mut value = 0u64;
    while *cursor < bytes.len() && shift <= 63 {
        let byte = bytes[*cursor];
        *cursor += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    fn sample_frame() -> CastFrame {
        CastFrame {
            source_id: "sender-0".to_string(),
            destination_id: "receiver-0".to_string(),
            namespace: "urn:x-cast:com.google.cast.receiver".to_string(),
            payload_utf8: r#"{"type":"GET_STATUS","requestId":1}"#.to_string(),
        }
    }

    #[test]
    fn test_encoded_frame_is_length_prefixed() {
        let bytes = encode_cast_frame(&sample_frame()).expect("frame should encode");
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
        // protocol_version field key followed by CASTV2_1_0
        assert_eq!(&bytes[4..6], &[0x08, 0x00]);
    }

    /// Hands out scripted chunks, timing out between them.
    struct ChunkedStream {
        chunks: VecDeque<Option<Vec<u8>>>,
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(std::io::Error::new(ErrorKind::WouldBlock, "timed out")),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_read_frame_decodes_stream_bytes() {
        let bytes = encode_cast_frame(&sample_frame()).expect("frame should encode");
        let mut cursor = Cursor::new(bytes);
        let decoded = FrameReader::new()
            .read_frame(&mut cursor)
            .expect("read should succeed")
            .expect("frame should be present");
        assert_eq!(decoded, sample_frame());
    }

    #[test]
    fn test_frame_split_across_timeouts_is_reassembled() {
        let bytes = encode_cast_frame(&sample_frame()).expect("frame should encode");
        let mut stream = ChunkedStream {
            chunks: VecDeque::from(vec![
                Some(bytes[..2].to_vec()),
                None,
                Some(bytes[2..10].to_vec()),
                None,
                Some(bytes[10..].to_vec()),
            ]),
        };
        let mut reader = FrameReader::new();
        assert_eq!(reader.read_frame(&mut stream), Ok(None));
        assert_eq!(reader.read_frame(&mut stream), Ok(None));
        assert_eq!(reader.read_frame(&mut stream), Ok(Some(sample_frame())));
        assert!(reader.read_frame(&mut stream).is_err());
    }

    #[test]
    fn test_back_to_back_frames_in_one_read() {
        let mut bytes = encode_cast_frame(&sample_frame()).expect("frame should encode");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend(encode_cast_frame(&sample_frame()).expect("frame should encode"));
        let mut stream = ChunkedStream {
            chunks: VecDeque::from(vec![Some(bytes)]),
        };
        let mut reader = FrameReader::new();
        assert_eq!(reader.read_frame(&mut stream), Ok(Some(sample_frame())));
        assert_eq!(reader.read_frame(&mut stream), Ok(Some(sample_frame())));
    }

    #[test]
    fn test_decode_rejects_truncated_field() {
        // field 2, wire type 2, declared length 10, only 2 bytes follow
        let bytes = [0x12, 0x0a, b'a', b'b'];
        assert!(decode_cast_frame(&bytes).is_err());
    }

    #[test]
    fn test_decode_skips_binary_payload_field() {
        let mut bytes = Vec::new();
        write_string_field(&mut bytes, 4, "ns");
        write_string_field(&mut bytes, 7, "\u{1}\u{2}");
        let frame = decode_cast_frame(&bytes).expect("frame should decode");
        assert_eq!(frame.namespace, "ns");
        assert!(frame.payload_utf8.is_empty());
    }

    #[test]
    fn test_multi_byte_varint() {
        let mut out = Vec::new();
        write_varint(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        let mut cursor = 0;
        assert_eq!(read_varint(&out, &mut cursor), Some(300));
    }
}
