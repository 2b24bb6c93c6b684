//! Frame codec.
//!
//! ```text
//! +----------------+--------+-------------------+
//! | length: u32 BE | type:u8| payload           |
//! +----------------+--------+-------------------+
//! ```
//!
//! `length` counts the payload bytes only. Requests and acks have an empty payload, matching
//! results are a JSON array of entries and errors carry a UTF-8 message.

use std::io::{self, Read, Write};

use crate::ipc::signal::{ClassMatchingEntry, Signal, SignalType};
use crate::ipc::SignalError;

/// Largest payload accepted on either side.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

pub fn encode(signal: &Signal) -> Result<Vec<u8>, SignalError> {
    let payload = match signal {
        Signal::ClassMatchingRequest | Signal::Ack => Vec::new(),
        Signal::ClassMatchingResponse(entries) | Signal::ClassMatchingRecord(entries) => {
            serde_json::to_vec(entries)?
        }
        Signal::Error(message) => message.as_bytes().to_vec(),
    };
    if payload.len() > MAX_FRAME_SIZE {
        return Err(SignalError::FrameTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.push(signal.signal_type() as u8);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode(signal_type: SignalType, payload: &[u8]) -> Result<Signal, SignalError> {
    match signal_type {
        SignalType::ClassMatchingRequest | SignalType::Ack if !payload.is_empty() => {
            Err(SignalError::UnexpectedPayload(signal_type))
        }
        SignalType::ClassMatchingRequest => Ok(Signal::ClassMatchingRequest),
        SignalType::Ack => Ok(Signal::Ack),
        SignalType::ClassMatchingResponse => Ok(Signal::ClassMatchingResponse(entries(payload)?)),
        SignalType::ClassMatchingRecord => Ok(Signal::ClassMatchingRecord(entries(payload)?)),
        SignalType::Error => Ok(Signal::Error(
            String::from_utf8(payload.to_vec()).map_err(|_| SignalError::InvalidMessage)?,
        )),
    }
}

fn entries(payload: &[u8]) -> Result<Vec<ClassMatchingEntry>, SignalError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn write_signal(writer: &mut impl Write, signal: &Signal) -> Result<(), SignalError> {
    writer.write_all(&encode(signal)?)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. Returns `None` when the peer closed the connection between frames.
pub fn read_signal(reader: &mut impl Read) -> Result<Option<Signal>, SignalError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header[..1]) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    reader.read_exact(&mut header[1..])?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(SignalError::FrameTooLarge {
            size,
            limit: MAX_FRAME_SIZE,
        });
    }
    let signal_type = SignalType::try_from(header[4])?;
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;
    decode(signal_type, &payload).map(Some)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::matching::BitSet;

    #[test]
    fn request_is_an_empty_frame() {
        assert_eq!(
            encode(&Signal::ClassMatchingRequest).expect("encode"),
            vec![0, 0, 0, 0, 1]
        );
        let decoded = read_signal(&mut Cursor::new(vec![0, 0, 0, 0, 1])).expect("decode");
        assert_eq!(decoded, Some(Signal::ClassMatchingRequest));
    }

    #[test]
    fn reads_consecutive_frames_until_eof() {
        let record = Signal::ClassMatchingRecord(vec![ClassMatchingEntry::new(
            "com.foo.Bar",
            "file:/app/foo.jar",
            [1, 3].into_iter().collect::<BitSet>(),
        )]);
        let mut bytes = encode(&record).expect("encode");
        bytes.extend(encode(&Signal::Error("nope".to_string())).expect("encode"));
        let mut cursor = Cursor::new(bytes);

        assert_eq!(read_signal(&mut cursor).expect("first"), Some(record));
        assert_eq!(
            read_signal(&mut cursor).expect("second"),
            Some(Signal::Error("nope".to_string()))
        );
        assert_eq!(read_signal(&mut cursor).expect("eof"), None);
    }

    #[test]
    fn rejects_oversized_and_malformed_frames() {
        let oversized = [0xff, 0xff, 0xff, 0xff, 2];
        assert!(matches!(
            read_signal(&mut Cursor::new(oversized.to_vec())),
            Err(SignalError::FrameTooLarge { .. })
        ));

        let ack_with_payload = [0, 0, 0, 1, 4, b'x'];
        assert!(matches!(
            read_signal(&mut Cursor::new(ack_with_payload.to_vec())),
            Err(SignalError::UnexpectedPayload(SignalType::Ack))
        ));

        let truncated = [0, 0, 0, 8, 3, b'['];
        assert!(matches!(
            read_signal(&mut Cursor::new(truncated.to_vec())),
            Err(SignalError::Io(_))
        ));
    }
}
