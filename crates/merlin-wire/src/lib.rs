//! Length-prefixed event framing used between the local IPC channel and
//! the TCP mesh (spec §3, §4.1, §6).
//!
//! One frame is one indivisible unit on the wire: a fixed 19-byte header
//! in network byte order followed by `length` bytes of opaque body.

use bytes::{Buf, BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Current wire protocol version understood by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest body a single frame may carry. A `length` of exactly
/// `MAX_PKT_SIZE` is still legal; only `length > MAX_PKT_SIZE` is rejected
/// (spec §3/§6, `original_source/daemon.c`'s strict `>` bound check).
pub const MAX_PKT_SIZE: u32 = 65_535;

pub const HEADER_SIZE: usize = 1 + 2 + 2 + 4 + 2 + 8;

/// Control-event semantic codes (spec §3). Only meaningful when
/// [`Header::kind`] is [`EventKind::Ctrl`].
pub mod ctrl {
    pub const ACTIVE: u16 = 1;
    pub const INACTIVE: u16 = 2;
    pub const PATHS: u16 = 3;
    pub const RESUME: u16 = 4;
    pub const GENERIC: u16 = 5;
}

/// A sentinel `code` value meaning "do not forward this event to the
/// network" (spec §4.5 rule 4).
pub const MAGIC_NONET: u16 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Ctrl,
    Data(u16),
}

impl EventKind {
    fn to_wire(self) -> u16 {
        match self {
            EventKind::Ctrl => 0,
            EventKind::Data(v) => v,
        }
    }

    fn from_wire(v: u16) -> Self {
        if v == 0 { EventKind::Ctrl } else { EventKind::Data(v) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub protocol: u8,
    pub kind: EventKind,
    pub code: u16,
    pub length: u32,
    pub selection: u16,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Event {
    pub fn new_ctrl(code: u16, timestamp: u64) -> Self {
        Event {
            header: Header {
                protocol: PROTOCOL_VERSION,
                kind: EventKind::Ctrl,
                code,
                length: 0,
                selection: 0,
                timestamp,
            },
            body: Vec::new(),
        }
    }

    pub fn new_data(code: u16, selection: u16, timestamp: u64, body: Vec<u8>) -> Self {
        Event {
            header: Header {
                protocol: PROTOCOL_VERSION,
                kind: EventKind::Data(code),
                code,
                length: body.len() as u32,
                selection,
                timestamp,
            },
            body,
        }
    }

    pub fn is_nonet(&self) -> bool {
        self.header.code == MAGIC_NONET
    }

    /// Attaches a payload to a control event (e.g. the handshake info
    /// block carried by `ctrl::ACTIVE`, or the path list carried by
    /// `ctrl::PATHS`). Recomputes `header.length` to match.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.header.length = body.len() as u32;
        self.body = body;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("body length {length} exceeds MAX_PKT_SIZE ({MAX_PKT_SIZE})")]
    OversizedBody { length: u32 },
    #[error("unsupported protocol version {version} (max {PROTOCOL_VERSION})")]
    UnsupportedProtocol { version: u8 },
}

/// Encode one event into `out`, appending to whatever is already there.
///
/// Fails with [`CodecError::OversizedBody`] if the body would exceed
/// [`MAX_PKT_SIZE`]; the header's `length` field is always recomputed from
/// the body, never trusted from the caller.
pub fn encode(event: &Event, out: &mut BytesMut) -> Result<(), CodecError> {
    let length = event.body.len() as u32;
    if length > MAX_PKT_SIZE {
        return Err(CodecError::OversizedBody { length });
    }
    out.reserve(HEADER_SIZE + event.body.len());
    out.put_u8(event.header.protocol);
    out.put_u16(event.header.kind.to_wire());
    out.put_u16(event.header.code);
    out.put_u32(length);
    out.put_u16(event.header.selection);
    out.put_u64(event.header.timestamp);
    out.put_slice(&event.body);
    Ok(())
}

/// Outcome of a single [`decode`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A full event was parsed; the buffer's cursor has been advanced past
    /// it and any trailing bytes are left intact for the next call.
    Event(Event),
    /// The buffer does not yet hold a complete header + body.
    NeedMore,
}

/// Pull-style decoder over a per-connection byte buffer (spec §4.1).
///
/// Returns exactly one event per call when the buffer holds a full frame,
/// `Decoded::NeedMore` if it doesn't (no bytes are consumed in that case),
/// or a [`CodecError`] if the header fails the protocol-version or
/// size guard. No event is ever emitted across a short read: a header
/// that parses but whose body hasn't fully arrived yet also yields
/// `NeedMore`, leaving the header bytes in the buffer to be re-parsed
/// once more data lands.
pub fn decode(buf: &mut BytesMut) -> Result<Decoded, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Ok(Decoded::NeedMore);
    }

    let protocol = buf[0];
    if protocol > PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedProtocol { version: protocol });
    }
    let kind = BigEndian::read_u16(&buf[1..3]);
    let code = BigEndian::read_u16(&buf[3..5]);
    let length = BigEndian::read_u32(&buf[5..9]);
    if length > MAX_PKT_SIZE {
        return Err(CodecError::OversizedBody { length });
    }
    let selection = BigEndian::read_u16(&buf[9..11]);
    let timestamp = BigEndian::read_u64(&buf[11..19]);

    let total = HEADER_SIZE + length as usize;
    if buf.len() < total {
        return Ok(Decoded::NeedMore);
    }

    let mut frame = buf.split_to(total);
    frame.advance(HEADER_SIZE);
    let body = frame.to_vec();

    Ok(Decoded::Event(Event {
        header: Header {
            protocol,
            kind: EventKind::from_wire(kind),
            code,
            length,
            selection,
            timestamp,
        },
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_event() {
        let event = Event::new_data(42, 7, 1_700_000_000, b"hello".to_vec());
        let mut buf = BytesMut::new();
        encode(&event, &mut buf).unwrap();
        assert_eq!(decode(&mut buf).unwrap(), Decoded::Event(event));
        assert!(buf.is_empty());
    }

    #[test]
    fn short_read_yields_need_more() {
        let event = Event::new_data(1, 0, 0, vec![1, 2, 3, 4]);
        let mut full = BytesMut::new();
        encode(&event, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(decode(&mut partial).unwrap(), Decoded::NeedMore);
        // nothing consumed
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn oversized_header_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32(65_536);
        buf.put_u16(0);
        buf.put_u64(0);
        assert_eq!(
            decode(&mut buf),
            Err(CodecError::OversizedBody { length: 65_536 })
        );
    }

    #[test]
    fn unsupported_protocol_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION + 1);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32(0);
        buf.put_u16(0);
        buf.put_u64(0);
        assert_eq!(
            decode(&mut buf),
            Err(CodecError::UnsupportedProtocol {
                version: PROTOCOL_VERSION + 1
            })
        );
    }

    #[test]
    fn encode_rejects_oversized_body() {
        let event = Event::new_data(1, 0, 0, vec![0u8; MAX_PKT_SIZE as usize + 1]);
        let mut buf = BytesMut::new();
        assert_eq!(
            encode(&event, &mut buf),
            Err(CodecError::OversizedBody {
                length: MAX_PKT_SIZE + 1
            })
        );
    }

    #[test]
    fn max_pkt_size_boundary_is_inclusive() {
        let event = Event::new_data(1, 0, 0, vec![0u8; MAX_PKT_SIZE as usize]);
        let mut buf = BytesMut::new();
        encode(&event, &mut buf).unwrap();
        assert_eq!(decode(&mut buf).unwrap(), Decoded::Event(event));

        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32(MAX_PKT_SIZE + 1);
        buf.put_u16(0);
        buf.put_u64(0);
        assert_eq!(
            decode(&mut buf),
            Err(CodecError::OversizedBody {
                length: MAX_PKT_SIZE + 1
            })
        );
    }
}
