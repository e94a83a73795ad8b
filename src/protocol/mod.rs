//! Message structs, version-dependent pack/unpack, and envelope framing.
//!
//! A NatNet datagram is a fixed four-byte header (`message_id`,
//! `payload_size`) followed by a payload whose layout is picked by
//! `message_id` and, for several message kinds, by the negotiated
//! [`VersionContext`]. [`unpack`] is the single entry point a channel calls
//! on every inbound datagram; [`pack`] is its dual for outbound requests.

pub mod commands;
pub mod description;
pub mod echo;
pub mod mocap;
pub mod server_info;
pub mod types;

use log::{debug, warn};

use crate::buffer::{Buffer, WriteBuffer};
use crate::error::Result;
use crate::version::VersionContext;

pub use commands::Response;
pub use description::MoCapDescription;
pub use echo::{EchoRequest, EchoResponse};
pub use mocap::MoCapData;
pub use server_info::ServerInfo;
pub use types::{Quaternion, Vector3, Version, DEFAULT_VERSION};

/// Fixed message-id table. Mirrors the wire values exactly; never
/// renumber — servers in the field depend on these constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageId {
    Connect = 0,
    ServerInfo = 1,
    Request = 2,
    Response = 3,
    ModelDefRequest = 4,
    ModelDef = 5,
    RequestFrameOfData = 6,
    FrameOfData = 7,
    MessageString = 8,
    Disconnect = 9,
    KeepAlive = 10,
    DisconnectByTimeout = 11,
    EchoRequest = 12,
    EchoResponse = 13,
    Discovery = 14,
    UnrecognizedRequest = 100,
}

impl MessageId {
    fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => MessageId::Connect,
            1 => MessageId::ServerInfo,
            2 => MessageId::Request,
            3 => MessageId::Response,
            4 => MessageId::ModelDefRequest,
            5 => MessageId::ModelDef,
            6 => MessageId::RequestFrameOfData,
            7 => MessageId::FrameOfData,
            8 => MessageId::MessageString,
            9 => MessageId::Disconnect,
            10 => MessageId::KeepAlive,
            11 => MessageId::DisconnectByTimeout,
            12 => MessageId::EchoRequest,
            13 => MessageId::EchoResponse,
            14 => MessageId::Discovery,
            100 => MessageId::UnrecognizedRequest,
            _ => return None,
        })
    }
}

/// Every inbound message type the client actually decodes. Outbound-only
/// kinds (`Connect`, `Request`, `KeepAlive`, ...) have no variant here —
/// they are produced directly as framed bytes by the `*_request` builders
/// below, never parsed back.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ServerInfo(ServerInfo),
    ModelDef(MoCapDescription),
    FrameOfData(MoCapData),
    Response(Response),
    MessageString(String),
    EchoResponse(EchoResponse),
}

/// Frames a payload with the envelope header and backpatches
/// `payload_size` once the body is known, per the Envelope invariant.
fn frame(id: MessageId, body: impl FnOnce(&mut WriteBuffer)) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_ushort(id as u16);
    w.write_ushort(0);
    body(&mut w);
    let payload_size = (w.len() - 4) as i16;
    w.set_short(2, payload_size);
    w.into_bytes().to_vec()
}

pub fn connect_request(version: Version, version_1: Version) -> Vec<u8> {
    frame(MessageId::Connect, |w| {
        w.write_bytes(&[0u8; 256], 256);
        write_version(w, version);
        write_version(w, version_1);
    })
}

pub fn discovery_request(version: Version, version_1: Version) -> Vec<u8> {
    frame(MessageId::Discovery, |w| {
        w.write_bytes(&[0u8; 256], 256);
        write_version(w, version);
        write_version(w, version_1);
    })
}

pub fn echo_request(req: EchoRequest) -> Vec<u8> {
    frame(MessageId::EchoRequest, |w| req.pack(w))
}

pub fn keep_alive() -> Vec<u8> {
    frame(MessageId::KeepAlive, |_| {})
}

pub fn disconnect_request() -> Vec<u8> {
    frame(MessageId::Disconnect, |_| {})
}

pub fn model_def_request() -> Vec<u8> {
    frame(MessageId::ModelDefRequest, |_| {})
}

pub fn request(payload: &[u8]) -> Vec<u8> {
    frame(MessageId::Request, |w| w.write_bytes(payload, 0))
}

fn write_version(w: &mut WriteBuffer, v: Version) {
    w.write_byte(v.0);
    w.write_byte(v.1);
    w.write_byte(v.2);
    w.write_byte(v.3);
}

/// Decodes one complete datagram. Trailing unread bytes are logged and
/// discarded rather than treated as an error, so that a server's future
/// field additions don't break an older client. An unrecognized
/// `message_id` or a kind this client never needs to parse back (e.g.
/// `Connect`) yields `Ok(None)`.
pub fn unpack(datagram: &[u8], ctx: VersionContext) -> Result<Option<Message>> {
    let mut data = Buffer::new(datagram);
    let raw_id = data.read_ushort()?;
    let Some(id) = MessageId::from_u16(raw_id) else {
        warn!("unknown message id {raw_id}");
        return Ok(None);
    };
    let packet_size = data.read_ushort()? as usize;
    debug!("unpack {id:?} ({packet_size} bytes)");

    let msg = match id {
        MessageId::FrameOfData => Some(Message::FrameOfData(MoCapData::unpack(&mut data, ctx)?)),
        MessageId::ModelDef => Some(Message::ModelDef(MoCapDescription::unpack(&mut data, ctx)?)),
        MessageId::ServerInfo => Some(Message::ServerInfo(ServerInfo::unpack(&mut data, ctx)?)),
        MessageId::Response => Some(Message::Response(Response::unpack(&mut data, packet_size)?)),
        MessageId::MessageString => Some(Message::MessageString(data.read_string(0)?)),
        MessageId::EchoResponse => Some(Message::EchoResponse(EchoResponse::unpack(&mut data)?)),
        _ => None,
    };

    if data.remaining() > 0 {
        warn!("{} bytes remaining after unpacking {:?}", data.remaining(), id);
    } else {
        debug!("unpacked {:?} cleanly", id);
    }
    Ok(msg)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_payload_size_matches_body_length() {
        let bytes = keep_alive();
        assert_eq!(bytes.len(), 4);
        let mut r = Buffer::new(&bytes);
        let _ = r.read_ushort().unwrap();
        let payload_size = r.read_ushort().unwrap();
        assert_eq!(payload_size as usize, bytes.len() - 4);
    }

    #[test]
    fn connect_request_has_512_byte_version_section_plus_padding() {
        let bytes = connect_request(DEFAULT_VERSION, DEFAULT_VERSION);
        // 4 header + 256 padding + 4 + 4 version bytes
        assert_eq!(bytes.len(), 4 + 256 + 4 + 4);
    }

    #[test]
    fn unpack_dispatches_server_info() {
        let info = ServerInfo {
            application_name: "mock".into(),
            server_version: (3, 1, 0, 0),
            stream_version: (3, 1, 0, 0),
            clock_freq: 1_000_000_000,
            connection_info: None,
        };
        let bytes = frame(MessageId::ServerInfo, |w| info.pack(w));
        let msg = unpack(&bytes, VersionContext::new(3, 1)).unwrap().unwrap();
        assert!(matches!(msg, Message::ServerInfo(_)));
    }

    #[test]
    fn unpack_unknown_message_id_returns_none_not_error() {
        let mut w = WriteBuffer::new();
        w.write_ushort(9999);
        w.write_ushort(0);
        let bytes = w.into_bytes();
        assert_eq!(unpack(&bytes, VersionContext::new(3, 1)).unwrap(), None);
    }
}
