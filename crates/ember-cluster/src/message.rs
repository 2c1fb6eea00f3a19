//! Binary wire format for configuration gossip.
//!
//! Every message starts with a one-byte type tag followed by the sender's
//! member id. Configurations travel as a length-prefixed codec body. All
//! multi-byte integers are little-endian.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec;
use crate::configuration::ClusterConfiguration;
use crate::member::MemberId;
use crate::ClusterError;

/// Maximum encoded length of a member id.
const MAX_MEMBER_ID_LEN: usize = 255;

// Safe read helpers that return io::Error instead of panicking on truncated input.

fn safe_get_u8(buf: &mut &[u8]) -> io::Result<u8> {
    if buf.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 1 byte"));
    }
    Ok(buf.get_u8())
}

fn safe_get_u32_le(buf: &mut &[u8]) -> io::Result<u32> {
    if buf.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 4 bytes"));
    }
    Ok(buf.get_u32_le())
}

fn safe_get_u64_le(buf: &mut &[u8]) -> io::Result<u64> {
    if buf.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 8 bytes"));
    }
    Ok(buf.get_u64_le())
}

/// Messages exchanged between configuration gossip peers.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipMessage {
    /// Unsolicited broadcast of the sender's configuration after it changed.
    Push {
        sender: MemberId,
        configuration: ClusterConfiguration,
    },

    /// Periodic anti-entropy: the receiver merges the configuration and
    /// answers with its own.
    Sync {
        sender: MemberId,
        configuration: ClusterConfiguration,
    },

    /// Answer to a `Sync`.
    SyncReply {
        sender: MemberId,
        configuration: ClusterConfiguration,
    },

    /// Bootstrap query for the receiver's current configuration.
    Query { sender: MemberId, request_id: u64 },

    /// Answer to a `Query`: the receiver's configuration, verbatim.
    QueryReply {
        sender: MemberId,
        request_id: u64,
        configuration: ClusterConfiguration,
    },
}

// Wire format constants
const MSG_PUSH: u8 = 1;
const MSG_SYNC: u8 = 2;
const MSG_SYNC_REPLY: u8 = 3;
const MSG_QUERY: u8 = 4;
const MSG_QUERY_REPLY: u8 = 5;

impl GossipMessage {
    /// Returns the member that sent this message.
    pub fn sender(&self) -> &MemberId {
        match self {
            GossipMessage::Push { sender, .. }
            | GossipMessage::Sync { sender, .. }
            | GossipMessage::SyncReply { sender, .. }
            | GossipMessage::Query { sender, .. }
            | GossipMessage::QueryReply { sender, .. } => sender,
        }
    }

    /// Serializes the message to bytes.
    pub fn encode(&self) -> Result<Bytes, ClusterError> {
        let mut buf = BytesMut::with_capacity(256);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Serializes the message into the given buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ClusterError> {
        match self {
            GossipMessage::Push {
                sender,
                configuration,
            } => {
                buf.put_u8(MSG_PUSH);
                encode_member_id(buf, sender)?;
                encode_configuration(buf, configuration)?;
            }
            GossipMessage::Sync {
                sender,
                configuration,
            } => {
                buf.put_u8(MSG_SYNC);
                encode_member_id(buf, sender)?;
                encode_configuration(buf, configuration)?;
            }
            GossipMessage::SyncReply {
                sender,
                configuration,
            } => {
                buf.put_u8(MSG_SYNC_REPLY);
                encode_member_id(buf, sender)?;
                encode_configuration(buf, configuration)?;
            }
            GossipMessage::Query { sender, request_id } => {
                buf.put_u8(MSG_QUERY);
                encode_member_id(buf, sender)?;
                buf.put_u64_le(*request_id);
            }
            GossipMessage::QueryReply {
                sender,
                request_id,
                configuration,
            } => {
                buf.put_u8(MSG_QUERY_REPLY);
                encode_member_id(buf, sender)?;
                buf.put_u64_le(*request_id);
                encode_configuration(buf, configuration)?;
            }
        }
        Ok(())
    }

    /// Deserializes a message from bytes.
    pub fn decode(mut buf: &[u8]) -> io::Result<Self> {
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty message",
            ));
        }

        let msg_type = safe_get_u8(&mut buf)?;
        let sender = decode_member_id(&mut buf)?;
        let msg = match msg_type {
            MSG_PUSH => GossipMessage::Push {
                sender,
                configuration: decode_configuration(&mut buf)?,
            },
            MSG_SYNC => GossipMessage::Sync {
                sender,
                configuration: decode_configuration(&mut buf)?,
            },
            MSG_SYNC_REPLY => GossipMessage::SyncReply {
                sender,
                configuration: decode_configuration(&mut buf)?,
            },
            MSG_QUERY => GossipMessage::Query {
                sender,
                request_id: safe_get_u64_le(&mut buf)?,
            },
            MSG_QUERY_REPLY => {
                let request_id = safe_get_u64_le(&mut buf)?;
                GossipMessage::QueryReply {
                    sender,
                    request_id,
                    configuration: decode_configuration(&mut buf)?,
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown message type: {other}"),
                ))
            }
        };
        if !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after message", buf.len()),
            ));
        }
        Ok(msg)
    }
}

fn encode_member_id(buf: &mut BytesMut, id: &MemberId) -> Result<(), ClusterError> {
    let bytes = id.as_str().as_bytes();
    if bytes.len() > MAX_MEMBER_ID_LEN {
        return Err(ClusterError::Codec(format!(
            "member id is {} bytes, limit is {MAX_MEMBER_ID_LEN}",
            bytes.len()
        )));
    }
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
    Ok(())
}

fn decode_member_id(buf: &mut &[u8]) -> io::Result<MemberId> {
    let len = safe_get_u8(buf)? as usize;
    if buf.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for member id",
        ));
    }
    let id = std::str::from_utf8(&buf[..len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .to_owned();
    buf.advance(len);
    Ok(MemberId::from(id))
}

fn encode_configuration(
    buf: &mut BytesMut,
    configuration: &ClusterConfiguration,
) -> Result<(), ClusterError> {
    let body = codec::encode(configuration)?;
    let len = u32::try_from(body.len())
        .map_err(|_| ClusterError::Codec(format!("body length {} exceeds u32", body.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(&body);
    Ok(())
}

fn decode_configuration(buf: &mut &[u8]) -> io::Result<ClusterConfiguration> {
    let len = safe_get_u32_le(buf)? as usize;
    if len as u64 > codec::MAX_BODY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("configuration length {len} exceeds limit"),
        ));
    }
    if buf.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for configuration",
        ));
    }
    let configuration = codec::decode(&buf[..len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    buf.advance(len);
    Ok(configuration)
}
