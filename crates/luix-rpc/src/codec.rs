//! Frame codec
//!
//! Every message travels as a 16-byte header followed by a serializer
//! encoded body:
//!
//! | bytes | field |
//! |-------|-------|
//! | 0..2  | magic `0xF0F0` (big endian) |
//! | 2     | version `1` |
//! | 3     | flags: bit 0 response, bit 1 heartbeat |
//! | 4..12 | request id (big endian) |
//! | 12..16 | body length (big endian) |

use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::serializer::{Serializer, deserialize, serialize};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{AsyncRead, AsyncReadExt};
use luix_registry::Strategies;
use std::io::ErrorKind;
use std::sync::Arc;

/// Name of the default codec
pub const LUIX: &str = "luix";

/// Frame magic number
pub const MAGIC: u16 = 0xF0F0;

/// Frame format version
pub const VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_LEN: usize = 16;

const FLAG_RESPONSE: u8 = 0b01;
const FLAG_HEARTBEAT: u8 = 0b10;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Flag byte
    pub flags: u8,
    /// Request id
    pub request_id: u64,
    /// Declared body length
    pub body_length: u32,
}

impl FrameHeader {
    /// Parse and validate the fixed header at the start of `frame`
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(Error::Decode(format!(
                "frame of {} bytes is shorter than the {} byte header",
                frame.len(),
                HEADER_LEN
            )));
        }
        let mut buf = &frame[..HEADER_LEN];
        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(Error::Decode(format!(
                "magic mismatch: expected {:#06x}, got {:#06x}",
                MAGIC, magic
            )));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(Error::Decode(format!(
                "version mismatch: expected {}, got {}",
                VERSION, version
            )));
        }
        Ok(Self {
            flags: buf.get_u8(),
            request_id: buf.get_u64(),
            body_length: buf.get_u32(),
        })
    }

    /// Whether the frame carries a response
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    /// Whether the frame is a heartbeat
    pub fn is_heartbeat(&self) -> bool {
        self.flags & FLAG_HEARTBEAT != 0
    }
}

/// Converts messages to and from frames
pub trait Codec: Send + Sync {
    /// Strategy name
    fn name(&self) -> &'static str;

    /// Encode a message into one frame
    fn encode(&self, message: &Message, serializer: &dyn Serializer) -> Result<Bytes>;

    /// Decode one complete frame received from `remote`
    fn decode(
        &self,
        remote: &str,
        frame: &[u8],
        serializer: &dyn Serializer,
        max_content_length: usize,
    ) -> Result<Message>;
}

/// Default frame codec
#[derive(Debug, Default, Clone, Copy)]
pub struct LuixCodec;

impl Codec for LuixCodec {
    fn name(&self) -> &'static str {
        LUIX
    }

    fn encode(&self, message: &Message, serializer: &dyn Serializer) -> Result<Bytes> {
        let (flags, body) = match message {
            Message::Request(request) => (0, serialize(serializer, request)?),
            Message::Response(response) => (FLAG_RESPONSE, serialize(serializer, response)?),
            Message::Heartbeat { response, .. } => {
                let flags = if *response {
                    FLAG_HEARTBEAT | FLAG_RESPONSE
                } else {
                    FLAG_HEARTBEAT
                };
                (flags, Vec::new())
            }
        };
        let body_length = u32::try_from(body.len())
            .map_err(|_| Error::Encode(format!("body of {} bytes is too large", body.len())))?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_u16(MAGIC);
        frame.put_u8(VERSION);
        frame.put_u8(flags);
        frame.put_u64(message.request_id());
        frame.put_u32(body_length);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    fn decode(
        &self,
        remote: &str,
        frame: &[u8],
        serializer: &dyn Serializer,
        max_content_length: usize,
    ) -> Result<Message> {
        let header = FrameHeader::parse(frame)?;
        let declared = header.body_length as usize;
        if declared > max_content_length {
            return Err(Error::Decode(format!(
                "body of {} bytes from {} exceeds the {} byte limit",
                declared, remote, max_content_length
            )));
        }
        let body = &frame[HEADER_LEN..];
        if body.len() != declared {
            return Err(Error::Decode(format!(
                "length mismatch from {}: header says {}, got {}",
                remote,
                declared,
                body.len()
            )));
        }

        if header.is_heartbeat() {
            return Ok(Message::Heartbeat {
                request_id: header.request_id,
                response: header.is_response(),
            });
        }

        let message = if header.is_response() {
            Message::Response(deserialize::<Response>(serializer, body)?)
        } else {
            Message::Request(deserialize::<Request>(serializer, body)?)
        };
        if message.request_id() != header.request_id {
            return Err(Error::Decode(format!(
                "request id mismatch from {}: header {}, body {}",
                remote,
                header.request_id,
                message.request_id()
            )));
        }
        Ok(message)
    }
}

/// Built-in codecs
pub fn codecs() -> Strategies<Arc<dyn Codec>> {
    Strategies::new("codec").with(LUIX, || Arc::new(LuixCodec) as Arc<dyn Codec>)
}

/// Read one complete frame from a stream
///
/// Returns `None` on a clean end of stream before any header byte.
pub async fn read_frame<R>(reader: &mut R, max_content_length: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let parsed = FrameHeader::parse(&header)?;
    let body_length = parsed.body_length as usize;
    if body_length > max_content_length {
        return Err(Error::Decode(format!(
            "body of {} bytes exceeds the {} byte limit",
            body_length, max_content_length
        )));
    }

    let mut frame = vec![0u8; HEADER_LEN + body_length];
    frame[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(Some(frame))
}
