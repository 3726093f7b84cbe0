use std::io;

use bytes::{Buf as _, BytesMut};
use rmpv::Value;
use tokio_util::codec::Decoder;

use super::{Frame, Header, keys};

const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Decodes length prefixed IPROTO frames (requests as well as responses).
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((prefix_len, frame_len)) = peek_length(src)? else {
            return Ok(None);
        };

        if frame_len > self.max_frame_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame of {frame_len} bytes exceeds limit of {} bytes",
                    self.max_frame_len
                ),
            ));
        }

        let total = prefix_len + frame_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let frame = src.split_to(frame_len);
        decode_frame(&frame).map(Some)
    }
}

/// Returns the size of the length prefix and the frame length it announces,
/// or `None` if the prefix itself is not complete yet.
fn peek_length(src: &[u8]) -> io::Result<Option<(usize, usize)>> {
    let Some(&marker) = src.first() else {
        return Ok(None);
    };

    let width = match marker {
        0x00..=0x7f => return Ok(Some((1, marker as usize))),
        0xcc => 1,
        0xcd => 2,
        0xce => 4,
        0xcf => 8,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame length marker: {other:#04x}"),
            ));
        }
    };

    let Some(raw) = src.get(1..1 + width) else {
        return Ok(None);
    };
    let len = raw.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame length overflow"))?;

    Ok(Some((1 + width, len)))
}

fn decode_frame(mut buf: &[u8]) -> io::Result<Frame> {
    let header = rmpv::decode::read_value(&mut buf).map_err(invalid_data)?;
    let header = decode_header(&header)?;

    // a body is optional, e.g. for ping responses of older servers
    let body = if buf.is_empty() {
        Value::Map(Vec::new())
    } else {
        rmpv::decode::read_value(&mut buf).map_err(invalid_data)?
    };

    Ok(Frame { header, body })
}

fn decode_header(value: &Value) -> io::Result<Header> {
    let Value::Map(entries) = value else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame header is not a map",
        ));
    };

    let mut code = None;
    let mut sync = 0;
    let mut schema_version = None;

    for (key, value) in entries {
        match key.as_u64().and_then(|k| u8::try_from(k).ok()) {
            Some(keys::REQUEST_TYPE) => code = value.as_u64(),
            Some(keys::SYNC) => sync = value.as_u64().unwrap_or_default(),
            Some(keys::SCHEMA_VERSION) => schema_version = value.as_u64(),
            _ => (),
        }
    }

    let code = code.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "frame header misses the request type / response code",
        )
    })?;

    Ok(Header {
        code,
        sync,
        schema_version,
    })
}

fn invalid_data(err: rmpv::decode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
