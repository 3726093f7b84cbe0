//! The subset of the Tarantool IPROTO binary protocol needed to benchmark
//! stored function calls: the connection greeting, `AUTH`, `CALL` and `PING`.
//!
//! Every frame on the wire is a MessagePack unsigned integer holding the
//! frame length, followed by a header map and a body map, both keyed by
//! small integers (see [`keys`]).

use std::io;

use bytes::Bytes;
use rmp::encode::{self as mp, ValueWriteError};
use rmpv::Value;

pub mod auth;
pub mod greeting;

mod codec;

pub use self::{codec::FrameCodec, greeting::Greeting};

/// Size of the greeting a server sends right after accepting a connection.
pub const GREETING_SIZE: usize = 128;

/// Requests always use the 5 byte (`0xce` + u32) length prefix.
const REQUEST_LENGTH_PREFIX: [u8; 5] = [0xce, 0, 0, 0, 0];

/// Header and body map keys.
pub mod keys {
    pub const REQUEST_TYPE: u8 = 0x00;
    pub const SYNC: u8 = 0x01;
    pub const SCHEMA_VERSION: u8 = 0x05;
    pub const TUPLE: u8 = 0x21;
    pub const FUNCTION_NAME: u8 = 0x22;
    pub const USER_NAME: u8 = 0x23;
    pub const DATA: u8 = 0x30;
    pub const ERROR: u8 = 0x31;
}

/// Server error codes produced by the mock endpoint.
pub mod errcode {
    pub const ER_PROC_LUA: u32 = 32;
    pub const ER_UNKNOWN_REQUEST_TYPE: u32 = 48;
}

/// Response code of a successful request.
pub const RESPONSE_OK: u64 = 0x00;

/// Set on the response code of every error response,
/// the low bits carry the server error code.
pub const RESPONSE_ERROR_BIT: u64 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Auth,
    Call,
    Ping,
}

impl RequestType {
    pub const fn code(self) -> u64 {
        match self {
            Self::Auth => 0x07,
            Self::Call => 0x0a,
            Self::Ping => 0x40,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x07 => Some(Self::Auth),
            0x0a => Some(Self::Call),
            0x40 => Some(Self::Ping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Request type for requests, response code for responses.
    pub code: u64,
    pub sync: u64,
    pub schema_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub body: Value,
}

impl Frame {
    pub fn body_field(&self, key: u8) -> Option<&Value> {
        let Value::Map(entries) = &self.body else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| k.as_u64() == Some(key as u64))
            .map(|(_, v)| v)
    }

    pub fn is_error(&self) -> bool {
        self.header.code & RESPONSE_ERROR_BIT != 0
    }

    /// Server error code and message, `None` for a successful response.
    pub fn error(&self) -> Option<(u32, String)> {
        if !self.is_error() {
            return None;
        }
        let code = (self.header.code & !RESPONSE_ERROR_BIT) as u32;
        let message = self
            .body_field(keys::ERROR)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        Some((code, message))
    }
}

pub fn encode_call(sync: u64, function: &str, args: &[String]) -> io::Result<Bytes> {
    encode_frame(RequestType::Call.code(), sync, 2, |buf| {
        mp::write_uint(buf, keys::FUNCTION_NAME as u64)?;
        mp::write_str(buf, function)?;
        mp::write_uint(buf, keys::TUPLE as u64)?;
        mp::write_array_len(buf, array_len(args.len())?)?;
        for arg in args {
            mp::write_str(buf, arg)?;
        }
        Ok(())
    })
}

pub fn encode_auth(sync: u64, user: &str, scramble: &[u8]) -> io::Result<Bytes> {
    encode_frame(RequestType::Auth.code(), sync, 2, |buf| {
        mp::write_uint(buf, keys::USER_NAME as u64)?;
        mp::write_str(buf, user)?;
        mp::write_uint(buf, keys::TUPLE as u64)?;
        mp::write_array_len(buf, 2)?;
        mp::write_str(buf, auth::CHAP_SHA1)?;
        // the scramble travels as a (non utf-8) string, not as binary
        mp::write_str_len(buf, array_len(scramble.len())?)?;
        buf.extend_from_slice(scramble);
        Ok(())
    })
}

/// Successful response carrying an empty data array.
pub fn encode_ok(sync: u64) -> io::Result<Bytes> {
    encode_frame(RESPONSE_OK, sync, 1, |buf| {
        mp::write_uint(buf, keys::DATA as u64)?;
        mp::write_array_len(buf, 0)?;
        Ok(())
    })
}

pub fn encode_error(sync: u64, code: u32, message: &str) -> io::Result<Bytes> {
    encode_frame(RESPONSE_ERROR_BIT | code as u64, sync, 1, |buf| {
        mp::write_uint(buf, keys::ERROR as u64)?;
        mp::write_str(buf, message)?;
        Ok(())
    })
}

fn encode_frame<F>(code: u64, sync: u64, body_len: u32, body: F) -> io::Result<Bytes>
where
    F: FnOnce(&mut Vec<u8>) -> Result<(), ValueWriteError>,
{
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&REQUEST_LENGTH_PREFIX);

    write_header(&mut buf, code, sync, body_len).map_err(io::Error::other)?;
    body(&mut buf).map_err(io::Error::other)?;

    let len = u32::try_from(buf.len() - REQUEST_LENGTH_PREFIX.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    buf[1..REQUEST_LENGTH_PREFIX.len()].copy_from_slice(&len.to_be_bytes());

    Ok(Bytes::from(buf))
}

/// Writes the header map followed by the length of the body map.
fn write_header(
    buf: &mut Vec<u8>,
    code: u64,
    sync: u64,
    body_len: u32,
) -> Result<(), ValueWriteError> {
    mp::write_map_len(buf, 2)?;
    mp::write_uint(buf, keys::REQUEST_TYPE as u64)?;
    mp::write_uint(buf, code)?;
    mp::write_uint(buf, keys::SYNC as u64)?;
    mp::write_uint(buf, sync)?;
    mp::write_map_len(buf, body_len)?;
    Ok(())
}

fn array_len(len: usize) -> Result<u32, ValueWriteError> {
    u32::try_from(len).map_err(|_| {
        ValueWriteError::InvalidDataWrite(io::Error::new(
            io::ErrorKind::InvalidInput,
            "length exceeds u32",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_frame_layout() {
        let frame = encode_call(7, "bench_func", &["aa".to_owned(), "aa".to_owned()]).unwrap();

        assert_eq!(frame[0], 0xce);
        let len = u32::from_be_bytes(frame[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 5);

        let mut rest = &frame[5..];
        let header = rmpv::decode::read_value(&mut rest).unwrap();
        let body = rmpv::decode::read_value(&mut rest).unwrap();
        assert!(rest.is_empty());

        assert_eq!(
            header,
            Value::Map(vec![
                (Value::from(keys::REQUEST_TYPE), Value::from(0x0a_u64)),
                (Value::from(keys::SYNC), Value::from(7_u64)),
            ])
        );
        assert_eq!(
            body,
            Value::Map(vec![
                (Value::from(keys::FUNCTION_NAME), Value::from("bench_func")),
                (
                    Value::from(keys::TUPLE),
                    Value::Array(vec![Value::from("aa"), Value::from("aa")])
                ),
            ])
        );
    }

    #[test]
    fn call_frame_with_empty_args() {
        let frame = encode_call(1, "f", &[]).unwrap();
        let mut rest = &frame[5..];
        let _header = rmpv::decode::read_value(&mut rest).unwrap();
        let body = rmpv::decode::read_value(&mut rest).unwrap();
        let Value::Map(entries) = body else {
            panic!("body is not a map")
        };
        assert_eq!(entries[1].1, Value::Array(vec![]));
    }

    #[test]
    fn request_type_codes() {
        for ty in [RequestType::Auth, RequestType::Call, RequestType::Ping] {
            assert_eq!(RequestType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(RequestType::from_code(0x01), None);
    }
}
