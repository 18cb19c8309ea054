//! Binary encoding of [`Message`]s.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::CodecError;

use super::message::{Message, Value};

/// Size of the frame length prefix.
pub const HEADER_SIZE: usize = 4;

/// Size of a field header: type, name length and data length.
const FIELD_HEADER_SIZE: usize = 6;

const TYPE_MAP: u8 = 1;
const TYPE_S64: u8 = 2;
const TYPE_STR: u8 = 3;
const TYPE_BIN: u8 = 4;
const TYPE_LIST: u8 = 5;

/// Encode a message into a complete frame, length prefix included.
pub fn encode_frame(message: &Message) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u32(0);
    encode_body(message, &mut buf)?;

    let body_len = buf.len() - HEADER_SIZE;
    let body_len = u32::try_from(body_len)
        .map_err(|_| CodecError::FrameTooLarge(body_len, u32::MAX as usize))?;
    buf[..HEADER_SIZE].copy_from_slice(&body_len.to_be_bytes());
    Ok(buf.freeze())
}

/// Append the fields of a message to `buf`.
pub fn encode_body(message: &Message, buf: &mut BytesMut) -> Result<(), CodecError> {
    for (name, value) in message.iter() {
        encode_field(buf, name, value)?;
    }
    Ok(())
}

fn encode_field(buf: &mut BytesMut, name: &str, value: &Value) -> Result<(), CodecError> {
    let name_len = u8::try_from(name.len()).map_err(|_| CodecError::NameTooLong(name.to_owned()))?;

    let (field_type, payload) = match value {
        Value::Integer(v) => (TYPE_S64, encode_s64(*v)),
        Value::String(s) => (TYPE_STR, Bytes::copy_from_slice(s.as_bytes())),
        Value::Binary(b) => (TYPE_BIN, b.clone()),
        Value::Message(m) => {
            let mut nested = BytesMut::new();
            encode_body(m, &mut nested)?;
            (TYPE_MAP, nested.freeze())
        }
        Value::List(items) => {
            let mut nested = BytesMut::new();
            for item in items {
                encode_field(&mut nested, "", item)?;
            }
            (TYPE_LIST, nested.freeze())
        }
    };

    let payload_len =
        u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(name.to_owned()))?;

    buf.reserve(FIELD_HEADER_SIZE + name.len() + payload.len());
    buf.put_u8(field_type);
    buf.put_u8(name_len);
    buf.put_u32(payload_len);
    buf.put_slice(name.as_bytes());
    buf.put_slice(&payload);
    Ok(())
}

// little-endian with high zero bytes dropped, so zero takes no bytes at all
// and negative numbers always take eight
fn encode_s64(value: i64) -> Bytes {
    let mut remaining = value as u64;
    let mut out = BytesMut::with_capacity(8);
    while remaining != 0 {
        out.put_u8(remaining as u8);
        remaining >>= 8;
    }
    out.freeze()
}

fn decode_s64(name: &str, data: &[u8]) -> Result<i64, CodecError> {
    if data.len() > 8 {
        return Err(CodecError::IntegerTooLong(name.to_owned()));
    }
    let value = data
        .iter()
        .enumerate()
        .fold(0u64, |acc, (idx, byte)| acc | (u64::from(*byte) << (8 * idx)));
    Ok(value as i64)
}

/// Decode a frame body (everything after the length prefix).
pub fn decode_body(data: &[u8]) -> Result<Message, CodecError> {
    let mut message = Message::new();
    let mut buf = Bytes::copy_from_slice(data);
    while buf.has_remaining() {
        let (name, value) = decode_field(&mut buf)?;
        message.put(name, value);
    }
    Ok(message)
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` does not hold a complete frame yet,
/// otherwise the message and the number of bytes it occupied.
pub fn decode_frame(buf: &[u8], max_len: usize) -> Result<Option<(Message, usize)>, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_len {
        return Err(CodecError::FrameTooLarge(len, max_len));
    }
    if buf.len() < HEADER_SIZE + len {
        return Ok(None);
    }
    let message = decode_body(&buf[HEADER_SIZE..HEADER_SIZE + len])?;
    Ok(Some((message, HEADER_SIZE + len)))
}

fn decode_field(buf: &mut Bytes) -> Result<(String, Value), CodecError> {
    ensure_remaining(buf, FIELD_HEADER_SIZE)?;
    let field_type = buf.get_u8();
    let name_len = buf.get_u8() as usize;
    let data_len = buf.get_u32() as usize;

    ensure_remaining(buf, name_len + data_len)?;
    let name_bytes = buf.split_to(name_len);
    let name = String::from_utf8(name_bytes.to_vec())
        .map_err(|_| CodecError::InvalidString(String::from_utf8_lossy(&name_bytes).into_owned()))?;
    let mut data = buf.split_to(data_len);

    let value = match field_type {
        TYPE_S64 => Value::Integer(decode_s64(&name, &data)?),
        TYPE_STR => {
            let s = String::from_utf8(data.to_vec())
                .map_err(|_| CodecError::InvalidString(name.clone()))?;
            Value::String(s)
        }
        TYPE_BIN => Value::Binary(data),
        TYPE_MAP => {
            let mut nested = Message::new();
            while data.has_remaining() {
                let (key, value) = decode_field(&mut data)?;
                nested.put(key, value);
            }
            Value::Message(nested)
        }
        TYPE_LIST => {
            let mut items = Vec::new();
            while data.has_remaining() {
                let (_, value) = decode_field(&mut data)?;
                items.push(value);
            }
            Value::List(items)
        }
        other => return Err(CodecError::UnknownType(other)),
    };

    Ok((name, value))
}

fn ensure_remaining(buf: &Bytes, expected: usize) -> Result<(), CodecError> {
    if buf.remaining() < expected {
        return Err(CodecError::Incomplete {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}
