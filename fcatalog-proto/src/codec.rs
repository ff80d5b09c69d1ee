//! Primitive field encodings used inside a frame body: `uint32`, length-prefixed
//! `string` and length-prefixed `blob`. All fields are big-endian.
//!
//! Decoders operate on an already-buffered slice (a frame body, see [`crate::frame`])
//! and return `(consumed_len, value)`, mirroring how the original implementation's
//! deserializers sliced the remaining payload after each field.

use thiserror::Error;

pub const U32_LEN: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated field: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

pub type CodecResult<T> = Result<T, CodecError>;

pub fn encode_u32(v: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn decode_u32(buf: &[u8]) -> CodecResult<(usize, u32)> {
    if buf.len() < U32_LEN {
        return Err(CodecError::Truncated {
            need: U32_LEN,
            have: buf.len(),
        });
    }
    let v = u32::from_be_bytes(buf[..U32_LEN].try_into().unwrap());
    Ok((U32_LEN, v))
}

pub fn encode_blob(data: &[u8], out: &mut Vec<u8>) {
    encode_u32(data.len() as u32, out);
    out.extend_from_slice(data);
}

pub fn decode_blob(buf: &[u8]) -> CodecResult<(usize, Vec<u8>)> {
    let (hdr_len, len) = decode_u32(buf)?;
    let len = len as usize;
    let total = hdr_len + len;
    if buf.len() < total {
        return Err(CodecError::Truncated {
            need: total,
            have: buf.len(),
        });
    }
    Ok((total, buf[hdr_len..total].to_vec()))
}

pub fn encode_string(s: &str, out: &mut Vec<u8>) {
    encode_blob(s.as_bytes(), out)
}

pub fn decode_string(buf: &[u8]) -> CodecResult<(usize, String)> {
    let (consumed, bytes) = decode_blob(buf)?;
    let s = String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
    Ok((consumed, s))
}
