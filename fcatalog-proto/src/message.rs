//! Tagged message types and the type-id dispatch table.
//!
//! Each message is modeled as a fixed-shape variant rather than the original's
//! stringly field-name map. [`Incoming`] covers messages a client sends;
//! [`Outgoing`] covers responses a server sends back. Both directions are
//! encodable and decodable here (even though any one connection only ever
//! needs one direction per type) so the wire format has a single definition
//! shared by the server and by test fixtures that act as a client.

use thiserror::Error;

use crate::codec::{self, CodecError};

pub const TYPE_CHOOSE_DB: u8 = 0;
pub const TYPE_ADD_FUNCTION: u8 = 1;
pub const TYPE_REQUEST_SIMILARS: u8 = 2;
pub const TYPE_RESPONSE_SIMILARS: u8 = 3;
pub const TYPE_ADD_STRUCTURE: u8 = 4;
pub const TYPE_REQUEST_STRUCT_NAMES: u8 = 5;
pub const TYPE_RESPONSE_STRUCT_NAMES: u8 = 6;
pub const TYPE_REQUEST_STRUCT: u8 = 7;
pub const TYPE_RESPONSE_STRUCT: u8 = 8;
pub const TYPE_SYN: u8 = 9;
pub const TYPE_ACK: u8 = 10;
pub const TYPE_REQUEST_FUNC_NAMES: u8 = 11;
pub const TYPE_RESPONSE_FUNC_NAMES: u8 = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageError {
    #[error("frame body is empty; missing type byte")]
    MissingTypeByte,
    #[error("unknown message type id {0}")]
    UnknownType(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("AddStructure payload has no NUL name terminator")]
    MissingNulTerminator,
    #[error("structure name is not ASCII")]
    NonAsciiStructName,
}

pub type MessageResult<T> = Result<T, MessageError>;

/// One similarity result as carried on the wire: the original name/comment/grade,
/// not the full `DBSimilar` row (hash and signature stay server-side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSimilar {
    pub name: String,
    pub comment: String,
    pub grade: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    ChooseDb {
        db_name: String,
    },
    AddFunction {
        func_name: String,
        func_comment: String,
        func_data: Vec<u8>,
    },
    RequestSimilars {
        func_data: Vec<u8>,
        num_similars: u32,
    },
    /// NUL-delimited legacy framing: `struct_name` as ASCII bytes up to
    /// the first NUL, then the raw dump to the end of the frame. Every other
    /// message uses the standard length-prefixed primitives; this one doesn't,
    /// on purpose, preserved from the original protocol as-is.
    AddStructure {
        struct_name: String,
        struct_dump: Vec<u8>,
    },
    RequestStructNames,
    RequestStruct {
        struct_name: String,
    },
    Syn,
    RequestFuncNames,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    ResponseSimilars(Vec<WireSimilar>),
    ResponseStructNames(Vec<String>),
    /// Raw dump bytes, no length prefix; empty on not-found (see DESIGN.md).
    ResponseStruct(Vec<u8>),
    Ack,
    ResponseFuncNames(Vec<String>),
}

impl Incoming {
    pub fn type_id(&self) -> u8 {
        match self {
            Incoming::ChooseDb { .. } => TYPE_CHOOSE_DB,
            Incoming::AddFunction { .. } => TYPE_ADD_FUNCTION,
            Incoming::RequestSimilars { .. } => TYPE_REQUEST_SIMILARS,
            Incoming::AddStructure { .. } => TYPE_ADD_STRUCTURE,
            Incoming::RequestStructNames => TYPE_REQUEST_STRUCT_NAMES,
            Incoming::RequestStruct { .. } => TYPE_REQUEST_STRUCT,
            Incoming::Syn => TYPE_SYN,
            Incoming::RequestFuncNames => TYPE_REQUEST_FUNC_NAMES,
        }
    }

    /// Encodes the full frame body (type byte + payload).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.type_id()];
        match self {
            Incoming::ChooseDb { db_name } => codec::encode_string(db_name, &mut out),
            Incoming::AddFunction {
                func_name,
                func_comment,
                func_data,
            } => {
                codec::encode_string(func_name, &mut out);
                codec::encode_string(func_comment, &mut out);
                codec::encode_blob(func_data, &mut out);
            }
            Incoming::RequestSimilars {
                func_data,
                num_similars,
            } => {
                codec::encode_blob(func_data, &mut out);
                codec::encode_u32(*num_similars, &mut out);
            }
            Incoming::AddStructure {
                struct_name,
                struct_dump,
            } => {
                out.extend_from_slice(struct_name.as_bytes());
                out.push(0);
                out.extend_from_slice(struct_dump);
            }
            Incoming::RequestStructNames | Incoming::Syn | Incoming::RequestFuncNames => {}
            Incoming::RequestStruct { struct_name } => codec::encode_string(struct_name, &mut out),
        }
        out
    }

    /// Decodes a frame body (type byte + payload) into a typed request.
    pub fn decode(body: &[u8]) -> MessageResult<Self> {
        let (&type_id, payload) = body.split_first().ok_or(MessageError::MissingTypeByte)?;
        Ok(match type_id {
            TYPE_CHOOSE_DB => {
                let (_, db_name) = codec::decode_string(payload)?;
                Incoming::ChooseDb { db_name }
            }
            TYPE_ADD_FUNCTION => {
                let (n1, func_name) = codec::decode_string(payload)?;
                let (n2, func_comment) = codec::decode_string(&payload[n1..])?;
                let (_, func_data) = codec::decode_blob(&payload[n1 + n2..])?;
                Incoming::AddFunction {
                    func_name,
                    func_comment,
                    func_data,
                }
            }
            TYPE_REQUEST_SIMILARS => {
                let (n1, func_data) = codec::decode_blob(payload)?;
                let (_, num_similars) = codec::decode_u32(&payload[n1..])?;
                Incoming::RequestSimilars {
                    func_data,
                    num_similars,
                }
            }
            TYPE_ADD_STRUCTURE => {
                let nul_at = payload
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(MessageError::MissingNulTerminator)?;
                let name_bytes = &payload[..nul_at];
                if !name_bytes.is_ascii() {
                    return Err(MessageError::NonAsciiStructName);
                }
                let struct_name = String::from_utf8(name_bytes.to_vec()).unwrap();
                let struct_dump = payload[nul_at + 1..].to_vec();
                Incoming::AddStructure {
                    struct_name,
                    struct_dump,
                }
            }
            TYPE_REQUEST_STRUCT_NAMES => Incoming::RequestStructNames,
            TYPE_REQUEST_STRUCT => {
                let (_, struct_name) = codec::decode_string(payload)?;
                Incoming::RequestStruct { struct_name }
            }
            TYPE_SYN => Incoming::Syn,
            TYPE_REQUEST_FUNC_NAMES => Incoming::RequestFuncNames,
            other => return Err(MessageError::UnknownType(other)),
        })
    }
}

impl Outgoing {
    pub fn type_id(&self) -> u8 {
        match self {
            Outgoing::ResponseSimilars(_) => TYPE_RESPONSE_SIMILARS,
            Outgoing::ResponseStructNames(_) => TYPE_RESPONSE_STRUCT_NAMES,
            Outgoing::ResponseStruct(_) => TYPE_RESPONSE_STRUCT,
            Outgoing::Ack => TYPE_ACK,
            Outgoing::ResponseFuncNames(_) => TYPE_RESPONSE_FUNC_NAMES,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.type_id()];
        match self {
            Outgoing::ResponseSimilars(sims) => {
                codec::encode_u32(sims.len() as u32, &mut out);
                for sim in sims {
                    codec::encode_string(&sim.name, &mut out);
                    codec::encode_string(&sim.comment, &mut out);
                    codec::encode_u32(sim.grade, &mut out);
                }
            }
            Outgoing::ResponseStructNames(names) | Outgoing::ResponseFuncNames(names) => {
                out.extend_from_slice(encode_name_list(names).as_slice());
            }
            Outgoing::ResponseStruct(dump) => out.extend_from_slice(dump),
            Outgoing::Ack => {}
        }
        out
    }

    pub fn decode(body: &[u8]) -> MessageResult<Self> {
        let (&type_id, payload) = body.split_first().ok_or(MessageError::MissingTypeByte)?;
        Ok(match type_id {
            TYPE_RESPONSE_SIMILARS => {
                let (mut offset, count) = codec::decode_u32(payload)?;
                let mut sims = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (n1, name) = codec::decode_string(&payload[offset..])?;
                    offset += n1;
                    let (n2, comment) = codec::decode_string(&payload[offset..])?;
                    offset += n2;
                    let (n3, grade) = codec::decode_u32(&payload[offset..])?;
                    offset += n3;
                    sims.push(WireSimilar {
                        name,
                        comment,
                        grade,
                    });
                }
                Outgoing::ResponseSimilars(sims)
            }
            TYPE_RESPONSE_STRUCT_NAMES => Outgoing::ResponseStructNames(decode_name_list(payload)),
            TYPE_RESPONSE_FUNC_NAMES => Outgoing::ResponseFuncNames(decode_name_list(payload)),
            TYPE_RESPONSE_STRUCT => Outgoing::ResponseStruct(payload.to_vec()),
            TYPE_ACK => Outgoing::Ack,
            other => return Err(MessageError::UnknownType(other)),
        })
    }
}

/// NUL-joined ASCII names, no trailing NUL, no length prefix.
fn encode_name_list(names: &[String]) -> Vec<u8> {
    names
        .iter()
        .map(|n| n.as_bytes())
        .collect::<Vec<_>>()
        .join(&0u8)
}

fn decode_name_list(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}
