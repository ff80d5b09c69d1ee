//! Wire framing and message codec shared between the catalog server and its
//! clients: a length-prefixed frame layer, field primitives, and the typed
//! request/response messages built on top of them.

pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{CodecError, CodecResult};
pub use frame::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
pub use message::{
    Incoming, MessageError, MessageResult, Outgoing, WireSimilar, TYPE_ACK, TYPE_ADD_FUNCTION,
    TYPE_ADD_STRUCTURE, TYPE_CHOOSE_DB, TYPE_REQUEST_FUNC_NAMES, TYPE_REQUEST_SIMILARS,
    TYPE_REQUEST_STRUCT, TYPE_REQUEST_STRUCT_NAMES, TYPE_RESPONSE_FUNC_NAMES,
    TYPE_RESPONSE_SIMILARS, TYPE_RESPONSE_STRUCT, TYPE_RESPONSE_STRUCT_NAMES, TYPE_SYN,
};
