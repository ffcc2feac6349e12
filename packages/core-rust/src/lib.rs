//! `meshlink` core: envelope schema, JSON codec, task payloads, and the error
//! taxonomy shared by every adapter transport.

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{decode, decode_str, encode, encode_line};
pub use error::{DecodeError, ErrorKind, TaskError};
pub use messages::{
    intents, new_trace_id, utc_timestamp, Envelope, Meta, ProtocolVersion, ResponseMeta, TaskCall,
    TaskResponse, TaskStatus, CONTROL_VERSION, KERNEL_TARGET, LEGACY_VERSION,
};
