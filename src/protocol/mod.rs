//! JSON-RPC 2.0 message codec and error taxonomy.

pub mod error;
pub mod message;

pub use error::{ErrorCode, RpcError};
pub use message::{
    Message, MessageError, Notification, Request, RequestId, Response, ResponsePayload,
    JSONRPC_VERSION,
};
