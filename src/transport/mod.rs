//! JSON-RPC transport over a duplex byte stream

mod batcher;
mod connection;
mod message;

pub use batcher::BatchPolicy;
pub use connection::{Admission, Connection, ConnectionHandle, MessageHandler};
pub use message::{FrameError, Id, Incoming, Outgoing, RpcError, parse_frame};
