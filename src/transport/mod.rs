//! Transport layer: framed JSON-RPC over byte streams.

pub mod codec;

pub use codec::{CodecHandle, JsonRpcCodec, ProtocolDebugSink};
