//! anpx-core — the ANPX wire format and shared configuration types.
//! Every other ANPX crate depends on this one. No networking lives here.

pub mod chunk;
pub mod config;
pub mod message;
pub mod wire;

pub use chunk::ChunkAssembler;
pub use config::{AnpxConfig, AuthConfig, ConfigError, GatewayConfig, ReceiverConfig};
pub use message::{AnpxMessage, HttpMeta, ProtocolError, ResponseMeta};
pub use wire::{MessageType, WireError};
