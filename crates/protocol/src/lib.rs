//! nexus-protocol – Netzwerkprotokoll-Definitionen
//!
//! - `wire`: WebSocket-Frame-Codec (RFC 6455) fuer `tokio_util::codec::Framed`
//! - `handshake`: HTTP-Upgrade und Accept-Token
//! - `events`: JSON-Anwendungsnachrichten zwischen Client und Server

pub mod events;
pub mod handshake;
pub mod wire;

pub use events::{ClientMessage, NachrichtInfo, ServerEvent};
pub use handshake::{accept_token, handshake_durchfuehren, HandshakeError};
pub use wire::{Frame, FrameCodec, OpCode};
