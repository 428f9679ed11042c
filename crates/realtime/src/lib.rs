//! nexus-realtime – WebSocket-Transport und Fan-out
//!
//! Dieser Crate implementiert die Echtzeit-Schicht des Messengers: er nimmt
//! TCP-Verbindungen an, fuehrt den WebSocket-Handshake durch, ordnet
//! Verbindungen Identitaeten zu und verteilt Ereignisse an die richtigen
//! Sockets.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (WebSocketServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Handshake -> FrameCodec
//!     |  State Machine: Unauthentifiziert -> Authentifiziert -> Geschlossen
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- AuthHandler     (auth)
//!     +-- MessageHandler  (send_message, edit_message, delete_message)
//!     +-- TypingHandler   (typing)
//!     +-- ReadHandler     (mark_read)
//!
//! ConnectionRegistry   – Identitaet -> Send-Queues, Fan-out
//! PresenceCoordinator  – user_online / user_offline an Kontakte
//! TypingCoordinator    – Tipp-Timer mit periodischem Sweep
//! MessengerStore       – Benutzer, Chats, Nachrichten (extern)
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod server_state;
pub mod store;
pub mod tcp;
pub mod typing;

// Bequeme Re-Exporte
pub use connection::{frame_auswerten, ClientConnection, VerbindungsEreignis, VerbindungsZustand};
pub use dispatcher::MessageDispatcher;
pub use error::{RealtimeError, RealtimeResult};
pub use presence::{PresenceCoordinator, PresenceEvent};
pub use registry::{ClientSender, ConnectionRegistry};
pub use server_state::{RealtimeConfig, RealtimeState};
pub use store::{MemoryStore, MessengerStore};
pub use tcp::WebSocketServer;
pub use typing::{TypingCoordinator, TypingTable};
