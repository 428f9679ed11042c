//! Handler fuer alle Client-Nachrichten
//!
//! Jeder Handler ist fuer einen bestimmten Nachrichtentyp zustaendig
//! und hat Zugriff auf den gemeinsamen RealtimeState.

pub mod auth_handler;
pub mod message_handler;
pub mod read_handler;
pub mod typing_handler;
