//! Anwendungsnachrichten (JSON in WebSocket-Textframes)
//!
//! ## Design
//! - Jede Nachricht ist ein JSON-Objekt mit einem `type`-Feld
//! - Tagged Enums via serde fuer typsichere Nachrichtentypen
//! - Feldnamen in snake_case, IDs als nackte Zahlen
//!
//! Client -> Server: [`ClientMessage`]. Server -> Client: [`ServerEvent`].

use nexus_core::types::{ChatId, MessageId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Nachrichten-Datensatz
// ---------------------------------------------------------------------------

/// Eine Chat-Nachricht wie sie an Clients ausgeliefert wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NachrichtInfo {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    /// Anzeigename des Absenders zum Sendezeitpunkt
    pub display_name: String,
    pub content: String,
    /// Unix-Timestamp in Sekunden
    pub created_at: i64,
    /// Unix-Timestamp der letzten Bearbeitung
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(default)]
    pub read_count: u32,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Eingehende Nachricht eines Clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Verbindung mit einem Bearer-Token authentifizieren
    Auth { token: String },

    /// Neue Nachricht in einem Chat
    SendMessage {
        chat_id: ChatId,
        content: String,
        /// Vom Client vergebene Korrelations-ID, wird unveraendert zurueckgegeben
        #[serde(default)]
        temp_id: Option<serde_json::Value>,
    },

    /// Eigene Nachricht bearbeiten
    EditMessage {
        message_id: MessageId,
        content: String,
    },

    /// Eigene Nachricht loeschen
    DeleteMessage { message_id: MessageId },

    /// Tipp-Signal (wird vom Client periodisch wiederholt)
    Typing { chat_id: ChatId },

    /// Alle ungelesenen Nachrichten eines Chats als gelesen markieren
    MarkRead { chat_id: ChatId },
}

impl ClientMessage {
    /// Parst einen Textframe-Payload
    pub fn parsen(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Kurzname des Nachrichtentyps (fuer Logging)
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::Typing { .. } => "typing",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Ausgehendes Ereignis an einen oder mehrere Clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authentifizierung erfolgreich
    AuthOk { user_id: UserId },

    /// Authentifizierung fehlgeschlagen (Verbindung bleibt offen)
    AuthFail { error: String },

    /// Bestaetigung an alle Geraete des Absenders
    MessageSent {
        temp_id: Option<serde_json::Value>,
        message: NachrichtInfo,
    },

    /// Neue Nachricht fuer die uebrigen Chat-Mitglieder
    NewMessage { message: NachrichtInfo },

    MessageEdited { message: NachrichtInfo },

    MessageDeleted {
        chat_id: ChatId,
        message_id: MessageId,
    },

    /// Ein Mitglied hat begonnen zu tippen
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        name: String,
    },

    /// Tipp-Timer ist abgelaufen
    StopTyping { chat_id: ChatId, user_id: UserId },

    /// Ein Mitglied hat Nachrichten gelesen
    MessagesRead {
        chat_id: ChatId,
        user_id: UserId,
        ids: Vec<MessageId>,
    },

    /// Ein Kontakt ist online gegangen (erste Verbindung)
    UserOnline { user_id: UserId },

    /// Ein Kontakt ist offline gegangen (letzte Verbindung getrennt)
    UserOffline { user_id: UserId, last_seen: i64 },
}

impl ServerEvent {
    /// Serialisiert das Ereignis als JSON-Text fuer einen Textframe
    pub fn zu_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Kurzname des Ereignistyps (fuer Logging)
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::AuthOk { .. } => "auth_ok",
            Self::AuthFail { .. } => "auth_fail",
            Self::MessageSent { .. } => "message_sent",
            Self::NewMessage { .. } => "new_message",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::MessagesRead { .. } => "messages_read",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_nachricht() -> NachrichtInfo {
        NachrichtInfo {
            id: MessageId(10),
            chat_id: ChatId(2),
            sender_id: UserId(1),
            display_name: "Alice".into(),
            content: "Hallo".into(),
            created_at: 1_700_000_000,
            edited_at: None,
            read_count: 0,
        }
    }

    #[test]
    fn auth_parsen() {
        let msg = ClientMessage::parsen(r#"{"type":"auth","token":"abc"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Auth { token: "abc".into() });
        assert_eq!(msg.typ_name(), "auth");
    }

    #[test]
    fn send_message_mit_und_ohne_temp_id() {
        let msg =
            ClientMessage::parsen(r#"{"type":"send_message","chat_id":2,"content":"hi","temp_id":"t-1"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendMessage {
                chat_id: ChatId(2),
                content: "hi".into(),
                temp_id: Some(json!("t-1")),
            }
        );

        let msg = ClientMessage::parsen(r#"{"type":"send_message","chat_id":2,"content":"hi"}"#)
            .unwrap();
        assert!(matches!(msg, ClientMessage::SendMessage { temp_id: None, .. }));
    }

    #[test]
    fn unbekannter_typ_ist_fehler() {
        assert!(ClientMessage::parsen(r#"{"type":"upload","x":1}"#).is_err());
        assert!(ClientMessage::parsen("kein json").is_err());
        assert!(ClientMessage::parsen(r#"{"type":"typing"}"#).is_err());
    }

    #[test]
    fn server_events_haben_type_feld() {
        let json: serde_json::Value = serde_json::from_str(
            &ServerEvent::AuthOk { user_id: UserId(5) }.zu_json().unwrap(),
        )
        .unwrap();
        assert_eq!(json, json!({"type": "auth_ok", "user_id": 5}));

        let json: serde_json::Value = serde_json::from_str(
            &ServerEvent::UserOffline {
                user_id: UserId(5),
                last_seen: 1234,
            }
            .zu_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "user_offline", "user_id": 5, "last_seen": 1234})
        );
    }

    #[test]
    fn new_message_format() {
        let json: serde_json::Value = serde_json::from_str(
            &ServerEvent::NewMessage {
                message: test_nachricht(),
            }
            .zu_json()
            .unwrap(),
        )
        .unwrap();

        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message"]["id"], 10);
        assert_eq!(json["message"]["chat_id"], 2);
        assert_eq!(json["message"]["content"], "Hallo");
        assert!(json["message"].get("edited_at").is_none());
    }

    #[test]
    fn typ_namen_stimmen_mit_serialisierung_ueberein() {
        let events = vec![
            ServerEvent::AuthFail {
                error: "Invalid token".into(),
            },
            ServerEvent::MessageSent {
                temp_id: None,
                message: test_nachricht(),
            },
            ServerEvent::MessageDeleted {
                chat_id: ChatId(1),
                message_id: MessageId(2),
            },
            ServerEvent::StopTyping {
                chat_id: ChatId(1),
                user_id: UserId(2),
            },
            ServerEvent::MessagesRead {
                chat_id: ChatId(1),
                user_id: UserId(2),
                ids: vec![MessageId(3)],
            },
        ];

        for event in events {
            let json: serde_json::Value = serde_json::from_str(&event.zu_json().unwrap()).unwrap();
            assert_eq!(json["type"], event.typ_name());
        }
    }
}
