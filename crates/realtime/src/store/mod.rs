//! Schnittstelle zu den externen Kollaborateuren
//!
//! Benutzer- und Nachrichtenspeicher liegen ausserhalb des Realtime-Layers.
//! Der Layer kennt sie nur ueber den `MessengerStore`-Trait. `MemoryStore`
//! ist eine fluechtige Referenzimplementierung fuer Server-Binary und Tests.

pub mod memory;

pub use memory::MemoryStore;

use nexus_core::{
    error::Result,
    types::{ChatId, MessageId, UserId},
};
use nexus_protocol::NachrichtInfo;

/// Zugriff auf Benutzer, Chats und Nachrichten
///
/// Alle Methoden duerfen suspendieren. Fehler werden vom Aufrufer
/// protokolliert, die ausloesende Nachricht wird verworfen.
#[allow(async_fn_in_trait)]
pub trait MessengerStore: Send + Sync {
    /// Loest ein Bearer-Token in eine Identitaet auf
    ///
    /// `None` wenn das Token ungueltig oder abgelaufen ist.
    async fn identitaet_aufloesen(&self, token: &str) -> Result<Option<UserId>>;

    /// Alle Mitglieder eines Chats
    async fn mitglieder(&self, chat_id: ChatId) -> Result<Vec<UserId>>;

    /// Prueft die Mitgliedschaft eines Benutzers in einem Chat
    async fn ist_mitglied(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;

    /// Alle Benutzer, die mindestens einen Chat mit `user_id` teilen (ohne ihn selbst)
    async fn kontakte(&self, user_id: UserId) -> Result<Vec<UserId>>;

    /// Setzt den Zeitpunkt der letzten Aktivitaet (Unix-Sekunden)
    async fn zuletzt_gesehen_setzen(&self, user_id: UserId, zeitpunkt: i64) -> Result<()>;

    /// Setzt den Zeitpunkt der letzten Aktivitaet auf jetzt
    async fn zuletzt_gesehen_auffrischen(&self, user_id: UserId) -> Result<()>;

    /// Anzeigename eines Benutzers
    async fn anzeigename(&self, user_id: UserId) -> Result<Option<String>>;

    /// Speichert eine neue Nachricht; der Absender gilt als Leser
    async fn nachricht_speichern(
        &self,
        chat_id: ChatId,
        sender: UserId,
        inhalt: &str,
    ) -> Result<NachrichtInfo>;

    /// Ersetzt den Inhalt einer Nachricht (nur durch den Autor)
    async fn nachricht_editieren(
        &self,
        message_id: MessageId,
        sender: UserId,
        inhalt: &str,
    ) -> Result<NachrichtInfo>;

    /// Loescht eine Nachricht (nur durch den Autor) und gibt ihren Chat zurueck
    async fn nachricht_loeschen(&self, message_id: MessageId, sender: UserId) -> Result<ChatId>;

    /// Markiert alle ungelesenen fremden Nachrichten eines Chats als gelesen
    ///
    /// Gibt die IDs der soeben markierten Nachrichten zurueck (leer wenn
    /// nichts ungelesen war).
    async fn als_gelesen_markieren(&self, chat_id: ChatId, user_id: UserId)
        -> Result<Vec<MessageId>>;
}
