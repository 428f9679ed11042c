//! Fehlertypen fuer den Realtime-Service

use nexus_core::NexusError;
use thiserror::Error;

/// Fehler bei der Verarbeitung einer Client-Nachricht
///
/// Keiner dieser Fehler ist fuer den Prozess oder die Verbindung fatal:
/// die jeweilige Nachricht wird verworfen und der Fehler geloggt.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Fehler des Datenspeichers (Benutzer, Chats, Nachrichten)
    #[error("Speicherfehler: {0}")]
    Speicher(#[from] NexusError),

    /// Absender ist kein Mitglied des Chats
    #[error("Kein Mitglied: {0}")]
    KeinMitglied(String),
}

impl RealtimeError {
    /// Gibt true zurueck wenn der Client den Fehler verursacht hat
    pub fn ist_clientfehler(&self) -> bool {
        match self {
            Self::Speicher(e) => e.ist_clientfehler(),
            Self::KeinMitglied(_) => true,
        }
    }
}

/// Result-Typ fuer den Realtime-Service
pub type RealtimeResult<T> = Result<T, RealtimeError>;
