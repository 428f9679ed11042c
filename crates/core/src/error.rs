//! Fehlertypen fuer Nexus
//!
//! Zentraler Fehler-Enum, den auch die externen Kollaborateure (Benutzer-
//! und Nachrichtenspeicher) zurueckgeben. Untermodule koennen eigene Fehler
//! definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Nexus
pub type Result<T> = std::result::Result<T, NexusError>;

/// Alle moeglichen Fehler im Nexus-System
#[derive(Debug, Error)]
pub enum NexusError {
    // --- Authentifizierung & Autorisierung ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    #[error("Zugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    // --- Eingaben ---
    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    // --- Ressourcen ---
    #[error("Chat nicht gefunden: {0}")]
    ChatNichtGefunden(String),

    #[error("Nachricht nicht gefunden: {0}")]
    NachrichtNichtGefunden(String),

    #[error("Benutzer nicht gefunden: {0}")]
    BenutzerNichtGefunden(String),

    // --- Datenspeicher ---
    #[error("Speicherfehler: {0}")]
    Speicher(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl NexusError {
    /// Gibt true zurueck wenn der Fehler durch den Aufrufer verursacht wurde
    ///
    /// Solche Fehler werden nur auf Debug-Level protokolliert.
    pub fn ist_clientfehler(&self) -> bool {
        matches!(
            self,
            Self::Authentifizierung(_)
                | Self::ZugriffVerweigert(_)
                | Self::UngueltigeEingabe(_)
                | Self::ChatNichtGefunden(_)
                | Self::NachrichtNichtGefunden(_)
                | Self::BenutzerNichtGefunden(_)
        )
    }
}
