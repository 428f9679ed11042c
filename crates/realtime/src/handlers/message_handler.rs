//! Message-Handler – Nachrichten senden, editieren, loeschen
//!
//! Speichert ueber den `MessengerStore` und verteilt das Ergebnis an die
//! Chat-Mitglieder.

use nexus_core::types::{ChatId, MessageId, UserId};
use nexus_protocol::ServerEvent;
use std::sync::Arc;

use crate::error::{RealtimeError, RealtimeResult};
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Trimmt den Inhalt und kuerzt ihn auf `max_zeichen` Zeichen
///
/// Gibt `None` zurueck wenn nach dem Trimmen nichts uebrig bleibt.
pub fn inhalt_aufbereiten(inhalt: &str, max_zeichen: usize) -> Option<&str> {
    let inhalt = inhalt.trim();
    if inhalt.is_empty() {
        return None;
    }
    match inhalt.char_indices().nth(max_zeichen) {
        Some((ende, _)) => Some(&inhalt[..ende]),
        None => Some(inhalt),
    }
}

/// Verarbeitet `send_message`
///
/// `message_sent` geht an alle Verbindungen des Absenders, `new_message`
/// an alle uebrigen Mitglieder.
pub async fn handle_send_message<S: MessengerStore + 'static>(
    chat_id: ChatId,
    content: &str,
    temp_id: Option<serde_json::Value>,
    user_id: UserId,
    state: &Arc<RealtimeState<S>>,
) -> RealtimeResult<()> {
    let Some(inhalt) = inhalt_aufbereiten(content, state.config.max_nachrichten_laenge) else {
        tracing::trace!(user_id = %user_id, "Leere Nachricht ignoriert");
        return Ok(());
    };

    if !state.store.ist_mitglied(chat_id, user_id).await? {
        return Err(RealtimeError::KeinMitglied(format!("{user_id} in {chat_id}")));
    }

    let nachricht = state
        .store
        .nachricht_speichern(chat_id, user_id, inhalt)
        .await?;

    tracing::debug!(
        user_id = %user_id,
        chat_id = %chat_id,
        message_id = %nachricht.id,
        "Nachricht gespeichert"
    );

    state.registry.an_identitaet_senden(
        &user_id,
        &ServerEvent::MessageSent {
            temp_id,
            message: nachricht.clone(),
        },
    );

    let mitglieder = state.store.mitglieder(chat_id).await?;
    state.registry.an_menge_senden(
        &mitglieder,
        &ServerEvent::NewMessage { message: nachricht },
        Some(&user_id),
    );
    Ok(())
}

/// Verarbeitet `edit_message` (nur durch den Autor)
///
/// `message_edited` geht an alle Mitglieder, auch an den Autor.
pub async fn handle_edit_message<S: MessengerStore + 'static>(
    message_id: MessageId,
    content: &str,
    user_id: UserId,
    state: &Arc<RealtimeState<S>>,
) -> RealtimeResult<()> {
    let Some(inhalt) = inhalt_aufbereiten(content, state.config.max_nachrichten_laenge) else {
        return Ok(());
    };

    let nachricht = state
        .store
        .nachricht_editieren(message_id, user_id, inhalt)
        .await?;

    let mitglieder = state.store.mitglieder(nachricht.chat_id).await?;
    state.registry.an_menge_senden(
        &mitglieder,
        &ServerEvent::MessageEdited { message: nachricht },
        None,
    );
    Ok(())
}

/// Verarbeitet `delete_message` (nur durch den Autor)
pub async fn handle_delete_message<S: MessengerStore + 'static>(
    message_id: MessageId,
    user_id: UserId,
    state: &Arc<RealtimeState<S>>,
) -> RealtimeResult<()> {
    let chat_id = state.store.nachricht_loeschen(message_id, user_id).await?;

    tracing::debug!(user_id = %user_id, message_id = %message_id, "Nachricht geloescht");

    let mitglieder = state.store.mitglieder(chat_id).await?;
    state.registry.an_menge_senden(
        &mitglieder,
        &ServerEvent::MessageDeleted {
            chat_id,
            message_id,
        },
        None,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leerer_inhalt() {
        assert_eq!(inhalt_aufbereiten("", 10), None);
        assert_eq!(inhalt_aufbereiten("  \n\t ", 10), None);
    }

    #[test]
    fn inhalt_wird_getrimmt() {
        assert_eq!(inhalt_aufbereiten("  hallo  ", 10), Some("hallo"));
    }

    #[test]
    fn kuerzen_auf_zeichen_nicht_bytes() {
        assert_eq!(inhalt_aufbereiten("abcdef", 3), Some("abc"));
        assert_eq!(inhalt_aufbereiten("äöüß", 2), Some("äö"));
        assert_eq!(inhalt_aufbereiten("äöü", 3), Some("äöü"));
    }

    #[test]
    fn kuerzen_nach_trimmen() {
        let lang = format!("   {}", "x".repeat(9000));
        assert_eq!(inhalt_aufbereiten(&lang, 8000).unwrap().len(), 8000);
    }
}
