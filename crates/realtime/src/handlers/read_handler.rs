//! Read-Handler – Lesebestaetigungen

use nexus_core::types::{ChatId, UserId};
use nexus_protocol::ServerEvent;
use std::sync::Arc;

use crate::error::{RealtimeError, RealtimeResult};
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Verarbeitet `mark_read`
///
/// `messages_read` geht nur raus, wenn tatsaechlich etwas ungelesen war,
/// und dann an alle Mitglieder.
pub async fn handle_mark_read<S: MessengerStore + 'static>(
    chat_id: ChatId,
    user_id: UserId,
    state: &Arc<RealtimeState<S>>,
) -> RealtimeResult<()> {
    if !state.store.ist_mitglied(chat_id, user_id).await? {
        return Err(RealtimeError::KeinMitglied(format!("{user_id} in {chat_id}")));
    }

    let ids = state.store.als_gelesen_markieren(chat_id, user_id).await?;
    if ids.is_empty() {
        return Ok(());
    }

    tracing::trace!(user_id = %user_id, chat_id = %chat_id, anzahl = ids.len(), "Nachrichten gelesen");

    let mitglieder = state.store.mitglieder(chat_id).await?;
    state.registry.an_menge_senden(
        &mitglieder,
        &ServerEvent::MessagesRead {
            chat_id,
            user_id,
            ids,
        },
        None,
    );
    Ok(())
}
