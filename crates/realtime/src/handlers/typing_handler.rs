//! Typing-Handler – Tipp-Signale von Chat-Mitgliedern

use nexus_core::types::{ChatId, UserId};
use std::sync::Arc;

use crate::error::{RealtimeError, RealtimeResult};
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Verarbeitet `typing`
pub async fn handle_typing<S: MessengerStore + 'static>(
    chat_id: ChatId,
    user_id: UserId,
    state: &Arc<RealtimeState<S>>,
) -> RealtimeResult<()> {
    if !state.store.ist_mitglied(chat_id, user_id).await? {
        return Err(RealtimeError::KeinMitglied(format!("{user_id} in {chat_id}")));
    }

    state
        .typing
        .tippen_melden(state.store.as_ref(), chat_id, user_id)
        .await;
    Ok(())
}
