//! Auth-Handler – Bindet eine Verbindung an eine Identitaet

use nexus_protocol::ServerEvent;
use std::sync::Arc;

use crate::dispatcher::DispatcherContext;
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Fehlermeldung bei ungueltigem Token
pub const UNGUELTIGES_TOKEN: &str = "Invalid token";

/// Verarbeitet eine `auth`-Nachricht
///
/// Bei Erfolg wird die Verbindung registriert und `auth_ok` zurueckgegeben.
/// War die Verbindung bereits unter einer anderen Identitaet registriert,
/// wird sie vorher abgemeldet. Schlaegt die Aufloesung fehl, bleibt der
/// bisherige Zustand unveraendert und die Antwort ist `auth_fail`.
pub async fn handle_auth<S: MessengerStore + 'static>(
    token: &str,
    ctx: &mut DispatcherContext,
    state: &Arc<RealtimeState<S>>,
) -> ServerEvent {
    let user_id = match state.store.identitaet_aufloesen(token).await {
        Ok(Some(uid)) => uid,
        Ok(None) => {
            tracing::debug!(verbindung = %ctx.verbindung_id, "Token abgelehnt");
            return ServerEvent::AuthFail {
                error: UNGUELTIGES_TOKEN.into(),
            };
        }
        Err(e) => {
            tracing::warn!(verbindung = %ctx.verbindung_id, fehler = %e, "Token-Pruefung fehlgeschlagen");
            return ServerEvent::AuthFail {
                error: UNGUELTIGES_TOKEN.into(),
            };
        }
    };

    // Wechsel der Identitaet: erst abmelden
    if let Some(bisher) = ctx.user_id {
        if bisher != user_id {
            tracing::info!(
                verbindung = %ctx.verbindung_id,
                bisher = %bisher,
                neu = %user_id,
                "Verbindung wechselt die Identitaet"
            );
            if let Some(offline) = state.registry.entfernen(&ctx.verbindung_id) {
                state
                    .presence
                    .offline_melden(state.store.as_ref(), offline)
                    .await;
            }
        }
    }

    let online_gegangen = state.registry.registrieren(user_id, ctx.sender.clone());
    ctx.user_id = Some(user_id);

    if let Err(e) = state.store.zuletzt_gesehen_auffrischen(user_id).await {
        tracing::warn!(user_id = %user_id, fehler = %e, "Zuletzt-gesehen nicht aktualisiert");
    }

    tracing::debug!(
        verbindung = %ctx.verbindung_id,
        user_id = %user_id,
        "Verbindung authentifiziert"
    );

    if online_gegangen {
        state
            .presence
            .online_melden(state.store.as_ref(), user_id)
            .await;
    }

    ServerEvent::AuthOk { user_id }
}
