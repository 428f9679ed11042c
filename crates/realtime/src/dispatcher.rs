//! Message-Dispatcher – Routet Client-Nachrichten an die richtigen Handler
//!
//! Der Dispatcher empfaengt den Text eines Frames von einer
//! `ClientConnection`, parst ihn als `ClientMessage` und ruft den passenden
//! Handler auf.
//!
//! ## Zustandspruefung
//! - `auth` ist immer erlaubt
//! - Alle anderen Nachrichten werden vor der Authentifizierung still ignoriert
//!
//! Unlesbares JSON und unbekannte Typen werden verworfen. Handler-Fehler
//! werden protokolliert; der Client erfaehrt davon nichts.

use nexus_core::types::{ConnectionId, UserId};
use nexus_protocol::{ClientMessage, ServerEvent};
use std::sync::Arc;

use crate::connection::VerbindungsZustand;
use crate::error::RealtimeResult;
use crate::handlers::{auth_handler, message_handler, read_handler, typing_handler};
use crate::registry::ClientSender;
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    /// Prozessweit eindeutige ID dieser Verbindung
    pub verbindung_id: ConnectionId,
    /// Authentifizierte Identitaet (None wenn nicht authentifiziert)
    pub user_id: Option<UserId>,
    /// Send-Queue dieser Verbindung (wird bei der Registrierung abgelegt)
    pub sender: ClientSender,
}

impl DispatcherContext {
    pub fn neu(sender: ClientSender) -> Self {
        Self {
            verbindung_id: sender.verbindung_id,
            user_id: None,
            sender,
        }
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        match self.user_id {
            Some(uid) => VerbindungsZustand::Authentifiziert(uid),
            None => VerbindungsZustand::Unauthentifiziert,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher<S: MessengerStore + 'static> {
    state: Arc<RealtimeState<S>>,
}

impl<S: MessengerStore + 'static> MessageDispatcher<S> {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<RealtimeState<S>>) -> Self {
        Self { state }
    }

    /// Verarbeitet den Text eines eingehenden Frames
    ///
    /// Gibt eine Antwort zurueck, die nur an diese Verbindung geht
    /// (`auth_ok` / `auth_fail`). Alle anderen Ereignisse laufen ueber die
    /// Registry.
    pub async fn dispatch(&self, text: &str, ctx: &mut DispatcherContext) -> Option<ServerEvent> {
        let nachricht = match ClientMessage::parsen(text) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(
                    verbindung = %ctx.verbindung_id,
                    fehler = %e,
                    "Unlesbare Nachricht verworfen"
                );
                return None;
            }
        };

        let typ = nachricht.typ_name();

        let ergebnis = match nachricht {
            // -------------------------------------------------------------------
            // Auth (immer erlaubt)
            // -------------------------------------------------------------------
            ClientMessage::Auth { token } => {
                return Some(auth_handler::handle_auth(&token, ctx, &self.state).await);
            }

            // -------------------------------------------------------------------
            // Authentifizierung erfordernde Nachrichten
            // -------------------------------------------------------------------
            nachricht => {
                let Some(user_id) = ctx.user_id else {
                    tracing::trace!(
                        verbindung = %ctx.verbindung_id,
                        typ,
                        "Nachricht vor Authentifizierung ignoriert"
                    );
                    return None;
                };
                self.dispatch_authentifiziert(nachricht, user_id).await
            }
        };

        if let Err(e) = ergebnis {
            if e.ist_clientfehler() {
                tracing::debug!(verbindung = %ctx.verbindung_id, typ, fehler = %e, "Nachricht verworfen");
            } else {
                tracing::warn!(verbindung = %ctx.verbindung_id, typ, fehler = %e, "Verarbeitung fehlgeschlagen");
            }
        }
        None
    }

    /// Routet Nachrichten die eine Authentifizierung erfordern
    async fn dispatch_authentifiziert(
        &self,
        nachricht: ClientMessage,
        user_id: UserId,
    ) -> RealtimeResult<()> {
        match nachricht {
            ClientMessage::SendMessage {
                chat_id,
                content,
                temp_id,
            } => {
                message_handler::handle_send_message(
                    chat_id,
                    &content,
                    temp_id,
                    user_id,
                    &self.state,
                )
                .await
            }

            ClientMessage::EditMessage {
                message_id,
                content,
            } => {
                message_handler::handle_edit_message(message_id, &content, user_id, &self.state)
                    .await
            }

            ClientMessage::DeleteMessage { message_id } => {
                message_handler::handle_delete_message(message_id, user_id, &self.state).await
            }

            ClientMessage::Typing { chat_id } => {
                typing_handler::handle_typing(chat_id, user_id, &self.state).await
            }

            ClientMessage::MarkRead { chat_id } => {
                read_handler::handle_mark_read(chat_id, user_id, &self.state).await
            }

            // Bereits im Aufrufer behandelt
            ClientMessage::Auth { .. } => Ok(()),
        }
    }

    /// Raeumt beim Verbindungsende auf
    ///
    /// Entfernt die Verbindung aus der Registry und meldet die Identitaet
    /// offline, falls dies ihre letzte Verbindung war.
    pub async fn verbindung_cleanup(&self, ctx: &mut DispatcherContext) {
        if let Some(offline) = self.state.registry.entfernen(&ctx.verbindung_id) {
            self.state
                .presence
                .offline_melden(self.state.store.as_ref(), offline)
                .await;
        }
        ctx.user_id = None;
    }
}
