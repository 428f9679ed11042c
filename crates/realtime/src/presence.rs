//! Presence-Koordinator – Online/Offline-Meldungen an Kontakte
//!
//! Der Online-Status selbst ergibt sich allein aus der Registry. Dieser
//! Koordinator reagiert auf die Uebergaenge, die `ConnectionRegistry`
//! meldet: Kontakte werden benachrichtigt, der Zeitpunkt der letzten
//! Aktivitaet wird festgehalten, und prozessinterne Beobachter erhalten ein
//! `PresenceEvent` ueber einen Broadcast-Kanal.

use nexus_core::types::UserId;
use nexus_protocol::ServerEvent;
use tokio::sync::broadcast;

use crate::registry::ConnectionRegistry;
use crate::store::MessengerStore;

// ---------------------------------------------------------------------------
// Presence-Events
// ---------------------------------------------------------------------------

/// Events die der PresenceCoordinator prozessintern versendet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Erste Verbindung einer Identitaet
    Online { user_id: UserId },
    /// Letzte Verbindung einer Identitaet getrennt
    Offline { user_id: UserId, last_seen: i64 },
}

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// PresenceCoordinator
// ---------------------------------------------------------------------------

/// Verteilt Online/Offline-Uebergaenge an die Kontakte einer Identitaet
#[derive(Clone)]
pub struct PresenceCoordinator {
    registry: ConnectionRegistry,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceCoordinator {
    /// Erstellt einen neuen PresenceCoordinator
    pub fn neu(registry: ConnectionRegistry) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self { registry, event_tx }
    }

    /// Meldet den Uebergang offline -> online
    ///
    /// Sendet `user_online` an alle Kontakte, nie an die Identitaet selbst.
    /// Gibt die Anzahl der eingereihten Frames zurueck.
    pub async fn online_melden<S: MessengerStore>(&self, store: &S, user_id: UserId) -> usize {
        tracing::info!(user_id = %user_id, "Benutzer online");
        let _ = self.event_tx.send(PresenceEvent::Online { user_id });

        let event = ServerEvent::UserOnline { user_id };
        self.an_kontakte_senden(store, user_id, &event).await
    }

    /// Meldet den Uebergang online -> offline
    ///
    /// Speichert den Zeitpunkt als "zuletzt gesehen" und sendet
    /// `user_offline` an alle Kontakte. Ein Speicherfehler verhindert die
    /// Benachrichtigung nicht.
    ///
    /// Hat sich die Identitaet inzwischen wieder verbunden, entfaellt die
    /// Meldung.
    pub async fn offline_melden<S: MessengerStore>(&self, store: &S, user_id: UserId) -> usize {
        let last_seen = chrono::Utc::now().timestamp();
        if let Err(e) = store.zuletzt_gesehen_setzen(user_id, last_seen).await {
            tracing::warn!(user_id = %user_id, fehler = %e, "Zuletzt-gesehen nicht gespeichert");
        }

        if self.registry.ist_online(&user_id) {
            tracing::debug!(user_id = %user_id, "Wieder online – user_offline entfaellt");
            return 0;
        }

        tracing::info!(user_id = %user_id, "Benutzer offline");
        let _ = self
            .event_tx
            .send(PresenceEvent::Offline { user_id, last_seen });

        let event = ServerEvent::UserOffline { user_id, last_seen };
        self.an_kontakte_senden(store, user_id, &event).await
    }

    /// Abonniert die prozessinternen Presence-Events
    pub fn abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_tx.subscribe()
    }

    async fn an_kontakte_senden<S: MessengerStore>(
        &self,
        store: &S,
        user_id: UserId,
        event: &ServerEvent,
    ) -> usize {
        match store.kontakte(user_id).await {
            Ok(kontakte) => self
                .registry
                .an_menge_senden(&kontakte, event, Some(&user_id)),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    fehler = %e,
                    "Kontakte nicht ladbar – Presence-Meldung entfaellt"
                );
                0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
