//! Tipp-Indikatoren – Deadline-Tabelle mit periodischem Sweep
//!
//! Pro (Chat, Identitaet) existiert hoechstens ein Timer. Seine Existenz ist
//! das einzige "tippt gerade"-Signal. Ein Tipp-Signal legt den Timer an oder
//! verlaengert ihn; nur das Anlegen erzeugt ein `typing`-Ereignis. Ein
//! einzelner Sweep-Task entfernt abgelaufene Timer und meldet fuer jeden
//! genau ein `stop_typing`.

use nexus_core::types::{ChatId, UserId};
use nexus_protocol::ServerEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::registry::ConnectionRegistry;
use crate::store::MessengerStore;

/// Standard-Dauer eines Tipp-Timers
pub const STANDARD_TIPP_DAUER: Duration = Duration::from_millis(3500);

/// Standard-Intervall des Sweeps
pub const STANDARD_SWEEP_INTERVALL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// TypingTable
// ---------------------------------------------------------------------------

/// Deadline-Tabelle aller laufenden Tipp-Timer
pub struct TypingTable {
    timer: Mutex<HashMap<(ChatId, UserId), Instant>>,
    dauer: Duration,
}

impl TypingTable {
    pub fn neu(dauer: Duration) -> Self {
        Self {
            timer: Mutex::new(HashMap::new()),
            dauer,
        }
    }

    /// Startet oder verlaengert den Timer
    ///
    /// Gibt `true` zurueck wenn der Timer neu angelegt wurde.
    pub fn tippen(&self, chat_id: ChatId, user_id: UserId, jetzt: Instant) -> bool {
        self.timer
            .lock()
            .insert((chat_id, user_id), jetzt + self.dauer)
            .is_none()
    }

    /// Entfernt alle Timer deren Deadline erreicht ist
    pub fn abgelaufene_entfernen(&self, jetzt: Instant) -> Vec<(ChatId, UserId)> {
        let mut abgelaufen = Vec::new();
        self.timer.lock().retain(|schluessel, deadline| {
            if *deadline <= jetzt {
                abgelaufen.push(*schluessel);
                false
            } else {
                true
            }
        });
        abgelaufen
    }

    pub fn tippt(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.timer.lock().contains_key(&(chat_id, user_id))
    }

    pub fn anzahl(&self) -> usize {
        self.timer.lock().len()
    }

    pub fn dauer(&self) -> Duration {
        self.dauer
    }
}

// ---------------------------------------------------------------------------
// TypingCoordinator
// ---------------------------------------------------------------------------

/// Verbindet die Tabelle mit Registry und Mitgliederlisten
///
/// Clone teilt die Tabelle.
#[derive(Clone)]
pub struct TypingCoordinator {
    tabelle: Arc<TypingTable>,
    registry: ConnectionRegistry,
    sweep_intervall: Duration,
}

impl TypingCoordinator {
    pub fn neu(registry: ConnectionRegistry, dauer: Duration, sweep_intervall: Duration) -> Self {
        Self {
            tabelle: Arc::new(TypingTable::neu(dauer)),
            registry,
            sweep_intervall,
        }
    }

    pub fn tabelle(&self) -> &TypingTable {
        &self.tabelle
    }

    /// Verarbeitet ein Tipp-Signal (Mitgliedschaft ist bereits geprueft)
    ///
    /// Nur beim Anlegen des Timers wird `typing` an die uebrigen Mitglieder
    /// gesendet. Gibt die Anzahl der eingereihten Frames zurueck.
    pub async fn tippen_melden<S: MessengerStore>(
        &self,
        store: &S,
        chat_id: ChatId,
        user_id: UserId,
    ) -> usize {
        if !self.tabelle.tippen(chat_id, user_id, Instant::now()) {
            return 0;
        }

        let name = match store.anzeigename(user_id).await {
            Ok(Some(name)) => name,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, fehler = %e, "Anzeigename nicht ladbar");
                String::new()
            }
        };

        let event = ServerEvent::Typing {
            chat_id,
            user_id,
            name,
        };
        self.an_mitglieder_senden(store, chat_id, user_id, &event)
            .await
    }

    /// Ein Sweep-Durchlauf: meldet `stop_typing` fuer jeden abgelaufenen Timer
    ///
    /// Gibt die Anzahl der abgelaufenen Timer zurueck.
    pub async fn abgelaufene_verarbeiten<S: MessengerStore>(
        &self,
        store: &S,
        jetzt: Instant,
    ) -> usize {
        let abgelaufen = self.tabelle.abgelaufene_entfernen(jetzt);
        for (chat_id, user_id) in &abgelaufen {
            let event = ServerEvent::StopTyping {
                chat_id: *chat_id,
                user_id: *user_id,
            };
            self.an_mitglieder_senden(store, *chat_id, *user_id, &event)
                .await;
        }
        abgelaufen.len()
    }

    /// Periodischer Sweep bis zum Shutdown
    pub async fn sweep_starten<S: MessengerStore>(
        self,
        store: Arc<S>,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut intervall = tokio::time::interval(self.sweep_intervall);
        intervall.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            intervall_ms = self.sweep_intervall.as_millis() as u64,
            "Tipp-Sweep gestartet"
        );

        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    let anzahl = self.abgelaufene_verarbeiten(store.as_ref(), Instant::now()).await;
                    if anzahl > 0 {
                        tracing::trace!(anzahl, "Tipp-Timer abgelaufen");
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Tipp-Sweep beendet");
    }

    async fn an_mitglieder_senden<S: MessengerStore>(
        &self,
        store: &S,
        chat_id: ChatId,
        ausloeser: UserId,
        event: &ServerEvent,
    ) -> usize {
        match store.mitglieder(chat_id).await {
            Ok(mitglieder) => self
                .registry
                .an_menge_senden(&mitglieder, event, Some(&ausloeser)),
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, fehler = %e, "Mitglieder nicht ladbar");
                0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
