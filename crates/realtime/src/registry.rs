//! Connection-Registry – Wer ist mit welchen Verbindungen online
//!
//! Die Registry ordnet jeder authentifizierten Identitaet die Send-Queues
//! ihrer offenen Verbindungen zu (mehrere Geraete pro Benutzer) und stellt
//! das Fan-out bereit.
//!
//! ## Online/Offline
//! Eine Identitaet ist genau dann online, wenn sie einen Eintrag hat. Leere
//! Eintraege gibt es nicht. Alle Aenderungen an einem Eintrag laufen unter
//! dem Shard-Lock der DashMap, dadurch werden Uebergaenge offline -> online
//! und online -> offline jeweils genau einmal gemeldet.
//!
//! ## Fan-out
//! - An alle Verbindungen einer Identitaet: `an_identitaet_senden`
//! - An eine Menge von Identitaeten (optional ohne Ausloeser): `an_menge_senden`
//!
//! Volle oder geschlossene Queues verwerfen den Frame und zaehlen ihn in
//! `nexus_events_dropped_total`.

use dashmap::{mapref::entry::Entry, DashMap};
use nexus_core::types::{ConnectionId, UserId};
use nexus_observability::NexusMetrics;
use nexus_protocol::{Frame, ServerEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung_id: ConnectionId,
    pub tx: mpsc::Sender<Frame>,
}

impl ClientSender {
    /// Erstellt einen Sender samt Empfangs-Queue fuer den Verbindungs-Task
    pub fn neu(verbindung_id: ConnectionId) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        (Self { verbindung_id, tx }, rx)
    }

    /// Reiht ein Frame nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    verbindung = %self.verbindung_id,
                    "Send-Queue voll – Frame verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    verbindung = %self.verbindung_id,
                    "Send-Queue geschlossen (Verbindung getrennt)"
                );
                false
            }
        }
    }
}

/// Serialisiert ein Ereignis einmalig zu einem Textframe
///
/// Der Payload ist `Bytes`, jeder Empfaenger bekommt nur eine Referenz-Kopie.
pub fn ereignis_frame(event: &ServerEvent) -> Option<Frame> {
    match event.zu_json() {
        Ok(json) => Some(Frame::text(json)),
        Err(e) => {
            tracing::error!(typ = event.typ_name(), fehler = %e, "Ereignis nicht serialisierbar");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Zentrale Registry aller authentifizierten Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<ConnectionRegistryInner>,
}

struct ConnectionRegistryInner {
    /// Send-Queues je Identitaet (nie leer)
    verbindungen: DashMap<UserId, Vec<ClientSender>>,
    /// Rueckwaertsindex Verbindung -> Identitaet
    identitaeten: DashMap<ConnectionId, UserId>,
    metriken: NexusMetrics,
}

impl ConnectionRegistry {
    /// Erstellt eine leere Registry
    pub fn neu(metriken: NexusMetrics) -> Self {
        Self {
            inner: Arc::new(ConnectionRegistryInner {
                verbindungen: DashMap::new(),
                identitaeten: DashMap::new(),
                metriken,
            }),
        }
    }

    /// Legt eine Verbindung unter einer Identitaet ab
    ///
    /// Gibt `true` zurueck wenn die Identitaet dadurch online gegangen ist.
    /// Ist die Verbindung bereits registriert, passiert nichts; eine
    /// Verbindung wechselt die Identitaet nur ueber `entfernen`.
    pub fn registrieren(&self, user_id: UserId, sender: ClientSender) -> bool {
        let verbindung_id = sender.verbindung_id;

        if let Some(bisher) = self.identitaet_von(&verbindung_id) {
            if bisher != user_id {
                tracing::warn!(
                    verbindung = %verbindung_id,
                    bisher = %bisher,
                    neu = %user_id,
                    "Verbindung ist bereits einer anderen Identitaet zugeordnet"
                );
            }
            return false;
        }

        let online_gegangen = match self.inner.verbindungen.entry(user_id) {
            Entry::Occupied(mut eintrag) => {
                eintrag.get_mut().push(sender);
                false
            }
            Entry::Vacant(eintrag) => {
                eintrag.insert(vec![sender]);
                true
            }
        };
        self.inner.identitaeten.insert(verbindung_id, user_id);
        self.online_metrik_aktualisieren();

        tracing::debug!(
            user_id = %user_id,
            verbindung = %verbindung_id,
            online_gegangen,
            "Verbindung registriert"
        );
        online_gegangen
    }

    /// Entfernt eine Verbindung aus der Registry
    ///
    /// Gibt `Some(identitaet)` zurueck wenn dadurch die letzte Verbindung
    /// der Identitaet verschwunden ist (offline). Wiederholte Aufrufe und
    /// nie registrierte Verbindungen ergeben `None`.
    pub fn entfernen(&self, verbindung_id: &ConnectionId) -> Option<UserId> {
        let (_, user_id) = self.inner.identitaeten.remove(verbindung_id)?;

        let offline = self
            .inner
            .verbindungen
            .remove_if_mut(&user_id, |_, sender| {
                sender.retain(|s| s.verbindung_id != *verbindung_id);
                sender.is_empty()
            })
            .is_some();
        self.online_metrik_aktualisieren();

        tracing::debug!(
            user_id = %user_id,
            verbindung = %verbindung_id,
            offline,
            "Verbindung entfernt"
        );
        offline.then_some(user_id)
    }

    /// Sendet ein Ereignis an alle Verbindungen einer Identitaet
    ///
    /// Gibt die Anzahl der eingereihten Frames zurueck.
    pub fn an_identitaet_senden(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let Some(frame) = ereignis_frame(event) else {
            return 0;
        };
        let gesendet = match self.inner.verbindungen.get(user_id) {
            Some(sender) => self.an_sender_verteilen(sender.value(), &frame),
            None => 0,
        };
        self.zustellung_zaehlen(event, gesendet);
        gesendet
    }

    /// Sendet ein Ereignis an alle Verbindungen einer Menge von Identitaeten
    ///
    /// `ausgenommen` (typischerweise der Ausloeser) bekommt nichts. Doppelte
    /// Eintraege in `identitaeten` werden nur einmal beliefert.
    pub fn an_menge_senden(
        &self,
        identitaeten: &[UserId],
        event: &ServerEvent,
        ausgenommen: Option<&UserId>,
    ) -> usize {
        let Some(frame) = ereignis_frame(event) else {
            return 0;
        };

        let mut gesehen = HashSet::with_capacity(identitaeten.len());
        let mut gesendet = 0;
        for user_id in identitaeten {
            if Some(user_id) == ausgenommen || !gesehen.insert(*user_id) {
                continue;
            }
            if let Some(sender) = self.inner.verbindungen.get(user_id) {
                gesendet += self.an_sender_verteilen(sender.value(), &frame);
            }
        }
        self.zustellung_zaehlen(event, gesendet);
        gesendet
    }

    /// Momentaufnahme aller Identitaeten mit mindestens einer Verbindung
    pub fn online_identitaeten(&self) -> HashSet<UserId> {
        self.inner.verbindungen.iter().map(|e| *e.key()).collect()
    }

    /// Prueft ob eine Identitaet online ist
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.verbindungen.contains_key(user_id)
    }

    /// Anzahl registrierter Verbindungen ueber alle Identitaeten
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.identitaeten.len()
    }

    /// Anzahl Verbindungen einer Identitaet
    pub fn verbindungen_von(&self, user_id: &UserId) -> usize {
        self.inner
            .verbindungen
            .get(user_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Identitaet unter der eine Verbindung registriert ist
    pub fn identitaet_von(&self, verbindung_id: &ConnectionId) -> Option<UserId> {
        self.inner.identitaeten.get(verbindung_id).map(|e| *e.value())
    }

    fn an_sender_verteilen(&self, sender: &[ClientSender], frame: &Frame) -> usize {
        let gesendet = sender.iter().filter(|s| s.senden(frame.clone())).count();
        let verworfen = sender.len() - gesendet;
        if verworfen > 0 {
            self.inner
                .metriken
                .events_dropped_total
                .inc_by(verworfen as u64);
        }
        gesendet
    }

    fn zustellung_zaehlen(&self, event: &ServerEvent, gesendet: usize) {
        if gesendet > 0 {
            self.inner
                .metriken
                .events_sent_total
                .with_label_values(&[event.typ_name()])
                .inc_by(gesendet as u64);
        }
    }

    fn online_metrik_aktualisieren(&self) {
        self.inner
            .metriken
            .online_identities
            .set(self.inner.verbindungen.len() as i64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::types::ChatId;

    fn test_registry() -> ConnectionRegistry {
        ConnectionRegistry::neu(NexusMetrics::neu().unwrap())
    }

    fn test_event() -> ServerEvent {
        ServerEvent::UserOnline { user_id: UserId(7) }
    }

    fn verbinden(
        registry: &ConnectionRegistry,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::Receiver<Frame>, bool) {
        let id = ConnectionId::new();
        let (sender, rx) = ClientSender::neu(id);
        let online = registry.registrieren(user_id, sender);
        (id, rx, online)
    }

    fn json_empfangen(rx: &mut mpsc::Receiver<Frame>) -> serde_json::Value {
        let frame = rx.try_recv().expect("Frame muss vorhanden sein");
        serde_json::from_str(frame.als_text().unwrap()).unwrap()
    }

    #[test]
    fn erste_verbindung_geht_online() {
        let registry = test_registry();
        let (_, _rx1, online1) = verbinden(&registry, UserId(1));
        let (_, _rx2, online2) = verbinden(&registry, UserId(1));

        assert!(online1);
        assert!(!online2, "Zweites Geraet ist kein Online-Uebergang");
        assert!(registry.ist_online(&UserId(1)));
        assert_eq!(registry.verbindungen_von(&UserId(1)), 2);
        assert_eq!(registry.verbindungs_anzahl(), 2);
    }

    #[test]
    fn offline_genau_einmal() {
        let registry = test_registry();
        let (a, _rxa, _) = verbinden(&registry, UserId(1));
        let (b, _rxb, _) = verbinden(&registry, UserId(1));

        assert_eq!(registry.entfernen(&a), None);
        assert!(registry.ist_online(&UserId(1)));

        assert_eq!(registry.entfernen(&b), Some(UserId(1)));
        assert!(!registry.ist_online(&UserId(1)));

        // Redundante Aufrufe
        assert_eq!(registry.entfernen(&b), None);
        assert_eq!(registry.entfernen(&a), None);
        assert_eq!(registry.entfernen(&ConnectionId::new()), None);
        assert!(registry.online_identitaeten().is_empty());
    }

    #[test]
    fn doppelte_registrierung_wird_ignoriert() {
        let registry = test_registry();
        let id = ConnectionId::new();
        let (sender, _rx) = ClientSender::neu(id);

        assert!(registry.registrieren(UserId(1), sender.clone()));
        assert!(!registry.registrieren(UserId(1), sender.clone()));
        assert!(!registry.registrieren(UserId(2), sender));

        assert_eq!(registry.verbindungen_von(&UserId(1)), 1);
        assert!(!registry.ist_online(&UserId(2)));
        assert_eq!(registry.identitaet_von(&id), Some(UserId(1)));
    }

    #[test]
    fn an_identitaet_erreicht_alle_geraete() {
        let registry = test_registry();
        let (_, mut rx1, _) = verbinden(&registry, UserId(1));
        let (_, mut rx2, _) = verbinden(&registry, UserId(1));
        let (_, mut rx3, _) = verbinden(&registry, UserId(2));

        assert_eq!(registry.an_identitaet_senden(&UserId(1), &test_event()), 2);

        assert_eq!(json_empfangen(&mut rx1)["type"], "user_online");
        assert_eq!(json_empfangen(&mut rx2)["type"], "user_online");
        assert!(rx3.try_recv().is_err(), "Andere Identitaet darf nichts empfangen");
    }

    #[test]
    fn an_offline_identitaet_ist_kein_fehler() {
        let registry = test_registry();
        assert_eq!(registry.an_identitaet_senden(&UserId(42), &test_event()), 0);
    }

    #[test]
    fn an_menge_ohne_ausloeser() {
        let registry = test_registry();
        let (_, mut rx_a, _) = verbinden(&registry, UserId(1));
        let (_, mut rx_b1, _) = verbinden(&registry, UserId(2));
        let (_, mut rx_b2, _) = verbinden(&registry, UserId(2));
        let (_, mut rx_c, _) = verbinden(&registry, UserId(3));

        let event = ServerEvent::StopTyping {
            chat_id: ChatId(5),
            user_id: UserId(1),
        };
        let mitglieder = [UserId(1), UserId(2), UserId(4)];
        let gesendet = registry.an_menge_senden(&mitglieder, &event, Some(&UserId(1)));

        assert_eq!(gesendet, 2);
        assert!(rx_a.try_recv().is_err(), "Ausloeser darf nichts empfangen");
        assert_eq!(json_empfangen(&mut rx_b1)["type"], "stop_typing");
        assert_eq!(json_empfangen(&mut rx_b2)["user_id"], 1);
        assert!(rx_c.try_recv().is_err(), "Nicht-Mitglied darf nichts empfangen");
    }

    #[test]
    fn an_menge_doppelte_ids_einmal() {
        let registry = test_registry();
        let (_, mut rx, _) = verbinden(&registry, UserId(2));

        let gesendet =
            registry.an_menge_senden(&[UserId(2), UserId(2)], &test_event(), None);
        assert_eq!(gesendet, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tote_verbindung_blockiert_fanout_nicht() {
        let registry = test_registry();
        let (_, rx_tot, _) = verbinden(&registry, UserId(1));
        let (_, mut rx_lebt, _) = verbinden(&registry, UserId(1));
        drop(rx_tot);

        assert_eq!(registry.an_identitaet_senden(&UserId(1), &test_event()), 1);
        assert!(rx_lebt.try_recv().is_ok());
    }

    #[test]
    fn volle_queue_verwirft() {
        let (sender, _rx) = ClientSender::neu(ConnectionId::new());
        for _ in 0..SEND_QUEUE_GROESSE {
            assert!(sender.senden(Frame::text("x")));
        }
        assert!(!sender.senden(Frame::text("zu viel")));
    }

    #[test]
    fn verworfene_frames_werden_gezaehlt() {
        let metriken = NexusMetrics::neu().unwrap();
        let registry = ConnectionRegistry::neu(metriken.clone());
        let (_, _rx_voll, _) = verbinden(&registry, UserId(1));

        for _ in 0..SEND_QUEUE_GROESSE + 6 {
            registry.an_identitaet_senden(&UserId(1), &test_event());
        }
        assert_eq!(metriken.events_dropped_total.get(), 6);

        // Getrennte Verbindung, Queue geschlossen
        let (_, rx_tot, _) = verbinden(&registry, UserId(2));
        drop(rx_tot);
        assert_eq!(registry.an_menge_senden(&[UserId(2)], &test_event(), None), 0);
        assert_eq!(metriken.events_dropped_total.get(), 7);
        assert_eq!(
            metriken
                .events_sent_total
                .with_label_values(&["user_online"])
                .get(),
            SEND_QUEUE_GROESSE as u64
        );
    }

    #[test]
    fn metriken_werden_gefuehrt() {
        let metriken = NexusMetrics::neu().unwrap();
        let registry = ConnectionRegistry::neu(metriken.clone());
        let (a, _rx1, _) = verbinden(&registry, UserId(1));
        let (_, _rx2, _) = verbinden(&registry, UserId(2));
        assert_eq!(metriken.online_identities.get(), 2);

        registry.an_menge_senden(&[UserId(1), UserId(2)], &test_event(), None);
        assert_eq!(
            metriken
                .events_sent_total
                .with_label_values(&["user_online"])
                .get(),
            2
        );

        registry.entfernen(&a);
        assert_eq!(metriken.online_identities.get(), 1);
    }

    #[test]
    fn parallele_registrierung_meldet_online_einmal() {
        let registry = test_registry();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let (sender, rx) = ClientSender::neu(ConnectionId::new());
                    (registry.registrieren(UserId(1), sender), rx)
                })
            })
            .collect();

        let ergebnisse: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let online_meldungen = ergebnisse.iter().filter(|(online, _)| *online).count();

        assert_eq!(online_meldungen, 1);
        assert_eq!(registry.verbindungen_von(&UserId(1)), 8);
    }
}
