//! Gemeinsamer Zustand fuer den Realtime-Service
//!
//! Haelt Konfiguration, Datenspeicher und alle Zustands-Manager als
//! Arc-Referenzen, die zwischen den Verbindungs-Tasks geteilt werden.

use nexus_observability::NexusMetrics;
use nexus_protocol::{handshake::DEFAULT_MAX_HANDSHAKE_BYTES, wire::DEFAULT_MAX_FRAME_SIZE};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::presence::PresenceCoordinator;
use crate::registry::ConnectionRegistry;
use crate::store::MessengerStore;
use crate::typing::{TypingCoordinator, STANDARD_SWEEP_INTERVALL, STANDARD_TIPP_DAUER};

/// Maximale Laenge einer Chat-Nachricht in Zeichen (laengere werden gekuerzt)
pub const MAX_NACHRICHTEN_LAENGE: usize = 8000;

/// Konfiguration fuer den Realtime-Service
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Maximale gleichzeitige Verbindungen (0 = unbegrenzt)
    pub max_verbindungen: usize,
    /// Keepalive-Intervall in Sekunden (0 = kein Ping)
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden (0 = kein Timeout)
    pub verbindungs_timeout_sek: u64,
    /// Maximale Payload-Groesse eines Frames in Bytes
    pub max_frame_groesse: usize,
    /// Maximale Groesse der Upgrade-Anfrage in Bytes
    pub max_handshake_bytes: usize,
    /// Lebensdauer eines Tipp-Timers
    pub tipp_dauer: Duration,
    /// Intervall des Tipp-Sweeps
    pub sweep_intervall: Duration,
    /// Maximale Laenge einer Nachricht in Zeichen
    pub max_nachrichten_laenge: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_verbindungen: 1024,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
            max_handshake_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
            tipp_dauer: STANDARD_TIPP_DAUER,
            sweep_intervall: STANDARD_SWEEP_INTERVALL,
            max_nachrichten_laenge: MAX_NACHRICHTEN_LAENGE,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct RealtimeState<S: MessengerStore + 'static> {
    /// Service-Konfiguration
    pub config: Arc<RealtimeConfig>,
    /// Benutzer-, Chat- und Nachrichtenspeicher
    pub store: Arc<S>,
    /// Identitaet -> Verbindungen
    pub registry: ConnectionRegistry,
    /// Online/Offline-Meldungen
    pub presence: PresenceCoordinator,
    /// Tipp-Indikatoren
    pub typing: TypingCoordinator,
    /// Prometheus-Metriken
    pub metriken: NexusMetrics,
    /// Offene TCP-Verbindungen inklusive laufender Handshakes
    pub offene_verbindungen: AtomicUsize,
}

impl<S: MessengerStore + 'static> RealtimeState<S> {
    /// Erstellt einen neuen RealtimeState
    pub fn neu(config: RealtimeConfig, store: Arc<S>, metriken: NexusMetrics) -> Arc<Self> {
        let registry = ConnectionRegistry::neu(metriken.clone());
        let presence = PresenceCoordinator::neu(registry.clone());
        let typing =
            TypingCoordinator::neu(registry.clone(), config.tipp_dauer, config.sweep_intervall);

        Arc::new(Self {
            config: Arc::new(config),
            store,
            registry,
            presence,
            typing,
            metriken,
            offene_verbindungen: AtomicUsize::new(0),
        })
    }
}
