//! nexus-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use nexus_core::types::{ChatId, UserId};
use nexus_observability::{observability_server_starten, HealthState, NexusMetrics};
use nexus_realtime::{MemoryStore, RealtimeState, WebSocketServer};
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Legt die konfigurierten Benutzer und Chats im Speicher an
    pub fn store_befuellen(&self) -> MemoryStore {
        let store = MemoryStore::neu();
        for b in &self.config.benutzer {
            store.benutzer_anlegen(UserId(b.id), &b.anzeigename, &b.token);
        }
        for chat in &self.config.chats {
            store.chat_anlegen(
                ChatId(chat.id),
                chat.mitglieder.iter().map(|m| UserId(*m)),
            );
        }
        tracing::info!(
            benutzer = store.benutzer_anzahl(),
            chats = store.chat_anzahl(),
            "Speicher befuellt"
        );
        store
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Speicher befuellen und Metriken registrieren
    /// 2. WebSocket-Listener binden
    /// 3. Observability-Server starten (optional)
    /// 4. Bis Ctrl-C Verbindungen bedienen, danach geordnet beenden
    pub async fn starten(self) -> Result<()> {
        let ws_addr = self.config.ws_bind_adresse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            ws = %ws_addr,
            max_verbindungen = self.config.server.max_verbindungen,
            "Server startet"
        );

        let store = Arc::new(self.store_befuellen());
        let metriken = NexusMetrics::neu()?;
        let rt_config = self.config.realtime_config();
        let health = HealthState::neu(metriken.clone(), rt_config.max_verbindungen);
        let state = RealtimeState::neu(rt_config, store, metriken.clone());

        let ws_server = WebSocketServer::binden(state, ws_addr).await?;
        health.listener_status_setzen(true);

        if self.config.observability.aktiviert {
            let obs_addr = self.config.observability_bind_adresse()?;
            let obs_metriken = metriken.clone();
            let obs_health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(obs_addr, obs_metriken, obs_health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal = async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Signal-Handler nicht installierbar"),
            }
            let _ = shutdown_tx.send(true);
        };

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        let (ergebnis, ()) = tokio::join!(ws_server.starten(shutdown_rx), signal);
        health.listener_status_setzen(false);
        ergebnis?;

        tracing::info!("Server beendet");
        Ok(())
    }
}
