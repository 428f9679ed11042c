//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `WebSocketServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen Task mit einer `ClientConnection`.
//! Der Tipp-Sweep laeuft als weiterer Task daneben.
//!
//! ## Concurrency-Modell
//! Da der `MessengerStore` async fn ohne Send-Garantie verwendet
//! (async_fn_in_trait), laufen alle Tasks in einer `tokio::task::LocalSet`
//! auf einem single-threaded Executor.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::LocalSet;

use crate::connection::ClientConnection;
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Wie lange nach dem Shutdown-Signal auf offene Verbindungs-Tasks gewartet wird
const ABSCHALT_FRIST: Duration = Duration::from_secs(5);

/// WebSocket-Server
///
/// Akzeptiert Verbindungen in einer Loop. Jede Verbindung wird als lokaler
/// Task in der `LocalSet` ausgefuehrt.
pub struct WebSocketServer<S: MessengerStore + 'static> {
    state: Arc<RealtimeState<S>>,
    listener: TcpListener,
}

impl<S: MessengerStore + 'static> WebSocketServer<S> {
    /// Bindet den TCP-Socket
    pub async fn binden(state: Arc<RealtimeState<S>>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse (relevant bei Port 0)
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    ///
    /// Danach wird bis zu `ABSCHALT_FRIST` auf das Ende der
    /// Verbindungs-Tasks gewartet, damit deren Cleanup noch laeuft.
    pub async fn starten(self, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let local = LocalSet::new();
        local.run_until(self.accept_loop(shutdown_rx)).await?;

        if tokio::time::timeout(ABSCHALT_FRIST, local).await.is_err() {
            tracing::warn!("Nicht alle Verbindungs-Tasks innerhalb der Frist beendet");
        }
        Ok(())
    }

    /// Interne Accept-Loop (laeuft innerhalb der LocalSet)
    async fn accept_loop(
        self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "WebSocket-Server gestartet");

        tokio::task::spawn_local(
            self.state
                .typing
                .clone()
                .sweep_starten(Arc::clone(&self.state.store), shutdown_rx.clone()),
        );

        let max = self.state.config.max_verbindungen;

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Verbindungslimit pruefen (vor dem Handshake)
                            let offen = self.state.offene_verbindungen.load(Ordering::Relaxed);
                            if max > 0 && offen >= max {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max,
                                    "Verbindungslimit erreicht – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }

                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let state = Arc::clone(&self.state);
                            let verbindung = ClientConnection::neu(Arc::clone(&state), peer_addr.to_string());
                            let shutdown_rx_clone = shutdown_rx.clone();

                            state.offene_verbindungen.fetch_add(1, Ordering::Relaxed);
                            // Lokaler Task – kein Send erforderlich
                            tokio::task::spawn_local(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                                state.offene_verbindungen.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("WebSocket-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("WebSocket-Server gestoppt");
        Ok(())
    }
}
