//! Prometheus-kompatible Metriken fuer Nexus
//!
//! Registrierte Metriken:
//! - `nexus_connected_clients` – Gauge: Offene WebSocket-Verbindungen
//! - `nexus_online_identities` – Gauge: Identitaeten mit mindestens einer Verbindung
//! - `nexus_handshakes_total` – Counter: Handshakes (result = accepted/rejected)
//! - `nexus_frames_received_total` – Counter: Dekodierte eingehende Frames
//! - `nexus_events_sent_total` – Counter: Zugestellte Server-Ereignisse (type)
//! - `nexus_events_dropped_total` – Counter: Verworfene Ereignisse (Queue voll/geschlossen)

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Nexus-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Zaehler.
#[derive(Clone)]
pub struct NexusMetrics {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub online_identities: IntGauge,
    pub handshakes_total: IntCounterVec,
    pub frames_received_total: IntCounter,
    pub events_sent_total: IntCounterVec,
    pub events_dropped_total: IntCounter,
}

impl NexusMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "nexus_connected_clients",
            "Anzahl offener WebSocket-Verbindungen",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let online_identities = IntGauge::with_opts(Opts::new(
            "nexus_online_identities",
            "Anzahl Identitaeten mit mindestens einer Verbindung",
        ))?;
        registry.register(Box::new(online_identities.clone()))?;

        let handshakes_total = IntCounterVec::new(
            Opts::new("nexus_handshakes_total", "Anzahl WebSocket-Handshakes"),
            &["result"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let frames_received_total = IntCounter::with_opts(Opts::new(
            "nexus_frames_received_total",
            "Anzahl dekodierter eingehender Frames",
        ))?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let events_sent_total = IntCounterVec::new(
            Opts::new(
                "nexus_events_sent_total",
                "Anzahl an Verbindungen zugestellter Server-Ereignisse",
            ),
            &["type"],
        )?;
        registry.register(Box::new(events_sent_total.clone()))?;

        let events_dropped_total = IntCounter::with_opts(Opts::new(
            "nexus_events_dropped_total",
            "Anzahl verworfener Ereignisse (Send-Queue voll oder geschlossen)",
        ))?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            online_identities,
            handshakes_total,
            frames_received_total,
            events_sent_total,
            events_dropped_total,
        })
    }

    /// Zaehlt einen Handshake mit dem gegebenen Ergebnis
    pub fn handshake_zaehlen(&self, akzeptiert: bool) {
        let ergebnis = if akzeptiert { "accepted" } else { "rejected" };
        self.handshakes_total.with_label_values(&[ergebnis]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: NexusMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<NexusMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
