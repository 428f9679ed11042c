//! Health-Check-Endpunkt fuer Nexus
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Listener-Status und Verbindungszahl

use crate::metrics::NexusMetrics;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Listener laeuft, aber das Verbindungslimit ist erreicht
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub listener_active: bool,
    pub connected_clients: i64,
    pub online_identities: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub listener_aktiv: Arc<AtomicBool>,
    pub metriken: NexusMetrics,
    /// 0 = unbegrenzt
    pub max_verbindungen: usize,
}

impl HealthState {
    pub fn neu(metriken: NexusMetrics, max_verbindungen: usize) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            listener_aktiv: Arc::new(AtomicBool::new(false)),
            metriken,
            max_verbindungen,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn listener_laeuft(&self) -> bool {
        self.listener_aktiv.load(Ordering::Relaxed)
    }

    pub fn listener_status_setzen(&self, aktiv: bool) {
        self.listener_aktiv.store(aktiv, Ordering::Relaxed);
    }

    /// Leitet den Status aus Listener und Verbindungszahl ab
    pub fn status(&self) -> HealthStatus {
        if !self.listener_laeuft() {
            return HealthStatus::Unhealthy;
        }
        let verbunden = self.metriken.connected_clients.get().max(0) as usize;
        if self.max_verbindungen > 0 && verbunden >= self.max_verbindungen {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status();

    let http_status = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // 200 auch bei degraded
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        listener_active: state.listener_laeuft(),
        connected_clients: state.metriken.connected_clients.get(),
        online_identities: state.metriken.online_identities.get(),
    };

    (http_status, Json(response))
}
