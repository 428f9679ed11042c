//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `NEXUS_LOG_LEVEL`: vollstaendige EnvFilter-Direktive, ersetzt das Level
//!   aus der Konfigurationsdatei
//! - `NEXUS_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Das konfigurierte Level gilt fuer die Nexus-Crates. Abhaengigkeiten
//! (hyper, axum, tokio) loggen nur ab `warn`, solange `NEXUS_LOG_LEVEL`
//! nichts anderes vorgibt.

use tracing_subscriber::{fmt, EnvFilter};

/// Targets, die dem konfigurierten Level folgen
const NEXUS_TARGETS: &[&str] = &[
    "nexus_server",
    "nexus_realtime",
    "nexus_protocol",
    "nexus_observability",
    "nexus_core",
];

/// Baut die Filter-Direktive fuer ein Level aus der Konfigurationsdatei
///
/// `"debug"` wird zu `"warn,nexus_server=debug,nexus_realtime=debug,..."`.
pub fn filter_direktive(level: &str) -> String {
    let mut direktive = String::from("warn");
    for target in NEXUS_TARGETS {
        direktive.push(',');
        direktive.push_str(target);
        direktive.push('=');
        direktive.push_str(level);
    }
    direktive
}

fn filter_bauen(level: &str) -> EnvFilter {
    EnvFilter::try_from_env("NEXUS_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(filter_direktive(level)))
        .unwrap_or_else(|_| EnvFilter::new(filter_direktive("info")))
}

/// Initialisiert das Logging-System.
///
/// Liest `NEXUS_LOG_LEVEL` und `NEXUS_LOG_FORMAT` aus der Umgebung.
/// Faellt auf die uebergebenen Werte und zuletzt auf `info` / `text` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = filter_bauen(level);
    let format_env = std::env::var("NEXUS_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    match format_env.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
