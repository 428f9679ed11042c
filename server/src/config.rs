//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist. `[[benutzer]]` und `[[chats]]` befuellen den
//! In-Memory-Speicher.

use anyhow::{bail, Context};
use nexus_observability::logging::{log_format_gueltig, log_level_gueltig};
use nexus_realtime::server_state::MAX_NACHRICHTEN_LAENGE;
use nexus_realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Kleinste zulaessige Frame-Groesse: eine Nachricht maximaler Laenge in
/// 4-Byte-Zeichen plus JSON-Huelle
pub const MIN_FRAME_GROESSE: usize = MAX_NACHRICHTEN_LAENGE * 4 + 1024;

/// Kleinste zulaessige Groesse fuer den Upgrade-Request
pub const MIN_HANDSHAKE_BYTES: usize = 1024;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Keepalive, Timeouts und Groessenlimits
    pub verbindung: VerbindungsEinstellungen,
    /// Tipp-Indikatoren
    pub tippen: TippEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Vorab angelegte Benutzer
    pub benutzer: Vec<BenutzerEintrag>,
    /// Vorab angelegte Chats
    pub chats: Vec<ChatEintrag>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen (0 = unbegrenzt)
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Nexus".into(),
            max_verbindungen: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer WebSocket und Observability
    pub bind_adresse: String,
    /// Port fuer WebSocket-Verbindungen
    pub ws_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Ping-Intervall in Sekunden (0 = kein Keepalive)
    pub keepalive_sek: u64,
    /// Trennung nach so vielen Sekunden ohne eingehenden Frame (0 = nie)
    pub verbindungs_timeout_sek: u64,
    /// Maximale Payload-Groesse eines Frames in Bytes
    pub max_frame_groesse: usize,
    /// Maximale Groesse der Upgrade-Anfrage in Bytes
    pub max_handshake_bytes: usize,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        let standard = RealtimeConfig::default();
        Self {
            keepalive_sek: standard.keepalive_sek,
            verbindungs_timeout_sek: standard.verbindungs_timeout_sek,
            max_frame_groesse: standard.max_frame_groesse,
            max_handshake_bytes: standard.max_handshake_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TippEinstellungen {
    /// Lebensdauer eines Tipp-Timers in Millisekunden
    pub dauer_ms: u64,
    /// Intervall des Ablauf-Sweeps in Millisekunden
    pub sweep_ms: u64,
}

impl Default for TippEinstellungen {
    fn default() -> Self {
        let standard = RealtimeConfig::default();
        Self {
            dauer_ms: standard.tipp_dauer.as_millis() as u64,
            sweep_ms: standard.sweep_intervall.as_millis() as u64,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

/// Ein Benutzer samt Bearer-Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerEintrag {
    pub id: i64,
    pub anzeigename: String,
    pub token: String,
}

/// Ein Chat mit seinen Mitgliedern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEintrag {
    pub id: i64,
    pub mitglieder: Vec<i64>,
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiges Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format '{}'", self.logging.format);
        }
        if self.tippen.dauer_ms == 0 || self.tippen.sweep_ms == 0 {
            bail!("[tippen] dauer_ms und sweep_ms muessen groesser als 0 sein");
        }
        if self.verbindung.max_frame_groesse < MIN_FRAME_GROESSE {
            bail!(
                "[verbindung] max_frame_groesse muss mindestens {MIN_FRAME_GROESSE} Bytes betragen (ist {})",
                self.verbindung.max_frame_groesse
            );
        }
        if self.verbindung.max_handshake_bytes < MIN_HANDSHAKE_BYTES {
            bail!(
                "[verbindung] max_handshake_bytes muss mindestens {MIN_HANDSHAKE_BYTES} betragen (ist {})",
                self.verbindung.max_handshake_bytes
            );
        }

        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();
        for b in &self.benutzer {
            if !ids.insert(b.id) {
                bail!("Benutzer-ID {} ist doppelt vergeben", b.id);
            }
            if b.token.is_empty() || !tokens.insert(b.token.as_str()) {
                bail!("Benutzer {} hat ein leeres oder doppeltes Token", b.id);
            }
        }

        let mut chat_ids = HashSet::new();
        for chat in &self.chats {
            if !chat_ids.insert(chat.id) {
                bail!("Chat-ID {} ist doppelt vergeben", chat.id);
            }
            if let Some(fremd) = chat.mitglieder.iter().find(|m| !ids.contains(*m)) {
                bail!("Chat {} enthaelt unbekannten Benutzer {fremd}", chat.id);
            }
        }
        Ok(())
    }

    /// Gibt die Bind-Adresse fuer WebSocket-Verbindungen zurueck
    pub fn ws_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.ws_port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige WebSocket-Adresse '{adresse}'"))
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Observability-Adresse '{adresse}'"))
    }

    /// Uebersetzt die Datei-Konfiguration in die Laufzeit-Konfiguration
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            max_verbindungen: self.server.max_verbindungen,
            keepalive_sek: self.verbindung.keepalive_sek,
            verbindungs_timeout_sek: self.verbindung.verbindungs_timeout_sek,
            max_frame_groesse: self.verbindung.max_frame_groesse,
            max_handshake_bytes: self.verbindung.max_handshake_bytes,
            tipp_dauer: Duration::from_millis(self.tippen.dauer_ms),
            sweep_intervall: Duration::from_millis(self.tippen.sweep_ms),
            ..RealtimeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_verbindungen, 1024);
        assert_eq!(cfg.netzwerk.ws_port, 8080);
        assert_eq!(cfg.verbindung.keepalive_sek, 30);
        assert_eq!(cfg.tippen.dauer_ms, 3500);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.benutzer.is_empty());
        cfg.pruefen().unwrap();
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ws_bind_adresse().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(
            cfg.observability_bind_adresse().unwrap().to_string(),
            "0.0.0.0:9300"
        );
    }

    #[test]
    fn ungueltige_bind_adresse() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "nirgendwo".into();
        assert!(cfg.ws_bind_adresse().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Test"
            max_verbindungen = 10

            [tippen]
            dauer_ms = 1000

            [[benutzer]]
            id = 1
            anzeigename = "Alice"
            token = "tok-a"

            [[benutzer]]
            id = 2
            anzeigename = "Bob"
            token = "tok-b"

            [[chats]]
            id = 7
            mitglieder = [1, 2]
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Test");
        assert_eq!(cfg.benutzer.len(), 2);
        assert_eq!(cfg.chats[0].mitglieder, vec![1, 2]);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.tippen.sweep_ms, 250);
        cfg.pruefen().unwrap();

        let rt = cfg.realtime_config();
        assert_eq!(rt.max_verbindungen, 10);
        assert_eq!(rt.tipp_dauer, Duration::from_millis(1000));
        assert_eq!(rt.max_nachrichten_laenge, 8000);
    }

    #[test]
    fn doppeltes_token_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        for id in [1, 2] {
            cfg.benutzer.push(BenutzerEintrag {
                id,
                anzeigename: format!("B{id}"),
                token: "gleich".into(),
            });
        }
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn chat_mit_unbekanntem_mitglied_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.benutzer.push(BenutzerEintrag {
            id: 1,
            anzeigename: "Alice".into(),
            token: "t".into(),
        });
        cfg.chats.push(ChatEintrag {
            id: 1,
            mitglieder: vec![1, 99],
        });
        let fehler = cfg.pruefen().unwrap_err().to_string();
        assert!(fehler.contains("99"), "{fehler}");
    }

    #[test]
    fn ungueltiges_log_level() {
        let mut cfg = ServerConfig::default();
        cfg.logging.level = "laut".into();
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn zu_kleine_frame_groesse_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.verbindung.max_frame_groesse = 0;
        assert!(cfg.pruefen().is_err());

        // Eine Nachricht mit 8000 Zeichen muss noch in einen Frame passen
        cfg.verbindung.max_frame_groesse = 8000;
        let fehler = cfg.pruefen().unwrap_err().to_string();
        assert!(fehler.contains("max_frame_groesse"), "{fehler}");

        cfg.verbindung.max_frame_groesse = MIN_FRAME_GROESSE;
        cfg.pruefen().unwrap();
    }

    #[test]
    fn zu_kleines_handshake_limit_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.verbindung.max_handshake_bytes = 0;
        let fehler = cfg.pruefen().unwrap_err().to_string();
        assert!(fehler.contains("max_handshake_bytes"), "{fehler}");

        cfg.verbindung.max_handshake_bytes = MIN_HANDSHAKE_BYTES;
        cfg.pruefen().unwrap();
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/nexus.toml").unwrap();
        assert_eq!(cfg.netzwerk.ws_port, 8080);
    }
}
