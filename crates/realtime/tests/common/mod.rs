//! Gemeinsame Hilfen fuer die Integration-Tests
//!
//! `TestClient` spricht das Client-Protokoll ueber `tokio::io::duplex`:
//! Upgrade-Anfrage schreiben, 101 lesen, maskierte Frames senden.

#![allow(dead_code)]

use bytes::BytesMut;
use futures_util::StreamExt;
use nexus_core::types::{ChatId, UserId};
use nexus_observability::NexusMetrics;
use nexus_protocol::{Frame, FrameCodec, OpCode};
use nexus_realtime::{ClientConnection, MemoryStore, RealtimeConfig, RealtimeState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio_util::codec::{Framed, FramedParts};

pub const ALICE: UserId = UserId(1);
pub const BOB: UserId = UserId(2);
pub const CAROL: UserId = UserId(3);
pub const DAVE: UserId = UserId(4);

/// Alice + Bob
pub const CHAT_AB: ChatId = ChatId(1);
/// Alice + Bob + Carol
pub const CHAT_ABC: ChatId = ChatId(2);
/// Carol + Dave
pub const CHAT_CD: ChatId = ChatId(3);

pub const TEST_SCHLUESSEL: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Konfiguration ohne Keepalive und Timeout
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        keepalive_sek: 0,
        verbindungs_timeout_sek: 0,
        ..Default::default()
    }
}

pub fn test_store() -> MemoryStore {
    let store = MemoryStore::neu();
    store.benutzer_anlegen(ALICE, "Alice", "tok-alice");
    store.benutzer_anlegen(BOB, "Bob", "tok-bob");
    store.benutzer_anlegen(CAROL, "Carol", "tok-carol");
    store.benutzer_anlegen(DAVE, "Dave", "tok-dave");
    store.chat_anlegen(CHAT_AB, [ALICE, BOB]);
    store.chat_anlegen(CHAT_ABC, [ALICE, BOB, CAROL]);
    store.chat_anlegen(CHAT_CD, [CAROL, DAVE]);
    store
}

/// Log-Ausgabe ueber den Test-Writer (nur bei fehlschlagenden Tests sichtbar)
pub fn test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nexus_realtime=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_state(config: RealtimeConfig) -> Arc<RealtimeState<MemoryStore>> {
    test_logging();
    RealtimeState::neu(
        config,
        Arc::new(test_store()),
        NexusMetrics::neu().expect("Metriken"),
    )
}

pub fn upgrade_anfrage(schluessel: &str) -> String {
    format!(
        "GET /ws HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {schluessel}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Startet eine serverseitige Verbindung auf einem Duplex-Ende
///
/// Muss innerhalb einer `LocalSet` aufgerufen werden.
pub fn verbindung_starten(
    state: &Arc<RealtimeState<MemoryStore>>,
    shutdown_rx: watch::Receiver<bool>,
) -> (DuplexStream, tokio::task::JoinHandle<()>) {
    verbindung_mit_puffer_starten(state, shutdown_rx, 256 * 1024)
}

/// Wie `verbindung_starten`, mit vorgegebener Duplex-Puffergroesse
pub fn verbindung_mit_puffer_starten(
    state: &Arc<RealtimeState<MemoryStore>>,
    shutdown_rx: watch::Receiver<bool>,
    puffer: usize,
) -> (DuplexStream, tokio::task::JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(puffer);
    let verbindung = ClientConnection::neu(Arc::clone(state), "duplex");
    let handle = tokio::task::spawn_local(verbindung.verarbeiten(server, shutdown_rx));
    (client, handle)
}

pub struct TestClient {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl TestClient {
    /// Verbindet, fuehrt den Handshake durch und gibt den Client zurueck
    pub async fn verbinden(
        state: &Arc<RealtimeState<MemoryStore>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self::mit_puffer_verbinden(state, shutdown_rx, 256 * 1024).await
    }

    pub async fn mit_puffer_verbinden(
        state: &Arc<RealtimeState<MemoryStore>>,
        shutdown_rx: watch::Receiver<bool>,
        puffer: usize,
    ) -> Self {
        let (mut stream, _) = verbindung_mit_puffer_starten(state, shutdown_rx, puffer);
        stream
            .write_all(upgrade_anfrage(TEST_SCHLUESSEL).as_bytes())
            .await
            .unwrap();

        let mut puffer = BytesMut::new();
        let ende = loop {
            if let Some(pos) = puffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read_buf(&mut puffer))
                .await
                .expect("Handshake-Antwort ausgeblieben")
                .unwrap();
            assert!(n > 0, "Server hat waehrend des Handshakes geschlossen");
        };
        let antwort = puffer.split_to(ende);
        assert!(antwort.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));

        let mut teile = FramedParts::new::<Frame>(stream, FrameCodec::new());
        teile.read_buf = puffer;
        Self {
            framed: Framed::from_parts(teile),
        }
    }

    /// Verbindet und authentifiziert; konsumiert `auth_ok`
    pub async fn angemeldet(
        state: &Arc<RealtimeState<MemoryStore>>,
        shutdown_rx: watch::Receiver<bool>,
        token: &str,
    ) -> Self {
        let mut client = Self::verbinden(state, shutdown_rx).await;
        client
            .json_senden(serde_json::json!({"type": "auth", "token": token}))
            .await;
        let antwort = client.json_empfangen().await;
        assert_eq!(antwort["type"], "auth_ok", "Anmeldung mit {token} fehlgeschlagen");
        client
    }

    /// Sendet einen Frame maskiert, wie es ein Browser tut
    pub async fn frame_senden(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        frame.maskiert_kodieren([0x12, 0x34, 0x56, 0x78], &mut buf);
        self.roh_senden(&buf).await;
    }

    pub async fn roh_senden(&mut self, bytes: &[u8]) {
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }

    pub async fn json_senden(&mut self, wert: serde_json::Value) {
        self.frame_senden(Frame::text(wert.to_string())).await;
    }

    /// Naechster Frame; `None` wenn der Server geschlossen hat
    pub async fn frame_empfangen(&mut self) -> Option<Frame> {
        self.frame_empfangen_innerhalb(Duration::from_secs(2)).await
    }

    pub async fn frame_empfangen_innerhalb(&mut self, frist: Duration) -> Option<Frame> {
        tokio::time::timeout(frist, self.framed.next())
            .await
            .expect("Kein Frame innerhalb der Frist")
            .map(|f| f.expect("Frame-Lesefehler"))
    }

    /// Naechster Textframe als JSON
    pub async fn json_empfangen(&mut self) -> serde_json::Value {
        let frame = self
            .frame_empfangen()
            .await
            .expect("Verbindung unerwartet geschlossen");
        assert_eq!(frame.opcode, OpCode::Text, "Textframe erwartet: {frame:?}");
        serde_json::from_str(frame.als_text().unwrap()).unwrap()
    }

    /// Stellt sicher, dass in kurzer Zeit nichts ankommt
    pub async fn nichts_empfangen(&mut self) {
        if let Ok(frame) =
            tokio::time::timeout(Duration::from_millis(150), self.framed.next()).await
        {
            panic!("Unerwarteter Frame: {frame:?}");
        }
    }

    /// Wartet bis der Server die Verbindung schliesst
    pub async fn auf_ende_warten(&mut self) {
        loop {
            match self.frame_empfangen_innerhalb(Duration::from_secs(60)).await {
                None => return,
                Some(f) if f.opcode == OpCode::Close => return,
                Some(_) => continue,
            }
        }
    }
}
