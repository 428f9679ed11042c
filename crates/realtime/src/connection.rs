//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede akzeptierte TCP-Verbindung bekommt eine `ClientConnection` in einem
//! eigenen lokalen Task. Nach dem Handshake wird der Stream ueber den
//! `FrameCodec` gelesen und geschrieben.
//!
//! ## State Machine
//! ```text
//! Unauthentifiziert -> Authentifiziert(uid) -> Geschlossen
//!        |                  |    ^
//!        |                  +----+  (erneutes auth, ggf. andere Identitaet)
//!        +----------------------------> Geschlossen
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Kommt `verbindungs_timeout_sek` lang kein Frame, wird getrennt
//! - Dieselbe Frist begrenzt jedes Schreiben auf den Stream
//! - 0 deaktiviert jeweils
//!
//! Egal wodurch die Verbindung endet (Close-Frame, EOF, Lese- oder
//! Dekodierfehler, Timeout, Shutdown), der Cleanup laeuft genau einmal am
//! Ende des Tasks.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nexus_core::types::{ConnectionId, UserId};
use nexus_protocol::{handshake_durchfuehren, Frame, FrameCodec, OpCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::{Framed, FramedParts};

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::registry::{ereignis_frame, ClientSender};
use crate::server_state::RealtimeState;
use crate::store::MessengerStore;

/// Wie lange beim Shutdown auf das Schreiben des Close-Frames gewartet wird
const SCHLIESS_FRIST: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand einer WebSocket-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Handshake abgeschlossen, noch keine Identitaet
    Unauthentifiziert,
    /// Unter einer Identitaet registriert
    Authentifiziert(UserId),
    /// Endzustand
    Geschlossen,
}

// ---------------------------------------------------------------------------
// Frame-Auswertung
// ---------------------------------------------------------------------------

/// Was ein empfangener Frame fuer die Verbindung bedeutet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbindungsEreignis {
    /// Text- oder Binaerframe mit gueltigem UTF-8
    Nachricht(String),
    /// Ping: mit Pong und gleichem Payload antworten
    PongSenden(Bytes),
    /// Close-Frame
    Geschlossen,
    /// Pong: nur Lebenszeichen
    Lebenszeichen,
    /// Continuation, reservierte Opcodes, ungueltiges UTF-8
    Ignoriert,
}

/// Bildet einen dekodierten Frame auf ein Verbindungsereignis ab
pub fn frame_auswerten(frame: Frame) -> VerbindungsEreignis {
    match frame.opcode {
        OpCode::Text | OpCode::Binary => match String::from_utf8(frame.payload.to_vec()) {
            Ok(text) => VerbindungsEreignis::Nachricht(text),
            Err(e) => {
                tracing::debug!(fehler = %e, "Frame mit ungueltigem UTF-8 verworfen");
                VerbindungsEreignis::Ignoriert
            }
        },
        OpCode::Ping => VerbindungsEreignis::PongSenden(frame.payload),
        OpCode::Close => VerbindungsEreignis::Geschlossen,
        OpCode::Pong => VerbindungsEreignis::Lebenszeichen,
        OpCode::Continuation | OpCode::Reserviert(_) => {
            tracing::debug!(opcode = frame.opcode.als_u8(), "Frame ignoriert");
            VerbindungsEreignis::Ignoriert
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne WebSocket-Verbindung
///
/// Fuehrt den Handshake durch, liest Frames via `FrameCodec`, dispatcht
/// Textnachrichten an den `MessageDispatcher` und schreibt die Send-Queue
/// der Verbindung auf den Stream.
pub struct ClientConnection<S: MessengerStore + 'static> {
    state: Arc<RealtimeState<S>>,
    peer: String,
}

impl<S: MessengerStore + 'static> ClientConnection<S> {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<RealtimeState<S>>, peer: impl Into<String>) -> Self {
        Self {
            state,
            peer: peer.into(),
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung endet oder ein Shutdown-Signal eingeht.
    /// Ein fehlgeschlagener Handshake beendet den Task, ohne dass je eine
    /// Verbindung entsteht.
    pub async fn verarbeiten<T>(
        self,
        mut stream: T,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = self.peer.as_str();
        let config = Arc::clone(&self.state.config);
        let metriken = self.state.metriken.clone();

        // Handshake
        let handshake = handshake_durchfuehren(&mut stream, config.max_handshake_bytes);
        let rest = match zeitlich_begrenzen(config.verbindungs_timeout_sek, handshake).await {
            Some(Ok(rest)) => rest,
            Some(Err(e)) => {
                metriken.handshake_zaehlen(false);
                tracing::debug!(peer = %peer, fehler = %e, "Handshake abgelehnt");
                return;
            }
            None => {
                metriken.handshake_zaehlen(false);
                tracing::debug!(peer = %peer, "Handshake-Timeout");
                return;
            }
        };
        metriken.handshake_zaehlen(true);
        metriken.connected_clients.inc();

        // Bereits gelesene Bytes gehoeren dem Frame-Decoder
        let mut teile =
            FramedParts::new::<Frame>(stream, FrameCodec::with_max_size(config.max_frame_groesse));
        teile.read_buf = rest;
        let mut framed = Framed::from_parts(teile);

        let verbindung_id = ConnectionId::new();
        let (sender, mut sende_rx) = ClientSender::neu(verbindung_id);
        let mut ctx = DispatcherContext::neu(sender);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        tracing::info!(peer = %peer, verbindung = %verbindung_id, "Neue Verbindung");

        let keepalive = (config.keepalive_sek > 0).then(|| Duration::from_secs(config.keepalive_sek));
        let timeout_dauer = (config.verbindungs_timeout_sek > 0)
            .then(|| Duration::from_secs(config.verbindungs_timeout_sek));

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        // Zeitpunkt des naechsten Ping
        let mut naechster_ping = keepalive.map(|k| Instant::now() + k);

        loop {
            let frist = [naechster_ping, timeout_dauer.map(|t| letzter_empfang + t)]
                .into_iter()
                .flatten()
                .min();
            let wecker = async move {
                match frist {
                    Some(zeitpunkt) => tokio::time::sleep_until(zeitpunkt).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                // Eingehender Frame vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            letzter_empfang = Instant::now();
                            metriken.frames_received_total.inc();

                            match frame_auswerten(frame) {
                                VerbindungsEreignis::Nachricht(text) => {
                                    let antwort = dispatcher.dispatch(&text, &mut ctx).await;
                                    if let Some(frame) = antwort.as_ref().and_then(ereignis_frame) {
                                        let frist = timeout_dauer.map(|t| letzter_empfang + t);
                                        if !begrenzt_senden(&mut framed, frame, frist, peer).await {
                                            break;
                                        }
                                    }
                                }
                                VerbindungsEreignis::PongSenden(payload) => {
                                    let frist = timeout_dauer.map(|t| letzter_empfang + t);
                                    if !begrenzt_senden(&mut framed, Frame::pong(payload), frist, peer).await {
                                        break;
                                    }
                                }
                                VerbindungsEreignis::Geschlossen => {
                                    tracing::info!(peer = %peer, "Close-Frame empfangen");
                                    break;
                                }
                                VerbindungsEreignis::Lebenszeichen => {
                                    tracing::trace!(peer = %peer, "Pong empfangen");
                                }
                                VerbindungsEreignis::Ignoriert => {}
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Frames aus der Registry
                Some(ausgehend) = sende_rx.recv() => {
                    let frist = timeout_dauer.map(|t| letzter_empfang + t);
                    if !begrenzt_senden(&mut framed, ausgehend, frist, peer).await {
                        break;
                    }
                }

                // Keepalive-Ping und Timeout
                _ = wecker => {
                    let jetzt = Instant::now();
                    if let Some(t) = timeout_dauer {
                        if jetzt.duration_since(letzter_empfang) >= t {
                            tracing::warn!(peer = %peer, "Verbindungs-Timeout");
                            break;
                        }
                    }
                    if let (Some(k), Some(faellig)) = (keepalive, naechster_ping) {
                        if jetzt >= faellig {
                            let frist = timeout_dauer.map(|t| letzter_empfang + t);
                            if !begrenzt_senden(&mut framed, Frame::ping(Bytes::new()), frist, peer).await {
                                break;
                            }
                            naechster_ping = Some(Instant::now() + k);
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer, "Shutdown-Signal – Verbindung wird getrennt");
                        let frist = Some(Instant::now() + SCHLIESS_FRIST);
                        begrenzt_senden(&mut framed, Frame::close(), frist, peer).await;
                        break;
                    }
                }
            }
        }

        // Cleanup beim Verbindungsende
        let letzter_zustand = ctx.zustand();
        dispatcher.verbindung_cleanup(&mut ctx).await;
        metriken.connected_clients.dec();

        tracing::info!(
            peer = %peer,
            verbindung = %verbindung_id,
            zuvor = ?letzter_zustand,
            zustand = ?VerbindungsZustand::Geschlossen,
            "Verbindungs-Task beendet"
        );
    }
}

/// Schreibt einen Frame auf den Stream, hoechstens bis `frist`
///
/// Ein Client, der nicht mehr liest, blockiert das Schreiben sonst
/// unbegrenzt. Gibt `false` zurueck wenn das Schreiben fehlschlug oder die
/// Frist verstrichen ist; die Verbindung wird dann getrennt.
async fn begrenzt_senden<T>(
    framed: &mut Framed<T, FrameCodec>,
    frame: Frame,
    frist: Option<Instant>,
    peer: &str,
) -> bool
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let opcode = frame.opcode;
    let senden = framed.send(frame);
    let ergebnis = match frist {
        Some(frist) => match tokio::time::timeout_at(frist, senden).await {
            Ok(ergebnis) => ergebnis,
            Err(_) => {
                tracing::warn!(peer = %peer, "Schreib-Timeout – Client liest nicht");
                return false;
            }
        },
        None => senden.await,
    };

    match ergebnis {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer = %peer, opcode = opcode.als_u8(), fehler = %e, "Senden fehlgeschlagen");
            false
        }
    }
}

/// Begrenzt eine Future auf `sekunden` (0 = unbegrenzt)
async fn zeitlich_begrenzen<F: std::future::Future>(sekunden: u64, future: F) -> Option<F::Output> {
    if sekunden == 0 {
        return Some(future.await);
    }
    tokio::time::timeout(Duration::from_secs(sekunden), future)
        .await
        .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textframe_wird_nachricht() {
        let ereignis = frame_auswerten(Frame::text(r#"{"type":"auth"}"#));
        assert_eq!(
            ereignis,
            VerbindungsEreignis::Nachricht(r#"{"type":"auth"}"#.into())
        );
    }

    #[test]
    fn binaerframe_mit_utf8_wird_nachricht() {
        let ereignis = frame_auswerten(Frame::binary(&b"hallo"[..]));
        assert_eq!(ereignis, VerbindungsEreignis::Nachricht("hallo".into()));
    }

    #[test]
    fn ungueltiges_utf8_wird_ignoriert() {
        let ereignis = frame_auswerten(Frame::text(vec![0xff, 0xfe, 0xfd]));
        assert_eq!(ereignis, VerbindungsEreignis::Ignoriert);
    }

    #[test]
    fn ping_wird_pong_mit_payload() {
        let ereignis = frame_auswerten(Frame::ping(&b"abc"[..]));
        assert_eq!(
            ereignis,
            VerbindungsEreignis::PongSenden(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn steuerframes() {
        assert_eq!(frame_auswerten(Frame::close()), VerbindungsEreignis::Geschlossen);
        assert_eq!(
            frame_auswerten(Frame::pong(Bytes::new())),
            VerbindungsEreignis::Lebenszeichen
        );
    }

    #[test]
    fn continuation_und_reserviert_ignoriert() {
        assert_eq!(
            frame_auswerten(Frame::neu(OpCode::Continuation, &b"x"[..])),
            VerbindungsEreignis::Ignoriert
        );
        assert_eq!(
            frame_auswerten(Frame::neu(OpCode::Reserviert(3), &b"x"[..])),
            VerbindungsEreignis::Ignoriert
        );
    }

    #[tokio::test]
    async fn zeitbegrenzung_null_ist_unbegrenzt() {
        assert_eq!(zeitlich_begrenzen(0, async { 5 }).await, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn zeitbegrenzung_laeuft_ab() {
        let ergebnis = zeitlich_begrenzen(1, std::future::pending::<()>()).await;
        assert!(ergebnis.is_none());
    }
}
