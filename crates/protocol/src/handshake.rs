//! WebSocket-Handshake (HTTP Upgrade -> 101 Switching Protocols)
//!
//! Liest die Upgrade-Anfrage bis zur Leerzeile, prueft den
//! `Sec-WebSocket-Key` und beantwortet sie mit dem Accept-Token
//! `base64(SHA-1(key + GUID))`. Fehlt der Schluessel, wird nichts
//! geantwortet: der Aufrufer schliesst den Stream einfach.
//!
//! Bytes, die nach der Leerzeile bereits im Puffer liegen (ein Client darf
//! seinen ersten Frame direkt hinterher schicken), werden zurueckgegeben und
//! muessen in den Lese-Puffer des Frame-Decoders uebernommen werden.

use base64::Engine;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Feste GUID aus RFC 6455
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Standard-Obergrenze fuer die Groesse der Upgrade-Anfrage (8 KB)
pub const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

/// Ende des HTTP-Headers
const HEADER_ENDE: &[u8] = b"\r\n\r\n";

/// Fehler waehrend des Handshakes
///
/// Alle Varianten sind fuer den betroffenen Socket endgueltig.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// IO-Fehler beim Lesen oder Schreiben
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Stream endete vor der Leerzeile
    #[error("Verbindung vor Ende des Handshakes geschlossen")]
    VorzeitigesEnde,

    /// Anfrage ueberschreitet die Obergrenze
    #[error("Handshake-Anfrage zu gross (Maximum: {0} Bytes)")]
    ZuGross(usize),

    /// `Sec-WebSocket-Key` fehlt oder ist leer
    #[error("Sec-WebSocket-Key fehlt oder ist leer")]
    SchluesselFehlt,
}

/// Berechnet das `Sec-WebSocket-Accept`-Token fuer einen Client-Schluessel
pub fn accept_token(schluessel: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(schluessel.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Sucht den `Sec-WebSocket-Key` in einer rohen HTTP-Anfrage
///
/// Header-Namen werden ohne Beachtung der Gross-/Kleinschreibung verglichen.
/// Gibt `None` zurueck wenn der Header fehlt oder leer ist.
pub fn schluessel_aus_anfrage(anfrage: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(anfrage);
    text.split("\r\n")
        // Request-Zeile ueberspringen
        .skip(1)
        .take_while(|zeile| !zeile.is_empty())
        .filter_map(|zeile| zeile.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-key"))
        .map(|(_, wert)| wert.trim().to_string())
        .filter(|wert| !wert.is_empty())
}

/// Baut die `101 Switching Protocols`-Antwort
pub fn antwort_101(schluessel: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_token(schluessel)
    )
}

/// Fuehrt den serverseitigen Handshake auf einem rohen Stream durch
///
/// Gibt bei Erfolg die bereits gelesenen, aber nicht mehr zum Handshake
/// gehoerenden Bytes zurueck.
///
/// # Fehler
/// - `SchluesselFehlt` wenn der Header fehlt (es wurde nichts geschrieben)
/// - `ZuGross` / `VorzeitigesEnde` bei unvollstaendigen Anfragen
/// - `Io` bei Lese- oder Schreibfehlern
pub async fn handshake_durchfuehren<S>(
    stream: &mut S,
    max_bytes: usize,
) -> Result<BytesMut, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut puffer = BytesMut::with_capacity(1024);

    let anfrage_ende = loop {
        if let Some(pos) = puffer
            .windows(HEADER_ENDE.len())
            .position(|fenster| fenster == HEADER_ENDE)
        {
            let ende = pos + HEADER_ENDE.len();
            if ende > max_bytes {
                return Err(HandshakeError::ZuGross(max_bytes));
            }
            break ende;
        }

        if puffer.len() >= max_bytes {
            return Err(HandshakeError::ZuGross(max_bytes));
        }

        if stream.read_buf(&mut puffer).await? == 0 {
            return Err(HandshakeError::VorzeitigesEnde);
        }
    };

    let anfrage = puffer.split_to(anfrage_ende);
    let schluessel = schluessel_aus_anfrage(&anfrage).ok_or(HandshakeError::SchluesselFehlt)?;

    stream.write_all(antwort_101(&schluessel).as_bytes()).await?;
    stream.flush().await?;

    Ok(puffer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
