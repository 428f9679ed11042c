//! Wire-Format fuer WebSocket-Verbindungen (RFC 6455 Framing)
//!
//! ## Frame-Format
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Basislaenge |  erweiterte Laenge (16/64)    |
//! |I|S|S|S|  (4)  |A|     (7)     |  nur bei 126 / 127            |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |  Masken-Key (4 Bytes, nur wenn MASK gesetzt) | Payload ...    |
//! +----------------------------------------------+----------------+
//! ```
//!
//! Client -> Server Frames sind maskiert, Server -> Client Frames nie.
//! Ausgehende Frames werden nicht fragmentiert (FIN immer gesetzt).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Payload-Groesse eines Frames (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Mindestgroesse des Frame-Headers (Byte 0 + Byte 1)
const BASIS_HEADER_GROESSE: usize = 2;

/// Groesse des Masken-Keys
const MASKEN_GROESSE: usize = 4;

/// Basislaenge die eine 16-Bit-Laenge ankuendigt
const LAENGE_16_BIT: u8 = 126;

/// Basislaenge die eine 64-Bit-Laenge ankuendigt
const LAENGE_64_BIT: u8 = 127;

// ---------------------------------------------------------------------------
// OpCode
// ---------------------------------------------------------------------------

/// Frame-Typ (untere 4 Bits von Byte 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Fortsetzung einer fragmentierten Nachricht
    Continuation,
    /// UTF-8-Textnachricht
    Text,
    /// Binaernachricht
    Binary,
    /// Verbindungsabbau
    Close,
    /// Keepalive-Anfrage
    Ping,
    /// Keepalive-Antwort
    Pong,
    /// Reservierter Wert (3-7, 0xB-0xF)
    Reserviert(u8),
}

impl OpCode {
    /// Wandelt die unteren 4 Bits in einen OpCode um
    pub fn aus_u8(wert: u8) -> Self {
        match wert & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            andere => Self::Reserviert(andere),
        }
    }

    /// Gibt den numerischen Wert zurueck
    pub fn als_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserviert(wert) => wert & 0x0F,
        }
    }

    /// Steuer-Frames haben das hoechste Opcode-Bit gesetzt
    pub fn ist_steuerframe(self) -> bool {
        self.als_u8() & 0x08 != 0
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein einzelner dekodierter oder zu sendender Frame
///
/// Der Payload ist bereits demaskiert. `maske` haelt den Masken-Key eines
/// empfangenen Client-Frames nur zu Diagnosezwecken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub maske: Option<[u8; MASKEN_GROESSE]>,
    pub payload: Bytes,
}

impl Frame {
    /// Erstellt einen unmaskierten, nicht fragmentierten Frame
    pub fn neu(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            maske: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::neu(OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::neu(OpCode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::neu(OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::neu(OpCode::Pong, payload)
    }

    pub fn close() -> Self {
        Self::neu(OpCode::Close, Bytes::new())
    }

    /// Ob der Frame beim Empfang maskiert war
    pub fn ist_maskiert(&self) -> bool {
        self.maske.is_some()
    }

    /// Laenge des (demaskierten) Payloads
    pub fn payload_laenge(&self) -> usize {
        self.payload.len()
    }

    /// Interpretiert den Payload als UTF-8-Text
    pub fn als_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Kodiert den Frame maskiert, wie es ein Client tun muss
    ///
    /// Der Server selbst sendet nie maskiert (siehe [`FrameCodec`]); diese
    /// Funktion ist fuer Client-Werkzeuge und Tests gedacht.
    pub fn maskiert_kodieren(&self, maske: [u8; MASKEN_GROESSE], dst: &mut BytesMut) {
        header_schreiben(dst, self.fin, self.opcode, Some(maske), self.payload.len());
        let start = dst.len();
        dst.put_slice(&self.payload);
        maske_anwenden(&mut dst[start..], maske);
    }
}

/// XOR-Maskierung; dieselbe Operation maskiert und demaskiert
pub fn maske_anwenden(daten: &mut [u8], maske: [u8; MASKEN_GROESSE]) {
    for (i, byte) in daten.iter_mut().enumerate() {
        *byte ^= maske[i % MASKEN_GROESSE];
    }
}

/// Schreibt Byte 0, Laengenfeld und optional den Masken-Key
fn header_schreiben(
    dst: &mut BytesMut,
    fin: bool,
    opcode: OpCode,
    maske: Option<[u8; MASKEN_GROESSE]>,
    laenge: usize,
) {
    dst.reserve(10 + MASKEN_GROESSE + laenge);

    let fin_bit = if fin { 0x80 } else { 0x00 };
    dst.put_u8(fin_bit | opcode.als_u8());

    let masken_bit = if maske.is_some() { 0x80 } else { 0x00 };
    if laenge < LAENGE_16_BIT as usize {
        dst.put_u8(masken_bit | laenge as u8);
    } else if laenge <= u16::MAX as usize {
        dst.put_u8(masken_bit | LAENGE_16_BIT);
        dst.put_u16(laenge as u16);
    } else {
        dst.put_u8(masken_bit | LAENGE_64_BIT);
        dst.put_u64(laenge as u64);
    }

    if let Some(maske) = maske {
        dst.put_slice(&maske);
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer WebSocket-Frames
///
/// Implementiert `Encoder<Frame>` und `Decoder` fuer nahtlose Integration
/// mit `tokio_util::codec::Framed`. Der Lese-Puffer von `Framed` ist der
/// Akkumulator fuer noch nicht dekodierte Bytes: `decode` entnimmt genau
/// einen vollstaendigen Frame und laesst den Rest im Puffer.
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use nexus_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < BASIS_HEADER_GROESSE {
            return Ok(None);
        }

        let fin = src[0] & 0x80 != 0;
        let opcode = OpCode::aus_u8(src[0]);
        let maskiert = src[1] & 0x80 != 0;
        let basis_laenge = src[1] & 0x7F;

        // Laengenfeld lesen ohne den Buffer zu veraendern
        let (header_groesse, payload_laenge) = match basis_laenge {
            LAENGE_16_BIT => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (4, u16::from_be_bytes([src[2], src[3]]) as u64)
            }
            LAENGE_64_BIT => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut laenge = [0u8; 8];
                laenge.copy_from_slice(&src[2..10]);
                (10, u64::from_be_bytes(laenge))
            }
            kurz => (BASIS_HEADER_GROESSE, kurz as u64),
        };

        if payload_laenge > self.max_frame_size as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    payload_laenge, self.max_frame_size
                ),
            ));
        }
        let payload_laenge = payload_laenge as usize;

        let masken_groesse = if maskiert { MASKEN_GROESSE } else { 0 };
        let gesamt = header_groesse + masken_groesse + payload_laenge;
        if src.len() < gesamt {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(header_groesse);

        let maske = if maskiert {
            let maske = [src[0], src[1], src[2], src[3]];
            src.advance(MASKEN_GROESSE);
            Some(maske)
        } else {
            None
        };

        let mut payload = src.split_to(payload_laenge);
        if let Some(maske) = maske {
            maske_anwenden(&mut payload, maske);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            maske,
            payload: payload.freeze(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    item.payload.len(),
                    self.max_frame_size
                ),
            ));
        }

        // Server -> Client: nie maskiert, nie fragmentiert
        header_schreiben(dst, true, item.opcode, None, item.payload.len());
        dst.put_slice(&item.payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
