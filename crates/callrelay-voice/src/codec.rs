//! Media codec adapter between the telephony leg and the speech engine.
//!
//! Both legs carry 8 kHz G.711 mu-law as base64 text, so the adapter does
//! not transcode. It validates every payload at the boundary and
//! re-encodes it canonically, which keeps a corrupt frame from one leg from
//! ever reaching the other.

use crate::error::VoiceError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Audio encodings understood by both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// 8 kHz, 8-bit G.711 mu-law.
    #[default]
    G711Ulaw,
}

impl AudioFormat {
    /// Name the engine uses for this format in its session configuration.
    pub fn engine_name(self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
        }
    }

    /// Bytes in one 20 ms telephony frame.
    pub fn frame_bytes(self) -> usize {
        match self {
            Self::G711Ulaw => 160,
        }
    }

    /// Encoded value of digital silence.
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::G711Ulaw => 0xFF,
        }
    }
}

/// Stateless converter between telephony payloads and engine audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCodec {
    format: AudioFormat,
}

impl MediaCodec {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    /// Converts a telephony media payload into an engine audio-append payload.
    pub fn to_engine(&self, payload: &str) -> Result<String, VoiceError> {
        let bytes = decode(payload)?;
        Ok(STANDARD.encode(bytes))
    }

    /// Converts an engine speech delta into a telephony media payload.
    pub fn to_telephony(&self, delta: &str) -> Result<String, VoiceError> {
        let bytes = decode(delta)?;
        Ok(STANDARD.encode(bytes))
    }

    /// Splits raw audio into base64 telephony frames of 20 ms each.
    ///
    /// The final frame is padded with silence so every frame has the same
    /// duration.
    pub fn frames(&self, audio: &[u8]) -> Vec<String> {
        let frame_bytes = self.format.frame_bytes();
        audio
            .chunks(frame_bytes)
            .map(|chunk| {
                if chunk.len() == frame_bytes {
                    STANDARD.encode(chunk)
                } else {
                    let mut padded = chunk.to_vec();
                    padded.resize(frame_bytes, self.format.silence_byte());
                    STANDARD.encode(padded)
                }
            })
            .collect()
    }
}

fn decode(payload: &str) -> Result<Vec<u8>, VoiceError> {
    if payload.is_empty() {
        return Err(VoiceError::Codec("empty audio payload".to_string()));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| VoiceError::Codec(format!("invalid base64 audio: {}", e)))
}
