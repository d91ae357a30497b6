//! Telephony media-stream frames.

use crate::error::CallError;
use callrelay_types::CallParameters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded frame received from the telephony leg.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyFrame {
    Connected,
    Start {
        stream_sid: String,
        call_sid: Option<String>,
        parameters: CallParameters,
    },
    Media { payload: String },
    Dtmf { digit: String },
    Mark { name: Option<String> },
    Stop,
    /// Any event this relay does not know.
    Other { kind: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    stream_sid: String,
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    custom_parameters: CallParameters,
}

#[derive(Deserialize)]
struct MediaBody {
    payload: String,
}

#[derive(Deserialize)]
struct DtmfBody {
    digit: String,
}

impl TelephonyFrame {
    pub fn decode(text: &str) -> Result<Self, CallError> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| CallError::MalformedEnvelope(format!("invalid json: {}", e)))?;
        let kind = value
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CallError::MalformedEnvelope("missing event name".to_string()))?;

        let mut body = |key: &str| value.get_mut(key).map(Value::take).unwrap_or(Value::Null);
        let malformed = |e: serde_json::Error| {
            CallError::MalformedEnvelope(format!("invalid {} frame: {}", kind, e))
        };

        match kind.as_str() {
            "connected" => Ok(Self::Connected),
            "start" => {
                let start: StartBody = serde_json::from_value(body("start")).map_err(malformed)?;
                Ok(Self::Start {
                    stream_sid: start.stream_sid,
                    call_sid: start.call_sid,
                    parameters: start.custom_parameters.normalized(),
                })
            }
            "media" => {
                let media: MediaBody = serde_json::from_value(body("media")).map_err(malformed)?;
                Ok(Self::Media {
                    payload: media.payload,
                })
            }
            "dtmf" => {
                let dtmf: DtmfBody = serde_json::from_value(body("dtmf")).map_err(malformed)?;
                Ok(Self::Dtmf { digit: dtmf.digit })
            }
            "mark" => Ok(Self::Mark {
                name: body("mark")
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "stop" => Ok(Self::Stop),
            _ => Ok(Self::Other { kind: kind.clone() }),
        }
    }
}

/// Frame sent to the telephony leg.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia<'a>,
    },
    /// Discards audio the telephony leg has queued but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia<'a> {
    pub payload: &'a str,
}

impl<'a> OutboundFrame<'a> {
    pub fn media(stream_sid: &'a str, payload: &'a str) -> Self {
        Self::Media {
            stream_sid,
            media: OutboundMedia { payload },
        }
    }

    pub fn clear(stream_sid: &'a str) -> Self {
        Self::Clear { stream_sid }
    }

    pub fn to_json(&self) -> String {
        // Only borrowed strings: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
