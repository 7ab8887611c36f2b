//! Stream envelopes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vesta_types::timestamp::deserialize_optional;
use vesta_types::{NetworkError, Result};

/// Envelope `type` of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Event,
    System,
    Ack,
    Error,
}

/// One decoded server frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl InboundMessage {
    /// Parse a UTF-8 JSON frame payload.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidMessage`] if the payload is not UTF-8 or not a
    /// known envelope.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| NetworkError::InvalidMessage(format!("frame is not UTF-8: {e}")))?;
        serde_json::from_str(text).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
    }

    /// Decode the `data` payload as `T`.
    ///
    /// # Errors
    ///
    /// [`NetworkError::DecodingError`] if `data` is absent or does not match.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| NetworkError::DecodingError("message has no data".into()))?;
        serde_json::from_value(data).map_err(|e| NetworkError::DecodingError(e.to_string()))
    }
}

/// Control frames the client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Subscribe {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        symbols: Vec<String>,
    },
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        symbols: Vec<String>,
    },
    Pong,
    RefreshToken {
        token: String,
    },
}

impl OutboundMessage {
    /// # Errors
    ///
    /// [`NetworkError::EncodingError`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| NetworkError::EncodingError(e.to_string()))
    }
}

/// Lifecycle and data events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(InboundMessage),
    /// The connection ended; `code` is the close code when the peer sent one.
    Disconnected { code: Option<u16> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    #[test]
    fn test_parse_full_envelope() {
        let raw = json!({
            "id": "m-1",
            "type": "event",
            "event": "quote",
            "timestamp": "2024-01-15T10:30:00.123456Z",
            "data": {"symbol": "AAPL", "price": 187.2}
        });
        let msg = InboundMessage::parse(raw.to_string().as_bytes()).unwrap();
        assert_eq!(msg.id.as_deref(), Some("m-1"));
        assert_eq!(msg.kind, MessageKind::Event);
        assert_eq!(msg.event.as_deref(), Some("quote"));
        assert_eq!(msg.timestamp.unwrap().nanosecond(), 123_456_000);
    }

    #[test]
    fn test_parse_minimal_envelope() {
        let msg = InboundMessage::parse(br#"{"type":"ack"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Ack);
        assert!(msg.id.is_none() && msg.data.is_none() && msg.timestamp.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"type":"gossip"}"#,
            br#"{"event":"quote"}"#,
            br#"{"type":"event","timestamp":"yesterday"}"#,
            &[0xff, 0xfe],
        ];
        for raw in cases {
            assert!(
                matches!(InboundMessage::parse(raw), Err(NetworkError::InvalidMessage(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_decode_data() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Quote {
            symbol: String,
        }
        let msg =
            InboundMessage::parse(br#"{"type":"event","data":{"symbol":"MSFT"}}"#).unwrap();
        assert_eq!(
            msg.decode_data::<Quote>().unwrap(),
            Quote {
                symbol: "MSFT".into()
            }
        );

        let empty = InboundMessage::parse(br#"{"type":"system"}"#).unwrap();
        assert!(matches!(
            empty.decode_data::<Quote>(),
            Err(NetworkError::DecodingError(_))
        ));
    }

    #[test]
    fn test_outbound_shapes() {
        let sub = OutboundMessage::Subscribe {
            channels: vec!["quotes".into()],
            symbols: vec!["AAPL".into(), "MSFT".into()],
        };
        assert_eq!(
            serde_json::from_str::<Value>(&sub.to_json().unwrap()).unwrap(),
            json!({"type": "subscribe", "channels": ["quotes"], "symbols": ["AAPL", "MSFT"]})
        );

        let unsub = OutboundMessage::Unsubscribe {
            channels: vec![],
            symbols: vec!["AAPL".into()],
        };
        assert_eq!(
            serde_json::from_str::<Value>(&unsub.to_json().unwrap()).unwrap(),
            json!({"type": "unsubscribe", "symbols": ["AAPL"]})
        );

        assert_eq!(OutboundMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            OutboundMessage::RefreshToken {
                token: "at-2".into()
            }
            .to_json()
            .unwrap(),
            r#"{"type":"refresh_token","token":"at-2"}"#
        );
    }
}
