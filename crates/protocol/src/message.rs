use serde::{Deserialize, Serialize};

/// Current time as seconds since the Unix epoch.
///
/// All timestamps on the wire are server-stamped with this at
/// dispatch time; client-supplied values are overwritten.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The `type` tag is not part of the protocol. Forward-tolerant:
    /// the dispatcher logs and drops these without erroring back.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A message on the persistent connection.
///
/// Serialized as flat JSON with a `type` discriminator, e.g.
/// `{"type":"chat","text":"hi","from":"laptop","timestamp":1700000000}`.
///
/// `from`, `device` and `timestamp` are stamped by the server from the
/// authenticated connection before a message is broadcast; values sent
/// by clients are never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Identification. Sent by the server as a welcome on register,
    /// and by a client to (re)announce its device name.
    Hello {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        device: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        capabilities: Vec<String>,
        #[serde(default)]
        timestamp: i64,
    },
    Chat {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        id: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        from: String,
        #[serde(default)]
        timestamp: i64,
    },
    /// Server-originated announcement of a finalized upload. Never
    /// accepted from clients; offers are pushed by whatever completed
    /// the upload.
    FileOffer {
        offer_id: String,
        from: String,
        name: String,
        size: i64,
        mime: String,
        sha256: String,
        url: String,
        #[serde(default)]
        timestamp: i64,
    },
    FileOfferAck {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        offer_id: String,
        #[serde(default)]
        accepted: bool,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        from: String,
        #[serde(default)]
        timestamp: i64,
    },
    DeliveryAck {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        from: String,
        #[serde(default)]
        timestamp: i64,
    },
    Typing {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        from: String,
        #[serde(default)]
        timestamp: i64,
    },
    /// A device joined (broadcast after an inbound hello).
    Presence {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        device: String,
        #[serde(default)]
        timestamp: i64,
    },
    /// Application-level liveness probe, distinct from the
    /// WebSocket-level ping control frame. Both mechanisms run.
    Ping {
        #[serde(default)]
        timestamp: i64,
    },
}

/// Known type tags, in the order of the enum.
const KNOWN_TAGS: &[&str] = &[
    "hello",
    "chat",
    "file_offer",
    "file_offer_ack",
    "delivery_ack",
    "typing",
    "presence",
    "ping",
];

#[derive(Deserialize)]
struct TagProbe {
    #[serde(rename = "type")]
    tag: String,
}

impl WireMessage {
    /// Decodes a frame, reading only the `type` discriminator first.
    ///
    /// Unknown tags yield [`DecodeError::UnknownType`] so the caller
    /// can log the tag and drop the frame without treating it as
    /// malformed traffic.
    pub fn decode(text: &str) -> Result<WireMessage, DecodeError> {
        let probe: TagProbe = serde_json::from_str(text)?;
        if !KNOWN_TAGS.contains(&probe.tag.as_str()) {
            return Err(DecodeError::UnknownType(probe.tag));
        }
        Ok(serde_json::from_str(text)?)
    }

    /// The message's type tag as it appears on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Chat { .. } => "chat",
            WireMessage::FileOffer { .. } => "file_offer",
            WireMessage::FileOfferAck { .. } => "file_offer_ack",
            WireMessage::DeliveryAck { .. } => "delivery_ack",
            WireMessage::Typing { .. } => "typing",
            WireMessage::Presence { .. } => "presence",
            WireMessage::Ping { .. } => "ping",
        }
    }

    /// Stamps the sender and timestamp from the authenticated
    /// connection, overriding whatever the client claimed.
    pub fn stamp(&mut self, sender: &str, ts: i64) {
        match self {
            WireMessage::Chat {
                from, timestamp, ..
            }
            | WireMessage::FileOfferAck {
                from, timestamp, ..
            }
            | WireMessage::DeliveryAck {
                from, timestamp, ..
            }
            | WireMessage::Typing { from, timestamp } => {
                *from = sender.to_string();
                *timestamp = ts;
            }
            WireMessage::Hello {
                device, timestamp, ..
            }
            | WireMessage::Presence { device, timestamp } => {
                *device = sender.to_string();
                *timestamp = ts;
            }
            WireMessage::FileOffer {
                from, timestamp, ..
            } => {
                *from = sender.to_string();
                *timestamp = ts;
            }
            WireMessage::Ping { timestamp } => *timestamp = ts,
        }
    }

    /// Server welcome / identification message.
    pub fn hello(device: impl Into<String>) -> Self {
        WireMessage::Hello {
            device: device.into(),
            capabilities: Vec::new(),
            timestamp: now_ts(),
        }
    }

    /// Presence broadcast for a device that just identified itself.
    pub fn presence(device: impl Into<String>) -> Self {
        WireMessage::Presence {
            device: device.into(),
            timestamp: now_ts(),
        }
    }

    /// Application-level liveness probe.
    pub fn ping() -> Self {
        WireMessage::Ping { timestamp: now_ts() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_roundtrip() {
        let msg = WireMessage::Chat {
            id: "m1".into(),
            text: "hi".into(),
            from: "laptop".into(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"chat""#));
        let parsed = WireMessage::decode(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn tag_matches_wire_name() {
        let msg = WireMessage::FileOfferAck {
            offer_id: "o1".into(),
            accepted: true,
            from: String::new(),
            timestamp: 0,
        };
        assert_eq!(msg.tag(), "file_offer_ack");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"file_offer_ack""#));
    }

    #[test]
    fn decode_unknown_tag() {
        let err = WireMessage::decode(r#"{"type":"telepathy","x":1}"#).unwrap_err();
        match err {
            DecodeError::UnknownType(tag) => assert_eq!(tag, "telepathy"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn decode_malformed_json() {
        assert!(matches!(
            WireMessage::decode("not json {{{"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_tolerates_missing_optional_fields() {
        let msg = WireMessage::decode(r#"{"type":"chat","text":"yo"}"#).unwrap();
        match msg {
            WireMessage::Chat {
                text,
                from,
                timestamp,
                ..
            } => {
                assert_eq!(text, "yo");
                assert!(from.is_empty());
                assert_eq!(timestamp, 0);
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn stamp_overrides_client_values() {
        let mut msg = WireMessage::Chat {
            id: String::new(),
            text: "hi".into(),
            from: "forged".into(),
            timestamp: 12345,
        };
        msg.stamp("laptop", 1_700_000_042);
        match msg {
            WireMessage::Chat {
                from, timestamp, ..
            } => {
                assert_eq!(from, "laptop");
                assert_eq!(timestamp, 1_700_000_042);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_fields_are_omitted() {
        let msg = WireMessage::Chat {
            id: String::new(),
            text: "hi".into(),
            from: String::new(),
            timestamp: 0,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains(r#""id""#));
        assert!(!json.contains(r#""from""#));
    }

    #[test]
    fn file_offer_carries_download_contract() {
        let msg = WireMessage::FileOffer {
            offer_id: "abc".into(),
            from: "server".into(),
            name: "photo.jpg".into(),
            size: 1000,
            mime: "image/jpeg".into(),
            sha256: "00".repeat(32),
            url: "/files/abc".into(),
            timestamp: 1,
        };
        let json = serde_json::to_string(&msg).unwrap();
        for field in ["offer_id", "name", "size", "mime", "sha256", "url"] {
            assert!(json.contains(field), "missing {field}");
        }
    }

    #[test]
    fn go_style_hello_decodes() {
        // Shape sent by existing web clients.
        let json = r#"{"type":"hello","device":"phone","capabilities":["chat","files"]}"#;
        match WireMessage::decode(json).unwrap() {
            WireMessage::Hello {
                device,
                capabilities,
                ..
            } => {
                assert_eq!(device, "phone");
                assert_eq!(capabilities, vec!["chat", "files"]);
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }
}
