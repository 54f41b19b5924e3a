use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier a device presents when it connects. The gateway never
/// parses it; it only hashes and compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The three kinds of event a device connection can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Connect,
    Disconnect,
    MessageReceived,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::MessageReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::MessageReceived => "messageReceived",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Peer address as seen by the listener, when known.
    pub remote_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectInfo {
    /// Human-readable reason the connection ended.
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Connect(ConnectInfo),
    Disconnect(DisconnectInfo),
    /// Raw frame bytes as received from the device.
    Message(Vec<u8>),
}

/// One observation on a device connection. Built once at the transport edge
/// and handed to the delivery tier by value; nothing downstream mutates it.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub device: DeviceId,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl LifecycleEvent {
    pub fn connect(device: DeviceId, remote_addr: Option<String>) -> Self {
        Self {
            kind: EventKind::Connect,
            device,
            at: Utc::now(),
            payload: EventPayload::Connect(ConnectInfo { remote_addr }),
        }
    }

    pub fn disconnect(device: DeviceId, reason: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Disconnect,
            device,
            at: Utc::now(),
            payload: EventPayload::Disconnect(DisconnectInfo {
                reason: reason.into(),
            }),
        }
    }

    pub fn message(device: DeviceId, body: Vec<u8>) -> Self {
        Self {
            kind: EventKind::MessageReceived,
            device,
            at: Utc::now(),
            payload: EventPayload::Message(body),
        }
    }

    /// The JSON document POSTed to outbound destinations.
    pub fn to_envelope(&self) -> DeliveryEnvelope {
        let (remote_addr, reason, body) = match &self.payload {
            EventPayload::Connect(info) => (info.remote_addr.clone(), None, None),
            EventPayload::Disconnect(info) => (None, Some(info.reason.clone()), None),
            EventPayload::Message(bytes) => (None, None, Some(BASE64.encode(bytes))),
        };
        DeliveryEnvelope {
            event: self.kind,
            device_id: self.device.to_string(),
            observed_at: self.at,
            remote_addr,
            reason,
            body,
        }
    }
}

/// Wire format for outbound HTTP delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEnvelope {
    pub event: EventKind,
    pub device_id: String,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Base64 of the raw device frame, present on messageReceived events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DeliveryEnvelope {
    /// Decode the message body for messageReceived envelopes.
    pub fn decode_body(&self) -> Option<Vec<u8>> {
        self.body.as_ref().and_then(|b| BASE64.decode(b).ok())
    }
}
