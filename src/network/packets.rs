// Wire Packets
//
// INTENTION: Define the messages nodes exchange over the transport and the
// JSON codec that turns them into bytes. JSON keeps the wire format readable
// by nodes written in other runtimes.
//
// Every packet travels inside an envelope carrying the protocol version and
// the sender node id:
//
//   {"ver":"4","sender":"node-a","type":"REQUEST", ...packet fields}

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version spoken by this node
pub const PROTOCOL_VERSION: &str = "4";

/// Packet plus envelope fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ver: String,
    pub sender: String,
    #[serde(flatten)]
    pub packet: Packet,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, packet: Packet) -> Self {
        Self {
            ver: PROTOCOL_VERSION.to_string(),
            sender: sender.into(),
            packet,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a packet, rejecting other protocol versions
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.ver != PROTOCOL_VERSION {
            return Err(anyhow!(
                "Protocol version mismatch: got '{}', expected '{}'",
                envelope.ver,
                PROTOCOL_VERSION
            ));
        }
        Ok(envelope)
    }
}

/// All packet types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Packet {
    /// Capability announcement, doubles as heartbeat
    Info(AnnouncePacket),
    /// Ask every node to announce itself now
    Discover,
    /// Sender is leaving the mesh
    Disconnect,
    Request(RequestPacket),
    Response(ResponsePacket),
    Event(EventPacket),
}

impl Packet {
    pub fn type_name(&self) -> &'static str {
        match self {
            Packet::Info(_) => "INFO",
            Packet::Discover => "DISCOVER",
            Packet::Disconnect => "DISCONNECT",
            Packet::Request(_) => "REQUEST",
            Packet::Response(_) => "RESPONSE",
            Packet::Event(_) => "EVENT",
        }
    }
}

/// Action advertised by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncePacket {
    pub node_id: String,
    pub actions: Vec<ActionInfo>,
    pub subscriptions: Vec<String>,
    /// Sender-local sequence in epoch milliseconds; newer wins
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPacket {
    pub correlation_id: String,
    pub action: String,
    pub params: Value,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub reply_topic: String,
    /// Absolute deadline in epoch milliseconds
    pub deadline: u64,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

fn default_level() -> u32 {
    1
}

/// Error details carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePacket {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponsePacket {
    pub fn success(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(correlation_id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPacket {
    pub event: String,
    pub payload: Value,
    /// Set for emit: only this node handles the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}
