//! Wire types: signaling envelopes (through the relay) and channel frames
//! (over an open link).
//!
//! Signal envelope: `{ "kind": "...", "from": {...}, "to": { "id": ... }, "payload": ... }`
//! Data frame:      `{ "seq": N, ...application payload fields }`
//! Peers frame:     `{ "peers": [PeerIdentity] }` (discovery, mesh-internal)
//!
//! Offer/answer/candidate payloads are opaque to this crate; the connection
//! primitive defines their contents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::{PeerIdentity, PeerRef};

/// An offer or answer description produced by the connection primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub Value);

/// Incremental address information. May arrive before or after the
/// offer/answer it relates to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(pub Value);

/// A signaling envelope, in flight through the relay. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalEnvelope {
    /// A would-be initiator asking the target to send an offer back.
    Handshake { from: PeerIdentity, to: PeerRef },
    Offer {
        from: PeerIdentity,
        to: PeerRef,
        payload: SessionDescription,
    },
    Answer {
        from: PeerIdentity,
        to: PeerRef,
        payload: SessionDescription,
    },
    Candidate {
        from: PeerIdentity,
        to: PeerRef,
        payload: Candidate,
    },
}

impl SignalEnvelope {
    /// The sender's identity.
    pub fn from(&self) -> &PeerIdentity {
        match self {
            SignalEnvelope::Handshake { from, .. }
            | SignalEnvelope::Offer { from, .. }
            | SignalEnvelope::Answer { from, .. }
            | SignalEnvelope::Candidate { from, .. } => from,
        }
    }

    /// The recipient's id.
    pub fn to_id(&self) -> &str {
        match self {
            SignalEnvelope::Handshake { to, .. }
            | SignalEnvelope::Offer { to, .. }
            | SignalEnvelope::Answer { to, .. }
            | SignalEnvelope::Candidate { to, .. } => &to.id,
        }
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalEnvelope::Handshake { .. } => "handshake",
            SignalEnvelope::Offer { .. } => "offer",
            SignalEnvelope::Answer { .. } => "answer",
            SignalEnvelope::Candidate { .. } => "candidate",
        }
    }
}

/// Application payload: a JSON object. The `seq` field is added on send and
/// stripped on delivery; the application never sets or reads it.
pub type Payload = Map<String, Value>;

/// A sequenced application message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Everything that rides an open channel. Untagged: a frame with a `seq`
/// field is data, a frame with `peers` is discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelFrame {
    Data(DataFrame),
    Peers { peers: Vec<PeerIdentity> },
}
