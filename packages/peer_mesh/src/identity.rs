//! Peer identity: a stable opaque id plus display attributes.
//!
//! Identities are minted by the surrounding application (or arrive on
//! inbound signal envelopes), never by this crate. Equality and hashing
//! are by `id` only; `username` is display metadata and may differ
//! between two envelopes describing the same peer.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A participant in the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Stable opaque identifier. The directory key.
    pub id: String,
    /// Display name, carried for the application's benefit.
    pub username: String,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.id)
    }
}

/// A bare reference to a peer by id, used as the `to` field of signal
/// envelopes where the recipient's display attributes are irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: String,
}

impl From<&PeerIdentity> for PeerRef {
    fn from(peer: &PeerIdentity) -> Self {
        Self {
            id: peer.id.clone(),
        }
    }
}
