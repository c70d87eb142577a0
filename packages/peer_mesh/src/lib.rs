//! Peer mesh: a full mesh of direct peer links, bootstrapped through a
//! rendezvous relay.
//!
//! The relay carries only signaling (offers, answers, candidates); once a
//! link's channel opens, application payloads flow peer-to-peer with
//! per-link ordering restored above the unordered transport. New links are
//! discovered transitively: when a link opens, each side shares the peers
//! it already knows, and the mesh converges without central coordination.
//!
//! Typical wiring:
//!
//! ```no_run
//! use peer_mesh::{LocalConnector, LocalRelay, MeshConfig, MeshManager, PeerIdentity};
//!
//! # async fn run() -> Result<(), peer_mesh::MeshError> {
//! let relay = LocalRelay::new();
//! let connector = LocalConnector::new();
//!
//! let mesh = MeshManager::new(relay.clone(), connector.clone(), MeshConfig::default());
//! let mut events = mesh.subscribe();
//! mesh.open_channels(PeerIdentity::new("alice", "Alice")).await?;
//! mesh.connect_with(&PeerIdentity::new("bob", "Bob")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod identity;
pub mod mesh;
pub mod negotiation;
pub mod ordering;
pub mod relay;
pub mod signal;

pub use config::MeshConfig;
pub use connector::{Channel, LocalConnector, PeerConnection, PeerConnector};
pub use error::{MeshError, NegotiationError, RelayError};
pub use identity::{PeerIdentity, PeerRef};
pub use mesh::{MeshEvent, MeshManager};
pub use negotiation::{LinkRole, LinkState, OfferDisposition, offer_disposition};
pub use ordering::OrderedBuffer;
pub use relay::{LocalRelay, RelaySession, RelayTransport};
pub use signal::{Candidate, ChannelFrame, DataFrame, Payload, SessionDescription, SignalEnvelope};
