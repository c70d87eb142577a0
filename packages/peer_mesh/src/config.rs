//! Mesh tuning knobs.

use std::time::Duration;

/// Configuration for a `MeshManager` instance.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// How long a link may sit in `Negotiating` before it is closed and a
    /// pending `connect_with` fails with `MeshError::Timeout`.
    pub connect_timeout: Duration,
    /// Capacity of the mesh event broadcast channel. Slow subscribers that
    /// fall further behind than this lose the oldest events.
    pub event_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            event_capacity: 256,
        }
    }
}
