//! Per-link reordering of sequenced payloads.
//!
//! The channel under a link is reliable but unordered. Every outbound
//! payload carries a per-link sequence number starting at 1; this buffer
//! restores send order on the receive side and suppresses duplicates.
//! There is no eviction: a permanent gap means a transport bug, and the
//! buffer keeps waiting (and stays observable via `pending_len`).

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::signal::Payload;

/// Reorders one link's inbound payloads into contiguous sequence order.
pub struct OrderedBuffer {
    /// Highest sequence number handed to the application.
    last_delivered: u64,
    /// Out-of-order payloads waiting for the gap to close.
    pending: BTreeMap<u64, Payload>,
    /// The first observed gap is worth a warning; the rest are routine.
    gap_logged: bool,
}

impl OrderedBuffer {
    pub fn new() -> Self {
        Self {
            last_delivered: 0,
            pending: BTreeMap::new(),
            gap_logged: false,
        }
    }

    /// Accept one payload off the wire. Returns every payload that is now
    /// deliverable, in sequence order (possibly empty).
    pub fn accept(&mut self, seq: u64, payload: Payload) -> Vec<Payload> {
        if seq <= self.last_delivered {
            debug!(seq, last_delivered = self.last_delivered, "duplicate or stale payload dropped");
            return Vec::new();
        }

        if seq > self.last_delivered + 1 {
            if !self.gap_logged {
                warn!(
                    seq,
                    expected = self.last_delivered + 1,
                    "out-of-order payload, buffering until the gap closes"
                );
                self.gap_logged = true;
            }
            self.pending.insert(seq, payload);
            return Vec::new();
        }

        // seq == last_delivered + 1: deliver it, then flush the contiguous
        // run that may have been waiting behind it.
        let mut ready = vec![payload];
        self.last_delivered = seq;
        while let Some(next) = self.pending.remove(&(self.last_delivered + 1)) {
            self.last_delivered += 1;
            ready.push(next);
        }
        ready
    }

    /// Highest contiguous sequence number delivered so far.
    pub fn last_delivered(&self) -> u64 {
        self.last_delivered
    }

    /// Number of payloads stuck behind a gap.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for OrderedBuffer {
    fn default() -> Self {
        Self::new()
    }
}
