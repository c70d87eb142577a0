//! Per-link negotiation roles and the offer-collision rule.
//!
//! Roles are assigned once and never change: the side that initiates a
//! connection (a local connect request, or answering an inbound handshake
//! with an offer) is impolite; the side that receives an unsolicited offer
//! for an unknown link is polite. The assignment is symmetric by
//! construction (whoever offered first made the other side polite), so
//! the two ends never disagree.
//!
//! When offers cross ("glare"), the impolite side wins by ignoring the
//! competing offer; the polite side abandons its own offer and accepts the
//! remote one. Collisions are expected, resolved silently, and never
//! surfaced as errors.

/// Who yields when offers collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Accepts a competing remote offer, rolling back its own.
    Polite,
    /// Ignores a competing remote offer; its own offer proceeds.
    Impolite,
}

/// Where a link is in its life. Closed links are removed from the
/// directory rather than kept in a half state, so there is no `Closed`
/// variant here; a link that exists is either negotiating or open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Offer/answer exchange in progress. `making_offer` is true from the
    /// moment a local offer is produced until its answer is applied.
    Negotiating { making_offer: bool },
    /// Channel is up. `making_offer` covers renegotiation passes, which
    /// reuse the same collision rule.
    Open { making_offer: bool },
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open { .. })
    }

    pub fn making_offer(&self) -> bool {
        match self {
            LinkState::Negotiating { making_offer } | LinkState::Open { making_offer } => {
                *making_offer
            }
        }
    }

    pub fn set_making_offer(&mut self, value: bool) {
        match self {
            LinkState::Negotiating { making_offer } | LinkState::Open { making_offer } => {
                *making_offer = value;
            }
        }
    }
}

/// What to do with a remote offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// Consume the offer and send an answer. `rollback` means a local
    /// offer is in progress and must be abandoned first (polite yield).
    Accept { rollback: bool },
    /// Drop the offer silently; our own offer proceeds (impolite win).
    Ignore,
}

/// The collision rule. Pure so the truth table is testable on its own.
pub fn offer_disposition(role: LinkRole, state: LinkState) -> OfferDisposition {
    match (role, state.making_offer()) {
        (LinkRole::Impolite, true) => OfferDisposition::Ignore,
        (LinkRole::Polite, true) => OfferDisposition::Accept { rollback: true },
        (_, false) => OfferDisposition::Accept { rollback: false },
    }
}
