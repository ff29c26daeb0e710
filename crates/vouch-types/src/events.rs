use serde::{Deserialize, Serialize};

use crate::models::PartyRef;

/// Lifecycle signals emitted by the verification store.
///
/// Every variant carries (initiator, counterparty). Delivery is up to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum VerificationEvent {
    /// A new verification request was created
    Sent { sender: PartyRef, recipient: PartyRef },

    /// The recipient accepted a request
    Accepted { recipient: PartyRef, sender: PartyRef },

    /// The recipient denied a request
    Denied { recipient: PartyRef, sender: PartyRef },

    /// A verification was removed by one of its parties
    Cancelled { actor: PartyRef, recipient: PartyRef },
}

impl VerificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "verification.sent",
            Self::Accepted { .. } => "verification.accepted",
            Self::Denied { .. } => "verification.denied",
            Self::Cancelled { .. } => "verification.cancelled",
        }
    }

    pub fn initiator(&self) -> &PartyRef {
        match self {
            Self::Sent { sender, .. } => sender,
            Self::Accepted { recipient, .. } | Self::Denied { recipient, .. } => recipient,
            Self::Cancelled { actor, .. } => actor,
        }
    }

    pub fn counterparty(&self) -> &PartyRef {
        match self {
            Self::Sent { recipient, .. } | Self::Cancelled { recipient, .. } => recipient,
            Self::Accepted { sender, .. } | Self::Denied { sender, .. } => sender,
        }
    }
}
