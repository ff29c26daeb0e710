use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a party owned by the host application.
///
/// `kind` disambiguates parties that share one id space (users, teams, ...).
/// Two references denote the same party only when both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
}

impl PartyRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self { kind: kind.into(), id }
    }
}

impl fmt::Display for PartyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Accepted,
    Denied,
    Blocked,
}

impl VerificationStatus {
    /// Listing order used whenever a group filter is active.
    pub const ORDERED: [VerificationStatus; 4] = [
        VerificationStatus::Pending,
        VerificationStatus::Accepted,
        VerificationStatus::Denied,
        VerificationStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Denied => "denied",
            Self::Blocked => "blocked",
        }
    }

    /// Position in [`Self::ORDERED`].
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Accepted => 1,
            Self::Denied => 2,
            Self::Blocked => 3,
        }
    }

    /// Whether a recipient may move a record from `self` to `next`.
    ///
    /// A pending request resolves either way, and a resolved one may be
    /// flipped between accepted and denied. Re-applying the current status
    /// is not a transition, and blocked records are frozen.
    pub fn can_transition_to(self, next: VerificationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Denied)
                | (Self::Accepted, Self::Denied)
                | (Self::Denied, Self::Accepted)
        )
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "denied" => Ok(Self::Denied),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// Which role a party must occupy in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sender,
    Recipient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub id: i64,
    pub sender: PartyRef,
    pub recipient: PartyRef,
    pub message: Option<String>,
    pub status: VerificationStatus,
    /// Legacy label recorded at creation. Tags live in [`VerificationGroup`].
    pub group_slug: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Verification {
    /// The party on the other side of this record from `me`.
    pub fn counterparty(&self, me: &PartyRef) -> &PartyRef {
        if &self.sender == me {
            &self.recipient
        } else {
            &self.sender
        }
    }

    pub fn involves(&self, party: &PartyRef) -> bool {
        &self.sender == party || &self.recipient == party
    }
}

/// A group tag attached to an accepted verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationGroup {
    pub id: i64,
    pub verification_id: i64,
    pub group_id: i64,
    pub verifier: PartyRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
