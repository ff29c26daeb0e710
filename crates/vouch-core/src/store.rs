//! Verification store: the lifecycle state machine and group tagging.
//!
//! Each mutation runs in a single transaction and signals the event sink
//! only after that transaction committed.

use std::sync::Arc;

use tracing::{debug, warn};

use vouch_db::queries::{self, NewVerification};
use vouch_db::{Connection, Database, VerificationFilter};
use vouch_types::{
    Direction, PartyRef, Verification, VerificationConfig, VerificationEvent, VerificationStatus,
};

use crate::config::Config;
use crate::error::{Result, VerificationError};
use crate::events::EventSink;
use crate::query::RelationshipQueries;

pub struct VerificationStore {
    db: Arc<Database>,
    config: Arc<VerificationConfig>,
    events: Arc<dyn EventSink>,
    queries: RelationshipQueries,
}

impl VerificationStore {
    pub fn new(db: Arc<Database>, config: VerificationConfig, events: Arc<dyn EventSink>) -> Self {
        let config = Arc::new(config);
        let queries = RelationshipQueries::new(db.clone(), config.clone());
        Self {
            db,
            config,
            events,
            queries,
        }
    }

    /// Open the configured database and build a store on top of it.
    pub fn open(config: &Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Ok(Self::new(Arc::new(db), config.verifications.clone(), events))
    }

    /// Read-side engine sharing this store's database and configuration.
    pub fn queries(&self) -> &RelationshipQueries {
        &self.queries
    }

    /// False when any record between the pair, in either direction, is blocked.
    pub fn can_create(&self, sender: &PartyRef, recipient: &PartyRef) -> Result<bool> {
        Ok(!self.db.with_conn(|conn| is_blocked(conn, sender, recipient))?)
    }

    /// Send a new pending verification request from `sender` to `recipient`.
    ///
    /// Returns `Ok(None)` when the pair is blocked. `group` is recorded as the
    /// legacy label if it names a configured group; tagging happens only
    /// through [`Self::tag_group`] once accepted.
    pub fn create(
        &self,
        sender: &PartyRef,
        recipient: &PartyRef,
        message: Option<&str>,
        group: Option<&str>,
    ) -> Result<Option<Verification>> {
        if sender == recipient {
            return Err(VerificationError::SelfVerification);
        }

        if let Some(message) = message {
            let actual = message.chars().count();
            let max = self.config.max_message_length;
            if actual > max {
                return Err(VerificationError::MessageTooLong { max, actual });
            }
        }

        let group_slug = group.filter(|name| {
            let known = self.config.groups.resolve(name).is_some();
            if !known {
                debug!(group = %name, "Ignoring unknown group on new verification");
            }
            known
        });

        let row = self.db.with_tx(|conn| {
            if is_blocked(conn, sender, recipient)? {
                return Ok(None);
            }
            let new = NewVerification {
                sender,
                recipient,
                message,
                group_slug,
            };
            queries::insert_verification(conn, &new).map(Some)
        })?;

        let Some(row) = row else {
            warn!(%sender, %recipient, "Verification refused: pair is blocked");
            return Ok(None);
        };
        let verification = row.into_model()?;

        debug!(id = verification.id, %sender, %recipient, "Verification sent");
        self.events.emit(&VerificationEvent::Sent {
            sender: sender.clone(),
            recipient: recipient.clone(),
        });
        Ok(Some(verification))
    }

    /// Accept a request addressed to `recipient`.
    pub fn accept(&self, recipient: &PartyRef, verification_id: i64) -> Result<bool> {
        let next = VerificationStatus::Accepted;
        let Some(sender) = self.resolve(recipient, verification_id, next)? else {
            return Ok(false);
        };
        self.events.emit(&VerificationEvent::Accepted {
            recipient: recipient.clone(),
            sender,
        });
        Ok(true)
    }

    /// Deny a request addressed to `recipient`.
    pub fn deny(&self, recipient: &PartyRef, verification_id: i64) -> Result<bool> {
        let next = VerificationStatus::Denied;
        let Some(sender) = self.resolve(recipient, verification_id, next)? else {
            return Ok(false);
        };
        self.events.emit(&VerificationEvent::Denied {
            recipient: recipient.clone(),
            sender,
        });
        Ok(true)
    }

    /// Move the record to `next` if `recipient` received it and the transition
    /// is allowed. Returns the record's sender on success.
    fn resolve(
        &self,
        recipient: &PartyRef,
        verification_id: i64,
        next: VerificationStatus,
    ) -> Result<Option<PartyRef>> {
        let filter = VerificationFilter::involving(recipient, Some(Direction::Recipient))
            .with_id(Some(verification_id));

        let outcome = self.db.with_tx(|conn| {
            let Some(row) = queries::first_verification(conn, &filter)? else {
                return Ok(Resolution::NotAddressed);
            };
            let current = row.into_model()?;
            if !current.status.can_transition_to(next) {
                return Ok(Resolution::Refused(current.status));
            }
            queries::update_status(conn, current.id, next)?;
            Ok(Resolution::Resolved(current.sender))
        })?;

        match outcome {
            Resolution::Resolved(sender) => {
                debug!(
                    id = verification_id,
                    %recipient,
                    %sender,
                    status = %next,
                    "Verification resolved"
                );
                Ok(Some(sender))
            }
            Resolution::NotAddressed => {
                warn!(id = verification_id, %recipient, "No verification addressed to this party");
                Ok(None)
            }
            Resolution::Refused(current) => {
                debug!(id = verification_id, %current, %next, "Transition not allowed");
                Ok(None)
            }
        }
    }

    /// Delete one record between `actor` and `other`, whoever sent it.
    ///
    /// The cancellation signal fires only if a record was actually deleted.
    pub fn remove(&self, actor: &PartyRef, other: &PartyRef, verification_id: i64) -> Result<bool> {
        let filter = VerificationFilter::between(actor, other).with_id(Some(verification_id));
        let deleted = self.db.with_tx(|conn| queries::delete_verifications(conn, &filter))?;

        if deleted == 0 {
            warn!(
                id = verification_id,
                %actor,
                %other,
                "No verification to remove between these parties"
            );
            return Ok(false);
        }

        debug!(id = verification_id, %actor, %other, "Verification removed");
        self.events.emit(&VerificationEvent::Cancelled {
            actor: actor.clone(),
            recipient: other.clone(),
        });
        Ok(true)
    }

    /// Tag an accepted record between `verifier` and `other` with `group`.
    ///
    /// Without an id the most recently created accepted record is used.
    /// Returns true only when a new tag was created; re-tagging is a no-op
    /// that refreshes the existing tag and returns false.
    pub fn tag_group(
        &self,
        verifier: &PartyRef,
        other: &PartyRef,
        group: &str,
        verification_id: Option<i64>,
    ) -> Result<bool> {
        let Some(group_id) = self.config.groups.resolve(group) else {
            warn!(%group, "Unknown verification group");
            return Ok(false);
        };

        let filter = target_filter(verifier, other, verification_id)
            .with_status(VerificationStatus::Accepted);

        let created = self.db.with_tx(|conn| {
            let Some(target) = queries::first_verification(conn, &filter)? else {
                return Ok(None);
            };
            queries::upsert_group(conn, target.id, group_id, verifier).map(Some)
        })?;

        match created {
            Some(created) => {
                debug!(%verifier, %other, %group, created, "Verification tagged");
                Ok(created)
            }
            None => {
                warn!(%verifier, %other, %group, "No accepted verification to tag");
                Ok(false)
            }
        }
    }

    /// Remove the tags `verifier` placed on a record between it and `other`.
    ///
    /// Without an id the most recently created accepted record is used, the
    /// same record [`Self::tag_group`] picks. An explicit id may name a record
    /// in any status. Tags placed by other verifiers are left alone. Returns
    /// the number of tags removed.
    pub fn untag_group(
        &self,
        verifier: &PartyRef,
        other: &PartyRef,
        verification_id: Option<i64>,
    ) -> Result<usize> {
        let mut filter = target_filter(verifier, other, verification_id);
        if verification_id.is_none() {
            filter = filter.with_status(VerificationStatus::Accepted);
        }

        let removed = self.db.with_tx(|conn| {
            let Some(target) = queries::first_verification(conn, &filter)? else {
                return Ok(0);
            };
            queries::delete_groups(conn, target.id, verifier)
        })?;

        debug!(%verifier, %other, removed, "Verification untagged");
        Ok(removed)
    }
}

enum Resolution {
    Resolved(PartyRef),
    NotAddressed,
    Refused(VerificationStatus),
}

fn is_blocked(conn: &Connection, a: &PartyRef, b: &PartyRef) -> anyhow::Result<bool> {
    queries::verification_exists(
        conn,
        &VerificationFilter::between(a, b).with_status(VerificationStatus::Blocked),
    )
}

/// A specific record when `id` is given, otherwise the latest one.
fn target_filter(me: &PartyRef, other: &PartyRef, id: Option<i64>) -> VerificationFilter {
    match id {
        Some(id) => VerificationFilter::between(me, other).with_id(Some(id)),
        None => VerificationFilter::between(me, other).latest_first(),
    }
}
