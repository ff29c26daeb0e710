//! Composable WHERE/ORDER BY builder for the `verifications` table.
//!
//! Every listing, count and existence check in the query engine is one of
//! these filters rendered against alias `v`.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use vouch_types::{Direction, PartyRef, VerificationStatus};

use crate::models::format_timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyScope {
    /// `party` in the given role, or either role when `None`.
    Involving {
        party: PartyRef,
        direction: Option<Direction>,
    },
    /// Records between two parties, in either direction.
    Between { a: PartyRef, b: PartyRef },
    /// Records sent by `sender` to `recipient` only.
    Sent { sender: PartyRef, recipient: PartyRef },
    /// Records where any listed party is sender or recipient.
    AnyOf(Vec<PartyRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupFilter {
    #[default]
    Any,
    /// Tagged with this group id by any verifier.
    Tagged(i64),
    /// A group name that did not resolve. Matches nothing.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending id, or status priority then id while a group filter is active.
    #[default]
    Listing,
    /// Most recently created first, highest id breaking ties.
    Latest,
}

/// Sort key of the last row a listing already returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyset {
    pub rank: u8,
    pub id: i64,
    /// Required to continue a [`SortOrder::Latest`] listing.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFilter {
    pub scope: PartyScope,
    pub id: Option<i64>,
    pub status: Option<VerificationStatus>,
    pub group: GroupFilter,
    pub order: SortOrder,
}

impl VerificationFilter {
    pub fn new(scope: PartyScope) -> Self {
        Self {
            scope,
            id: None,
            status: None,
            group: GroupFilter::Any,
            order: SortOrder::Listing,
        }
    }

    pub fn involving(party: &PartyRef, direction: Option<Direction>) -> Self {
        Self::new(PartyScope::Involving {
            party: party.clone(),
            direction,
        })
    }

    pub fn between(a: &PartyRef, b: &PartyRef) -> Self {
        Self::new(PartyScope::Between {
            a: a.clone(),
            b: b.clone(),
        })
    }

    pub fn sent(sender: &PartyRef, recipient: &PartyRef) -> Self {
        Self::new(PartyScope::Sent {
            sender: sender.clone(),
            recipient: recipient.clone(),
        })
    }

    pub fn any_of(parties: impl IntoIterator<Item = PartyRef>) -> Self {
        Self::new(PartyScope::AnyOf(parties.into_iter().collect()))
    }

    pub fn with_id(mut self, id: Option<i64>) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: impl Into<Option<VerificationStatus>>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_group(mut self, group: GroupFilter) -> Self {
        self.group = group;
        self
    }

    pub fn latest_first(mut self) -> Self {
        self.order = SortOrder::Latest;
        self
    }

    pub fn groups_active(&self) -> bool {
        !matches!(self.group, GroupFilter::Any)
    }

    /// Sort rank a row with `status` has in this listing.
    pub fn rank_of(&self, status: VerificationStatus) -> u8 {
        if self.groups_active() { status.rank() } else { 0 }
    }

    /// Status priority expression, present only while a group filter is active.
    fn rank_sql(&self) -> Option<String> {
        if !self.groups_active() {
            return None;
        }
        let arms: String = VerificationStatus::ORDERED
            .iter()
            .map(|s| format!(" WHEN '{}' THEN {}", s.as_str(), s.rank()))
            .collect();
        Some(format!(
            "(CASE v.status{} ELSE {} END)",
            arms,
            VerificationStatus::ORDERED.len()
        ))
    }

    pub(crate) fn order_sql(&self) -> String {
        match (self.order, self.rank_sql()) {
            (SortOrder::Latest, _) => "ORDER BY v.created_at DESC, v.id DESC".to_string(),
            (SortOrder::Listing, Some(rank)) => format!("ORDER BY {rank} ASC, v.id ASC"),
            (SortOrder::Listing, None) => "ORDER BY v.id ASC".to_string(),
        }
    }

    /// Keyset condition selecting rows after `after` in this filter's order.
    ///
    /// The bound values come from the cursor itself, so the condition holds
    /// even after the row it was taken from is deleted.
    pub(crate) fn after_sql(&self, after: &Keyset, params: &mut Vec<Value>) -> String {
        match (self.order, after.created_at) {
            (SortOrder::Latest, Some(created_at)) => {
                params.push(Value::Text(format_timestamp(created_at)));
                params.push(Value::Integer(after.id));
                "(v.created_at, v.id) < (?, ?)".to_string()
            }
            // Without a timestamp only the id tie-break is left
            (SortOrder::Latest, None) => {
                params.push(Value::Integer(after.id));
                "v.id < ?".to_string()
            }
            (SortOrder::Listing, _) => match self.rank_sql() {
                Some(rank_sql) => {
                    params.push(Value::Integer(i64::from(after.rank)));
                    params.push(Value::Integer(after.id));
                    format!("({rank_sql}, v.id) > (?, ?)")
                }
                None => {
                    params.push(Value::Integer(after.id));
                    "v.id > ?".to_string()
                }
            },
        }
    }

    /// Render the WHERE clause (without the keyword) and its positional params.
    pub(crate) fn where_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut clauses = vec![scope_sql(&self.scope, &mut params)];

        if let Some(id) = self.id {
            clauses.push("v.id = ?".to_string());
            params.push(Value::Integer(id));
        }

        if let Some(status) = self.status {
            clauses.push("v.status = ?".to_string());
            params.push(Value::Text(status.as_str().to_string()));
        }

        match self.group {
            GroupFilter::Any => {}
            GroupFilter::Tagged(group_id) => {
                clauses.push(
                    "EXISTS (SELECT 1 FROM verification_groups g \
                     WHERE g.verification_id = v.id AND g.group_id = ?)"
                        .to_string(),
                );
                params.push(Value::Integer(group_id));
            }
            GroupFilter::Unresolved => clauses.push("0".to_string()),
        }

        (clauses.join(" AND "), params)
    }
}

fn party_sql(column: &str, party: &PartyRef, params: &mut Vec<Value>) -> String {
    params.push(Value::Integer(party.id));
    params.push(Value::Text(party.kind.clone()));
    format!("(v.{column}_id = ? AND v.{column}_type = ?)")
}

fn scope_sql(scope: &PartyScope, params: &mut Vec<Value>) -> String {
    match scope {
        PartyScope::Involving { party, direction } => match direction {
            Some(Direction::Sender) => party_sql("sender", party, params),
            Some(Direction::Recipient) => party_sql("recipient", party, params),
            None => {
                let sender = party_sql("sender", party, params);
                let recipient = party_sql("recipient", party, params);
                format!("({sender} OR {recipient})")
            }
        },
        PartyScope::Between { a, b } => {
            let forward = format!(
                "{} AND {}",
                party_sql("sender", a, params),
                party_sql("recipient", b, params)
            );
            let backward = format!(
                "{} AND {}",
                party_sql("sender", b, params),
                party_sql("recipient", a, params)
            );
            format!("(({forward}) OR ({backward}))")
        }
        PartyScope::Sent { sender, recipient } => format!(
            "({} AND {})",
            party_sql("sender", sender, params),
            party_sql("recipient", recipient, params)
        ),
        PartyScope::AnyOf(parties) if parties.is_empty() => "0".to_string(),
        PartyScope::AnyOf(parties) => {
            let mut arms = Vec::with_capacity(parties.len() * 2);
            for party in parties {
                arms.push(party_sql("sender", party, params));
                arms.push(party_sql("recipient", party, params));
            }
            format!("({})", arms.join(" OR "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> PartyRef {
        PartyRef::new("user", id)
    }

    fn keyset(rank: u8, id: i64, created_at: Option<DateTime<Utc>>) -> Keyset {
        Keyset { rank, id, created_at }
    }

    #[test]
    fn between_binds_both_directions() {
        let (sql, params) = VerificationFilter::between(&user(1), &user(2)).where_sql();
        assert_eq!(sql.matches('?').count(), 8);
        assert_eq!(params.len(), 8);
        assert_eq!(params[0], Value::Integer(1));
        assert_eq!(params[4], Value::Integer(2));
    }

    #[test]
    fn filters_append_in_order() {
        let filter = VerificationFilter::involving(&user(1), Some(Direction::Recipient))
            .with_id(Some(9))
            .with_status(VerificationStatus::Pending)
            .with_group(GroupFilter::Tagged(3));
        let (sql, params) = filter.where_sql();
        assert!(sql.starts_with("(v.recipient_id = ?"));
        assert!(sql.contains("v.id = ?"));
        assert!(sql.contains("EXISTS"));
        assert_eq!(params.len(), 5);
        assert_eq!(params[4], Value::Integer(3));
    }

    #[test]
    fn empty_party_set_matches_nothing() {
        let (sql, params) = VerificationFilter::any_of(Vec::new()).where_sql();
        assert_eq!(sql, "0");
        assert!(params.is_empty());
    }

    #[test]
    fn status_priority_only_with_group_filter() {
        let plain = VerificationFilter::involving(&user(1), None);
        assert_eq!(plain.order_sql(), "ORDER BY v.id ASC");
        assert_eq!(plain.rank_of(VerificationStatus::Denied), 0);

        let mut params = Vec::new();
        assert_eq!(plain.after_sql(&keyset(0, 4, None), &mut params), "v.id > ?");
        assert_eq!(params, vec![Value::Integer(4)]);

        let grouped = plain.with_group(GroupFilter::Tagged(1));
        assert!(grouped.order_sql().contains("WHEN 'pending' THEN 0"));
        assert!(grouped.order_sql().contains("WHEN 'blocked' THEN 3"));
        assert_eq!(grouped.rank_of(VerificationStatus::Denied), 2);

        let mut params = Vec::new();
        let sql = grouped.after_sql(&keyset(1, 4, None), &mut params);
        assert!(sql.ends_with("v.id) > (?, ?)"));
        assert_eq!(params, vec![Value::Integer(1), Value::Integer(4)]);
    }

    #[test]
    fn latest_keyset_binds_the_cursor_timestamp() {
        let created_at = "2024-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let latest = VerificationFilter::between(&user(1), &user(2)).latest_first();

        let mut params = Vec::new();
        let sql = latest.after_sql(&keyset(1, 4, Some(created_at)), &mut params);
        assert_eq!(sql, "(v.created_at, v.id) < (?, ?)");
        assert_eq!(
            params,
            vec![
                Value::Text("2024-03-01T12:00:00.000000Z".to_string()),
                Value::Integer(4)
            ]
        );

        let mut params = Vec::new();
        assert_eq!(latest.after_sql(&keyset(0, 4, None), &mut params), "v.id < ?");
    }
}
