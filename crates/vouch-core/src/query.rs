//! Relationship query engine.
//!
//! Read-side views derived from the verification table: filtered listings,
//! counts, group predicates and the one- and two-hop verifier sets. Multi-hop
//! results are assembled from several reads without a shared snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use vouch_db::queries::{self, Window};
use vouch_db::{Database, GroupFilter, Keyset, SortOrder, VerificationFilter};
use vouch_types::{
    Cursor, Direction, Page, PageRequest, PartyRef, Verification, VerificationConfig,
    VerificationStatus,
};

use crate::error::{Result, VerificationError};

/// A reusable description of a verification listing.
pub type VerificationQuery = VerificationFilter;

#[derive(Clone)]
pub struct RelationshipQueries {
    db: Arc<Database>,
    config: Arc<VerificationConfig>,
}

impl RelationshipQueries {
    pub fn new(db: Arc<Database>, config: Arc<VerificationConfig>) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    // -- Query construction --

    /// Records between `me` and `other` in either direction, optionally one id.
    pub fn find_between(
        &self,
        me: &PartyRef,
        other: &PartyRef,
        id: Option<i64>,
    ) -> VerificationQuery {
        VerificationFilter::between(me, other).with_id(id)
    }

    /// Records involving `me`, narrowed by status, group tag and role.
    ///
    /// A group filter also switches the listing to status-priority order.
    /// A group name missing from the configuration matches nothing.
    pub fn find_all(
        &self,
        me: &PartyRef,
        status: Option<VerificationStatus>,
        group: Option<&str>,
        direction: Option<Direction>,
    ) -> VerificationQuery {
        VerificationFilter::involving(me, direction)
            .with_status(status)
            .with_group(self.group_filter(group))
    }

    pub(crate) fn group_filter(&self, group: Option<&str>) -> GroupFilter {
        match group {
            None => GroupFilter::Any,
            Some(name) => match self.config.groups.resolve(name) {
                Some(id) => GroupFilter::Tagged(id),
                None => GroupFilter::Unresolved,
            },
        }
    }

    // -- Query execution --

    pub fn fetch(
        &self,
        query: &VerificationQuery,
        page: &PageRequest,
    ) -> Result<Page<Verification>> {
        match page {
            PageRequest::All => {
                let rows = self.select(query, Window::default())?;
                Ok(Page::all(rows))
            }
            PageRequest::Offset { per_page, page } => {
                let page = (*page).max(1);
                let total = self.count(query)?;
                let items = self.select(
                    query,
                    Window {
                        limit: Some(*per_page),
                        offset: u64::from(page - 1) * u64::from(*per_page),
                        after: None,
                    },
                )?;
                Ok(Page {
                    items,
                    per_page: *per_page,
                    current_page: Some(page),
                    total: Some(total),
                    next_cursor: None,
                })
            }
            PageRequest::Cursor { per_page, after } => {
                let after = match after {
                    None => None,
                    Some(Cursor::Verification {
                        rank,
                        id,
                        created_at,
                    }) => {
                        // Newest-first listings resume from the cursor's timestamp
                        if query.order == SortOrder::Latest && created_at.is_none() {
                            return Err(VerificationError::InvalidCursor);
                        }
                        Some(Keyset {
                            rank: *rank,
                            id: *id,
                            created_at: *created_at,
                        })
                    }
                    Some(Cursor::Party { .. }) => return Err(VerificationError::InvalidCursor),
                };
                // One extra row tells us whether another page exists
                let mut items = self.select(
                    query,
                    Window {
                        limit: Some(per_page.saturating_add(1)),
                        offset: 0,
                        after,
                    },
                )?;
                let more = items.len() > *per_page as usize;
                items.truncate(*per_page as usize);
                let next_cursor = match items.last() {
                    Some(last) if more => Some(Cursor::Verification {
                        rank: query.rank_of(last.status),
                        id: last.id,
                        created_at: (query.order == SortOrder::Latest).then_some(last.created_at),
                    }),
                    _ => None,
                };
                Ok(Page {
                    items,
                    per_page: *per_page,
                    current_page: None,
                    total: None,
                    next_cursor,
                })
            }
        }
    }

    pub fn count(&self, query: &VerificationQuery) -> Result<u64> {
        Ok(self.db.with_conn(|conn| queries::count_verifications(conn, query))?)
    }

    pub fn exists(&self, query: &VerificationQuery) -> Result<bool> {
        Ok(self.db.with_conn(|conn| queries::verification_exists(conn, query))?)
    }

    /// First record in the query's order.
    pub fn first(&self, query: &VerificationQuery) -> Result<Option<Verification>> {
        let row = self.db.with_conn(|conn| queries::first_verification(conn, query))?;
        Ok(row.map(|r| r.into_model()).transpose()?)
    }

    fn select(&self, query: &VerificationQuery, window: Window) -> Result<Vec<Verification>> {
        let rows = self
            .db
            .with_conn(|conn| queries::select_verifications(conn, query, window))?;
        let models = rows
            .into_iter()
            .map(|row| row.into_model())
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(models)
    }

    // -- Listings --

    pub fn all_verifications(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        direction: Option<Direction>,
        page: &PageRequest,
    ) -> Result<Page<Verification>> {
        self.fetch(&self.find_all(me, None, group, direction), page)
    }

    pub fn pending_verifications(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        direction: Option<Direction>,
        page: &PageRequest,
    ) -> Result<Page<Verification>> {
        let query = self.find_all(me, Some(VerificationStatus::Pending), group, direction);
        self.fetch(&query, page)
    }

    pub fn accepted_verifications(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        direction: Option<Direction>,
        page: &PageRequest,
    ) -> Result<Page<Verification>> {
        let query = self.find_all(me, Some(VerificationStatus::Accepted), group, direction);
        self.fetch(&query, page)
    }

    pub fn denied_verifications(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        direction: Option<Direction>,
        page: &PageRequest,
    ) -> Result<Page<Verification>> {
        let query = self.find_all(me, Some(VerificationStatus::Denied), group, direction);
        self.fetch(&query, page)
    }

    /// Pending requests waiting on `me` to answer.
    pub fn verification_requests(&self, me: &PartyRef) -> Result<Vec<Verification>> {
        let query = self.find_all(
            me,
            Some(VerificationStatus::Pending),
            None,
            Some(Direction::Recipient),
        );
        Ok(self.fetch(&query, &PageRequest::All)?.items)
    }

    // -- Pair lookups --

    /// Oldest record between the two parties.
    pub fn verification_between(
        &self,
        me: &PartyRef,
        other: &PartyRef,
    ) -> Result<Option<Verification>> {
        self.first(&self.find_between(me, other, None))
    }

    /// Most recently created record between the two parties.
    pub fn latest_verification(
        &self,
        me: &PartyRef,
        other: &PartyRef,
    ) -> Result<Option<Verification>> {
        self.first(&self.find_between(me, other, None).latest_first())
    }

    pub fn all_verifications_with(
        &self,
        me: &PartyRef,
        other: &PartyRef,
    ) -> Result<Vec<Verification>> {
        Ok(self.fetch(&self.find_between(me, other, None), &PageRequest::All)?.items)
    }

    pub fn has_verification_request_from(&self, me: &PartyRef, other: &PartyRef) -> Result<bool> {
        self.exists(&VerificationFilter::sent(other, me).with_status(VerificationStatus::Pending))
    }

    pub fn has_sent_verification_request_to(
        &self,
        me: &PartyRef,
        other: &PartyRef,
    ) -> Result<bool> {
        self.exists(&VerificationFilter::sent(me, other).with_status(VerificationStatus::Pending))
    }

    pub fn is_verified_with(&self, me: &PartyRef, other: &PartyRef) -> Result<bool> {
        self.exists(&self.find_between(me, other, None).with_status(VerificationStatus::Accepted))
    }

    /// Accepted and tagged with `group`. Unknown group names are never matched.
    pub fn is_verified_with_group(
        &self,
        me: &PartyRef,
        other: &PartyRef,
        group: &str,
    ) -> Result<bool> {
        let Some(group_id) = self.config.groups.resolve(group) else {
            return Ok(false);
        };
        let query = self
            .find_between(me, other, None)
            .with_status(VerificationStatus::Accepted)
            .with_group(GroupFilter::Tagged(group_id));
        self.exists(&query)
    }

    /// Distinct configured group names tagged on accepted records between the pair.
    pub fn verification_groups(&self, me: &PartyRef, other: &PartyRef) -> Result<Vec<String>> {
        if self.config.groups.is_empty() {
            return Ok(Vec::new());
        }

        let query = self
            .find_between(me, other, None)
            .with_status(VerificationStatus::Accepted);
        let rows = self.db.with_conn(|conn| queries::select_groups(conn, &query))?;

        let mut names: Vec<String> = Vec::new();
        for row in rows {
            if let Some(name) = self.config.groups.name_of(row.group_id) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    // -- Verifier sets --

    /// Parties sharing an accepted record with `me`, optionally within one group.
    pub fn verifiers(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page<PartyRef>> {
        paginate(self.verifier_set(me, group)?, page)
    }

    /// Verifiers of both `me` and `other`, excluding the two of them.
    pub fn mutual_verifiers(
        &self,
        me: &PartyRef,
        other: &PartyRef,
        page: &PageRequest,
    ) -> Result<Page<PartyRef>> {
        paginate(self.mutual_set(me, other)?, page)
    }

    /// Verifiers of `me`'s verifiers, excluding `me` and its direct verifiers.
    ///
    /// The group filter applies to the second hop only.
    pub fn verifiers_of_verifiers(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page<PartyRef>> {
        paginate(self.second_hop_set(me, group)?, page)
    }

    fn verifier_set(&self, me: &PartyRef, group: Option<&str>) -> Result<BTreeSet<PartyRef>> {
        let query = self.find_all(me, Some(VerificationStatus::Accepted), group, None);
        let records = self.select(&query, Window::default())?;
        Ok(endpoints(records, |p| p != me))
    }

    fn mutual_set(&self, me: &PartyRef, other: &PartyRef) -> Result<BTreeSet<PartyRef>> {
        let mine = self.verifier_set(me, None)?;
        let theirs = self.verifier_set(other, None)?;
        Ok(mine
            .intersection(&theirs)
            .filter(|p| *p != me && *p != other)
            .cloned()
            .collect())
    }

    fn second_hop_set(&self, me: &PartyRef, group: Option<&str>) -> Result<BTreeSet<PartyRef>> {
        let direct = self.verifier_set(me, None)?;
        if direct.is_empty() {
            return Ok(BTreeSet::new());
        }

        let query = VerificationFilter::any_of(direct.iter().cloned())
            .with_status(VerificationStatus::Accepted)
            .with_group(self.group_filter(group));
        let records = self.select(&query, Window::default())?;
        let reached = endpoints(records, |p| p != me && !direct.contains(p));

        debug!(
            party = %me,
            direct = direct.len(),
            second_hop = reached.len(),
            "Expanded verifiers of verifiers"
        );
        Ok(reached)
    }

    // -- Counts --

    /// Accepted records involving `me`. Counts records, not distinct parties.
    pub fn verifiers_count(
        &self,
        me: &PartyRef,
        group: Option<&str>,
        direction: Option<Direction>,
    ) -> Result<u64> {
        self.count(&self.find_all(me, Some(VerificationStatus::Accepted), group, direction))
    }

    /// Pending records involving `me` in either role.
    pub fn pending_verifications_count(&self, me: &PartyRef) -> Result<u64> {
        self.count(&self.find_all(me, Some(VerificationStatus::Pending), None, None))
    }

    /// Pending requests waiting on `me`.
    pub fn pending_request_count(&self, me: &PartyRef) -> Result<u64> {
        let query = self.find_all(
            me,
            Some(VerificationStatus::Pending),
            None,
            Some(Direction::Recipient),
        );
        self.count(&query)
    }

    /// Accepted records between the pair.
    pub fn verification_count_with(&self, me: &PartyRef, other: &PartyRef) -> Result<u64> {
        self.count(&self.find_between(me, other, None).with_status(VerificationStatus::Accepted))
    }

    pub fn mutual_verifiers_count(&self, me: &PartyRef, other: &PartyRef) -> Result<u64> {
        Ok(self.mutual_set(me, other)?.len() as u64)
    }

    pub fn verifiers_of_verifiers_count(&self, me: &PartyRef, group: Option<&str>) -> Result<u64> {
        Ok(self.second_hop_set(me, group)?.len() as u64)
    }
}

/// Both endpoints of every record, filtered by `keep`.
fn endpoints(records: Vec<Verification>, keep: impl Fn(&PartyRef) -> bool) -> BTreeSet<PartyRef> {
    records
        .into_iter()
        .flat_map(|v| [v.sender, v.recipient])
        .filter(|p| keep(p))
        .collect()
}

/// Page an already sorted party set.
fn paginate(parties: BTreeSet<PartyRef>, page: &PageRequest) -> Result<Page<PartyRef>> {
    match page {
        PageRequest::All => Ok(Page::all(parties.into_iter().collect())),
        PageRequest::Offset { per_page, page } => {
            let page = (*page).max(1);
            let total = parties.len() as u64;
            let skip = (page as usize - 1).saturating_mul(*per_page as usize);
            let items = parties.into_iter().skip(skip).take(*per_page as usize).collect();
            Ok(Page {
                items,
                per_page: *per_page,
                current_page: Some(page),
                total: Some(total),
                next_cursor: None,
            })
        }
        PageRequest::Cursor { per_page, after } => {
            let after = match after {
                None => None,
                Some(Cursor::Party { party }) => Some(party),
                Some(Cursor::Verification { .. }) => return Err(VerificationError::InvalidCursor),
            };
            let mut rest = parties
                .into_iter()
                .filter(|p| after.is_none_or(|a| p > a))
                .peekable();
            let items: Vec<PartyRef> = rest.by_ref().take(*per_page as usize).collect();
            let next_cursor = match (items.last(), rest.peek()) {
                (Some(last), Some(_)) => Some(Cursor::Party { party: last.clone() }),
                _ => None,
            };
            Ok(Page {
                items,
                per_page: *per_page,
                current_page: None,
                total: None,
                next_cursor,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> PartyRef {
        PartyRef::new("user", id)
    }

    fn set(ids: &[i64]) -> BTreeSet<PartyRef> {
        ids.iter().map(|id| user(*id)).collect()
    }

    #[test]
    fn offset_paging_over_parties() {
        let page = paginate(set(&[1, 2, 3, 4, 5]), &PageRequest::new(2, 3)).unwrap();
        assert_eq!(page.items, vec![user(5)]);
        assert_eq!(page.total, Some(5));
        assert!(!page.has_more());

        let past_end = paginate(set(&[1, 2]), &PageRequest::new(2, 4)).unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn cursor_paging_over_parties() {
        let first = paginate(set(&[1, 2, 3]), &PageRequest::cursor(2, None)).unwrap();
        assert_eq!(first.items, vec![user(1), user(2)]);
        let cursor = first.next_cursor.clone();
        assert_eq!(cursor, Some(Cursor::Party { party: user(2) }));

        let second = paginate(set(&[1, 2, 3]), &PageRequest::cursor(2, cursor)).unwrap();
        assert_eq!(second.items, vec![user(3)]);
        assert_eq!(second.next_cursor, None);
    }

    #[test]
    fn verification_cursor_is_rejected_for_parties() {
        let cursor = Cursor::Verification {
            rank: 0,
            id: 1,
            created_at: None,
        };
        let request = PageRequest::cursor(2, Some(cursor));
        assert!(matches!(
            paginate(set(&[1]), &request),
            Err(VerificationError::InvalidCursor)
        ));
    }

    #[test]
    fn parties_sort_by_kind_then_id() {
        let parties: BTreeSet<PartyRef> =
            [PartyRef::new("user", 1), PartyRef::new("team", 9), PartyRef::new("team", 2)]
                .into_iter()
                .collect();
        let page = paginate(parties, &PageRequest::All).unwrap();
        assert_eq!(
            page.items,
            vec![PartyRef::new("team", 2), PartyRef::new("team", 9), PartyRef::new("user", 1)]
        );
    }
}
