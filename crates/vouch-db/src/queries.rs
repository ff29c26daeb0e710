use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use vouch_types::{PartyRef, VerificationStatus};

use crate::filter::{Keyset, VerificationFilter};
use crate::models::{VerificationGroupRow, VerificationRow, timestamp_now};

/// Row window for a listing query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    pub limit: Option<u32>,
    pub offset: u64,
    /// Keyset position of the last row already seen.
    pub after: Option<Keyset>,
}

pub struct NewVerification<'a> {
    pub sender: &'a PartyRef,
    pub recipient: &'a PartyRef,
    pub message: Option<&'a str>,
    pub group_slug: Option<&'a str>,
}

// -- Verifications --

pub fn insert_verification(
    conn: &Connection,
    new: &NewVerification<'_>,
) -> Result<VerificationRow> {
    let now = timestamp_now();
    conn.execute(
        "INSERT INTO verifications
            (sender_id, sender_type, recipient_id, recipient_type, message, status, group_slug, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        rusqlite::params![
            new.sender.id,
            new.sender.kind,
            new.recipient.id,
            new.recipient.kind,
            new.message,
            VerificationStatus::Pending.as_str(),
            new.group_slug,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    Ok(VerificationRow {
        id,
        sender_id: new.sender.id,
        sender_type: new.sender.kind.clone(),
        recipient_id: new.recipient.id,
        recipient_type: new.recipient.kind.clone(),
        message: new.message.map(str::to_string),
        status: VerificationStatus::Pending.as_str().to_string(),
        group_slug: new.group_slug.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Listing of verifications matching `filter`, in the filter's sort order.
pub fn select_verifications(
    conn: &Connection,
    filter: &VerificationFilter,
    window: Window,
) -> Result<Vec<VerificationRow>> {
    let (mut clause, mut params) = filter.where_sql();

    if let Some(after) = &window.after {
        clause = format!("{} AND {}", clause, filter.after_sql(after, &mut params));
    }

    let mut sql = format!(
        "SELECT {} FROM verifications v WHERE {} {}",
        VerificationRow::COLUMNS,
        clause,
        filter.order_sql()
    );

    // SQLite reads a negative offset as 0, so clamp instead of wrapping
    let offset = i64::try_from(window.offset).unwrap_or(i64::MAX);
    match window.limit {
        Some(limit) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(i64::from(limit)));
            params.push(Value::Integer(offset));
        }
        None if offset > 0 => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(offset));
        }
        None => {}
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), VerificationRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// First row in the filter's sort order.
pub fn first_verification(
    conn: &Connection,
    filter: &VerificationFilter,
) -> Result<Option<VerificationRow>> {
    let window = Window {
        limit: Some(1),
        ..Window::default()
    };
    Ok(select_verifications(conn, filter, window)?.into_iter().next())
}

pub fn count_verifications(conn: &Connection, filter: &VerificationFilter) -> Result<u64> {
    let (clause, params) = filter.where_sql();
    let sql = format!("SELECT COUNT(*) FROM verifications v WHERE {}", clause);
    let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
    Ok(count as u64)
}

pub fn verification_exists(conn: &Connection, filter: &VerificationFilter) -> Result<bool> {
    let (clause, params) = filter.where_sql();
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM verifications v WHERE {})",
        clause
    );
    let exists: bool = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
    Ok(exists)
}

pub fn update_status(conn: &Connection, id: i64, status: VerificationStatus) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE verifications SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), timestamp_now(), id],
    )?;
    Ok(changed)
}

/// Delete every verification matching `filter`. Group tags cascade.
pub fn delete_verifications(conn: &Connection, filter: &VerificationFilter) -> Result<usize> {
    let (clause, params) = filter.where_sql();
    let sql = format!(
        "DELETE FROM verifications WHERE id IN (SELECT v.id FROM verifications v WHERE {})",
        clause
    );
    let deleted = conn.execute(&sql, params_from_iter(params))?;
    Ok(deleted)
}

// -- Groups --

/// Tag a verification with a group on behalf of `verifier`.
/// Returns true when a new tag was inserted, false when an existing one was touched.
pub fn upsert_group(
    conn: &Connection,
    verification_id: i64,
    group_id: i64,
    verifier: &PartyRef,
) -> Result<bool> {
    let now = timestamp_now();

    // Check if the tag already exists
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM verification_groups
             WHERE verification_id = ?1 AND group_id = ?2 AND verifier_id = ?3 AND verifier_type = ?4",
            rusqlite::params![verification_id, group_id, verifier.id, verifier.kind],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(existing_id) = existing {
        conn.execute(
            "UPDATE verification_groups SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, existing_id],
        )?;
        Ok(false)
    } else {
        conn.execute(
            "INSERT INTO verification_groups
                (verification_id, group_id, verifier_id, verifier_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![verification_id, group_id, verifier.id, verifier.kind, now],
        )?;
        Ok(true)
    }
}

/// Remove the tags `verifier` placed on a verification.
pub fn delete_groups(
    conn: &Connection,
    verification_id: i64,
    verifier: &PartyRef,
) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM verification_groups
         WHERE verification_id = ?1 AND verifier_id = ?2 AND verifier_type = ?3",
        rusqlite::params![verification_id, verifier.id, verifier.kind],
    )?;
    Ok(deleted)
}

/// All tags on verifications matching `filter`, oldest tag first.
pub fn select_groups(
    conn: &Connection,
    filter: &VerificationFilter,
) -> Result<Vec<VerificationGroupRow>> {
    let (clause, params) = filter.where_sql();
    let sql = format!(
        "SELECT {} FROM verification_groups g
         JOIN verifications v ON v.id = g.verification_id
         WHERE {}
         ORDER BY g.id ASC",
        VerificationGroupRow::COLUMNS,
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), VerificationGroupRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::filter::GroupFilter;

    fn user(id: i64) -> PartyRef {
        PartyRef::new("user", id)
    }

    fn insert(conn: &Connection, sender: i64, recipient: i64) -> i64 {
        insert_verification(
            conn,
            &NewVerification {
                sender: &user(sender),
                recipient: &user(recipient),
                message: None,
                group_slug: None,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn between_matches_both_directions_only() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(conn, 1, 2);
            insert(conn, 2, 1);
            insert(conn, 1, 3);

            let between = VerificationFilter::between(&user(1), &user(2));
            let rows = select_verifications(conn, &between, Window::default())?;
            assert_eq!(rows.len(), 2);

            let sent = count_verifications(conn, &VerificationFilter::sent(&user(2), &user(1)))?;
            assert_eq!(sent, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn party_kind_is_part_of_the_key() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(conn, 1, 2);
            let team = PartyRef::new("team", 1);
            assert!(!verification_exists(conn, &VerificationFilter::between(&team, &user(2)))?);
            assert!(verification_exists(conn, &VerificationFilter::between(&user(2), &user(1)))?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn window_limits_and_keysets() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let ids: Vec<i64> = (0..5).map(|_| insert(conn, 1, 2)).collect();
            let filter = VerificationFilter::involving(&user(1), None);

            let window = Window {
                limit: Some(2),
                offset: 2,
                after: None,
            };
            let page = select_verifications(conn, &filter, window)?;
            assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), ids[2..4].to_vec());

            let window = Window {
                limit: Some(10),
                offset: 0,
                after: Some(Keyset {
                    rank: 0,
                    id: ids[3],
                    created_at: None,
                }),
            };
            let after = select_verifications(conn, &filter, window)?;
            assert_eq!(after.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[4]]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn offsets_past_i64_range_return_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(conn, 1, 2);
            let filter = VerificationFilter::involving(&user(1), None);
            // Offset of page u32::MAX at u32::MAX rows per page
            let far = u64::from(u32::MAX - 1) * u64::from(u32::MAX);
            assert!(far > i64::MAX as u64);

            for limit in [Some(u32::MAX), None] {
                let window = Window {
                    limit,
                    offset: far,
                    after: None,
                };
                assert!(select_verifications(conn, &filter, window)?.is_empty());
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn latest_prefers_highest_id_on_ties() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = insert(conn, 1, 2);
            let second = insert(conn, 2, 1);
            // Force identical creation times
            conn.execute(
                "UPDATE verifications SET created_at = '2024-01-01T00:00:00.000000Z'",
                [],
            )?;

            let filter = VerificationFilter::between(&user(1), &user(2)).latest_first();
            let latest = first_verification(conn, &filter)?;
            assert_eq!(latest.map(|r| r.id), Some(second));
            assert!(second > first);

            let older = Window {
                limit: Some(5),
                offset: 0,
                after: Some(Keyset {
                    rank: 0,
                    id: second,
                    created_at: Some("2024-01-01T00:00:00Z".parse()?),
                }),
            };
            let rows = select_verifications(conn, &filter, older)?;
            assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn grouped_listing_orders_by_status_priority() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let denied = insert(conn, 1, 2);
            let accepted = insert(conn, 1, 2);
            let pending = insert(conn, 1, 2);
            update_status(conn, denied, VerificationStatus::Denied)?;
            update_status(conn, accepted, VerificationStatus::Accepted)?;
            for id in [denied, accepted, pending] {
                upsert_group(conn, id, 1, &user(2))?;
            }

            let filter =
                VerificationFilter::involving(&user(1), None).with_group(GroupFilter::Tagged(1));
            let rows = select_verifications(conn, &filter, Window::default())?;
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![pending, accepted, denied]);

            let unresolved = filter.with_group(GroupFilter::Unresolved);
            assert_eq!(count_verifications(conn, &unresolved)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn upsert_reports_creation_once() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = insert(conn, 1, 2);
            assert!(upsert_group(conn, id, 1, &user(2))?);
            assert!(!upsert_group(conn, id, 1, &user(2))?);
            assert!(upsert_group(conn, id, 2, &user(2))?);

            let rows = select_groups(conn, &VerificationFilter::between(&user(1), &user(2)))?;
            assert_eq!(rows.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn deleting_a_verification_cascades_to_groups() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = insert(conn, 1, 2);
            upsert_group(conn, id, 1, &user(2))?;

            let filter = VerificationFilter::between(&user(1), &user(2)).with_id(Some(id));
            let deleted = delete_verifications(conn, &filter)?;
            assert_eq!(deleted, 1);

            let orphans: i64 =
                conn.query_row("SELECT COUNT(*) FROM verification_groups", [], |r| r.get(0))?;
            assert_eq!(orphans, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_groups_is_scoped_to_verifier() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let id = insert(conn, 1, 2);
            upsert_group(conn, id, 1, &user(1))?;
            upsert_group(conn, id, 2, &user(2))?;
            upsert_group(conn, id, 3, &user(2))?;

            assert_eq!(delete_groups(conn, id, &user(2))?, 2);
            let left = select_groups(conn, &VerificationFilter::between(&user(1), &user(2)))?;
            assert_eq!(left.len(), 1);
            Ok(())
        })
        .unwrap();
    }
}
