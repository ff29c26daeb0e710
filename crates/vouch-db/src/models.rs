//! Database row types, these map directly to SQLite rows.
//! Converted into vouch-types models at the crate boundary.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Row;

use vouch_types::{PartyRef, Verification, VerificationGroup, VerificationStatus};

pub struct VerificationRow {
    pub id: i64,
    pub sender_id: i64,
    pub sender_type: String,
    pub recipient_id: i64,
    pub recipient_type: String,
    pub message: Option<String>,
    pub status: String,
    pub group_slug: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl VerificationRow {
    /// Column list matching [`VerificationRow::from_row`], qualified with alias `v`.
    pub const COLUMNS: &'static str = "v.id, v.sender_id, v.sender_type, v.recipient_id, v.recipient_type, \
         v.message, v.status, v.group_slug, v.created_at, v.updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            sender_type: row.get(2)?,
            recipient_id: row.get(3)?,
            recipient_type: row.get(4)?,
            message: row.get(5)?,
            status: row.get(6)?,
            group_slug: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub fn into_model(self) -> Result<Verification> {
        let status = self
            .status
            .parse::<VerificationStatus>()
            .map_err(|e| anyhow!("verification {}: {}", self.id, e))?;

        Ok(Verification {
            id: self.id,
            sender: PartyRef::new(self.sender_type, self.sender_id),
            recipient: PartyRef::new(self.recipient_type, self.recipient_id),
            message: self.message,
            status,
            group_slug: self.group_slug,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub struct VerificationGroupRow {
    pub id: i64,
    pub verification_id: i64,
    pub group_id: i64,
    pub verifier_id: i64,
    pub verifier_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl VerificationGroupRow {
    pub const COLUMNS: &'static str = "g.id, g.verification_id, g.group_id, g.verifier_id, g.verifier_type, \
         g.created_at, g.updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            verification_id: row.get(1)?,
            group_id: row.get(2)?,
            verifier_id: row.get(3)?,
            verifier_type: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn into_model(self) -> Result<VerificationGroup> {
        Ok(VerificationGroup {
            id: self.id,
            verification_id: self.verification_id,
            group_id: self.group_id,
            verifier: PartyRef::new(self.verifier_type, self.verifier_id),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Timestamps are written as fixed-width RFC 3339 so they sort as text.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("bad timestamp {:?}: {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_roundtrip_and_sort_as_text() {
        let a = timestamp_now();
        let b = timestamp_now();
        assert!(a <= b);
        assert_eq!(a.len(), b.len());
        assert!(parse_timestamp(&a).is_ok());
        assert!(parse_timestamp("yesterday").is_err());

        let parsed = parse_timestamp(&a).unwrap();
        assert_eq!(format_timestamp(parsed), a);
    }

    #[test]
    fn unknown_status_is_an_error() {
        let row = VerificationRow {
            id: 1,
            sender_id: 1,
            sender_type: "user".into(),
            recipient_id: 2,
            recipient_type: "user".into(),
            message: None,
            status: "revoked".into(),
            group_slug: None,
            created_at: timestamp_now(),
            updated_at: timestamp_now(),
        };
        assert!(row.into_model().is_err());
    }
}
