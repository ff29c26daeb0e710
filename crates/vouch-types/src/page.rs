use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PartyRef;

/// How much of a listing to return.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PageRequest {
    /// Everything, unpaginated.
    #[default]
    All,
    /// 1-based `page` of `per_page` rows.
    Offset { per_page: u32, page: u32 },
    /// `per_page` rows strictly after `after` in listing order.
    Cursor { per_page: u32, after: Option<Cursor> },
}

impl PageRequest {
    /// Offset paging where a zero page size means "everything".
    pub fn new(per_page: u32, page: u32) -> Self {
        if per_page == 0 {
            Self::All
        } else {
            Self::Offset { per_page, page: page.max(1) }
        }
    }

    /// Cursor paging where a zero page size means "everything".
    pub fn cursor(per_page: u32, after: Option<Cursor>) -> Self {
        if per_page == 0 {
            Self::All
        } else {
            Self::Cursor { per_page, after }
        }
    }

    pub fn per_page(&self) -> Option<u32> {
        match self {
            Self::All => None,
            Self::Offset { per_page, .. } | Self::Cursor { per_page, .. } => Some(*per_page),
        }
    }
}

/// Keyset position inside a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Cursor {
    /// Verification listings sort on (status rank, id), or on
    /// (created_at, id) descending for newest-first listings.
    Verification {
        rank: u8,
        id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
    },
    /// Party listings sort on (kind, id).
    Party { party: PartyRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 0 when unpaginated.
    pub per_page: u32,
    /// Set for offset paging.
    pub current_page: Option<u32>,
    /// Set for offset paging and for unpaginated listings.
    pub total: Option<u64>,
    /// Set for cursor paging when more rows follow.
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn all(items: Vec<T>) -> Self {
        let total = items.len() as u64;
        Self {
            items,
            per_page: 0,
            current_page: None,
            total: Some(total),
            next_cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether another page follows this one.
    pub fn has_more(&self) -> bool {
        match (self.current_page, self.total) {
            (Some(page), Some(total)) if self.per_page > 0 => {
                u64::from(page) * u64::from(self.per_page) < total
            }
            _ => self.next_cursor.is_some(),
        }
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
