//! Bidirectional verification relationships between parties.
//!
//! [`VerificationStore`] owns the request lifecycle (create, accept, deny,
//! remove) and group tagging; [`RelationshipQueries`] answers read-side
//! questions over the same records, up to two hops out.

pub mod config;
pub mod error;
pub mod events;
pub mod query;
pub mod store;

pub use config::Config;
pub use error::{Result, VerificationError};
pub use events::{Broadcaster, EventSink, NoopSink};
pub use query::{RelationshipQueries, VerificationQuery};
pub use store::VerificationStore;

pub use vouch_types::{
    Cursor, Direction, GroupMap, Page, PageRequest, PartyRef, Verification, VerificationConfig,
    VerificationEvent, VerificationGroup, VerificationStatus,
};
