pub mod config;
pub mod events;
pub mod models;
pub mod page;

pub use config::{GroupMap, VerificationConfig};
pub use events::VerificationEvent;
pub use models::{Direction, PartyRef, Verification, VerificationGroup, VerificationStatus};
pub use page::{Cursor, Page, PageRequest};
