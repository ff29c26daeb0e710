#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::broadcast;

use vouch_core::{Broadcaster, PartyRef, VerificationConfig, VerificationEvent, VerificationStore};
use vouch_db::Database;

pub struct Harness {
    pub db: Arc<Database>,
    pub store: VerificationStore,
    pub events: broadcast::Receiver<VerificationEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VerificationConfig::default())
    }

    pub fn with_config(config: VerificationConfig) -> Self {
        init_tracing();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broadcaster = Broadcaster::default();
        let events = broadcaster.subscribe();
        let store = VerificationStore::new(db.clone(), config, Arc::new(broadcaster));
        Self { db, store, events }
    }

    /// Create a request from `sender` to `recipient` and return its id.
    pub fn send(&self, sender: &PartyRef, recipient: &PartyRef) -> i64 {
        self.store
            .create(sender, recipient, Some("Test verification message"), None)
            .unwrap()
            .expect("pair should not be blocked")
            .id
    }

    /// Create and accept a request from `sender` to `recipient`.
    pub fn verify(&self, sender: &PartyRef, recipient: &PartyRef) -> i64 {
        let id = self.send(sender, recipient);
        assert!(self.store.accept(recipient, id).unwrap());
        id
    }

    /// Mark a record blocked the way a host application would.
    pub fn set_status(&self, id: i64, status: &str) {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE verifications SET status = ?1 WHERE id = ?2",
                    (status, id),
                )?;
                Ok(())
            })
            .unwrap();
    }

    pub fn group_rows(&self) -> i64 {
        self.db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM verification_groups", [], |r| r.get(0))?)
            })
            .unwrap()
    }

    /// Everything emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<VerificationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn user(id: i64) -> PartyRef {
    PartyRef::new("user", id)
}

pub fn users(range: std::ops::Range<i64>) -> Vec<PartyRef> {
    range.map(user).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
