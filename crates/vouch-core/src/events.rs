use tokio::sync::broadcast;

use vouch_types::VerificationEvent;

/// Receives lifecycle signals after the mutation that caused them committed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &VerificationEvent);
}

impl<F> EventSink for F
where
    F: Fn(&VerificationEvent) + Send + Sync,
{
    fn emit(&self, event: &VerificationEvent) {
        self(event)
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &VerificationEvent) {}
}

/// Fans events out to any number of subscribers over a broadcast channel.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<VerificationEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to lifecycle events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, event: &VerificationEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event.clone());
    }
}
