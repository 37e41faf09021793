//! Debounced session save loop.
//!
//! Save triggers arrive faster than the remote store should be written to,
//! so blobs are funneled through a channel into a background task that
//! collapses bursts into one write and suppresses writes of an unchanged
//! blob entirely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use waypoint_core::types::Session;
use waypoint_session::SessionService;

pub struct SessionSaver {
    tx: mpsc::Sender<Session>,
}

impl SessionSaver {
    /// Spawns the background save loop. `debounce` is the quiet window a
    /// burst of triggers must close before a write goes out.
    pub fn new(session: Arc<SessionService>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(session, rx, debounce));
        Self { tx }
    }

    /// Queues a blob for saving. Dropped silently when the channel is full;
    /// a newer blob will follow shortly anyway.
    pub fn push(&self, session: Session) {
        let _ = self.tx.try_send(session);
    }
}

async fn run(service: Arc<SessionService>, mut rx: mpsc::Receiver<Session>, debounce: Duration) {
    let mut last_sent: Option<Session> = None;

    while let Some(mut blob) = rx.recv().await {
        // Absorb everything that arrives inside the quiet window; only the
        // newest blob matters.
        loop {
            match timeout(debounce, rx.recv()).await {
                Ok(Some(newer)) => blob = newer,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        if last_sent.as_ref() == Some(&blob) {
            debug!("session unchanged, save suppressed");
            continue;
        }

        service.update_session(blob.clone());
        last_sent = Some(blob);
    }
}
