//! Capability traits for external collaborators.
//!
//! The engine never talks to a concrete backend: remote session storage,
//! the local key-value store, and URL navigation are single-purpose traits
//! with no internal retry. In-memory and capturing implementations are
//! provided for tests and for hosts that wire persistence later.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::types::Session;

/// Remote session blob store keyed by session id.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<Session>;
    async fn put(&self, session_id: &str, session: &Session) -> Result<()>;
}

/// Local key-value store for the small session-meta envelope.
pub trait MetaStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Navigation capability: the host routes the user to the given URL.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Transport holding sessions in process memory.
#[derive(Default)]
pub struct InMemoryTransport {
    sessions: DashMap<String, Session>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Pre-seed a stored session, e.g. before testing rehydration.
    pub fn seed(&self, session_id: impl Into<String>, session: Session) {
        self.sessions.insert(session_id.into(), session);
    }
}

#[async_trait]
impl SessionTransport for InMemoryTransport {
    async fn fetch(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| anyhow!("no session stored for id {session_id}"))
    }

    async fn put(&self, session_id: &str, session: &Session) -> Result<()> {
        self.sessions.insert(session_id.to_string(), session.clone());
        Ok(())
    }
}

/// Transport whose every call fails. Exercises the degraded paths.
pub struct FailingTransport;

#[async_trait]
impl SessionTransport for FailingTransport {
    async fn fetch(&self, session_id: &str) -> Result<Session> {
        Err(anyhow!("transport unavailable while fetching {session_id}"))
    }

    async fn put(&self, session_id: &str, _session: &Session) -> Result<()> {
        Err(anyhow!("transport unavailable while writing {session_id}"))
    }
}

/// Meta store backed by a DashMap, standing in for browser local storage.
#[derive(Default)]
pub struct InMemoryMetaStore {
    entries: DashMap<String, String>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for InMemoryMetaStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    fn put(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Navigator that records every requested URL, for assertions in tests.
#[derive(Default)]
pub struct CaptureNavigator {
    urls: Mutex<Vec<String>>,
}

impl CaptureNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.urls.lock().last().cloned()
    }
}

impl Navigator for CaptureNavigator {
    fn navigate(&self, url: &str) {
        self.urls.lock().push(url.to_string());
    }
}

/// No-op navigator for hosts that handle routing themselves.
pub struct NoOpNavigator;

impl Navigator for NoOpNavigator {
    fn navigate(&self, _url: &str) {}
}

/// Convenience: capture navigator as a shared handle.
pub fn capture_navigator() -> Arc<CaptureNavigator> {
    Arc::new(CaptureNavigator::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_transport_round_trips() {
        let transport = InMemoryTransport::new();
        let session = Session {
            application: "quotes".into(),
            ..Session::default()
        };

        transport.put("s-1", &session).await.unwrap();
        let fetched = transport.fetch("s-1").await.unwrap();
        assert_eq!(fetched.application, "quotes");

        assert!(transport.fetch("missing").await.is_err());
    }

    #[test]
    fn capture_navigator_records_urls() {
        let navigator = capture_navigator();
        navigator.navigate("/quote/vehicle");
        navigator.navigate("/quote/contact");
        assert_eq!(navigator.urls().len(), 2);
        assert_eq!(navigator.last().unwrap(), "/quote/contact");
    }
}
