//! Session lifecycle service.
//!
//! Checks the locally cached meta envelope, fetches the remote blob when a
//! resumable session exists, and persists updates best-effort: writes are
//! spawned fire-and-forget and a failure never interrupts the user flow.
//! `ensure_update_session` is the one confirmed-write variant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waypoint_core::capabilities::{MetaStore, SessionTransport};
use waypoint_core::config::SessionSettings;
use waypoint_core::error::{JourneyError, JourneyResult};
use waypoint_core::types::Session;

use crate::meta::{Nonce, SessionMeta};

pub struct SessionService {
    journey_id: String,
    /// Local meta-store key: namespace-journeyId.
    storage_key: String,
    session_id: Mutex<Option<String>>,
    /// Set once the journey actually loaded from a session.
    active: AtomicBool,
    settings: SessionSettings,
    meta_store: Arc<dyn MetaStore>,
    transport: Arc<dyn SessionTransport>,
}

impl SessionService {
    pub fn new(
        journey_id: impl Into<String>,
        settings: SessionSettings,
        meta_store: Arc<dyn MetaStore>,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        let journey_id = journey_id.into();
        let storage_key = format!("{}-{}", settings.namespace, journey_id);
        Self {
            journey_id,
            storage_key,
            session_id: Mutex::new(None),
            active: AtomicBool::new(false),
            settings,
            meta_store,
            transport,
        }
    }

    /// Checks for a resumable session and loads it when permitted. Returns
    /// the fetched session on success; a fetch failure discards the local
    /// meta and degrades to a fresh journey.
    pub async fn init(&self, can_load_from_session: bool) -> Option<Session> {
        if self.has_valid_session() {
            *self.session_id.lock() = Some(self.session_meta().id);
        }

        if can_load_from_session && self.has_valid_session() {
            let id = self.session_id.lock().clone()?;
            match self.transport.fetch(&id).await {
                Ok(session) => {
                    info!(journey_id = %self.journey_id, session_id = %id, "session loaded");
                    self.active.store(true, Ordering::SeqCst);
                    return Some(session);
                }
                Err(error) => {
                    warn!(
                        journey_id = %self.journey_id,
                        error = %error,
                        "session fetch failed, starting fresh"
                    );
                    self.remove_session();
                    return None;
                }
            }
        }

        self.active.store(false, Ordering::SeqCst);
        None
    }

    /// The meta envelope from the local store, or an empty default.
    pub fn session_meta(&self) -> SessionMeta {
        self.meta_store
            .get(&self.storage_key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_session_meta(&self, meta: &SessionMeta) {
        match serde_json::to_string(meta) {
            Ok(raw) => self.meta_store.put(&self.storage_key, raw),
            Err(error) => warn!(error = %error, "session meta not serializable"),
        }
    }

    pub fn has_session(&self) -> bool {
        self.meta_store.get(&self.storage_key).is_some()
    }

    /// Whether the journey actually loaded from a session.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// A session is valid while its expiry lies in the future and its schema
    /// version matches the configured one.
    pub fn has_valid_session(&self) -> bool {
        if !self.has_session() {
            return false;
        }
        let meta = self.session_meta();
        Utc::now().timestamp() < meta.expires && meta.version == self.settings.version
    }

    /// Creates (or refreshes) the session: assigns an id when none exists
    /// yet and persists blob and meta in the background. The meta is only
    /// saved once the remote write succeeded.
    pub fn create_session(self: &Arc<Self>, session: Session) {
        let id = {
            let mut guard = self.session_id.lock();
            guard
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone()
        };

        let meta = SessionMeta {
            id: id.clone(),
            expires: (Utc::now() + Duration::seconds(self.settings.expires_secs)).timestamp(),
            version: self.settings.version.clone(),
            nonces: Vec::new(),
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.transport.put(&id, &session).await {
                Ok(()) => {
                    this.save_session_meta(&meta);
                    this.active.store(true, Ordering::SeqCst);
                    metrics::counter!("session.write.ok").increment(1);
                    debug!(session_id = %id, "session created");
                }
                Err(error) => {
                    this.active.store(false, Ordering::SeqCst);
                    metrics::counter!("session.write.failed").increment(1);
                    warn!(session_id = %id, error = %error, "session create failed");
                }
            }
        });
    }

    /// Overwrites the remote blob in the background. Failures are logged
    /// and swallowed; the in-memory journey stays authoritative.
    pub fn update_session(self: &Arc<Self>, session: Session) {
        let Some(id) = self.session_id.lock().clone() else {
            debug!("no session id yet, update skipped");
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.transport.put(&id, &session).await {
                Ok(()) => metrics::counter!("session.write.ok").increment(1),
                Err(error) => {
                    metrics::counter!("session.write.failed").increment(1);
                    warn!(session_id = %id, error = %error, "session update failed");
                }
            }
        });
    }

    /// Confirmed-write variant for callers that need the outcome.
    pub async fn ensure_update_session(&self, session: &Session) -> anyhow::Result<()> {
        let id = self
            .session_id
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no session id assigned yet"))?;
        self.transport.put(&id, session).await
    }

    pub fn remove_session(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.meta_store.remove(&self.storage_key);
    }

    /// Expiry of the stored session as epoch seconds, if one exists.
    pub fn expiry(&self) -> Option<i64> {
        if !self.has_session() {
            return None;
        }
        Some(self.session_meta().expires)
    }

    /// Issues a nonce for the given step, replacing any outstanding one for
    /// that step. Requires an active session.
    pub fn create_nonce(
        &self,
        step_id: &str,
        expires_in: Option<Duration>,
    ) -> JourneyResult<Nonce> {
        if !self.is_active() {
            return Err(JourneyError::SessionInactive);
        }

        let lifetime =
            expires_in.unwrap_or_else(|| Duration::seconds(self.settings.nonce_expiry_secs));
        let nonce = Nonce::new(step_id, (Utc::now() + lifetime).timestamp());

        let mut meta = self.session_meta();
        if let Some(existing) = meta.nonce_by_step(step_id) {
            let existing_id = existing.id.clone();
            meta.remove_nonce(&existing_id);
        }
        meta.add_nonce(nonce.clone());
        self.save_session_meta(&meta);

        Ok(nonce)
    }

    /// Single-use check: the nonce is removed no matter the outcome, and the
    /// result reports whether it was both present and unexpired.
    pub fn is_nonce_valid(&self, nonce_id: &str) -> bool {
        let mut meta = self.session_meta();
        let Some(nonce) = meta.nonce(nonce_id).cloned() else {
            return false;
        };
        meta.remove_nonce(&nonce.id);
        self.save_session_meta(&meta);
        !nonce.is_expired()
    }

    /// True when the in-memory session id no longer matches the stored one,
    /// e.g. after another tab created a new session.
    pub fn has_session_id_mismatch(&self) -> bool {
        let current = self.session_id.lock().clone();
        let stored = self.session_meta().id;
        match current {
            Some(id) if !stored.is_empty() => id != stored,
            _ => false,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.lock() = Some(session_id.into());
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::capabilities::{FailingTransport, InMemoryMetaStore, InMemoryTransport};

    fn service_with(transport: Arc<dyn SessionTransport>) -> Arc<SessionService> {
        Arc::new(SessionService::new(
            "car-quote",
            SessionSettings::default(),
            Arc::new(InMemoryMetaStore::new()),
            transport,
        ))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn init_without_stored_meta_starts_fresh() {
        let service = service_with(Arc::new(InMemoryTransport::new()));
        assert!(service.init(true).await.is_none());
        assert!(!service.is_active());
    }

    #[tokio::test]
    async fn create_then_init_resumes_the_session() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = service_with(transport.clone());

        let session = Session {
            application: "quotes".to_string(),
            ..Session::default()
        };
        service.create_session(session);
        wait_for(|| service.is_active()).await;
        assert_eq!(transport.len(), 1);

        let resumed = service.init(true).await.unwrap();
        assert_eq!(resumed.application, "quotes");
        assert!(service.is_active());
    }

    #[tokio::test]
    async fn expired_or_mismatched_meta_is_not_valid() {
        let service = service_with(Arc::new(InMemoryTransport::new()));

        service.save_session_meta(&SessionMeta {
            id: "s-1".to_string(),
            expires: Utc::now().timestamp() - 10,
            version: "1".to_string(),
            nonces: Vec::new(),
        });
        assert!(service.has_session());
        assert!(!service.has_valid_session());

        service.save_session_meta(&SessionMeta {
            id: "s-1".to_string(),
            expires: Utc::now().timestamp() + 600,
            version: "2".to_string(),
            nonces: Vec::new(),
        });
        assert!(!service.has_valid_session());
    }

    #[tokio::test]
    async fn fetch_failure_discards_meta_and_degrades() {
        let service = service_with(Arc::new(FailingTransport));
        service.save_session_meta(&SessionMeta {
            id: "s-1".to_string(),
            expires: Utc::now().timestamp() + 600,
            version: "1".to_string(),
            nonces: Vec::new(),
        });

        assert!(service.init(true).await.is_none());
        assert!(!service.is_active());
        assert!(!service.has_session());
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        let service = service_with(Arc::new(FailingTransport));
        service.set_session_id("s-1");
        service.update_session(Session::default());
        tokio::task::yield_now().await;
        assert!(service.ensure_update_session(&Session::default()).await.is_err());
    }

    #[tokio::test]
    async fn nonce_is_single_use() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = service_with(transport);
        service.create_session(Session::default());
        wait_for(|| service.is_active()).await;

        let nonce = service.create_nonce("recap", None).unwrap();
        assert!(service.is_nonce_valid(&nonce.id));
        // consumed on first check, regardless of expiry
        assert!(!service.is_nonce_valid(&nonce.id));
    }

    #[tokio::test]
    async fn expired_nonce_is_consumed_and_invalid() {
        let service = service_with(Arc::new(InMemoryTransport::new()));
        service.create_session(Session::default());
        wait_for(|| service.is_active()).await;

        let nonce = service
            .create_nonce("recap", Some(Duration::seconds(-5)))
            .unwrap();
        assert!(!service.is_nonce_valid(&nonce.id));
        assert!(service.session_meta().nonce(&nonce.id).is_none());
    }

    #[tokio::test]
    async fn at_most_one_nonce_per_step() {
        let service = service_with(Arc::new(InMemoryTransport::new()));
        service.create_session(Session::default());
        wait_for(|| service.is_active()).await;

        let first = service.create_nonce("recap", None).unwrap();
        let second = service.create_nonce("recap", None).unwrap();

        let meta = service.session_meta();
        assert!(meta.nonce(&first.id).is_none());
        assert!(meta.nonce(&second.id).is_some());
        assert_eq!(meta.nonces.len(), 1);
    }

    #[tokio::test]
    async fn nonce_requires_an_active_session() {
        let service = service_with(Arc::new(InMemoryTransport::new()));
        assert!(matches!(
            service.create_nonce("recap", None),
            Err(JourneyError::SessionInactive)
        ));
    }

    #[tokio::test]
    async fn session_id_mismatch_detection() {
        let service = service_with(Arc::new(InMemoryTransport::new()));
        assert!(!service.has_session_id_mismatch());

        service.save_session_meta(&SessionMeta {
            id: "stored".to_string(),
            expires: Utc::now().timestamp() + 600,
            version: "1".to_string(),
            nonces: Vec::new(),
        });
        service.set_session_id("loaded");
        assert!(service.has_session_id_mismatch());

        service.set_session_id("stored");
        assert!(!service.has_session_id_mismatch());
    }
}
