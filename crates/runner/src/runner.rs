//! The journey runner: guarded initialization, next/previous navigation
//! through the host's navigator, step saving with step-link auto-advance,
//! session hooks, and the idle-reset timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waypoint_core::capabilities::{MetaStore, Navigator, SessionTransport};
use waypoint_core::config::JourneySettings;
use waypoint_core::error::{JourneyError, JourneyResult};
use waypoint_core::types::{DataValue, Field, Session};
use waypoint_journey::ab::{self, AbConfig};
use waypoint_journey::collection::{ActiveStepsCollection, LoadOptions};
use waypoint_journey::snapshot;
use waypoint_journey::types::{PathGroupConfig, ReloadProtection, StepDef};
use waypoint_session::SessionService;

use crate::saver::SessionSaver;

const SAVE_DEBOUNCE: StdDuration = StdDuration::from_millis(500);

/// Mutates the session blob right before every save. Hosts use this to
/// strip or enrich persisted data.
pub trait SessionHook: Send + Sync {
    fn before_save(&self, session: Session) -> Session;
}

/// Options for [`JourneyRunner::next`].
#[derive(Debug, Clone, Default)]
pub struct NextOptions {
    /// Branch to select at the current step before moving on. The special
    /// value `"none"` drops the current step's branch selection instead.
    pub path: Option<String>,
}

/// Options for [`JourneyRunner::save_current_step`].
#[derive(Debug, Clone)]
pub struct SaveStepOptions {
    pub valid: bool,
    pub save_session: bool,
}

impl Default for SaveStepOptions {
    fn default() -> Self {
        Self {
            valid: false,
            save_session: true,
        }
    }
}

/// Everything needed to start a journey.
pub struct RunnerConfig {
    pub settings: JourneySettings,
    pub steps: Vec<StepDef>,
    pub paths: Vec<PathGroupConfig>,
    pub ab: Option<AbConfig>,
}

pub struct JourneyRunner {
    settings: JourneySettings,
    base_steps: Vec<StepDef>,
    paths: Vec<PathGroupConfig>,
    ab: Option<AbConfig>,
    collection: Mutex<ActiveStepsCollection>,
    session: Arc<SessionService>,
    navigator: Arc<dyn Navigator>,
    hooks: Mutex<Vec<Box<dyn SessionHook>>>,
    saver: SessionSaver,
    loaded: AtomicBool,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

impl JourneyRunner {
    /// Builds the runner. The journey is not usable until [`init`] resolved
    /// the entry slug and, when permitted, rehydrated the session.
    ///
    /// [`init`]: JourneyRunner::init
    pub fn new(
        config: RunnerConfig,
        meta_store: Arc<dyn MetaStore>,
        transport: Arc<dyn SessionTransport>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let session = Arc::new(SessionService::new(
            config.settings.id.clone(),
            config.settings.session.clone(),
            meta_store,
            transport,
        ));
        let saver = SessionSaver::new(Arc::clone(&session), SAVE_DEBOUNCE);

        Arc::new(Self {
            settings: config.settings,
            base_steps: config.steps,
            paths: config.paths,
            ab: config.ab,
            collection: Mutex::new(ActiveStepsCollection::empty()),
            session,
            navigator,
            hooks: Mutex::new(Vec::new()),
            saver,
            loaded: AtomicBool::new(false),
            reset_timer: Mutex::new(None),
        })
    }

    /// Initializes the journey for the given entry slug: applies A/B
    /// selection, loads a resumable session when the target step allows it,
    /// and guards the deep link. Failed guards redirect instead of erroring.
    pub async fn init(
        self: &Arc<Self>,
        entry_slug: &str,
        nonce_token: Option<&str>,
    ) -> JourneyResult<()> {
        let steps = match &self.ab {
            Some(config) => ab::select_steps(config, self.base_steps.clone()),
            None => self.base_steps.clone(),
        };

        let Some(step_to_load) = Self::find_in_config(&steps, &self.paths, entry_slug) else {
            warn!(slug = %entry_slug, "entry slug unknown, redirecting to fallback");
            self.navigator.navigate(&self.settings.route_fallback);
            return Ok(());
        };
        let can_load_from_session = step_to_load.can_load_from_session;

        let session = self.session.init(can_load_from_session).await;
        let collection = ActiveStepsCollection::new(
            steps,
            session.as_ref(),
            LoadOptions {
                include_path: false,
                paths: self.paths.clone(),
            },
        )?;
        *self.collection.lock() = collection;

        self.load_step_on_init(entry_slug, nonce_token)?;
        self.loaded.store(true, Ordering::SeqCst);
        info!(journey_id = %self.settings.id, slug = %entry_slug, "journey initialized");
        Ok(())
    }

    fn find_in_config<'a>(
        steps: &'a [StepDef],
        paths: &'a [PathGroupConfig],
        slug: &str,
    ) -> Option<&'a StepDef> {
        if let Some(step) = steps.iter().find(|step| step.slug == slug) {
            return Some(step);
        }
        paths
            .iter()
            .flat_map(|group| &group.paths)
            .flat_map(|path| &path.steps)
            .find(|step| step.slug == slug)
    }

    fn load_step_on_init(self: &Arc<Self>, slug: &str, nonce_token: Option<&str>) -> JourneyResult<()> {
        if self.can_load_step_on_init(slug, nonce_token) {
            let fallback_slug = {
                let collection = self.collection.lock();
                if collection.step_by_slug(slug).is_none() && collection.is_step_in_path(slug) {
                    // Deep link into a branch that was never selected this
                    // session: send the user back to the fork.
                    match collection.path_fallback(slug) {
                        Some(fork) => Some(fork.slug.clone()),
                        None => None,
                    }
                } else {
                    None
                }
            };
            if let Some(fork_slug) = fallback_slug {
                self.navigator.navigate(&self.step_url(&fork_slug));
                return Ok(());
            }

            let known = self.collection.lock().step_by_slug(slug).is_some();
            if !known {
                self.navigator.navigate(&self.settings.route_fallback);
                return Ok(());
            }

            let step_id = {
                let collection = self.collection.lock();
                let step = collection
                    .step_by_slug(slug)
                    .ok_or_else(|| JourneyError::UnknownStep(slug.to_string()))?;
                step.id.clone()
            };
            if !self.collection.lock().steps_before_are_valid(&step_id)? {
                self.navigate_to_first_invalid_step();
                return Ok(());
            }

            return self.load_step_by_slug(slug);
        }

        // Guard refused. Nonce-protected steps and everything else both land
        // on the first step of a fresh journey.
        self.go_to_start();
        Ok(())
    }

    /// Whether the entry slug may be loaded directly. The first step always
    /// may; session-loadable steps need a valid session (plus a consumed
    /// valid nonce or a recorded branch selection where required); anything
    /// else is refused.
    fn can_load_step_on_init(&self, slug: &str, nonce_token: Option<&str>) -> bool {
        if !self.settings.guard_routes {
            return true;
        }

        let steps = match &self.ab {
            Some(config) => ab::select_steps(config, self.base_steps.clone()),
            None => self.base_steps.clone(),
        };
        let Some(step_to_load) = Self::find_in_config(&steps, &self.paths, slug) else {
            return false;
        };

        if step_to_load.can_load_from_session {
            return self.check_session(step_to_load, nonce_token);
        }

        steps.first().map(|step| step.slug == slug).unwrap_or(false)
    }

    fn check_session(&self, step_to_load: &StepDef, nonce_token: Option<&str>) -> bool {
        if !self.session.has_valid_session() {
            return false;
        }

        if step_to_load.protect_load_from_session == Some(ReloadProtection::Nonce) {
            return match nonce_token {
                Some(token) => self.session.is_nonce_valid(token),
                None => false,
            };
        }

        // A step living inside a branch is only reachable when that branch
        // was actually selected this session.
        let branch = self
            .paths
            .iter()
            .flat_map(|group| &group.paths)
            .find(|path| path.steps.iter().any(|step| step.slug == step_to_load.slug));
        if let Some(branch) = branch {
            let collection = self.collection.lock();
            return collection
                .history()
                .paths()
                .iter()
                .any(|record| record.path_id == branch.id);
        }

        true
    }

    fn navigate_to_first_invalid_step(&self) {
        let slug = {
            let collection = self.collection.lock();
            collection.first_invalid_step().and_then(|step| {
                if step.changes_url {
                    Some(step.slug.clone())
                } else {
                    collection
                        .get_previous_with_url(Some(&step.slug))
                        .map(|previous| previous.slug.clone())
                }
            })
        };
        if let Some(slug) = slug {
            self.navigator.navigate(&self.step_url(&slug));
        }
    }

    /// Sets the step with the given slug current and, when the session is
    /// stale or absent, starts a fresh one for session-loadable steps.
    pub fn load_step_by_slug(self: &Arc<Self>, slug: &str) -> JourneyResult<()> {
        let (step_id, can_load_from_session) = {
            let collection = self.collection.lock();
            let step = collection
                .step_by_slug(slug)
                .ok_or_else(|| JourneyError::UnknownStep(slug.to_string()))?;
            (step.id.clone(), step.can_load_from_session)
        };
        self.collection.lock().set_current_step(&step_id)?;
        self.handle_session(can_load_from_session);
        self.schedule_session_reset();
        Ok(())
    }

    /// Starts a session when none valid exists and the step supports
    /// resuming later.
    fn handle_session(self: &Arc<Self>, can_load_from_session: bool) {
        if self.session.has_valid_session() {
            return;
        }
        self.session.remove_session();
        if can_load_from_session {
            let blob = self.build_session();
            self.session.create_session(blob);
        }
    }

    // -- navigation ---------------------------------------------------------

    /// Moves to the next visible step. Marks the step being left valid,
    /// queues a session save, and routes through the navigator when the next
    /// step owns a URL. Returns whether a move happened.
    pub fn next(self: &Arc<Self>, options: NextOptions) -> JourneyResult<bool> {
        let navigate_to = {
            let mut collection = self.collection.lock();
            let Some(current) = collection.current_step() else {
                return Ok(false);
            };
            if !current.go_to_next_enabled {
                debug!(step_id = %current.id, "forward navigation disabled");
                return Ok(false);
            }

            if let Some(path) = &options.path {
                if path == "none" {
                    Self::remove_path_for_current_step(&mut collection);
                } else {
                    collection.set_path(path)?;
                }
            }

            let Some(next) = collection.get_next() else {
                return Ok(false);
            };
            let (next_id, next_slug, changes_url) =
                (next.id.clone(), next.slug.clone(), next.changes_url);

            collection.set_current_step_valid();
            collection.set_current_step(&next_id)?;
            changes_url.then_some(next_slug)
        };

        self.save_session();
        self.schedule_session_reset();
        if let Some(slug) = navigate_to {
            self.navigator.navigate(&self.step_url(&slug));
        }
        Ok(true)
    }

    fn remove_path_for_current_step(collection: &mut ActiveStepsCollection) {
        let Some(current_id) = collection.current_step().map(|step| step.id.clone()) else {
            return;
        };
        let Some(path_id) = collection
            .chosen_path_for_step(&current_id)
            .map(str::to_string)
        else {
            return;
        };
        if let Ok(group) = collection.path_collection(&path_id).map(|group| group.clone()) {
            collection.remove_path_and_path_steps(&group);
        }
    }

    /// Moves to the previous visible step, honoring the current step's
    /// permission. Returns whether a move happened.
    pub fn previous(self: &Arc<Self>) -> JourneyResult<bool> {
        let navigate_to = {
            let mut collection = self.collection.lock();
            let Some(current) = collection.current_step() else {
                return Ok(false);
            };
            if !current.return_to_previous_enabled {
                debug!(step_id = %current.id, "backward navigation disabled");
                return Ok(false);
            }
            let current_changes_url = current.changes_url;

            if !current_changes_url {
                // The current step has no URL of its own, so stepping back
                // is purely internal.
                let Some(previous) = collection.get_previous() else {
                    return Ok(false);
                };
                let id = previous.id.clone();
                collection.set_current_step(&id)?;
                None
            } else {
                let Some(previous) = collection.get_previous_with_url(None) else {
                    return Ok(false);
                };
                let (id, slug) = (previous.id.clone(), previous.slug.clone());
                collection.set_current_step(&id)?;
                Some(slug)
            }
        };

        self.schedule_session_reset();
        if let Some(slug) = navigate_to {
            self.navigator.navigate(&self.step_url(&slug));
        }
        Ok(true)
    }

    /// Routes back to the first step and makes it current.
    pub fn go_to_start(self: &Arc<Self>) {
        let slug = self.collection.lock().first().map(|step| step.slug.clone());
        match slug {
            Some(slug) => {
                self.navigator.navigate(&self.step_url(&slug));
                if let Err(error) = self.load_step_by_slug(&slug) {
                    warn!(error = %error, "start step failed to load");
                }
            }
            None => self.navigator.navigate(&self.settings.route_fallback),
        }
    }

    fn step_url(&self, slug: &str) -> String {
        let route = self.settings.route.trim_matches('/');
        if route.is_empty() {
            format!("/{slug}")
        } else {
            format!("/{route}/{slug}")
        }
    }

    // -- saving -------------------------------------------------------------

    /// Saves form values into the current step. A step-link field holding a
    /// value advances the journey immediately.
    pub fn save_current_step(
        self: &Arc<Self>,
        values: &HashMap<String, Value>,
        options: SaveStepOptions,
    ) -> JourneyResult<()> {
        let (step_id, advance) = {
            let mut collection = self.collection.lock();
            let Some(current) = collection.current_step() else {
                return Ok(());
            };
            let step_id = current.id.clone();
            collection.save_step(&step_id, values, options.valid)?;

            let advance = collection
                .current_step()
                .map(|step| {
                    values.keys().any(|key| {
                        step.child_by_id(key)
                            .map(|field| field.step_link && field.value_is_set())
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            (step_id, advance)
        };

        if options.save_session {
            self.save_session();
        }
        if advance {
            debug!(step_id = %step_id, "step link set, advancing");
            self.next(NextOptions::default())?;
        }
        Ok(())
    }

    /// Queues a best-effort session save through the debounced saver.
    pub fn save_session(self: &Arc<Self>) {
        if !self.session.has_valid_session() || !self.session.is_active() {
            return;
        }
        let blob = self.build_session();
        self.saver.push(blob);
    }

    /// Confirmed save. `Ok(false)` means there was no active session to
    /// write to.
    pub async fn ensure_save_session(&self) -> anyhow::Result<bool> {
        if !self.session.has_valid_session() || !self.session.is_active() {
            return Ok(false);
        }
        let blob = self.build_session();
        self.session.ensure_update_session(&blob).await?;
        Ok(true)
    }

    fn build_session(&self) -> Session {
        let blob = {
            let collection = self.collection.lock();
            snapshot::build_session(&collection, &self.settings.application, &self.settings.journey)
        };
        self.apply_session_hooks(blob)
    }

    pub fn add_hook(&self, hook: Box<dyn SessionHook>) {
        self.hooks.lock().push(hook);
    }

    fn apply_session_hooks(&self, mut session: Session) -> Session {
        for hook in self.hooks.lock().iter() {
            session = hook.before_save(session);
        }
        session
    }

    // -- session extras -----------------------------------------------------

    /// Issues a come-back nonce for the given step and returns its token,
    /// ready to be embedded in a return URL.
    pub fn create_come_back_nonce(
        &self,
        step_id: &str,
        expires_in: Option<chrono::Duration>,
    ) -> JourneyResult<String> {
        let nonce = self.session.create_nonce(step_id, expires_in)?;
        Ok(nonce.id)
    }

    /// Cancel-and-reschedule idle timer: when the reset period elapses with
    /// no further activity, the journey routes back to the start.
    pub fn schedule_session_reset(self: &Arc<Self>) {
        let period = StdDuration::from_secs(self.settings.session.reset_period_secs);
        let mut guard = self.reset_timer.lock();
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            info!("session reset period elapsed, returning to start");
            this.go_to_start();
        }));
    }

    // -- delegation to the collection --------------------------------------

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    pub fn current_step_id(&self) -> Option<String> {
        self.collection.lock().current_step().map(|step| step.id.clone())
    }

    pub fn first_step_slug(&self) -> Option<String> {
        self.collection.lock().first().map(|step| step.slug.clone())
    }

    pub fn value_by_id(&self, field_id: &str) -> Option<Value> {
        self.collection.lock().value_by_id(field_id)
    }

    pub fn extract_model(
        &self,
        properties: &[&str],
        include_empty: bool,
        mapper: Option<&HashMap<String, String>>,
    ) -> JourneyResult<serde_json::Map<String, Value>> {
        self.collection.lock().extract_model(properties, include_empty, mapper)
    }

    pub fn models(&self) -> Value {
        self.collection.lock().models()
    }

    pub fn save_api_data(
        &self,
        step_id: &str,
        fields: &HashMap<String, Value>,
        reset_missing: bool,
    ) -> JourneyResult<()> {
        self.collection.lock().save_api_data(step_id, fields, reset_missing)
    }

    pub fn save_fields(
        &self,
        step_id: &str,
        fields: &HashMap<String, Value>,
        reset_missing: bool,
    ) -> JourneyResult<()> {
        self.collection.lock().save_fields(step_id, fields, reset_missing)
    }

    pub fn get_api_data(&self, step_id: &str) -> JourneyResult<Vec<DataValue>> {
        Ok(self.collection.lock().get_api_data(step_id)?.to_vec())
    }

    pub fn clear_api_data(&self, step_id: &str) -> JourneyResult<()> {
        self.collection.lock().clear_api_data(step_id)
    }

    pub fn set_field_visibility(&self, step_id: &str, field_id: &str, visible: bool) -> bool {
        self.collection.lock().set_field_visibility(step_id, field_id, visible)
    }

    pub fn add_field(&self, step_id: &str, field: Field) -> JourneyResult<()> {
        self.collection.lock().add_field(step_id, field)
    }

    pub fn add_api_data(&self, step_id: &str, record: DataValue) -> JourneyResult<()> {
        self.collection.lock().add_api_data(step_id, record)
    }

    pub fn form_field_exists(&self, step_id: &str, field_id: &str) -> bool {
        self.collection.lock().form_field_exists(step_id, field_id)
    }

    pub fn api_data_field_exists(&self, step_id: &str, field_id: &str) -> bool {
        self.collection.lock().api_data_field_exists(step_id, field_id)
    }

    pub fn reset_step(&self, step_id: &str, exclude: &[String]) -> JourneyResult<()> {
        self.collection.lock().reset_step(step_id, exclude)
    }

    pub fn invalidate_steps_after(&self, step_id: &str) -> JourneyResult<()> {
        self.collection.lock().invalidate_steps_after(step_id)
    }

    /// Drops all journey state. The stored remote session is untouched.
    pub fn reset(&self) {
        if let Some(handle) = self.reset_timer.lock().take() {
            handle.abort();
        }
        self.hooks.lock().clear();
        self.collection.lock().reset();
        self.loaded.store(false, Ordering::SeqCst);
    }
}
