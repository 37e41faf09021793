use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use waypoint_core::types::{DataValue, Field, Navigation};

use crate::collection::ActiveStepsCollection;

/// Whether a step is shown during traversal. `When` receives the whole
/// collection so a step can depend on values collected anywhere else.
#[derive(Clone)]
pub enum Visibility {
    Always(bool),
    When(Arc<dyn Fn(&ActiveStepsCollection) -> bool + Send + Sync>),
}

impl Visibility {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&ActiveStepsCollection) -> bool + Send + Sync + 'static,
    {
        Visibility::When(Arc::new(predicate))
    }

    pub fn evaluate(&self, steps: &ActiveStepsCollection) -> bool {
        match self {
            Visibility::Always(visible) => *visible,
            Visibility::When(predicate) => predicate(steps),
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Always(true)
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Always(visible) => write!(f, "Always({visible})"),
            Visibility::When(_) => write!(f, "When(<predicate>)"),
        }
    }
}

/// How a session reload of the step is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadProtection {
    /// Reload requires a valid single-use nonce token.
    Nonce,
}

/// Immutable step definition. Runtime [`crate::Step`]s are instantiated from
/// these by deep copy; a definition is never mutated by the engine.
#[derive(Debug, Clone)]
pub struct StepDef {
    pub id: String,
    pub name: String,
    /// URL slug for steps loaded through routing.
    pub slug: String,
    pub title: String,
    pub page_title: String,
    pub description: String,
    pub visible: Visibility,
    pub children: Vec<Field>,
    pub api_data: Vec<DataValue>,
    /// Steps without their own URL are transparently skipped by "back".
    pub changes_url: bool,
    pub parent_id: Option<String>,
    pub can_load_from_session: bool,
    pub protect_load_from_session: Option<ReloadProtection>,
    pub navigation: Navigation,
    /// Branch-group label; tagged definitions enter the active sequence only
    /// through path selection.
    pub path: Option<String>,
    /// Set when an A/B version was requested but no matching variant exists.
    pub ab_version: String,
    pub return_to_previous_enabled: bool,
    pub go_to_next_enabled: bool,
    pub metadata: Value,
}

impl StepDef {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            slug: slug.into(),
            title: String::new(),
            page_title: String::new(),
            description: String::new(),
            visible: Visibility::default(),
            children: Vec::new(),
            api_data: Vec::new(),
            changes_url: true,
            parent_id: None,
            can_load_from_session: false,
            protect_load_from_session: None,
            navigation: Navigation::default(),
            path: None,
            ab_version: String::new(),
            return_to_previous_enabled: true,
            go_to_next_enabled: true,
            metadata: Value::Null,
        }
    }
}

/// One branch inside a path group: the branch id and the step definitions
/// inserted when the branch is selected.
#[derive(Debug, Clone)]
pub struct PathSpec {
    pub id: String,
    pub steps: Vec<StepDef>,
}

/// Configuration of one fork point: a group of mutually exclusive branches.
#[derive(Debug, Clone)]
pub struct PathGroupConfig {
    pub id: String,
    pub paths: Vec<PathSpec>,
}
