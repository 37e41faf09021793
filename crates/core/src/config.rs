use serde::Deserialize;

/// Settings for one journey. Loaded from whatever configuration source the
/// host application uses; every field has a serde default so partial
/// configs deserialize cleanly.
#[derive(Debug, Clone, Deserialize)]
pub struct JourneySettings {
    /// Journey id, also the local meta-store key suffix.
    pub id: String,
    /// Base route used when building step URLs.
    #[serde(default)]
    pub route: String,
    /// Where to send users when a slug cannot be resolved at all.
    #[serde(default = "default_route_fallback")]
    pub route_fallback: String,
    /// When false, deep-link guards are skipped (development aid).
    #[serde(default = "default_true")]
    pub guard_routes: bool,
    /// Application identifier stored in the session blob.
    #[serde(default)]
    pub application: String,
    /// Journey name stored in the session blob.
    #[serde(default)]
    pub journey: String,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Session persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Namespace prefixing the local meta-store key.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Schema version; a stored session with a different version is invalid.
    #[serde(default = "default_version")]
    pub version: String,
    /// Session lifetime in seconds.
    #[serde(default = "default_session_expiry_secs")]
    pub expires_secs: i64,
    /// Default nonce lifetime in seconds.
    #[serde(default = "default_nonce_expiry_secs")]
    pub nonce_expiry_secs: i64,
    /// Idle period after which the journey resets to the first step.
    #[serde(default = "default_reset_period_secs")]
    pub reset_period_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            version: default_version(),
            expires_secs: default_session_expiry_secs(),
            nonce_expiry_secs: default_nonce_expiry_secs(),
            reset_period_secs: default_reset_period_secs(),
        }
    }
}

// Default functions
fn default_route_fallback() -> String {
    "/page-not-found".to_string()
}
fn default_true() -> bool {
    true
}
fn default_namespace() -> String {
    "waypoint".to_string()
}
fn default_version() -> String {
    "1".to_string()
}
fn default_session_expiry_secs() -> i64 {
    // 15 days
    15 * 24 * 60 * 60
}
fn default_nonce_expiry_secs() -> i64 {
    15 * 60
}
fn default_reset_period_secs() -> u64 {
    30 * 60
}
