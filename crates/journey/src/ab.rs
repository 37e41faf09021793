//! A/B step-set selection: pick a versioned variant of the step definitions
//! or fall back to the default set.

use tracing::debug;

use crate::types::StepDef;

/// One versioned alternative step set.
#[derive(Debug, Clone)]
pub struct AbVariant {
    pub version: String,
    pub steps: Vec<StepDef>,
}

/// Which version to run, and the variants available.
#[derive(Debug, Clone, Default)]
pub struct AbConfig {
    pub selected_version: Option<String>,
    pub tests: Vec<AbVariant>,
}

/// Resolves the step set to load. No selection uses the fallback unmodified;
/// a matching variant replaces it outright; an unmatched selection keeps the
/// fallback but tags every step with the attempted version so downstream
/// logic can still react to it.
pub fn select_steps(config: &AbConfig, fallback: Vec<StepDef>) -> Vec<StepDef> {
    let Some(selected) = config.selected_version.as_deref().filter(|v| !v.is_empty()) else {
        return fallback;
    };

    if let Some(variant) = config.tests.iter().find(|test| test.version == selected) {
        debug!(version = %selected, "using variant step set");
        return variant.steps.clone();
    }

    debug!(version = %selected, "no variant for selected version, tagging fallback");
    fallback
        .into_iter()
        .map(|mut step| {
            step.ab_version = selected.to_string();
            step
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(ids: &[&str]) -> Vec<StepDef> {
        ids.iter().map(|id| StepDef::new(*id, *id)).collect()
    }

    #[test]
    fn no_selection_uses_fallback_untouched() {
        let config = AbConfig::default();
        let steps = select_steps(&config, defs(&["vehicle", "recap"]));
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|step| step.ab_version.is_empty()));
    }

    #[test]
    fn matching_version_replaces_the_set() {
        let config = AbConfig {
            selected_version: Some("b".to_string()),
            tests: vec![AbVariant {
                version: "b".to_string(),
                steps: defs(&["vehicleShort", "recap"]),
            }],
        };
        let steps = select_steps(&config, defs(&["vehicle", "contact", "recap"]));
        assert_eq!(steps[0].id, "vehicleShort");
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn unmatched_version_tags_the_fallback() {
        let config = AbConfig {
            selected_version: Some("c".to_string()),
            tests: vec![],
        };
        let steps = select_steps(&config, defs(&["vehicle", "recap"]));
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|step| step.ab_version == "c"));
    }
}
