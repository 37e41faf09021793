use serde_json::Value;
use waypoint_core::types::{DataValue, Field, Navigation};

use crate::collection::ActiveStepsCollection;
use crate::data;
use crate::types::{ReloadProtection, StepDef, Visibility};

/// Runtime instance of a step definition. Instantiation deep-copies the
/// definition so live state never aliases the static configuration; the
/// original definition travels along in `initial` to support reset.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub title: String,
    pub page_title: String,
    pub description: String,
    pub visible: Visibility,
    pub children: Vec<Field>,
    pub api_data: Vec<DataValue>,
    pub valid: bool,
    pub changes_url: bool,
    pub parent_id: Option<String>,
    pub can_load_from_session: bool,
    pub protect_load_from_session: Option<ReloadProtection>,
    pub navigation: Navigation,
    pub path: Option<String>,
    pub ab_version: String,
    pub return_to_previous_enabled: bool,
    pub go_to_next_enabled: bool,
    pub metadata: Value,
    /// Snapshot of the definition this step was instantiated from.
    pub initial: StepDef,
}

impl Step {
    /// Instantiates an independent owned runtime step from a definition.
    pub fn instantiate(def: &StepDef) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            slug: def.slug.clone(),
            title: def.title.clone(),
            page_title: def.page_title.clone(),
            description: def.description.clone(),
            visible: def.visible.clone(),
            children: def.children.clone(),
            api_data: def.api_data.clone(),
            valid: false,
            changes_url: def.changes_url,
            parent_id: def.parent_id.clone(),
            can_load_from_session: def.can_load_from_session,
            protect_load_from_session: def.protect_load_from_session,
            navigation: def.navigation.clone(),
            path: def.path.clone(),
            ab_version: def.ab_version.clone(),
            return_to_previous_enabled: def.return_to_previous_enabled,
            go_to_next_enabled: def.go_to_next_enabled,
            metadata: def.metadata.clone(),
            initial: def.clone(),
        }
    }

    /// Whether the step is currently shown, evaluating dynamic visibility
    /// against the whole collection.
    pub fn is_visible(&self, steps: &ActiveStepsCollection) -> bool {
        self.visible.evaluate(steps)
    }

    /// Finds a field anywhere in the (possibly nested) children tree.
    pub fn child_by_id(&self, id: &str) -> Option<&Field> {
        data::find_nested(&self.children, id)
    }

    pub fn child_by_id_mut(&mut self, id: &str) -> Option<&mut Field> {
        data::find_nested_mut(&mut self.children, id)
    }

    /// Resolves a (possibly dotted) id against this step's apiData.
    pub fn api_data_value(&self, id: &str) -> Option<Value> {
        data::api_data_value(id, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instantiate_is_a_deep_copy() {
        let mut def = StepDef::new("vehicle", "vehicle");
        def.children = vec![Field::new("plate", json!(""))];
        def.api_data = vec![DataValue::new("color", json!(""))];

        let mut step = Step::instantiate(&def);
        step.children[0].value = json!("ZG123AB");
        step.api_data[0].value = json!("Red");

        // The definition and the initial snapshot stay untouched.
        assert_eq!(def.children[0].value, json!(""));
        assert_eq!(step.initial.children[0].value, json!(""));
        assert_eq!(step.initial.api_data[0].value, json!(""));
    }

    #[test]
    fn child_lookup_descends_into_groups() {
        let mut def = StepDef::new("contact", "contact");
        def.children = vec![Field::group(
            "address",
            vec![Field::new("street", json!("Ilica"))],
        )];
        let step = Step::instantiate(&def);

        assert_eq!(step.child_by_id("street").unwrap().value, json!("Ilica"));
        assert!(step.child_by_id("zip").is_none());
    }
}
