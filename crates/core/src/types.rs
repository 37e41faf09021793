//! Data records shared across the workspace: form field records, apiData
//! values, model projection rules, and the persisted session blob shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An id/value record holding an externally sourced value ("apiData").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub id: String,
    pub value: Value,
}

impl DataValue {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Projection rule attached to a field: when the field value changes, write
/// it (or the sub-value at `use_path`) to every dotted path in `save_to`
/// inside the collected models document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub save_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_path: Option<String>,
}

/// A form field record. The field widget library itself is an external
/// collaborator; the engine only needs identity, value, visibility, the
/// step-link query, and nested groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// A step-link field advances the journey as soon as it holds a value.
    #[serde(default)]
    pub step_link: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Field>,
}

impl Field {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
            visible: true,
            step_link: false,
            models: None,
            children: Vec::new(),
        }
    }

    pub fn group(id: impl Into<String>, children: Vec<Field>) -> Self {
        Self {
            children,
            ..Self::new(id, Value::Null)
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn value_is_set(&self) -> bool {
        match &self.value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-step navigation permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Navigation {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub show_next: bool,
    #[serde(default = "default_true")]
    pub show_previous: bool,
}

impl Default for Navigation {
    fn default() -> Self {
        Self {
            enabled: true,
            show_next: true,
            show_previous: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Session blob (persisted remotely, keyed by session id)
// ---------------------------------------------------------------------------

/// Full persisted snapshot of journey progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub application: String,
    pub journey: String,
    pub data: SessionData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub steps: HashMap<String, StepSnapshot>,
    #[serde(default)]
    pub models: Value,
    #[serde(default)]
    pub history: HistorySnapshot,
}

/// Flattened per-step state inside a session: the valid flag plus every leaf
/// field and apiData value keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub valid: bool,
    pub values: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub full: Vec<String>,
    pub passed_steps: Vec<String>,
    pub paths: Vec<SelectedPath>,
}

/// Record of a branch chosen at a fork step. `group_id` identifies the
/// mutually exclusive path group the branch belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPath {
    pub step_id: String,
    pub path_id: String,
    #[serde(rename = "collectionId")]
    pub group_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_blob_uses_wire_field_names() {
        let mut values = HashMap::new();
        values.insert("plate".to_string(), json!("ZG123AB"));

        let mut steps = HashMap::new();
        steps.insert("vehicle".to_string(), StepSnapshot { valid: true, values });

        let session = Session {
            application: "quotes".into(),
            journey: "car".into(),
            data: SessionData {
                steps,
                models: json!({}),
                history: HistorySnapshot {
                    full: vec!["vehicle".into()],
                    passed_steps: vec!["vehicle".into()],
                    paths: vec![SelectedPath {
                        step_id: "vehicle".into(),
                        path_id: "casco".into(),
                        group_id: "coverage".into(),
                    }],
                },
            },
        };

        let blob = serde_json::to_value(&session).unwrap();
        assert_eq!(blob["data"]["history"]["passedSteps"][0], "vehicle");
        assert_eq!(blob["data"]["history"]["paths"][0]["collectionId"], "coverage");
        assert_eq!(blob["data"]["steps"]["vehicle"]["values"]["plate"], "ZG123AB");
    }

    #[test]
    fn step_link_field_reports_value_presence() {
        let mut field = Field::new("coverageChoice", Value::Null);
        field.step_link = true;
        assert!(!field.value_is_set());
        field.value = json!("");
        assert!(!field.value_is_set());
        field.value = json!("full");
        assert!(field.value_is_set());
    }
}
