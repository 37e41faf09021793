//! Stateless helpers over step data: nested field search, dotted-path value
//! lookup across fields and apiData, model extraction, batch insertion, and
//! the global duplicate-id validation.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use waypoint_core::error::{JourneyError, JourneyResult};
use waypoint_core::types::{DataValue, Field};

use crate::step::Step;

/// Depth-first search for a field by id through nested children.
pub fn find_nested<'a>(fields: &'a [Field], id: &str) -> Option<&'a Field> {
    for field in fields {
        if field.id == id {
            return Some(field);
        }
        if let Some(found) = find_nested(&field.children, id) {
            return Some(found);
        }
    }
    None
}

pub fn find_nested_mut<'a>(fields: &'a mut [Field], id: &str) -> Option<&'a mut Field> {
    for field in fields {
        if field.id == id {
            return Some(field);
        }
        if let Some(found) = find_nested_mut(&mut field.children, id) {
            return Some(found);
        }
    }
    None
}

/// Visits every leaf field (no children) in the tree.
pub fn for_each_leaf<'a, F: FnMut(&'a Field)>(fields: &'a [Field], visit: &mut F) {
    for field in fields {
        if field.is_leaf() {
            visit(field);
        } else {
            for_each_leaf(&field.children, visit);
        }
    }
}

pub fn for_each_leaf_mut<F: FnMut(&mut Field)>(fields: &mut [Field], visit: &mut F) {
    for field in fields {
        if field.is_leaf() {
            visit(field);
        } else {
            for_each_leaf_mut(&mut field.children, visit);
        }
    }
}

/// Resolves a dotted path against a structured value. Supports object keys
/// and numeric array indices.
pub fn value_at_path(value: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    get_path(value, &segments)
}

fn get_path(value: &Value, segments: &[&str]) -> Option<Value> {
    let mut node = value;
    for segment in segments {
        node = match node {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node.clone())
}

fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

/// Looks the id up in a step's field tree. Consecutive leading segments are
/// matched against fields (so `subform.someField` walks nested groups);
/// whatever segments remain are resolved inside the last matched value.
fn field_value(field_id: &str, step: &Step) -> Option<Value> {
    let mut segments: Vec<&str> = field_id.split('.').collect();
    let mut value: Option<Value> = None;
    while let Some(&key) = segments.first() {
        match step.child_by_id(key) {
            Some(field) => {
                value = Some(field.value.clone());
                segments.remove(0);
            }
            None => break,
        }
    }
    if segments.is_empty() {
        return present(value);
    }
    present(value.and_then(|v| get_path(&v, &segments)))
}

/// Looks the id up in a step's apiData; the first segment selects the
/// record, the rest are resolved inside its value.
pub fn api_data_value(api_data_id: &str, step: &Step) -> Option<Value> {
    let mut segments: Vec<&str> = api_data_id.split('.').collect();
    let key = segments.remove(0);
    let record = step.api_data.iter().find(|item| item.id == key)?;
    if segments.is_empty() {
        return present(Some(record.value.clone()));
    }
    present(get_path(&record.value, &segments))
}

/// Cross-step value lookup: for each step in collection order, fields are
/// searched before apiData; the first present value wins.
pub fn find_by_id(field_id: &str, steps: &[Step]) -> Option<Value> {
    for step in steps {
        if let Some(value) = field_value(field_id, step) {
            return Some(value);
        }
        if let Some(value) = api_data_value(field_id, step) {
            return Some(value);
        }
    }
    None
}

/// A value that carries no information for model extraction purposes.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// The empty-typed default matching the shape of an existing value.
pub fn empty_like(value: &Value) -> Value {
    match value {
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Number(_) => Value::from(0),
        Value::Object(_) => Value::Object(Map::new()),
        _ => Value::String(String::new()),
    }
}

/// Projects declared properties out of the steps' fields and apiData.
///
/// The first non-empty match per property wins. Empty matches are included
/// only when `include_empty` is set; otherwise the property is omitted
/// entirely. The optional mapper renames properties after extraction
/// (value moves to the target key, the source key is removed).
pub fn extract_model(
    properties: &[&str],
    steps: &[Step],
    include_empty: bool,
    mapper: Option<&HashMap<String, String>>,
) -> JourneyResult<Map<String, Value>> {
    if properties.is_empty() {
        return Err(JourneyError::EmptyModelSchema);
    }

    let mut model = Map::new();
    for property in properties {
        let mut found_empty: Option<Value> = None;
        'steps: for step in steps {
            for field in &step.children {
                if field.id == *property {
                    if !is_empty_value(&field.value) {
                        model.insert((*property).to_string(), field.value.clone());
                        break 'steps;
                    }
                    found_empty.get_or_insert_with(|| field.value.clone());
                }
            }
            for record in &step.api_data {
                if record.id == *property {
                    if !is_empty_value(&record.value) {
                        model.insert((*property).to_string(), record.value.clone());
                        break 'steps;
                    }
                    found_empty.get_or_insert_with(|| record.value.clone());
                }
            }
        }
        if include_empty {
            if let (None, Some(empty)) = (model.get(*property), found_empty) {
                model.insert((*property).to_string(), empty);
            }
        }
    }

    if let Some(mapper) = mapper {
        model = apply_property_mapper(model, mapper);
    }
    Ok(model)
}

fn apply_property_mapper(
    mut model: Map<String, Value>,
    mapper: &HashMap<String, String>,
) -> Map<String, Value> {
    for (source, target) in mapper {
        if let Some(value) = model.remove(source) {
            model.insert(target.clone(), value);
        }
    }
    model
}

/// Writes the given id/value records into every matching leaf field and
/// apiData record across all steps. Unknown ids are silently ignored.
pub fn batch_insert(fields: &[DataValue], steps: &mut [Step]) {
    for step in steps {
        for_each_leaf_mut(&mut step.children, &mut |field| {
            if let Some(inserted) = fields.iter().find(|item| item.id == field.id) {
                field.value = inserted.value.clone();
            }
        });
        for record in &mut step.api_data {
            if let Some(inserted) = fields.iter().find(|item| item.id == record.id) {
                record.value = inserted.value.clone();
            }
        }
    }
}

/// Turns apiData records into an id → value map.
pub fn values_to_object(values: &[DataValue]) -> Map<String, Value> {
    values
        .iter()
        .map(|item| (item.id.clone(), item.value.clone()))
        .collect()
}

/// Enforces the flat-namespace invariant: across all active steps, step ids,
/// leaf field ids, and apiData ids must be globally unique. A duplicate is a
/// fatal configuration error.
pub fn validate_steps(steps: &[Step]) -> JourneyResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(JourneyError::DuplicateId {
                kind: "step",
                id: step.id.clone(),
            });
        }
    }
    for step in steps {
        let mut duplicate: Option<String> = None;
        for_each_leaf(&step.children, &mut |field| {
            if duplicate.is_none() && !seen.insert(field.id.as_str()) {
                duplicate = Some(field.id.clone());
            }
        });
        if let Some(id) = duplicate {
            return Err(JourneyError::DuplicateId { kind: "children", id });
        }
        for record in &step.api_data {
            if !seen.insert(record.id.as_str()) {
                return Err(JourneyError::DuplicateId {
                    kind: "apiData",
                    id: record.id.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepDef;
    use serde_json::json;

    fn step_with(id: &str, children: Vec<Field>, api_data: Vec<DataValue>) -> Step {
        let mut def = StepDef::new(id, id);
        def.children = children;
        def.api_data = api_data;
        Step::instantiate(&def)
    }

    #[test]
    fn find_by_id_prefers_fields_over_api_data() {
        let steps = vec![step_with(
            "vehicle",
            vec![Field::new("plate", json!("ZG123AB"))],
            vec![DataValue::new("color", json!("Red"))],
        )];

        assert_eq!(find_by_id("plate", &steps), Some(json!("ZG123AB")));
        assert_eq!(find_by_id("color", &steps), Some(json!("Red")));
        assert_eq!(find_by_id("missing", &steps), None);
    }

    #[test]
    fn dotted_path_resolves_into_structured_values() {
        let steps = vec![step_with(
            "coverages",
            vec![],
            vec![DataValue::new(
                "proposal",
                json!({"price": {"total": 120}, "items": [{"code": "AO"}]}),
            )],
        )];

        assert_eq!(find_by_id("proposal.price.total", &steps), Some(json!(120)));
        assert_eq!(find_by_id("proposal.items.0.code", &steps), Some(json!("AO")));
        assert_eq!(find_by_id("proposal.price.currency", &steps), None);
    }

    #[test]
    fn dotted_path_walks_nested_field_groups() {
        let steps = vec![step_with(
            "contact",
            vec![Field::group(
                "address",
                vec![Field::new("street", json!({"name": "Ilica", "number": 5}))],
            )],
            vec![],
        )];

        assert_eq!(
            find_by_id("address.street.name", &steps),
            Some(json!("Ilica"))
        );
    }

    #[test]
    fn extract_model_skips_empty_unless_included() {
        let steps = vec![step_with(
            "vehicle",
            vec![
                Field::new("plate", json!("ZG123AB")),
                Field::new("chassis", json!("")),
            ],
            vec![DataValue::new("color", json!("Red"))],
        )];

        let model = extract_model(&["plate", "chassis", "color"], &steps, false, None).unwrap();
        assert_eq!(model.get("plate"), Some(&json!("ZG123AB")));
        assert_eq!(model.get("color"), Some(&json!("Red")));
        assert!(!model.contains_key("chassis"));

        let with_empty = extract_model(&["chassis"], &steps, true, None).unwrap();
        assert_eq!(with_empty.get("chassis"), Some(&json!("")));
    }

    #[test]
    fn extract_model_mapper_renames_properties() {
        let steps = vec![step_with(
            "vehicle",
            vec![Field::new("plate", json!("ZG123AB"))],
            vec![],
        )];
        let mapper: HashMap<String, String> =
            [("plate".to_string(), "registrationPlate".to_string())].into();

        let model = extract_model(&["plate"], &steps, false, Some(&mapper)).unwrap();
        assert_eq!(model.get("registrationPlate"), Some(&json!("ZG123AB")));
        assert!(!model.contains_key("plate"));
    }

    #[test]
    fn extract_model_requires_a_schema() {
        assert!(matches!(
            extract_model(&[], &[], false, None),
            Err(JourneyError::EmptyModelSchema)
        ));
    }

    #[test]
    fn batch_insert_fills_leaves_and_api_data() {
        let mut steps = vec![step_with(
            "vehicle",
            vec![Field::group("details", vec![Field::new("plate", json!(""))])],
            vec![DataValue::new("color", json!(""))],
        )];

        batch_insert(
            &[
                DataValue::new("plate", json!("ZG123AB")),
                DataValue::new("color", json!("Red")),
                DataValue::new("unknown", json!("ignored")),
            ],
            &mut steps,
        );

        assert_eq!(find_by_id("plate", &steps), Some(json!("ZG123AB")));
        assert_eq!(find_by_id("color", &steps), Some(json!("Red")));
    }

    #[test]
    fn validation_rejects_duplicates_across_steps() {
        let steps = vec![
            step_with("vehicle", vec![Field::new("plate", json!(""))], vec![]),
            step_with("recap", vec![], vec![DataValue::new("plate", json!(""))]),
        ];

        let err = validate_steps(&steps).unwrap_err();
        assert!(matches!(err, JourneyError::DuplicateId { kind: "apiData", .. }));
    }

    #[test]
    fn validation_accepts_disjoint_namespaces() {
        let steps = vec![
            step_with("vehicle", vec![Field::new("plate", json!(""))], vec![]),
            step_with("recap", vec![], vec![DataValue::new("summary", json!(""))]),
        ];
        assert!(validate_steps(&steps).is_ok());
    }

    #[test]
    fn empty_like_matches_shape() {
        assert_eq!(empty_like(&json!([1, 2])), json!([]));
        assert_eq!(empty_like(&json!(42)), json!(0));
        assert_eq!(empty_like(&json!({"a": 1})), json!({}));
        assert_eq!(empty_like(&json!("text")), json!(""));
    }
}
