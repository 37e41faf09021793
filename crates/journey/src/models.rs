use serde_json::{Map, Value};

/// Free-form nested document of collected models. Values land here through
/// explicit save-to-path rules, independent of the step schema; access is
/// always by dotted path, never by reflection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStore {
    root: Value,
}

impl ModelStore {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Builds a store from a persisted models value. Anything other than an
    /// object starts the store empty.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self { root: value },
            _ => Self::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, Value::Object(map) if map.is_empty())
    }

    /// Owned copy of the whole document.
    pub fn snapshot(&self) -> Value {
        self.root.clone()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Sets the value at a dotted path, creating intermediate objects.
    /// A non-object intermediate node is replaced by an object.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut node = &mut self.root;
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Some(map) = node.as_object_mut() else {
                return;
            };
            node = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let (Some(map), Some(last)) = (node.as_object_mut(), segments.last()) {
            map.insert((*last).to_string(), value);
        }
    }

    /// Removes the value at a dotted path. Missing paths are a no-op.
    pub fn remove(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('.').collect();
        let mut node = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            let Some(next) = node.as_object_mut().and_then(|map| map.get_mut(*segment)) else {
                return;
            };
            node = next;
        }
        if let (Some(map), Some(last)) = (node.as_object_mut(), segments.last()) {
            map.remove(*last);
        }
    }
}
