/// Named group of mutually exclusive branch ids behind one fork point.
/// Selecting any branch in the group removes the steps of every other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathCollection {
    pub id: String,
    paths: Vec<String>,
}

impl PathCollection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            paths: Vec::new(),
        }
    }

    pub fn add_path(&mut self, path_id: &str) {
        if !self.has_path(path_id) {
            self.paths.push(path_id.to_string());
        }
    }

    pub fn has_path(&self, path_id: &str) -> bool {
        self.paths.iter().any(|id| id == path_id)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let mut group = PathCollection::new("coverage");
        group.add_path("casco");
        group.add_path("casco");
        group.add_path("liability");

        assert_eq!(group.paths(), ["casco", "liability"]);
        assert!(group.has_path("casco"));
        assert!(!group.has_path("theft"));
    }
}
