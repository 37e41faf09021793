use waypoint_core::types::{HistorySnapshot, SelectedPath};

/// Append-only log of visited steps plus the currently selected branches.
/// Persisted inside the session blob and replayed on rehydration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    full: Vec<String>,
    passed_steps: Vec<String>,
    selected_paths: Vec<SelectedPath>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &HistorySnapshot) -> Self {
        Self {
            full: snapshot.full.clone(),
            passed_steps: snapshot.passed_steps.clone(),
            selected_paths: snapshot.paths.clone(),
        }
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            full: self.full.clone(),
            passed_steps: self.passed_steps.clone(),
            paths: self.selected_paths.clone(),
        }
    }

    /// Records a visit: always appended to the full log, added to the
    /// unique visited set on first visit.
    pub fn add(&mut self, step_id: &str) {
        self.full.push(step_id.to_string());
        if !self.passed_steps.iter().any(|id| id == step_id) {
            self.passed_steps.push(step_id.to_string());
        }
    }

    pub fn full(&self) -> &[String] {
        &self.full
    }

    pub fn passed_steps(&self) -> &[String] {
        &self.passed_steps
    }

    /// Records a branch selection. A group holds at most one selection, so
    /// any previous record for the same group is dropped first.
    pub fn save_path(&mut self, step_id: &str, path_id: &str, group_id: &str) {
        self.selected_paths.retain(|record| record.group_id != group_id);
        self.selected_paths.push(SelectedPath {
            step_id: step_id.to_string(),
            path_id: path_id.to_string(),
            group_id: group_id.to_string(),
        });
    }

    pub fn paths(&self) -> &[SelectedPath] {
        &self.selected_paths
    }

    pub fn has_paths(&self) -> bool {
        !self.selected_paths.is_empty()
    }

    /// Drops the branch record made at the given fork step.
    pub fn remove_path(&mut self, step_id: &str) {
        self.selected_paths.retain(|record| record.step_id != step_id);
    }

    /// Drops every branch record whose path id is in the given set.
    pub fn remove_paths(&mut self, path_ids: &[String]) {
        self.selected_paths
            .retain(|record| !path_ids.contains(&record.path_id));
    }
}
