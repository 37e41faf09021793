//! The active-steps engine: the ordered, mutable sequence of runtime steps a
//! journey is currently made of, together with its position pointer, visit
//! history, branch groups, and collected models.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;
use waypoint_core::error::{JourneyError, JourneyResult};
use waypoint_core::types::{DataValue, Field, ModelsConfig, Session};

use crate::data;
use crate::history::History;
use crate::models::ModelStore;
use crate::paths::PathCollection;
use crate::step::Step;
use crate::types::{PathGroupConfig, StepDef};

/// Construction options: whether path-tagged definitions enter the initial
/// sequence, and the branch groups to register up front.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub include_path: bool,
    pub paths: Vec<PathGroupConfig>,
}

/// Ordered collection of active steps. The single source of truth for
/// traversal, values, and branch state while a journey runs.
#[derive(Debug)]
pub struct ActiveStepsCollection {
    current_index: usize,
    current_step_id: Option<String>,
    active_steps: Vec<Step>,
    history: History,
    steps_config: Vec<StepDef>,
    path_groups: Vec<PathCollection>,
    models: ModelStore,
}

impl ActiveStepsCollection {
    /// An empty collection, the state before any steps are loaded.
    pub fn empty() -> Self {
        Self {
            current_index: 0,
            current_step_id: None,
            active_steps: Vec::new(),
            history: History::new(),
            steps_config: Vec::new(),
            path_groups: Vec::new(),
            models: ModelStore::new(),
        }
    }

    /// Builds a collection from step definitions, optionally rehydrating
    /// progress from a prior session. Fails on a duplicate id anywhere in
    /// the flat namespace of step, field, and apiData ids.
    pub fn new(
        steps: Vec<StepDef>,
        session: Option<&Session>,
        options: LoadOptions,
    ) -> JourneyResult<Self> {
        let mut collection = Self {
            current_index: 0,
            current_step_id: None,
            active_steps: Vec::new(),
            history: History::new(),
            steps_config: steps,
            path_groups: Vec::new(),
            models: ModelStore::new(),
        };

        for group in options.paths {
            for path in group.paths {
                collection.add_path(&path.id, path.steps, &group.id);
            }
        }

        collection.active_steps = collection
            .steps_config
            .iter()
            .filter(|def| options.include_path || def.path.is_none())
            .map(Step::instantiate)
            .collect();

        data::validate_steps(&collection.active_steps)?;

        if let Some(session) = session {
            collection.rehydrate(session)?;
        }

        Ok(collection)
    }

    fn rehydrate(&mut self, session: &Session) -> JourneyResult<()> {
        self.models = ModelStore::from_value(session.data.models.clone());
        self.history = History::from_snapshot(&session.data.history);

        // Replay recorded branch selections so the sequence matches what the
        // user actually had.
        let selections: Vec<_> = self.history.paths().to_vec();
        for selection in selections {
            let step_ids: Vec<String> = self
                .steps_config
                .iter()
                .filter(|def| def.path.as_deref() == Some(selection.path_id.as_str()))
                .map(|def| def.id.clone())
                .collect();
            self.insert_after(&selection.step_id, &step_ids)?;
        }

        let mut fields: Vec<DataValue> = Vec::new();
        for step in &mut self.active_steps {
            if let Some(snapshot) = session.data.steps.get(&step.id) {
                step.valid = snapshot.valid;
                for (id, value) in &snapshot.values {
                    fields.push(DataValue::new(id.clone(), value.clone()));
                }
            }
        }
        data::batch_insert(&fields, &mut self.active_steps);

        data::validate_steps(&self.active_steps)
    }

    // -- traversal ----------------------------------------------------------

    /// The nearest visible step after the current one, if any.
    pub fn get_next(&self) -> Option<&Step> {
        let mut index = self.current_index + 1;
        while let Some(step) = self.active_steps.get(index) {
            if step.is_visible(self) {
                return Some(step);
            }
            index += 1;
        }
        None
    }

    /// The nearest visible step before the current one, if any.
    pub fn get_previous(&self) -> Option<&Step> {
        let mut index = self.current_index;
        while index > 0 {
            index -= 1;
            let step = &self.active_steps[index];
            if step.is_visible(self) {
                return Some(step);
            }
        }
        None
    }

    /// The nearest previous step that is visible and owns a navigable URL.
    /// Steps without a URL are transparently skipped so "back" always lands
    /// on an addressable step.
    pub fn get_previous_with_url(&self, current_slug: Option<&str>) -> Option<&Step> {
        let start_id = match current_slug {
            Some(slug) => self.step_by_slug(slug)?.id.clone(),
            None => self.current_step_id.clone()?,
        };
        let index = self.index_of(&start_id)?;
        self.active_steps[..index]
            .iter()
            .rev()
            .find(|step| step.changes_url && step.is_visible(self))
    }

    pub fn first(&self) -> Option<&Step> {
        self.active_steps.first()
    }

    pub fn current_step(&self) -> Option<&Step> {
        let id = self.current_step_id.as_deref()?;
        self.step_by_id(id)
    }

    pub fn all(&self) -> &[Step] {
        &self.active_steps
    }

    fn into_steps(self) -> Vec<Step> {
        self.active_steps
    }

    pub fn step_by_slug(&self, slug: &str) -> Option<&Step> {
        self.active_steps.iter().find(|step| step.slug == slug)
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.active_steps.iter().find(|step| step.id == id)
    }

    fn step_by_id_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.active_steps.iter_mut().find(|step| step.id == id)
    }

    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.active_steps.iter().position(|step| step.id == step_id)
    }

    pub fn is_first(&self, step_id: &str) -> bool {
        self.first().map(|step| step.id == step_id).unwrap_or(false)
    }

    /// Moves the position pointer and records the visit in history.
    pub fn set_current_step(&mut self, step_id: &str) -> JourneyResult<()> {
        let index = self
            .index_of(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        self.history.add(step_id);
        self.current_step_id = Some(step_id.to_string());
        self.current_index = index;
        debug!(step_id = %step_id, index, "current step changed");
        Ok(())
    }

    // -- validity -----------------------------------------------------------

    /// True iff every visible step strictly before the target is valid.
    /// Invisible steps never gate progress.
    pub fn steps_before_are_valid(&self, step_id: &str) -> JourneyResult<bool> {
        let index = self
            .index_of(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        Ok(self.active_steps[..index]
            .iter()
            .filter(|step| step.is_visible(self))
            .all(|step| step.valid))
    }

    /// First step in collection order that is not valid.
    pub fn first_invalid_step(&self) -> Option<&Step> {
        self.active_steps.iter().find(|step| !step.valid)
    }

    pub fn set_current_step_valid(&mut self) {
        if let Some(id) = self.current_step_id.clone() {
            if let Some(step) = self.step_by_id_mut(&id) {
                step.valid = true;
            }
        }
    }

    /// Marks every step after the given one invalid. Used when an earlier
    /// answer changes and downstream steps must be re-confirmed.
    pub fn invalidate_steps_after(&mut self, step_id: &str) -> JourneyResult<()> {
        let index = self
            .index_of(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        for step in &mut self.active_steps[index + 1..] {
            step.valid = false;
        }
        Ok(())
    }

    // -- saving values ------------------------------------------------------

    /// Writes form values into a step's fields and sets its validity. Fields
    /// carrying a models config project their new value into the collected
    /// models document.
    pub fn save_step(
        &mut self,
        step_id: &str,
        values: &HashMap<String, Value>,
        valid: bool,
    ) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;

        let mut projections: Vec<(ModelsConfig, Value)> = Vec::new();
        for (key, value) in values {
            if let Some(field) = step.child_by_id_mut(key) {
                field.value = value.clone();
                if let Some(models) = &field.models {
                    projections.push((models.clone(), value.clone()));
                }
            }
        }
        step.valid = valid;

        for (config, value) in projections {
            self.save_to_model(&config, &value);
        }
        Ok(())
    }

    /// Writes values into a step's top-level fields. With `reset_missing`,
    /// fields absent from the input are reset to an empty string.
    pub fn save_fields(
        &mut self,
        step_id: &str,
        fields: &HashMap<String, Value>,
        reset_missing: bool,
    ) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        for field in &mut step.children {
            match fields.get(&field.id) {
                Some(value) => field.value = value.clone(),
                None if reset_missing => field.value = Value::String(String::new()),
                None => {}
            }
        }
        Ok(())
    }

    /// Writes values into a step's apiData records. With `reset_missing`,
    /// records absent from the input are reset to the empty-typed default of
    /// their current value.
    pub fn save_api_data(
        &mut self,
        step_id: &str,
        fields: &HashMap<String, Value>,
        reset_missing: bool,
    ) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        for record in &mut step.api_data {
            match fields.get(&record.id) {
                Some(value) => record.value = value.clone(),
                None if reset_missing => record.value = data::empty_like(&record.value),
                None => {}
            }
        }
        Ok(())
    }

    /// Resets every apiData record of a step to its empty-typed default.
    pub fn clear_api_data(&mut self, step_id: &str) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        for record in &mut step.api_data {
            record.value = data::empty_like(&record.value);
        }
        Ok(())
    }

    pub fn get_api_data(&self, step_id: &str) -> JourneyResult<&[DataValue]> {
        let step = self
            .step_by_id(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        Ok(&step.api_data)
    }

    /// Flips a field's visibility. False when the step or field is unknown.
    pub fn set_field_visibility(&mut self, step_id: &str, field_id: &str, visible: bool) -> bool {
        let Some(step) = self.step_by_id_mut(step_id) else {
            return false;
        };
        match step.child_by_id_mut(field_id) {
            Some(field) => {
                field.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn form_field_exists(&self, step_id: &str, field_id: &str) -> bool {
        self.step_by_id(step_id)
            .map(|step| step.children.iter().any(|field| field.id == field_id))
            .unwrap_or(false)
    }

    pub fn api_data_field_exists(&self, step_id: &str, field_id: &str) -> bool {
        self.step_by_id(step_id)
            .map(|step| step.api_data.iter().any(|record| record.id == field_id))
            .unwrap_or(false)
    }

    pub fn add_field(&mut self, step_id: &str, field: Field) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        step.children.push(field);
        Ok(())
    }

    pub fn add_api_data(&mut self, step_id: &str, record: DataValue) -> JourneyResult<()> {
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        step.api_data.push(record);
        Ok(())
    }

    /// Resets a step back to its stored definition. Excluded ids keep the
    /// current runtime field or apiData record, value and shape included.
    /// The stored definition itself is never touched.
    pub fn reset_step(&mut self, step_id: &str, exclude: &[String]) -> JourneyResult<()> {
        let def = self
            .steps_config
            .iter()
            .find(|def| def.id == step_id)
            .cloned()
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        let step = self
            .step_by_id_mut(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;

        let kept_children = std::mem::take(&mut step.children);
        step.children = def
            .children
            .iter()
            .map(|child| {
                if exclude.contains(&child.id) {
                    kept_children
                        .iter()
                        .find(|kept| kept.id == child.id)
                        .cloned()
                        .unwrap_or_else(|| child.clone())
                } else {
                    child.clone()
                }
            })
            .collect();

        let kept_api_data = std::mem::take(&mut step.api_data);
        step.api_data = def
            .api_data
            .iter()
            .map(|record| {
                if exclude.contains(&record.id) {
                    kept_api_data
                        .iter()
                        .find(|kept| kept.id == record.id)
                        .cloned()
                        .unwrap_or_else(|| record.clone())
                } else {
                    record.clone()
                }
            })
            .collect();

        debug!(step_id = %step_id, excluded = exclude.len(), "step reset");
        Ok(())
    }

    /// Empties the collection. Registered path groups and collected models
    /// survive a reset.
    pub fn reset(&mut self) {
        self.current_index = 0;
        self.current_step_id = None;
        self.active_steps.clear();
        self.steps_config.clear();
        self.history = History::new();
    }

    // -- insertion / removal ------------------------------------------------

    /// Resolves ids against the stored definitions, instantiates them as a
    /// fresh sub-collection, and splices the result in at `index`. The whole
    /// collection is re-validated afterwards.
    pub fn insert(&mut self, index: usize, step_ids: &[String]) -> JourneyResult<()> {
        let mut defs = Vec::with_capacity(step_ids.len());
        for id in step_ids {
            let def = self
                .steps_config
                .iter()
                .find(|def| def.id == *id)
                .cloned()
                .ok_or_else(|| JourneyError::UnknownStep(id.clone()))?;
            defs.push(def);
        }

        let sub = ActiveStepsCollection::new(
            defs,
            None,
            LoadOptions {
                include_path: true,
                paths: Vec::new(),
            },
        )?;

        let at = index.min(self.active_steps.len());
        let mut new_steps = sub.into_steps();
        debug!(count = new_steps.len(), at, "inserting steps");
        self.active_steps.splice(at..at, new_steps.drain(..));
        data::validate_steps(&self.active_steps)
    }

    /// Inserts before the given step and shifts the position pointer by the
    /// inserted count so the current step stays stable.
    pub fn insert_before(&mut self, step_id: &str, step_ids: &[String]) -> JourneyResult<()> {
        let index = self
            .index_of(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        self.insert(index, step_ids)?;
        self.current_index += step_ids.len();
        Ok(())
    }

    pub fn insert_after(&mut self, step_id: &str, step_ids: &[String]) -> JourneyResult<()> {
        let index = self
            .index_of(step_id)
            .ok_or_else(|| JourneyError::UnknownStep(step_id.to_string()))?;
        self.insert(index + 1, step_ids)
    }

    /// Drops the given steps from the active sequence. Callers re-resolve
    /// the current position afterwards.
    pub fn remove_steps(&mut self, step_ids: &[String]) {
        self.active_steps.retain(|step| !step_ids.contains(&step.id));
    }

    // -- value access -------------------------------------------------------

    /// Cross-step dotted-path lookup over fields first, then apiData.
    pub fn value_by_id(&self, field_id: &str) -> Option<Value> {
        data::find_by_id(field_id, &self.active_steps)
    }

    pub fn extract_model(
        &self,
        properties: &[&str],
        include_empty: bool,
        mapper: Option<&HashMap<String, String>>,
    ) -> JourneyResult<serde_json::Map<String, Value>> {
        data::extract_model(properties, &self.active_steps, include_empty, mapper)
    }

    pub fn batch_insert(&mut self, fields: &[DataValue]) {
        data::batch_insert(fields, &mut self.active_steps);
    }

    // -- history ------------------------------------------------------------

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn save_path_to_history(&mut self, step_id: &str, path_id: &str, group_id: &str) {
        self.history.save_path(step_id, path_id, group_id);
    }

    /// The branch recorded at the given fork step, if any.
    pub fn chosen_path_for_step(&self, step_id: &str) -> Option<&str> {
        self.history
            .paths()
            .iter()
            .find(|record| record.step_id == step_id)
            .map(|record| record.path_id.as_str())
    }

    pub fn remove_path_for_step(&mut self, step_id: &str) {
        self.history.remove_path(step_id);
    }

    pub fn clear_paths_in_history(&mut self, path_ids: &[String]) {
        self.history.remove_paths(path_ids);
    }

    // -- models -------------------------------------------------------------

    /// Owned copy of the collected models document.
    pub fn models(&self) -> Value {
        self.models.snapshot()
    }

    /// Projects a value into the models document per the field's config. The
    /// optional `use_path` selects a sub-value before writing.
    pub fn save_to_model(&mut self, config: &ModelsConfig, value: &Value) {
        let resolved = match &config.use_path {
            Some(path) => data::value_at_path(value, path).unwrap_or(Value::Null),
            None => value.clone(),
        };
        for key in &config.save_to {
            self.models.set(key, resolved.clone());
        }
    }

    pub fn remove_model(&mut self, paths: &[String]) {
        for path in paths {
            self.models.remove(path);
        }
    }

    // -- branching ----------------------------------------------------------

    /// Registers a branch: tags the step definitions with the path id, adds
    /// the id to the group (created lazily), and stores the definitions for
    /// later insertion. Tagged definitions stay out of the active sequence
    /// until the branch is selected.
    pub fn add_path(&mut self, path_id: &str, steps: Vec<StepDef>, group_id: &str) {
        let tagged = steps.into_iter().map(|mut def| {
            def.path = Some(path_id.to_string());
            def
        });

        if !self.path_groups.iter().any(|group| group.id == group_id) {
            self.path_groups.push(PathCollection::new(group_id));
        }
        if let Some(group) = self.path_groups.iter_mut().find(|group| group.id == group_id) {
            group.add_path(path_id);
        }

        self.steps_config.extend(tagged);
    }

    pub fn path_groups(&self) -> &[PathCollection] {
        &self.path_groups
    }

    /// The group a branch id belongs to.
    pub fn path_collection(&self, path_id: &str) -> JourneyResult<&PathCollection> {
        self.path_groups
            .iter()
            .find(|group| group.has_path(path_id))
            .ok_or_else(|| JourneyError::UnknownPath(path_id.to_string()))
    }

    /// Selects a branch at the current step. A re-selection of the already
    /// chosen branch is a no-op; otherwise every group-sibling branch's
    /// steps and history record are dropped before the new branch's steps
    /// are inserted after the current step and the choice is recorded.
    pub fn set_path(&mut self, path_id: &str) -> JourneyResult<()> {
        let group = self.path_collection(path_id)?.clone();
        let current_id = self
            .current_step_id
            .clone()
            .ok_or_else(|| JourneyError::UnknownStep("<no current step>".to_string()))?;

        if self.chosen_path_for_step(&current_id) == Some(path_id) {
            return Ok(());
        }

        self.remove_path_and_path_steps(&group);

        // Removal above may have shifted the position of the fork step.
        if let Some(index) = self.index_of(&current_id) {
            self.current_index = index;
        }

        let step_ids: Vec<String> = self
            .steps_config
            .iter()
            .filter(|def| def.path.as_deref() == Some(path_id))
            .map(|def| def.id.clone())
            .collect();

        self.insert_after(&current_id, &step_ids)?;
        self.save_path_to_history(&current_id, path_id, &group.id);
        debug!(path_id = %path_id, group_id = %group.id, "branch selected");
        Ok(())
    }

    /// Removes every active step belonging to any branch of the group, along
    /// with the group's history records.
    pub fn remove_path_and_path_steps(&mut self, group: &PathCollection) {
        let ids_to_delete: Vec<String> = self
            .steps_config
            .iter()
            .filter(|def| {
                def.path
                    .as_deref()
                    .map(|path| group.has_path(path))
                    .unwrap_or(false)
            })
            .map(|def| def.id.clone())
            .collect();

        self.remove_steps(&ids_to_delete);
        let paths: Vec<String> = group.paths().to_vec();
        self.clear_paths_in_history(&paths);
    }

    /// For a deep link into a branch whose fork was never recorded this
    /// session, returns the step where the group's selection was made so the
    /// caller can redirect back to the fork.
    pub fn path_fallback(&self, slug: &str) -> Option<&Step> {
        let def = self.steps_config.iter().find(|def| def.slug == slug)?;
        let path = def.path.as_deref()?;
        let group = self.path_groups.iter().find(|group| group.has_path(path))?;
        let record = self
            .history
            .paths()
            .iter()
            .find(|record| record.group_id == group.id)?;
        self.step_by_id(&record.step_id)
    }

    /// Whether the slug belongs to a branch-tagged step definition.
    pub fn is_step_in_path(&self, slug: &str) -> bool {
        self.steps_config
            .iter()
            .any(|def| def.path.is_some() && def.slug == slug)
    }
}
