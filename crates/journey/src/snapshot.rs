//! Flattens a live collection into the persisted session blob.

use std::collections::HashMap;

use waypoint_core::types::{Session, SessionData, StepSnapshot};

use crate::collection::ActiveStepsCollection;
use crate::data;

/// Builds the session blob for persistence: per step, the valid flag plus
/// every leaf field and apiData value keyed by id, alongside the collected
/// models and the history snapshot.
pub fn build_session(
    collection: &ActiveStepsCollection,
    application: &str,
    journey: &str,
) -> Session {
    let mut steps = HashMap::new();
    for step in collection.all() {
        let mut values = HashMap::new();
        data::for_each_leaf(&step.children, &mut |field| {
            values.insert(field.id.clone(), field.value.clone());
        });
        for record in &step.api_data {
            values.insert(record.id.clone(), record.value.clone());
        }
        steps.insert(
            step.id.clone(),
            StepSnapshot {
                valid: step.valid,
                values,
            },
        );
    }

    Session {
        application: application.to_string(),
        journey: journey.to_string(),
        data: SessionData {
            steps,
            models: collection.models(),
            history: collection.history().snapshot(),
        },
    }
}
