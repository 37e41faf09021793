//! Journey engine — the ordered, dynamically reconfigurable collection of
//! active steps with branching paths, cross-step value lookup, collected
//! models, and session rehydration.

pub mod ab;
pub mod collection;
pub mod data;
pub mod history;
pub mod models;
pub mod paths;
pub mod snapshot;
pub mod step;
pub mod types;

pub use collection::{ActiveStepsCollection, LoadOptions};
pub use history::History;
pub use paths::PathCollection;
pub use step::Step;
pub use types::{StepDef, Visibility};
