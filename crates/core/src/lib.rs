//! Shared primitives for the WayPoint journey engine: value records, session
//! blob types, configuration, the error taxonomy, and the capability traits
//! collaborating systems plug into.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod types;

pub use config::JourneySettings;
pub use error::{JourneyError, JourneyResult};
