//! Domain model (ids, job states, decisions, errors).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod state;

pub use decision::RetryDecision;
pub use errors::{OverrideError, ReboundError, StorageError, ValidationError};
pub use ids::{JobId, PolicyKey};
pub use state::{JobFailure, JobState, StateName};
