pub mod controller;
mod loop_worker;
pub mod periodic;
pub mod scheduler;
pub mod schema;
pub mod snapshot;
pub mod state;

pub use controller::SuiteController;
pub use loop_worker::SuiteStatus;
pub use scheduler::SamplingScheduler;
pub use schema::{RowKind, Schema, FIXED_COLUMNS, NOT_AVAILABLE};
pub use snapshot::SensorSnapshot;
pub use state::{CollectionState, CollectionStatus};
