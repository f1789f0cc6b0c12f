//! Job lifecycle: submission, registry bookkeeping and cleanup.

mod registry;
mod service;
mod types;

pub use registry::{JobRegistry, RegistryConfig, RegistryError};
pub use service::{JobService, SubmitError};
pub use types::{Job, JobProgress, JobStatus, JobUpdate, SubmitOutcome, SubmitRequest};
