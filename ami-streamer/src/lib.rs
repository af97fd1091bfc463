pub mod config;
pub mod control_api;
pub mod generator;
pub mod jobs;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod sinks;
pub mod storage;

pub use jobs::{JobConfig, JobError, JobManager, SinkKind};
pub use pipeline::{CadenceSpec, Destination};
pub use registry::{JobRecord, JobRegistry, JobStatus};
