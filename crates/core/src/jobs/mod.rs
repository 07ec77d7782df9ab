pub mod orchestrator;
pub mod replay;

pub use orchestrator::{run_nightly_job, JobConfig, JobServices, JobSummary};
pub use replay::{verify, Discrepancy, VerifyResult};
