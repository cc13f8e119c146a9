//! Job definitions, per-runner state, output logging, and the runner itself.

mod logwriter;
mod runner;
mod spec;
mod state;

pub use logwriter::JobLogWriter;
pub use runner::JobRunner;
pub use spec::{JobSpec, Tunables};
pub use state::{JobSnapshot, JobStatus, RunnerState};
