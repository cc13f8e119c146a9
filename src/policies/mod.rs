//! Execution policies applied by job runners.

mod backoff;

pub use backoff::BackoffPolicy;
