#![forbid(unsafe_code)]

use std::io;

/// Errors produced while creating execution contexts.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The worker thread for a queue could not be started.
    #[error("failed to spawn worker thread for queue `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
