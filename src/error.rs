use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeasureError {
    /// Requested through the cancellation token. Not a failure.
    #[error("Test cancelled")]
    Cancelled,

    #[error("{0}")]
    Transfer(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read probe output: {0}")]
    ProbeRead(#[source] std::io::Error),

    #[error("{program} exited with {status}")]
    ProbeExited { program: String, status: ExitStatus },

    #[error("Payload generation failed: {0}")]
    Generator(String),
}

impl MeasureError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MeasureError::Cancelled)
    }
}
