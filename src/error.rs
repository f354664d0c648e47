//! The typed error taxonomy shared by the pool, pipeline and DSL.
//!
//! Library code matches on [`MiningError`] to decide whether a failure is retryable; the CLI
//! binary wraps it in a [`color_eyre::Report`] for display.

use thiserror::Error;

pub type Result<T, E = MiningError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to load seeds: {0}")]
    SeedLoad(String),

    #[error("failed to spawn engine worker: {0}")]
    WorkerSpawn(String),

    #[error("engine worker broke: {0}")]
    WorkerBroken(String),

    #[error("invalid filter expression: {0}")]
    DslParse(String),

    #[error("output write failed: {0}")]
    OutputIo(#[from] std::io::Error),
}

impl From<MiningError> for color_eyre::Report {
    fn from(err: MiningError) -> Self {
        color_eyre::eyre::eyre!(err)
    }
}
