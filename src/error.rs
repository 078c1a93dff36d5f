use thiserror::Error;

/// Errors surfaced by configuration loading and the frame lifecycle.
#[derive(Debug, Error)]
pub enum FlockError {
    /// A configuration value the simulation cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to gather entropy for seeding: {0}")]
    Entropy(String),
    #[error("simulation needs at least one agent")]
    ZeroAgents,
    /// A stage panicked while the frame was in flight; its buffers are gone.
    #[error("frame computation panicked")]
    FramePanicked,
    /// Raised by `execute` after a frame panicked.
    #[error("simulator is poisoned by an earlier failed frame")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, FlockError>;
