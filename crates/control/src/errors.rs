use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AcquireError {
    #[error("ticket pool has been shut down")]
    Shutdown,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("minimum concurrency must be at least 1, got {0}")]
    MinConcurrencyTooLow(u32),

    #[error("concurrency bounds are inconsistent: min={min}, initial={initial}, max={max}")]
    InconsistentConcurrencyBounds { min: u32, initial: u32, max: u32 },

    #[error("step multiple must be in (0, 1), got {0}")]
    InvalidStepMultiple(f64),

    #[error("noise band must be non-negative, got {0}")]
    InvalidNoiseBand(f64),

    #[error("probing interval must be non-zero")]
    ZeroProbingInterval,

    #[error("low-priority bypass threshold must be non-negative, got {0}")]
    InvalidBypassThreshold(f64),
}
