use crate::errors::ConfigError;

/// Validated capacity bounds for a ticket pool: the pool starts at
/// `initial` and every later resize is clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    min: u32,
    initial: u32,
    max: u32,
}

impl ConcurrencyLimits {
    /// Inconsistent bounds are rejected here rather than clamped later.
    pub fn new(min: u32, initial: u32, max: u32) -> Result<Self, ConfigError> {
        if min < 1 {
            return Err(ConfigError::MinConcurrencyTooLow(min));
        }
        if min > initial || initial > max {
            return Err(ConfigError::InconsistentConcurrencyBounds { min, initial, max });
        }
        Ok(Self { min, initial, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn clamp(&self, capacity: u32) -> u32 {
        capacity.clamp(self.min, self.max)
    }
}
