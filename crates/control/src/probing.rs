use std::time::Duration;

use tracing::debug;

use crate::errors::ConfigError;
use crate::limits::ConcurrencyLimits;
use crate::pool::TicketHolder;

/// Tuning for the throughput-probing controller.
#[derive(Debug, Clone, Copy)]
pub struct ProbingOptions {
    interval: Duration,
    step_multiple: f64,
    noise_band: f64,
}

impl ProbingOptions {
    /// `step_multiple` is the fractional capacity change per probe;
    /// `noise_band` is the relative throughput change below which a sample
    /// counts as "no improvement".
    pub fn new(
        interval: Duration,
        step_multiple: f64,
        noise_band: f64,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroProbingInterval);
        }
        if !step_multiple.is_finite() || step_multiple <= 0.0 || step_multiple >= 1.0 {
            return Err(ConfigError::InvalidStepMultiple(step_multiple));
        }
        if !noise_band.is_finite() || noise_band < 0.0 {
            return Err(ConfigError::InvalidNoiseBand(noise_band));
        }
        Ok(Self { interval, step_multiple, noise_band })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn step_multiple(&self) -> f64 {
        self.step_multiple
    }

    pub fn noise_band(&self) -> f64 {
        self.noise_band
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDirection {
    Stable,
    ProbingUp,
    ProbingDown,
}

/// Hill-climbing capacity controller: once per interval it samples a
/// throughput proxy (completed operations per second across both pools),
/// keeps moving capacity in the direction that improved throughput, and
/// reverses on regression. Both pools are held at a common capacity.
pub struct ThroughputProbing {
    read: TicketHolder,
    write: TicketHolder,
    limits: ConcurrencyLimits,
    options: ProbingOptions,
    direction: ProbeDirection,
    last_throughput: Option<f64>,
    last_completed: u64,
    last_capacity: u32,
}

impl ThroughputProbing {
    pub fn new(read: TicketHolder, write: TicketHolder, options: ProbingOptions) -> Self {
        let limits = read.limits();
        let last_capacity = read.capacity();
        Self {
            read,
            write,
            limits,
            options,
            direction: ProbeDirection::Stable,
            last_throughput: None,
            last_completed: 0,
            last_capacity,
        }
    }

    pub fn direction(&self) -> ProbeDirection {
        self.direction
    }

    pub fn last_capacity(&self) -> u32 {
        self.last_capacity
    }

    /// One probe: sample, decide, resize. `elapsed` is the time covered by
    /// the sample, normally the probing interval.
    pub fn tick(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        // Read fresh state each tick: capacity may have been resized by an
        // operator override since the last probe.
        let capacity = self.read.capacity();
        let completed = self.read.completed() + self.write.completed();
        let throughput = completed.saturating_sub(self.last_completed) as f64 / secs;
        self.last_completed = completed;

        match self.plan(capacity, throughput) {
            Some(next) => {
                let applied = self.read.resize(next);
                self.write.resize(next);
                debug!(
                    throughput,
                    capacity,
                    next = applied,
                    direction = ?self.direction,
                    "throughput probe adjusted capacity"
                );
            }
            None => {
                debug!(throughput, capacity, direction = ?self.direction, "throughput probe held");
            }
        }
    }

    /// The decision step, separated from sampling so it can be driven with
    /// synthetic throughput samples. Returns the capacity to resize to, or
    /// `None` to hold (stable sample, or already pinned at a bound).
    pub fn plan(&mut self, capacity: u32, throughput: f64) -> Option<u32> {
        self.direction = match self.last_throughput {
            // First sample: nothing to compare against, probe upward.
            None => ProbeDirection::ProbingUp,
            Some(previous) => {
                let band = previous.abs() * self.options.noise_band;
                if (throughput - previous).abs() <= band {
                    ProbeDirection::Stable
                } else if throughput > previous {
                    match self.direction {
                        ProbeDirection::ProbingDown => ProbeDirection::ProbingDown,
                        _ => ProbeDirection::ProbingUp,
                    }
                } else {
                    match self.direction {
                        ProbeDirection::ProbingDown => ProbeDirection::ProbingUp,
                        _ => ProbeDirection::ProbingDown,
                    }
                }
            }
        };
        self.last_throughput = Some(throughput);

        let next = match self.direction {
            ProbeDirection::Stable => capacity,
            ProbeDirection::ProbingUp => {
                self.limits.clamp(capacity.saturating_add(self.step(capacity)))
            }
            ProbeDirection::ProbingDown => {
                self.limits.clamp(capacity.saturating_sub(self.step(capacity)))
            }
        };
        self.last_capacity = next;
        if next == capacity { None } else { Some(next) }
    }

    fn step(&self, capacity: u32) -> u32 {
        ((capacity as f64 * self.options.step_multiple).round() as u32).max(1)
    }
}
