use std::time::Duration;

use clap::{Parser, ValueEnum};
use gatesim_control::{ConcurrencyLimits, ConfigError, ProbingOptions};

/// Which admission policy the pools use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyChoice {
    /// Priority-aware where the platform supports it, semaphore elsewhere.
    Auto,
    Semaphore,
    Priority,
}

/// Command-line surface of the simulator.
#[derive(Parser, Debug, Clone)]
#[command(name = "gatesim", about = "Adaptive admission-control workload simulator")]
pub struct SimulatorOptions {
    /// Floor for pool capacity.
    #[arg(long, default_value_t = 5)]
    pub min_concurrency: u32,

    /// Starting capacity for both pools.
    #[arg(long, default_value_t = 16)]
    pub initial_concurrency: u32,

    /// Ceiling for pool capacity.
    #[arg(long, default_value_t = 128)]
    pub max_concurrency: u32,

    /// Controller tick period, in simulated milliseconds.
    #[arg(long, default_value_t = 100)]
    pub probing_interval_ms: u64,

    /// Fractional capacity change per probe tick.
    #[arg(long, default_value_t = 0.1)]
    pub step_multiple: f64,

    /// Relative throughput change treated as noise.
    #[arg(long, default_value_t = 0.05)]
    pub noise_band: f64,

    /// Fraction of extra admission reserved against low-priority starvation
    /// (priority policy only).
    #[arg(long, default_value_t = 0.1)]
    pub low_priority_bypass_threshold: f64,

    #[arg(long, value_enum, default_value_t = PolicyChoice::Auto)]
    pub policy: PolicyChoice,

    /// Metrics reporting period, in simulated milliseconds.
    #[arg(long, default_value_t = 200)]
    pub monitor_interval_ms: u64,

    /// Reader workers to start with.
    #[arg(long, default_value_t = 8)]
    pub readers: u32,

    /// Writer workers to start with.
    #[arg(long, default_value_t = 8)]
    pub writers: u32,

    /// Concurrency at which the synthetic workload's read throughput peaks.
    #[arg(long, default_value_t = 16)]
    pub optimal_read_concurrency: u32,

    /// Concurrency at which the synthetic workload's write throughput peaks.
    #[arg(long, default_value_t = 16)]
    pub optimal_write_concurrency: u32,

    /// Uncontended per-operation latency, in simulated milliseconds.
    #[arg(long, default_value_t = 5)]
    pub base_latency_ms: u64,

    /// Simulated seconds to run.
    #[arg(long, default_value_t = 30)]
    pub run_seconds: u64,
}

/// Validated simulator configuration.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub limits: ConcurrencyLimits,
    pub probing: ProbingOptions,
    pub bypass_threshold: f64,
    pub policy: PolicyChoice,
    pub monitor_interval: Duration,
}

impl SimulatorOptions {
    /// Validate into a [`SimulationConfig`]; inconsistent options are
    /// rejected rather than clamped.
    pub fn build(&self) -> Result<SimulationConfig, ConfigError> {
        let limits = ConcurrencyLimits::new(
            self.min_concurrency,
            self.initial_concurrency,
            self.max_concurrency,
        )?;
        let probing = ProbingOptions::new(
            Duration::from_millis(self.probing_interval_ms),
            self.step_multiple,
            self.noise_band,
        )?;
        if !self.low_priority_bypass_threshold.is_finite()
            || self.low_priority_bypass_threshold < 0.0
        {
            return Err(ConfigError::InvalidBypassThreshold(
                self.low_priority_bypass_threshold,
            ));
        }
        Ok(SimulationConfig {
            limits,
            probing,
            bypass_threshold: self.low_priority_bypass_threshold,
            policy: self.policy,
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
        })
    }
}
