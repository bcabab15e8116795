use std::time::Duration;

/// Concurrent operation counts per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWriteCount {
    pub read: u32,
    pub write: u32,
}

/// The workload's latency response to concurrency, and the concurrency it
/// would ideally be given. Drives both the simulated per-operation latency
/// and the "optimal" half of the driver's metrics.
pub trait WorkloadCharacteristics: Send + Sync {
    fn read_latency(&self, active: ReadWriteCount) -> Duration;
    fn write_latency(&self, active: ReadWriteCount) -> Duration;
    fn optimal(&self) -> ReadWriteCount;
}

/// A fixed unimodal workload: latency is flat up to the optimal concurrency
/// and grows quadratically with overcommit beyond it, so throughput peaks
/// exactly at `optimal` — the level the probing controller should find.
pub struct StaticWorkloadCharacteristics {
    optimal: ReadWriteCount,
    base_read: Duration,
    base_write: Duration,
}

impl StaticWorkloadCharacteristics {
    pub fn new(optimal: ReadWriteCount, base_read: Duration, base_write: Duration) -> Self {
        Self { optimal, base_read, base_write }
    }

    fn scaled(base: Duration, active: u32, optimal: u32) -> Duration {
        if optimal == 0 || active <= optimal {
            return base;
        }
        let overcommit = active as f64 / optimal as f64;
        base.mul_f64(overcommit * overcommit)
    }
}

impl WorkloadCharacteristics for StaticWorkloadCharacteristics {
    fn read_latency(&self, active: ReadWriteCount) -> Duration {
        Self::scaled(self.base_read, active.read, self.optimal.read)
    }

    fn write_latency(&self, active: ReadWriteCount) -> Duration {
        Self::scaled(self.base_write, active.write, self.optimal.write)
    }

    fn optimal(&self) -> ReadWriteCount {
        self.optimal
    }
}
