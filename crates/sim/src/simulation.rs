use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gatesim_control::{ConfigError, ThroughputProbing, TicketHolder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{PolicyChoice, SimulationConfig};
use crate::driver::TicketedWorkloadDriver;
use crate::errors::DriverError;
use crate::event_queue::{EventQueue, WaitKind};

/// Wires pools, controller, clock, and workload driver together for a
/// controlled experiment, and owns their shutdown order.
pub struct Simulation {
    config: SimulationConfig,
    queue: EventQueue,
    read_pool: TicketHolder,
    write_pool: TicketHolder,
    driver: Option<Arc<TicketedWorkloadDriver>>,
    running: Arc<AtomicBool>,
    probing_token: CancellationToken,
    probing_handle: Option<JoinHandle<()>>,
    monitor_token: CancellationToken,
    monitor_handle: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        let (read_pool, write_pool) = build_pools(&config)?;
        let queue = {
            let read = read_pool.clone();
            let write = write_pool.clone();
            let step_multiple = config.probing.step_multiple();
            EventQueue::new(move || busy_actor_count(&read, &write, step_multiple))
        };
        Ok(Self {
            config,
            queue,
            read_pool,
            write_pool,
            driver: None,
            running: Arc::new(AtomicBool::new(false)),
            probing_token: CancellationToken::new(),
            probing_handle: None,
            monitor_token: CancellationToken::new(),
            monitor_handle: None,
            torn_down: false,
        })
    }

    /// Start the clock and the probing controller. The workload itself
    /// starts separately via [`start`](Simulation::start).
    pub fn setup(&mut self) {
        self.queue.start();

        let mut probing = ThroughputProbing::new(
            self.read_pool.clone(),
            self.write_pool.clone(),
            self.config.probing,
        );
        let interval = self.config.probing.interval();
        let queue = self.queue.clone();
        let token = self.probing_token.clone();
        self.probing_handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    elapsed = queue.wait_for(interval, WaitKind::Observer) => {
                        if elapsed {
                            probing.tick(interval);
                        }
                    }
                }
            }
        }));
    }

    /// Begin the workload against the pools. Errors if a workload is
    /// already running.
    pub async fn start(
        &mut self,
        driver: TicketedWorkloadDriver,
        readers: u32,
        writers: u32,
    ) -> Result<(), DriverError> {
        if self.driver.is_some() {
            return Err(DriverError::AlreadyStarted);
        }
        let driver = Arc::new(driver);
        driver
            .start(self.read_pool.clone(), self.write_pool.clone(), readers, writers)
            .await?;
        self.running.store(true, Ordering::SeqCst);
        self.spawn_monitor(Arc::clone(&driver));
        self.driver = Some(driver);
        info!(readers, writers, "workload started");
        Ok(())
    }

    /// Change worker counts live.
    pub async fn resize(&self, readers: u32, writers: u32) -> Result<(), DriverError> {
        let driver = self.driver.as_ref().ok_or(DriverError::NotStarted)?;
        driver.resize(readers, writers).await?;
        info!(readers, writers, "workload resized");
        Ok(())
    }

    /// Advance the simulated clock by `duration`, synchronously.
    pub async fn run(&self, duration: Duration) {
        self.queue.wait_for(duration, WaitKind::Observer).await;
    }

    /// Per-class optimal-versus-allocated concurrency; `None` whenever the
    /// simulation is not running.
    pub async fn metrics(&self) -> Option<serde_json::Value> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        self.driver.as_ref()?.metrics().await
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Stop workload, controller, clock, and pools, in that order.
    /// Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.running.store(false, Ordering::SeqCst);

        if let Some(driver) = &self.driver {
            driver.stop().await;
        }

        self.queue.prepare_stop();
        self.probing_token.cancel();
        self.monitor_token.cancel();
        self.queue.wake_all();
        if let Some(handle) = self.probing_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.await;
        }

        self.queue.stop().await;
        self.read_pool.close();
        self.write_pool.close();
        info!("simulation torn down");
    }

    fn spawn_monitor(&mut self, driver: Arc<TicketedWorkloadDriver>) {
        let queue = self.queue.clone();
        let interval = self.config.monitor_interval;
        let token = self.monitor_token.clone();
        let running = Arc::clone(&self.running);
        self.monitor_handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    elapsed = queue.wait_for(interval, WaitKind::Observer) => {
                        if !elapsed || !running.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Some(metrics) = driver.metrics().await {
                            info!(%metrics, time_ms = queue.now().as_millis() as u64, "workload metrics");
                        }
                    }
                }
            }
        }));
    }
}

fn build_pools(config: &SimulationConfig) -> Result<(TicketHolder, TicketHolder), ConfigError> {
    let priority = match config.policy {
        PolicyChoice::Semaphore => false,
        PolicyChoice::Priority => true,
        PolicyChoice::Auto => cfg!(target_os = "linux"),
    };
    if priority {
        Ok((
            TicketHolder::with_priority_bypass(config.limits, config.bypass_threshold)?,
            TicketHolder::with_priority_bypass(config.limits, config.bypass_threshold)?,
        ))
    } else {
        Ok((
            TicketHolder::semaphore(config.limits),
            TicketHolder::semaphore(config.limits),
        ))
    }
}

/// How many actors are genuinely able to queue simulated work right now.
/// When callers are queued, the whole allocated capacity counts as busy;
/// the result is then discounted by one probe step, because a capacity
/// decrease leaves that fraction of tickets structurally unavailable while
/// it drains — counting them would stall the clock waiting for events that
/// can never be queued.
fn busy_actor_count(read: &TicketHolder, write: &TicketHolder, step_multiple: f64) -> usize {
    let mut count = 0u32;
    for pool in [read, write] {
        count += if pool.queued() > 0 { pool.capacity() } else { pool.used() };
    }
    (count as f64 * (1.0 - step_multiple)) as usize
}
