use std::sync::Arc;

use gatesim_control::{AdmissionContext, Priority, TicketHolder};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::characteristics::{ReadWriteCount, WorkloadCharacteristics};
use crate::errors::DriverError;
use crate::event_queue::{EventQueue, WaitKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerClass {
    Reader,
    Writer,
}

struct WorkerRecord {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct DriverState {
    running: bool,
    read_pool: Option<TicketHolder>,
    write_pool: Option<TicketHolder>,
    readers: Vec<WorkerRecord>,
    writers: Vec<WorkerRecord>,
    next_worker_id: u64,
}

/// Maintains two independently resizable populations of workers (readers
/// and writers), each looping acquire → simulated work → release against
/// its ticket pool. Worker records carry stable ids and their own
/// cancellation token; shrinking retires workers from the tail and removes
/// a record only after its task has confirmed exit.
pub struct TicketedWorkloadDriver {
    queue: EventQueue,
    characteristics: Arc<dyn WorkloadCharacteristics>,
    state: Mutex<DriverState>,
}

impl TicketedWorkloadDriver {
    pub fn new(queue: EventQueue, characteristics: Arc<dyn WorkloadCharacteristics>) -> Self {
        Self {
            queue,
            characteristics,
            state: Mutex::new(DriverState {
                running: false,
                read_pool: None,
                write_pool: None,
                readers: Vec::new(),
                writers: Vec::new(),
                next_worker_id: 0,
            }),
        }
    }

    /// Begin the workload. Errors if already started or if either count is
    /// below 1.
    pub async fn start(
        &self,
        read_pool: TicketHolder,
        write_pool: TicketHolder,
        readers: u32,
        writers: u32,
    ) -> Result<(), DriverError> {
        check_counts(readers, writers)?;
        let mut state = self.state.lock().await;
        if state.running {
            return Err(DriverError::AlreadyStarted);
        }
        state.running = true;
        state.read_pool = Some(read_pool);
        state.write_pool = Some(write_pool);
        for _ in 0..readers {
            self.spawn_worker(&mut state, WorkerClass::Reader);
        }
        for _ in 0..writers {
            self.spawn_worker(&mut state, WorkerClass::Writer);
        }
        Ok(())
    }

    /// Change the worker counts live. Growth spawns new workers; shrink
    /// signals the excess workers and waits for each to finish its current
    /// acquire/work/release cycle before removing it.
    pub async fn resize(&self, readers: u32, writers: u32) -> Result<(), DriverError> {
        check_counts(readers, writers)?;
        let mut state = self.state.lock().await;
        if !state.running {
            return Err(DriverError::NotStarted);
        }

        while state.readers.len() < readers as usize {
            self.spawn_worker(&mut state, WorkerClass::Reader);
        }
        while state.readers.len() > readers as usize {
            let record = state.readers.pop().expect("reader population checked");
            retire(record).await;
        }

        while state.writers.len() < writers as usize {
            self.spawn_worker(&mut state, WorkerClass::Writer);
        }
        while state.writers.len() > writers as usize {
            let record = state.writers.pop().expect("writer population checked");
            retire(record).await;
        }

        Ok(())
    }

    /// Stop every worker and wait for it to drain its in-flight cycle, then
    /// drop the pool references. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        let state = &mut *state;
        for record in state.readers.iter().chain(state.writers.iter()) {
            record.token.cancel();
        }
        for record in state.readers.drain(..).chain(state.writers.drain(..)) {
            let _ = record.handle.await;
        }
        state.read_pool = None;
        state.write_pool = None;
        state.running = false;
        debug!("workload driver stopped");
    }

    /// Ideal-versus-allocated concurrency per class; `None` when the driver
    /// is not running.
    pub async fn metrics(&self) -> Option<serde_json::Value> {
        let state = self.state.lock().await;
        if !state.running {
            return None;
        }
        let read_pool = state.read_pool.as_ref()?;
        let write_pool = state.write_pool.as_ref()?;
        let optimal = self.characteristics.optimal();
        Some(json!({
            "read": {
                "optimal": optimal.read,
                "allocated": read_pool.capacity(),
            },
            "write": {
                "optimal": optimal.write,
                "allocated": write_pool.capacity(),
            },
        }))
    }

    /// Current worker populations; `None` when not running.
    pub async fn worker_counts(&self) -> Option<(usize, usize)> {
        let state = self.state.lock().await;
        if !state.running {
            return None;
        }
        Some((state.readers.len(), state.writers.len()))
    }

    fn spawn_worker(&self, state: &mut DriverState, class: WorkerClass) {
        let id = state.next_worker_id;
        state.next_worker_id += 1;
        let token = CancellationToken::new();
        let read_pool = state.read_pool.clone().expect("pools set before spawning");
        let write_pool = state.write_pool.clone().expect("pools set before spawning");
        let handle = tokio::spawn(run_worker(
            class,
            id,
            token.clone(),
            self.queue.clone(),
            Arc::clone(&self.characteristics),
            read_pool,
            write_pool,
        ));
        let record = WorkerRecord { id, token, handle };
        match class {
            WorkerClass::Reader => state.readers.push(record),
            WorkerClass::Writer => state.writers.push(record),
        }
    }
}

fn check_counts(readers: u32, writers: u32) -> Result<(), DriverError> {
    if readers < 1 || writers < 1 {
        return Err(DriverError::InvalidWorkerCount { readers, writers });
    }
    Ok(())
}

async fn retire(record: WorkerRecord) {
    record.token.cancel();
    let _ = record.handle.await;
    debug!(id = record.id, "worker retired");
}

async fn run_worker(
    class: WorkerClass,
    id: u64,
    token: CancellationToken,
    queue: EventQueue,
    characteristics: Arc<dyn WorkloadCharacteristics>,
    read_pool: TicketHolder,
    write_pool: TicketHolder,
) {
    let ctx = AdmissionContext::new(Priority::Normal);
    let own_pool = match class {
        WorkerClass::Reader => &read_pool,
        WorkerClass::Writer => &write_pool,
    };
    debug!(id, ?class, "worker started");

    while !token.is_cancelled() {
        let ticket = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            acquired = own_pool.acquire(&ctx) => match acquired {
                Ok(ticket) => ticket,
                // Pool shut down underneath us.
                Err(_) => break,
            },
        };

        let active = ReadWriteCount { read: read_pool.used(), write: write_pool.used() };
        let latency = match class {
            WorkerClass::Reader => characteristics.read_latency(active),
            WorkerClass::Writer => characteristics.write_latency(active),
        };
        // The stop signal is only observed between cycles: a held ticket is
        // always released before the worker exits.
        queue.wait_for(latency, WaitKind::Event).await;
        drop(ticket);
    }

    debug!(id, ?class, "worker exited");
}
