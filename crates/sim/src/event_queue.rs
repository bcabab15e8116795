use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a wait participates in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Simulated work: the clock will not advance past this wait until
    /// enough of its peers are queued.
    Event,
    /// Pacing for a control loop: observed by the clock but never gates it.
    Observer,
}

struct Sleeper {
    kind: WaitKind,
    tx: oneshot::Sender<bool>,
}

struct QueueState {
    now: Duration,
    next_seq: u64,
    sleepers: BTreeMap<(Duration, u64), Sleeper>,
    event_sleepers: usize,
    draining: bool,
    stopped: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    registered: Notify,
    busy_actors: Box<dyn Fn() -> usize + Send + Sync>,
    shutdown: CancellationToken,
    processor: Mutex<Option<JoinHandle<()>>>,
}

/// Deterministic virtual-time clock.
///
/// Callers park in [`wait_for`](EventQueue::wait_for); a processor task
/// advances `now` straight to the earliest pending deadline, but only once
/// the number of queued `Event` sleepers reaches the busy-actor count
/// supplied at construction. Waiting for the actors keeps the clock from
/// running ahead of simulated work that has not been queued yet.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new(busy_actors: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    now: Duration::ZERO,
                    next_seq: 0,
                    sleepers: BTreeMap::new(),
                    event_sleepers: 0,
                    draining: false,
                    stopped: false,
                }),
                registered: Notify::new(),
                busy_actors: Box::new(busy_actors),
                shutdown: CancellationToken::new(),
                processor: Mutex::new(None),
            }),
        }
    }

    /// Spawn the clock processor. Waits registered before `start` are
    /// served once it runs.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { process(inner).await });
        *self.inner.processor.lock().expect("event queue mutex poisoned") = Some(handle);
    }

    /// Park until `duration` has elapsed in virtual time. Returns `true` on
    /// a normal elapse and `false` when woken early (wake, drain, or stop).
    pub async fn wait_for(&self, duration: Duration, kind: WaitKind) -> bool {
        let rx = {
            let mut state = self.inner.lock();
            if state.stopped {
                return false;
            }
            let deadline = state.now + duration;
            let seq = state.next_seq;
            state.next_seq += 1;
            let (tx, rx) = oneshot::channel();
            if kind == WaitKind::Event {
                state.event_sleepers += 1;
            }
            state.sleepers.insert((deadline, seq), Sleeper { kind, tx });
            rx
        };
        self.inner.registered.notify_one();
        rx.await.unwrap_or(false)
    }

    /// Virtual time elapsed since construction.
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    /// Wake every parked waiter early without advancing the clock.
    pub fn wake_all(&self) {
        let woken: Vec<Sleeper> = {
            let mut state = self.inner.lock();
            state.event_sleepers = 0;
            std::mem::take(&mut state.sleepers).into_values().collect()
        };
        for sleeper in woken {
            let _ = sleeper.tx.send(false);
        }
        self.inner.registered.notify_one();
    }

    /// Disable busy-actor gating so pending waits drain in deadline order.
    pub fn prepare_stop(&self) {
        self.inner.lock().draining = true;
        self.inner.registered.notify_one();
    }

    /// Wake everything, refuse future waits, and halt the processor.
    /// Idempotent.
    pub async fn stop(&self) {
        self.inner.lock().stopped = true;
        self.inner.shutdown.cancel();
        self.wake_all();
        let handle = self
            .inner
            .processor
            .lock()
            .expect("event queue mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("event queue stopped");
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("event queue mutex poisoned")
    }
}

async fn process(inner: Arc<QueueInner>) {
    loop {
        let due = {
            let mut state = inner.lock();
            if state.stopped {
                break;
            }
            let required = if state.draining { 0 } else { (inner.busy_actors)() };
            if state.sleepers.is_empty() || state.event_sleepers < required {
                None
            } else {
                // Jump to the earliest deadline and fire everything due at it.
                let deadline = state
                    .sleepers
                    .keys()
                    .next()
                    .map(|&(deadline, _)| deadline)
                    .unwrap_or_default();
                if deadline > state.now {
                    state.now = deadline;
                }
                let mut due = Vec::new();
                while let Some(entry) = state.sleepers.first_entry() {
                    if entry.key().0 > deadline {
                        break;
                    }
                    let (_, sleeper) = entry.remove_entry();
                    if sleeper.kind == WaitKind::Event {
                        state.event_sleepers -= 1;
                    }
                    due.push(sleeper);
                }
                Some(due)
            }
        };
        match due {
            Some(due) => {
                for sleeper in due {
                    let _ = sleeper.tx.send(true);
                }
                // Let the woken tasks queue their next wait before the
                // clock moves again.
                tokio::task::yield_now().await;
            }
            None => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.registered.notified() => {}
                    // The busy-actor count can drop without a registration
                    // (a worker retiring); recheck periodically so the gate
                    // cannot wedge.
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
        }
    }
}
