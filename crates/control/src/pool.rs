use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{AcquireError, ConfigError};
use crate::limits::ConcurrencyLimits;
use crate::ticket::{AdmissionContext, Priority, Ticket};

/// Admission discipline for a [`TicketHolder`].
enum AdmissionPolicy {
    /// Plain counting semaphore: strict FIFO, priority ignored.
    Fifo,
    /// Priority-FIFO: queued Normal callers are admitted before queued Low
    /// callers, and Low callers that would queue may instead be admitted
    /// into reserved headroom beyond nominal capacity.
    PriorityBypass { threshold: f64 },
}

struct Waiter {
    seq: u64,
    priority: Priority,
    tx: oneshot::Sender<Ticket>,
}

/// Dequeues an abandoned waiter. Armed while its `acquire` is suspended,
/// disarmed once the wait resolves, so a dropped future removes its queue
/// entry on the way out.
struct PendingWaiter<'a> {
    inner: &'a Arc<HolderInner>,
    seq: u64,
    armed: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.seq == self.seq) {
            state.waiters.remove(pos);
        }
    }
}

struct PoolState {
    capacity: u32,
    used: u32,
    completed: u64,
    closed: bool,
    next_waiter_seq: u64,
    waiters: VecDeque<Waiter>,
}

pub(crate) struct HolderInner {
    limits: ConcurrencyLimits,
    policy: AdmissionPolicy,
    state: Mutex<PoolState>,
}

/// The admission gate: at most `capacity()` tickets outstanding at once.
///
/// All counter transitions (acquire, release, resize) serialize through one
/// pool-scoped critical section; the work done while holding a ticket never
/// does. Cloning shares the same pool.
#[derive(Clone)]
pub struct TicketHolder {
    inner: Arc<HolderInner>,
}

impl TicketHolder {
    /// A plain counting-semaphore pool with strict FIFO admission.
    pub fn semaphore(limits: ConcurrencyLimits) -> Self {
        Self::build(limits, AdmissionPolicy::Fifo)
    }

    /// A priority-aware pool. `threshold` is the fraction of capacity
    /// reserved as bypass headroom for Low-priority callers; Normal-priority
    /// callers are never bypassed.
    pub fn with_priority_bypass(
        limits: ConcurrencyLimits,
        threshold: f64,
    ) -> Result<Self, ConfigError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidBypassThreshold(threshold));
        }
        Ok(Self::build(limits, AdmissionPolicy::PriorityBypass { threshold }))
    }

    fn build(limits: ConcurrencyLimits, policy: AdmissionPolicy) -> Self {
        Self {
            inner: Arc::new(HolderInner {
                limits,
                policy,
                state: Mutex::new(PoolState {
                    capacity: limits.initial(),
                    used: 0,
                    completed: 0,
                    closed: false,
                    next_waiter_seq: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Suspend until a ticket is available, then take it. Fails with
    /// [`AcquireError::Shutdown`] instead of blocking once the pool is
    /// closed. Abandoning the returned future is safe at any point: while
    /// still queued the waiter entry is removed immediately, and a grant
    /// already in flight is returned to the pool.
    pub async fn acquire(&self, ctx: &AdmissionContext) -> Result<Ticket, AcquireError> {
        let (rx, seq) = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(AcquireError::Shutdown);
            }
            if self.inner.admits_now(&state, ctx.priority()) {
                state.used += 1;
                return Ok(Ticket::new(Arc::clone(&self.inner)));
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_waiter_seq;
            state.next_waiter_seq += 1;
            state.waiters.push_back(Waiter { seq, priority: ctx.priority(), tx });
            (rx, seq)
        };
        let mut pending = PendingWaiter { inner: &self.inner, seq, armed: true };
        let granted = rx.await;
        pending.armed = false;
        granted.map_err(|_| AcquireError::Shutdown)
    }

    /// Take a ticket only if one is available right now.
    pub fn try_acquire(&self, ctx: &AdmissionContext) -> Option<Ticket> {
        let mut state = self.inner.lock();
        if state.closed || !self.inner.admits_now(&state, ctx.priority()) {
            return None;
        }
        state.used += 1;
        Some(Ticket::new(Arc::clone(&self.inner)))
    }

    /// Return a ticket to the pool. Consumes the ticket, so releasing twice
    /// does not compile; dropping a ticket releases it as well.
    pub fn release(&self, ticket: Ticket) {
        drop(ticket);
    }

    /// Set capacity to `clamp(capacity, min, max)` and return the applied
    /// value. Growth admits waiters up to the new headroom immediately;
    /// shrink never revokes held tickets, it only throttles admissions
    /// until `used` drains below the new capacity.
    pub fn resize(&self, capacity: u32) -> u32 {
        let applied = self.inner.limits.clamp(capacity);
        let previous = {
            let mut state = self.inner.lock();
            let previous = state.capacity;
            state.capacity = applied;
            if applied > previous {
                HolderInner::admit_waiters(&self.inner, &mut state);
            }
            previous
        };
        if applied != previous {
            debug!(from = previous, to = applied, "resized ticket pool");
        }
        applied
    }

    /// Shut the pool down: queued callers fail promptly, later acquires
    /// fail immediately. Held tickets stay valid until released. Idempotent.
    pub fn close(&self) {
        let abandoned: Vec<Waiter> = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.waiters.drain(..).collect()
        };
        if !abandoned.is_empty() {
            debug!(waiters = abandoned.len(), "closing ticket pool with queued callers");
        }
        // Dropping the senders outside the lock fails the pending acquires.
        drop(abandoned);
    }

    /// Outstanding tickets.
    pub fn used(&self) -> u32 {
        self.inner.lock().used
    }

    /// Callers currently suspended in `acquire`.
    pub fn queued(&self) -> u32 {
        self.inner.lock().waiters.len() as u32
    }

    /// Current maximum concurrent holders.
    pub fn capacity(&self) -> u32 {
        self.inner.lock().capacity
    }

    /// Monotonic count of released tickets; the controller's throughput
    /// source.
    pub fn completed(&self) -> u64 {
        self.inner.lock().completed
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        self.inner.limits
    }
}

impl HolderInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("ticket pool mutex poisoned")
    }

    /// Whether a caller of the given priority may be admitted without
    /// queueing, in the state observed under the lock.
    fn admits_now(&self, state: &PoolState, priority: Priority) -> bool {
        if state.used < state.capacity && state.waiters.is_empty() {
            return true;
        }
        // The caller would queue; Low priority may enter bypass headroom.
        if priority == Priority::Low {
            if let AdmissionPolicy::PriorityBypass { threshold } = self.policy {
                let extra = (state.capacity as f64 * threshold).floor() as u32;
                return extra > 0 && state.used < state.capacity + extra;
            }
        }
        false
    }

    fn next_waiter(&self, state: &mut PoolState) -> Option<Waiter> {
        match self.policy {
            AdmissionPolicy::Fifo => state.waiters.pop_front(),
            AdmissionPolicy::PriorityBypass { .. } => {
                if let Some(pos) =
                    state.waiters.iter().position(|w| w.priority == Priority::Normal)
                {
                    state.waiters.remove(pos)
                } else {
                    state.waiters.pop_front()
                }
            }
        }
    }

    /// Admit waiters while headroom remains. The grant is sent as a live
    /// ticket, so the release that freed the headroom happens-before the
    /// admitted caller resumes. A grant whose receiver vanished is undone
    /// here, under the same lock.
    fn admit_waiters(this: &Arc<Self>, state: &mut PoolState) {
        while state.used < state.capacity {
            let Some(waiter) = this.next_waiter(state) else {
                break;
            };
            state.used += 1;
            if let Err(ticket) = waiter.tx.send(Ticket::new(Arc::clone(this))) {
                ticket.disarm();
                state.used -= 1;
            }
        }
    }

    pub(crate) fn finish_release(this: &Arc<Self>) {
        let mut state = this.lock();
        assert!(state.used > 0, "ticket released with no tickets outstanding");
        state.used -= 1;
        state.completed += 1;
        Self::admit_waiters(this, &mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn limits(min: u32, initial: u32, max: u32) -> ConcurrencyLimits {
        ConcurrencyLimits::new(min, initial, max).unwrap()
    }

    fn normal() -> AdmissionContext {
        AdmissionContext::new(Priority::Normal)
    }

    fn low() -> AdmissionContext {
        AdmissionContext::new(Priority::Low)
    }

    // Let spawned tasks reach their suspension points on the
    // current-thread test runtime.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    /// Spawn a task that acquires a ticket and parks it on a channel so the
    /// test controls when it is released.
    fn spawn_holder(
        pool: &TicketHolder,
        ctx: AdmissionContext,
        parked: mpsc::UnboundedSender<Ticket>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = pool.clone();
        tokio::spawn(async move {
            let ticket = pool.acquire(&ctx).await.unwrap();
            let _ = parked.send(ticket);
        })
    }

    #[tokio::test]
    async fn admits_up_to_capacity_immediately() {
        let pool = TicketHolder::semaphore(limits(1, 3, 10));
        let t1 = pool.acquire(&normal()).await.unwrap();
        let t2 = pool.acquire(&normal()).await.unwrap();
        let t3 = pool.acquire(&normal()).await.unwrap();
        assert_eq!(pool.used(), 3);
        assert_eq!(pool.queued(), 0);
        drop((t1, t2, t3));
        assert_eq!(pool.used(), 0);
    }

    #[tokio::test]
    async fn blocks_at_capacity_until_release() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let held = pool.acquire(&normal()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let waiter = spawn_holder(&pool, normal(), tx);
        settle().await;
        assert_eq!(pool.queued(), 1);
        assert_eq!(pool.used(), 1);

        drop(held);
        settle().await;
        waiter.await.unwrap();
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.used(), 1);
        drop(rx.try_recv().unwrap());
        assert_eq!(pool.used(), 0);
    }

    #[tokio::test]
    async fn admission_order_is_fifo() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let held = pool.acquire(&normal()).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for i in 0..3u32 {
            let pool = pool.clone();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let ticket = pool.acquire(&normal()).await.unwrap();
                let _ = order_tx.send(i);
                drop(ticket);
            });
            // Deterministic queue order: each task enqueues before the next
            // is spawned.
            settle().await;
        }
        assert_eq!(pool.queued(), 3);

        drop(held);
        settle().await;
        let mut admitted = Vec::new();
        while let Ok(i) = order_rx.try_recv() {
            admitted.push(i);
        }
        assert_eq!(admitted, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn releases_admit_exactly_that_many_waiters() {
        let pool = TicketHolder::semaphore(limits(1, 2, 10));
        let (parked_tx, mut parked_rx) = mpsc::unbounded_channel();
        let h1 = pool.acquire(&normal()).await.unwrap();
        let h2 = pool.acquire(&normal()).await.unwrap();
        for _ in 0..4 {
            spawn_holder(&pool, normal(), parked_tx.clone());
        }
        settle().await;
        assert_eq!(pool.queued(), 4);

        drop(h1);
        drop(h2);
        settle().await;
        // Two releases admit exactly two of the four waiters.
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.queued(), 2);

        // Draining the admitted holders admits the rest.
        drop(parked_rx.try_recv().unwrap());
        drop(parked_rx.try_recv().unwrap());
        settle().await;
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn resize_up_wakes_waiters_to_new_headroom() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let (parked_tx, _parked_rx) = mpsc::unbounded_channel();
        let _held = pool.acquire(&normal()).await.unwrap();
        for _ in 0..3 {
            spawn_holder(&pool, normal(), parked_tx.clone());
        }
        settle().await;
        assert_eq!(pool.queued(), 3);

        assert_eq!(pool.resize(4), 4);
        settle().await;
        assert_eq!(pool.used(), 4);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn resize_down_never_evicts_holders() {
        let pool = TicketHolder::semaphore(limits(1, 4, 8));
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire(&normal()).await.unwrap());
        }

        assert_eq!(pool.resize(2), 2);
        // Overshoot is tolerated while the shrink drains.
        assert_eq!(pool.used(), 4);
        assert_eq!(pool.capacity(), 2);

        let (parked_tx, _parked_rx) = mpsc::unbounded_channel();
        spawn_holder(&pool, normal(), parked_tx);
        settle().await;
        assert_eq!(pool.queued(), 1);

        // No admissions resume until used drains below the new capacity.
        drop(held.pop().unwrap());
        drop(held.pop().unwrap());
        settle().await;
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.queued(), 1);

        drop(held.pop().unwrap());
        settle().await;
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn resize_clamps_to_limits() {
        let pool = TicketHolder::semaphore(limits(5, 10, 50));
        assert_eq!(pool.resize(0), 5);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.resize(1000), 50);
        assert_eq!(pool.capacity(), 50);
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_acquires() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let held = pool.acquire(&normal()).await.unwrap();

        let blocked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&normal()).await })
        };
        settle().await;
        assert_eq!(pool.queued(), 1);

        pool.close();
        settle().await;
        assert!(matches!(blocked.await.unwrap(), Err(AcquireError::Shutdown)));
        assert!(matches!(pool.acquire(&normal()).await, Err(AcquireError::Shutdown)));

        // Close is idempotent and held tickets still release cleanly.
        pool.close();
        drop(held);
        assert_eq!(pool.used(), 0);
    }

    #[tokio::test]
    async fn abandoned_acquire_does_not_leak_a_grant() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let held = pool.acquire(&normal()).await.unwrap();

        let abandoned = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _ = pool.acquire(&normal()).await;
            })
        };
        settle().await;
        assert_eq!(pool.queued(), 1);

        // The waiter gives up before any grant arrives.
        abandoned.abort();
        settle().await;

        drop(held);
        settle().await;
        assert_eq!(pool.used(), 0);
        // The freed ticket is available to a fresh caller.
        assert!(pool.acquire(&normal()).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_the_queue_immediately() {
        let pool = TicketHolder::semaphore(limits(1, 1, 10));
        let held = pool.acquire(&normal()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _ = pool.acquire(&normal()).await;
            })
        };
        settle().await;
        assert_eq!(pool.queued(), 1);

        // No release happens: the cancelled waiter must drop out of the
        // queue on its own.
        waiter.abort();
        settle().await;
        assert_eq!(pool.queued(), 0);

        // With the queue empty again, the fast path is open to fresh
        // callers as soon as a ticket frees.
        drop(held);
        assert!(pool.try_acquire(&normal()).is_some());
    }

    #[tokio::test]
    async fn contention_stabilizes_at_capacity() {
        // min=5, max=50, initial=10, 20 contenders.
        let pool = TicketHolder::semaphore(limits(5, 10, 50));
        let (parked_tx, mut parked_rx) = mpsc::unbounded_channel();
        for _ in 0..20 {
            spawn_holder(&pool, normal(), parked_tx.clone());
        }
        settle().await;
        assert_eq!(pool.used(), 10);
        assert_eq!(pool.queued(), 10);

        pool.resize(25);
        settle().await;
        assert_eq!(pool.used(), 20);
        assert_eq!(pool.queued(), 0);

        drop(parked_tx);
        let mut drained = 0;
        while let Some(ticket) = parked_rx.recv().await {
            drop(ticket);
            drained += 1;
        }
        assert_eq!(drained, 20);
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.completed(), 20);
    }

    #[tokio::test]
    async fn low_priority_bypasses_into_reserved_headroom() {
        let pool =
            TicketHolder::with_priority_bypass(limits(1, 4, 16), 0.5).unwrap();
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire(&normal()).await.unwrap());
        }

        // Bypass headroom is floor(4 * 0.5) = 2 extra holders, Low only.
        let b1 = pool.acquire(&low()).await.unwrap();
        let b2 = pool.acquire(&low()).await.unwrap();
        assert_eq!(pool.used(), 6);

        assert!(pool.try_acquire(&low()).is_none());
        assert!(pool.try_acquire(&normal()).is_none());
        drop((b1, b2));
        drop(held);
    }

    #[tokio::test]
    async fn normal_waiter_admitted_before_low() {
        // Zero threshold: bypass is off, so both classes queue.
        let pool = TicketHolder::with_priority_bypass(limits(1, 2, 8), 0.0).unwrap();
        let h1 = pool.acquire(&normal()).await.unwrap();
        let h2 = pool.acquire(&normal()).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for (label, ctx) in [("low", low()), ("normal", normal())] {
            let pool = pool.clone();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let ticket = pool.acquire(&ctx).await.unwrap();
                let _ = order_tx.send(label);
                drop(ticket);
            });
            settle().await;
        }
        assert_eq!(pool.queued(), 2);

        // One release: the queued Normal caller wins despite arriving later.
        drop(h1);
        settle().await;
        assert_eq!(order_rx.try_recv().unwrap(), "normal");

        drop(h2);
        settle().await;
        assert_eq!(order_rx.try_recv().unwrap(), "low");
    }

    #[tokio::test]
    async fn semaphore_pool_ignores_priority() {
        let pool = TicketHolder::semaphore(limits(1, 1, 8));
        let held = pool.acquire(&normal()).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for (label, ctx) in [("low", low()), ("normal", normal())] {
            let pool = pool.clone();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let ticket = pool.acquire(&ctx).await.unwrap();
                let _ = order_tx.send(label);
                drop(ticket);
            });
            settle().await;
        }

        drop(held);
        settle().await;
        assert_eq!(order_rx.try_recv().unwrap(), "low");
        assert_eq!(order_rx.try_recv().unwrap(), "normal");
    }
}
