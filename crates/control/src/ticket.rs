use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::pool::HolderInner;

/// Admission priority of an operation. `Low` operations may be delayed in
/// favor of `Normal` ones, subject to the pool's bypass allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Low,
}

/// Per-operation admission metadata: created once per logical operation,
/// read by the pool, never mutated by it.
#[derive(Debug, Clone)]
pub struct AdmissionContext {
    priority: Priority,
    id: Uuid,
}

impl AdmissionContext {
    pub fn new(priority: Priority) -> Self {
        Self { priority, id: Uuid::new_v4() }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Opaque identity used for queue fairness; stable for the lifetime of
    /// the logical operation.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// A scoped admission grant: one unit of allowed concurrency against the
/// pool it was acquired from. Dropping the ticket releases it; releasing
/// through [`TicketHolder::release`](crate::TicketHolder::release) consumes
/// it, so a double release cannot compile.
pub struct Ticket {
    pool: Arc<HolderInner>,
    armed: bool,
}

impl Ticket {
    pub(crate) fn new(pool: Arc<HolderInner>) -> Self {
        Self { pool, armed: true }
    }

    /// Consume the ticket without releasing. Used when a grant could not be
    /// delivered and the pool undoes the admission under its own lock.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.armed {
            HolderInner::finish_release(&self.pool);
        }
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_records_priority_and_identity() {
        let a = AdmissionContext::new(Priority::Normal);
        let b = AdmissionContext::new(Priority::Low);
        assert_eq!(a.priority(), Priority::Normal);
        assert_eq!(b.priority(), Priority::Low);
        assert_ne!(a.id(), b.id());
    }
}
