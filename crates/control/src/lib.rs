//! Adaptive admission control: a bounded-concurrency ticket pool plus a
//! throughput-probing controller that re-sizes the pool toward the
//! concurrency level with the best observed throughput.

mod errors;
mod limits;
mod pool;
mod probing;
mod ticket;

pub use errors::{AcquireError, ConfigError};
pub use limits::ConcurrencyLimits;
pub use pool::TicketHolder;
pub use probing::{ProbeDirection, ProbingOptions, ThroughputProbing};
pub use ticket::{AdmissionContext, Priority, Ticket};
