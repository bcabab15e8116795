//! Deterministic workload simulator for the admission-control subsystem:
//! a virtual clock, a resizable ticketed workload driver, and a harness
//! that runs the throughput-probing controller against synthetic load.

pub mod characteristics;
pub mod config;
pub mod driver;
pub mod errors;
pub mod event_queue;
pub mod simulation;

pub use characteristics::{ReadWriteCount, StaticWorkloadCharacteristics, WorkloadCharacteristics};
pub use config::{PolicyChoice, SimulationConfig, SimulatorOptions};
pub use driver::TicketedWorkloadDriver;
pub use errors::DriverError;
pub use event_queue::{EventQueue, WaitKind};
pub use simulation::Simulation;
