use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DriverError {
    #[error("workload driver is already started")]
    AlreadyStarted,

    #[error("workload driver is not running")]
    NotStarted,

    #[error("worker counts must be at least 1, got {readers} readers / {writers} writers")]
    InvalidWorkerCount { readers: u32, writers: u32 },
}
