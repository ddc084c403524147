use crate::core::task::TaskStatus;
use std::fmt;

/// The closed set of failures the scheduler's public operations can report.
///
/// The HTTP layer maps each variant to a status code; everything internal
/// stays `anyhow` until it crosses this boundary.
#[derive(Debug)]
pub enum SchedulerError {
    Validation(String),
    NotFound(i64),
    IllegalState { id: i64, status: TaskStatus },
    ProbeUnavailable(String),
    Internal(String),
}

impl std::error::Error for SchedulerError {}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Validation(msg) => write!(f, "{msg}"),
            SchedulerError::NotFound(id) => write!(f, "Task {id} not found"),
            SchedulerError::IllegalState { id, status } => {
                write!(f, "Task {id} is already terminal ({status})")
            }
            SchedulerError::ProbeUnavailable(msg) => {
                write!(f, "GPU inventory unavailable: {msg}")
            }
            SchedulerError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}
