use std::error::Error;
use std::fmt;
use std::io;

/// Which side of a replica a buffer sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// tokenizer -> aggregator hand-off
    Tokens,
    /// aggregator -> reducer frequency table
    Table,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Stage::Tokens => write!(f, "token buffer"),
            Stage::Table => write!(f, "frequency table"),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    InvalidInput(String),
    InvalidConfig(String),
    CapacityExceeded {
        replica: usize,
        stage: Stage,
        capacity: usize,
    },
    PartitionBoundaryConflict {
        replica: usize,
        expected: usize,
        found: usize,
    },
    BufferCompleted {
        replica: usize,
        stage: Stage,
    },
    IncompleteBuffer {
        replica: usize,
        stage: Stage,
    },
    Cancelled,
    WorkerPanicked(String),
    Io(io::Error),
}

impl PipelineError {
    /// `Cancelled` is only ever a consequence of another failure.
    pub fn is_cancellation(&self) -> bool {
        match *self {
            PipelineError::Cancelled => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PipelineError::InvalidInput(ref msg) => write!(f, "invalid input: {}", msg),
            PipelineError::InvalidConfig(ref msg) => write!(f, "invalid configuration: {}", msg),
            PipelineError::CapacityExceeded {
                replica,
                stage,
                capacity,
            } => write!(
                f,
                "replica {}: {} exceeded its capacity of {} entries",
                replica, stage, capacity
            ),
            PipelineError::PartitionBoundaryConflict {
                replica,
                expected,
                found,
            } => write!(
                f,
                "replica {}: partition starts at {} but the previous one ends at {}",
                replica, found, expected
            ),
            PipelineError::BufferCompleted { replica, stage } => {
                write!(f, "replica {}: {} is already completed", replica, stage)
            }
            PipelineError::IncompleteBuffer { replica, stage } => {
                write!(f, "replica {}: {} never completed", replica, stage)
            }
            PipelineError::Cancelled => write!(f, "run cancelled"),
            PipelineError::WorkerPanicked(ref name) => write!(f, "worker {} panicked", name),
            PipelineError::Io(ref err) => write!(f, "IO error: {}", err),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            PipelineError::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> PipelineError {
        PipelineError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
