// Engine Errors
// Error taxonomy for plan construction, stage assignment and stage execution

use crate::execution::channel::ChannelId;
use crate::execution::plan::StageId;
use crate::execution::task::TaskId;
use crate::plan::operator::OperatorId;

use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used at the crate boundary
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error type of the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    IllegalState(#[from] IllegalStateError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Misuse of operator slots (bounds, types, broadcast rules)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("{0} is not part of this graph")]
    UnknownOperator(OperatorId),

    #[error("{operator} has no input slot {index} (declares {declared})")]
    InputOutOfBounds {
        operator: OperatorId,
        index: usize,
        declared: usize,
    },

    #[error("{operator} has no output slot {index} (declares {declared})")]
    OutputOutOfBounds {
        operator: OperatorId,
        index: usize,
        declared: usize,
    },

    #[error("cannot connect {output_type} output to {input_type} input")]
    TypeMismatch {
        output_type: String,
        input_type: String,
    },

    #[error("input slot {index} of {operator} is already connected")]
    AlreadyConnected { operator: OperatorId, index: usize },

    #[error("input slot {index} of {operator} is not connected")]
    NotConnected { operator: OperatorId, index: usize },

    #[error("{operator} does not support broadcast inputs")]
    BroadcastNotSupported { operator: OperatorId },
}

/// An operation that is not legal in the current state of an object
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IllegalStateError {
    #[error("operator '{0}' is not a loop head")]
    NotALoopHead(String),

    #[error("loop state cannot move from {from} to {to}")]
    LoopStateRegression { from: String, to: String },

    #[error("operator '{0}' is not executable")]
    NotExecutable(String),
}

/// Error raised while turning a preliminary plan into an execution plan
#[derive(Debug, Clone)]
pub struct PlanningError {
    pub message: String,
    pub kind: PlanningErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningErrorKind {
    /// A required input has no producing channel
    MissingProducer,
    /// Slot indices or channel endpoints do not line up
    InconsistentWiring,
    /// The task graph contains a data cycle that is not closed by a loop head
    DataCycle,
    /// A non-reusable channel would feed consumers in several stages
    NonReusableFanOut,
    /// There is nothing to plan
    EmptyPlan,
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "planning error: {}", self.message)
    }
}

impl std::error::Error for PlanningError {}

impl PlanningError {
    pub fn missing_producer(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PlanningErrorKind::MissingProducer,
        }
    }

    pub fn inconsistent_wiring(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PlanningErrorKind::InconsistentWiring,
        }
    }

    pub fn data_cycle(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PlanningErrorKind::DataCycle,
        }
    }

    pub fn non_reusable_fan_out(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PlanningErrorKind::NonReusableFanOut,
        }
    }

    pub fn empty_plan(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: PlanningErrorKind::EmptyPlan,
        }
    }
}

impl From<SlotError> for PlanningError {
    fn from(err: SlotError) -> Self {
        PlanningError::inconsistent_wiring(err.to_string())
    }
}

/// Internal bookkeeping of the scheduler was violated
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("{task} received a second instance for input {input} (from {channel})")]
    DuplicateInput {
        task: TaskId,
        input: usize,
        channel: ChannelId,
    },

    #[error("{task} does not consume {channel}")]
    UnknownInput { task: TaskId, channel: ChannelId },

    #[error("start task {task} of {stage} is not ready")]
    NotReady { task: TaskId, stage: StageId },

    #[error("instance of {channel} was released more often than it was referenced")]
    DoubleRelease { channel: ChannelId },

    #[error("instance of {channel} was used after its last reference was released")]
    UseAfterRelease { channel: ChannelId },
}

/// Failure reported by an operator implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperatorError {
    #[error("missing input {0}")]
    MissingInput(usize),

    #[error("input {index} does not carry {expected}")]
    UnexpectedPayload { index: usize, expected: &'static str },

    #[error("no output slot {0}")]
    NoSuchOutput(usize),

    #[error("{0}")]
    Failed(String),
}

impl OperatorError {
    pub fn failed(message: impl Into<String>) -> Self {
        OperatorError::Failed(message.into())
    }
}

/// An operator failed while its task was executed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task {task} ('{operator}') failed in {stage}: {source}")]
pub struct TaskExecutionError {
    pub task: TaskId,
    pub operator: String,
    pub stage: StageId,
    #[source]
    pub source: OperatorError,
}

/// Failure while executing a stage or a whole plan
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Task(#[from] TaskExecutionError),

    #[error("scheduling invariant violated: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    IllegalState(#[from] IllegalStateError),

    #[error("no executable stage left, {} stage(s) never ran: {}", .pending.len(), join_ids(.pending))]
    Stalled { pending: Vec<StageId> },

    #[error("loop head {task} ended in state {state}")]
    UnfinishedLoop { task: TaskId, state: String },

    #[error("stage execution limit of {0} reached")]
    IterationLimit(usize),
}

fn join_ids(ids: &[StageId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
