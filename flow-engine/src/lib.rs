// Flow Engine Library
// Cross-platform data-flow plans: stage assignment and push-based execution

pub mod config;
pub mod error;
pub mod execution;
pub mod plan;
pub mod platform;

#[cfg(test)]
mod test_util;

// Re-export commonly used types
pub use error::{
    EngineError, EngineResult, ExecutionError, IllegalStateError, OperatorError, PlanningError,
    PlanningErrorKind, SchedulingError, SlotError, TaskExecutionError,
};

// Re-export configuration types
pub use config::{EngineConfig, InstrumentationMode};

// Re-export plan types
pub use plan::{DataSetType, InputRef, LoopHead, LoopOperator, LoopState, OperatorGraph, OperatorId, OutputRef};

// Re-export platform types
pub use platform::{
    Activation, ChannelInstance, ExecutionOperator, ExecutionState, InstrumentationStrategy,
    Payload, Platform, TaskContext,
};

// Re-export execution types
pub use execution::{
    ChannelDescriptor, ChannelId, ExecutionEvent, ExecutionPlan, ExecutionStage, ExecutorConfig,
    PlanExecutor, PreliminaryExecutionPlan, ProgressSender, PushExecutor, StageAssignmentTraversal,
    StageId, TaskGraph, TaskId,
};
