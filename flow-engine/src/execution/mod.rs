// Execution Module
// Task graphs, stage assignment and the push-based stage scheduler

pub mod assignment;
pub mod channel;
pub mod driver;
pub mod events;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod task;

// Re-export key types
pub use assignment::StageAssignmentTraversal;
pub use channel::{Channel, ChannelDescriptor, ChannelId, Consumer};
pub use driver::{PlanExecutor, PlanReport};
pub use events::{progress_channel, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{ExecutedTask, ExecutorConfig, PushExecutor, StageReport, TaskActivator};
pub use graph::{PreliminaryExecutionPlan, TaskGraph};
pub use plan::{ExecutionPlan, ExecutionStage, PlanSummary, StageId};
pub use task::{ExecutionTask, TaskId};
