// Execution Events
// Progress reporting and event types for plan execution

use crate::execution::channel::ChannelId;
use crate::execution::plan::StageId;
use crate::execution::task::TaskId;
use crate::plan::loop_head::LoopState;
use crate::platform::{Activation, Platform};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during plan execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Plan execution started
    PlanStarted { total_stages: usize },

    /// Plan execution completed
    PlanCompleted {
        success: bool,
        stage_executions: usize,
        duration: Duration,
    },

    /// Stage execution started
    StageStarted {
        stage: StageId,
        platform: Platform,
        total_tasks: usize,
    },

    /// Stage execution completed and its outputs were published
    StageCompleted {
        stage: StageId,
        executed_tasks: usize,
        duration: Duration,
    },

    /// Stage execution was aborted
    StageFailed {
        stage: StageId,
        task: Option<TaskId>,
        message: String,
    },

    /// A task activation finished
    TaskExecuted {
        stage: StageId,
        task: TaskId,
        operator: String,
        activation: Activation,
    },

    /// A loop head moved to a new state
    LoopStateChanged {
        task: TaskId,
        from: LoopState,
        to: LoopState,
    },

    /// A measured cardinality was collected
    CardinalityMeasured { channel: ChannelId, cardinality: u64 },
}

impl ExecutionEvent {
    /// Create a plan started event
    pub fn plan_started(total_stages: usize) -> Self {
        Self::PlanStarted { total_stages }
    }

    /// Create a plan completed event
    pub fn plan_completed(success: bool, stage_executions: usize, duration: Duration) -> Self {
        Self::PlanCompleted {
            success,
            stage_executions,
            duration,
        }
    }

    /// Create a stage started event
    pub fn stage_started(stage: StageId, platform: Platform, total_tasks: usize) -> Self {
        Self::StageStarted {
            stage,
            platform,
            total_tasks,
        }
    }

    /// Create a stage completed event
    pub fn stage_completed(stage: StageId, executed_tasks: usize, duration: Duration) -> Self {
        Self::StageCompleted {
            stage,
            executed_tasks,
            duration,
        }
    }

    /// Create a stage failed event
    pub fn stage_failed(stage: StageId, task: Option<TaskId>, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            task,
            message: message.into(),
        }
    }

    /// Create a task executed event
    pub fn task_executed(
        stage: StageId,
        task: TaskId,
        operator: impl Into<String>,
        activation: Activation,
    ) -> Self {
        Self::TaskExecuted {
            stage,
            task,
            operator: operator.into(),
            activation,
        }
    }
}

/// Sends events without caring whether anyone still listens
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (tx, mut rx) = progress_channel();
        let sender = Some(tx);

        sender.send_event(ExecutionEvent::plan_started(3));
        sender.send_event(ExecutionEvent::LoopStateChanged {
            task: TaskId(1),
            from: LoopState::NotStarted,
            to: LoopState::Running,
        });
        sender.send_event(ExecutionEvent::task_executed(
            StageId(1),
            TaskId(1),
            "loop",
            Activation::LoopInitialization,
        ));

        assert_eq!(rx.recv().await, Some(ExecutionEvent::PlanStarted { total_stages: 3 }));
        assert!(matches!(
            rx.recv().await,
            Some(ExecutionEvent::LoopStateChanged { to: LoopState::Running, .. })
        ));
        match rx.recv().await {
            Some(ExecutionEvent::TaskExecuted {
                operator,
                activation,
                ..
            }) => {
                assert_eq!(operator, "loop");
                assert_eq!(activation, Activation::LoopInitialization);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_stage_failed_carries_task() {
        let event = ExecutionEvent::stage_failed(StageId(2), Some(TaskId(7)), "boom");
        assert_eq!(
            event,
            ExecutionEvent::StageFailed {
                stage: StageId(2),
                task: Some(TaskId(7)),
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn test_send_without_receiver() {
        let none: Option<ProgressSender> = None;
        none.send_event(ExecutionEvent::plan_started(0));

        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::plan_completed(true, 0, Duration::ZERO));
    }
}
