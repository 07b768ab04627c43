// Plan Executor
// Runs a whole execution plan stage by stage, re-arming loop stages per iteration

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::execution::channel::ChannelId;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::executor::{inbound_ready, ExecutorConfig, PushExecutor, StageReport};
use crate::execution::plan::{ExecutionPlan, ExecutionStage, StageId};
use crate::plan::loop_head::LoopState;
use crate::platform::{ExecutionState, InstrumentationStrategy};

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Result of a complete plan run
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub stage_executions: usize,
    /// Stage reports in execution order
    pub stages: Vec<StageReport>,
    pub duration: Duration,
    pub cardinalities: BTreeMap<ChannelId, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageStatus {
    Pending,
    Done,
    Skipped,
}

/// Drives the stages of one `ExecutionPlan`
pub struct PlanExecutor {
    plan: ExecutionPlan,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

impl PlanExecutor {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan,
            config: ExecutorConfig::default(),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Mark the plan's channels for instrumentation
    pub fn with_instrumentation(mut self, strategy: &dyn InstrumentationStrategy) -> Self {
        strategy.apply(&mut self.plan);
        self
    }

    pub fn with_engine_config(self, config: &EngineConfig) -> Self {
        let strategy = config.instrumentation.strategy();
        self.with_config(config.executor.clone())
            .with_instrumentation(strategy.as_ref())
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Execute every stage until the plan is complete.
    ///
    /// Inter-stage instances stay registered in `state` after the run.
    pub async fn execute(&self, state: &mut ExecutionState) -> Result<PlanReport, ExecutionError> {
        let start = Instant::now();

        // Send plan started event
        self.event_tx
            .send_event(ExecutionEvent::plan_started(self.plan.stage_count()));
        tracing::info!(
            stages = self.plan.stage_count(),
            starting = self.plan.starting_stages().len(),
            "executing plan"
        );

        let mut reports = Vec::new();
        let result = self.run(state, &mut reports).await;
        let duration = start.elapsed();

        self.event_tx.send_event(ExecutionEvent::plan_completed(
            result.is_ok(),
            reports.len(),
            duration,
        ));

        match result {
            Ok(()) => {
                tracing::info!(stage_executions = reports.len(), ?duration, "plan completed");
                Ok(PlanReport {
                    stage_executions: reports.len(),
                    stages: reports,
                    duration,
                    cardinalities: state.cardinalities().clone(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, stage_executions = reports.len(), "plan failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        state: &mut ExecutionState,
        reports: &mut Vec<StageReport>,
    ) -> Result<(), ExecutionError> {
        let mut executor = PushExecutor::new(&self.plan).with_config(self.config.clone());
        if let Some(tx) = &self.event_tx {
            executor = executor.with_progress(tx.clone());
        }

        let mut status = vec![StageStatus::Pending; self.plan.stage_count()];
        while let Some(stage) = self.next_executable(&status, state) {
            if reports.len() >= self.config.max_stage_executions {
                return Err(ExecutionError::IterationLimit(self.config.max_stage_executions));
            }

            let report = executor.execute(stage, state).await?;
            reports.push(report);
            status[stage.index()] = StageStatus::Done;
            self.rearm(stage, &mut status);
        }

        let pending: Vec<StageId> = self
            .plan
            .stages()
            .iter()
            .map(ExecutionStage::id)
            .filter(|id| status[id.index()] == StageStatus::Pending)
            .collect();
        if !pending.is_empty() {
            return Err(ExecutionError::Stalled { pending });
        }

        if self.config.require_finished_loops {
            for stage in self.plan.stages() {
                let Some(task) = stage.loop_head() else { continue };
                let Some(head) = self.plan.graph().task(task).loop_head() else { continue };
                if head.state() != LoopState::Finished {
                    return Err(ExecutionError::UnfinishedLoop {
                        task,
                        state: head.state().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// First pending stage, by id, whose predecessors ran and whose inbound data is published
    fn next_executable(&self, status: &[StageStatus], state: &ExecutionState) -> Option<StageId> {
        self.plan
            .stages()
            .iter()
            .find(|stage| {
                status[stage.id().index()] == StageStatus::Pending
                    && stage
                        .predecessors()
                        .iter()
                        .all(|pred| status[pred.index()] != StageStatus::Pending)
                    && stage
                        .tasks()
                        .iter()
                        .all(|&task| inbound_ready(&self.plan, self.plan.graph().task(task), state))
            })
            .map(ExecutionStage::id)
    }

    /// Direct loop-body stages of the loop head stage `head_stage`
    fn loop_body(&self, head_stage: StageId) -> Vec<StageId> {
        self.plan
            .stages()
            .iter()
            .filter(|stage| stage.loop_head_stage() == Some(head_stage))
            .map(ExecutionStage::id)
            .collect()
    }

    fn head_state(&self, head_stage: StageId) -> Option<LoopState> {
        let task = self.plan.stage(head_stage).loop_head()?;
        self.plan
            .graph()
            .task(task)
            .loop_head()
            .map(|head| head.state())
    }

    /// Update stage status after `stage` ran
    fn rearm(&self, stage: StageId, status: &mut [StageStatus]) {
        let executed = self.plan.stage(stage);

        if executed.is_loop_head_stage() {
            let body = self.loop_body(stage);
            match self.head_state(stage) {
                Some(LoopState::Running) => {
                    for id in body {
                        status[id.index()] = StageStatus::Pending;
                    }
                }
                Some(LoopState::Finished) => {
                    for id in body {
                        if status[id.index()] == StageStatus::Pending {
                            status[id.index()] = StageStatus::Skipped;
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(head_stage) = executed.loop_head_stage() {
            let body_done = self
                .loop_body(head_stage)
                .iter()
                .all(|id| status[id.index()] != StageStatus::Pending);
            if body_done && self.head_state(head_stage) == Some(LoopState::Running) {
                tracing::debug!(stage = %head_stage, "re-arming loop head stage");
                status[head_stage.index()] = StageStatus::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentationMode;
    use crate::execution::assignment::StageAssignmentTraversal;
    use crate::execution::events::{progress_channel, ProgressReceiver};
    use crate::execution::graph::{PreliminaryExecutionPlan, TaskGraph};
    use crate::platform::OutboundInstrumentation;
    use crate::plan::loop_head::LoopOperator;
    use crate::test_util::{
        circular_graph, java, loop_graph, side_output_loop_graph, spark, Collect, Failing,
        Increment, PassThrough, Swallow,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_runs_until_iteration_cap() {
        let (plan, ids) = loop_graph(3);
        let plan = StageAssignmentTraversal::assign(plan).unwrap();
        let (tx, mut rx) = progress_channel();
        let executor = PlanExecutor::new(plan).with_progress(tx);

        let mut state = ExecutionState::new();
        let report = executor.execute(&mut state).await.unwrap();

        // source, init + 3 iterations of the head, 3 steps, sink
        assert_eq!(report.stage_executions, 9);
        assert_eq!(*ids.collected.lock(), vec![3]);

        let head = executor.plan().graph().task(ids.head).loop_head().unwrap();
        assert_eq!(head.state(), LoopState::Finished);

        assert_eq!(
            loop_transitions(&mut rx),
            vec![
                (LoopState::NotStarted, LoopState::Running),
                (LoopState::Running, LoopState::Finished),
            ]
        );
    }

    fn loop_transitions(rx: &mut ProgressReceiver) -> Vec<(LoopState, LoopState)> {
        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::LoopStateChanged { from, to, .. } = event {
                transitions.push((from, to));
            }
        }
        transitions
    }

    #[tokio::test]
    async fn test_criterion_ends_loop_spanning_two_platforms() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let head = graph.add_task(Arc::new(LoopOperator::new(
            "loop",
            java(),
            |value: &u64| *value >= 4,
        )));
        let first = graph.add_task(Arc::new(Increment::new("first", spark())));
        let second = graph.add_task(Arc::new(Increment::new("second", java())));
        let collect = Collect::new("sink", java());
        let collected = collect.values();
        let sink = graph.add_task(Arc::new(collect));

        let wiring = [
            (source, 0, head, 0),
            (source, 0, head, 1),
            (head, 0, first, 0),
            (first, 0, second, 0),
            (second, 0, head, 2),
            (second, 0, head, 3),
            (head, 2, sink, 0),
        ];
        for (producer, output, consumer, input) in wiring {
            graph.connect(producer, output, consumer, input).unwrap();
        }
        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();
        let head_stage = plan.stage_of(head).unwrap().id();
        assert_eq!(plan.stage_of(first).unwrap().loop_head_stage(), Some(head_stage));
        assert_eq!(plan.stage_of(second).unwrap().loop_head_stage(), Some(head_stage));

        let (tx, mut rx) = progress_channel();
        let executor = PlanExecutor::new(plan).with_progress(tx);
        let report = executor.execute(&mut ExecutionState::new()).await.unwrap();

        // source, init + 2 iterations of the head, 2 passes over both steps, sink
        assert_eq!(report.stage_executions, 9);
        assert_eq!(*collected.lock(), vec![4]);
        assert_eq!(
            loop_transitions(&mut rx),
            vec![
                (LoopState::NotStarted, LoopState::Running),
                (LoopState::Running, LoopState::Finished),
            ]
        );
    }

    #[tokio::test]
    async fn test_side_stage_in_loop_sees_every_iteration() {
        let (plan, ids, _, observed) = side_output_loop_graph(3);
        let plan = StageAssignmentTraversal::assign(plan).unwrap();
        let executor = PlanExecutor::new(plan);

        let report = executor.execute(&mut ExecutionState::new()).await.unwrap();

        // source, init + 3 iterations of the head, 3 steps, 3 side sinks, sink
        assert_eq!(report.stage_executions, 12);
        assert_eq!(*observed.lock(), vec![1, 2, 3]);
        assert_eq!(*ids.collected.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_circular_plan_executes_in_stage_order() {
        let plan = StageAssignmentTraversal::assign(circular_graph()).unwrap();
        let executor = PlanExecutor::new(plan).with_instrumentation(&OutboundInstrumentation);

        let mut state = ExecutionState::new();
        let report = executor.execute(&mut state).await.unwrap();

        let order: Vec<StageId> = report.stages.iter().map(|r| r.stage).collect();
        assert_eq!(order, vec![StageId(0), StageId(1), StageId(2), StageId(3)]);
        assert!(report.stages.iter().all(|r| r.unexecuted.is_empty()));
        // sources emit without a measured cardinality
        assert!(report.cardinalities.is_empty());

        state.release_all().unwrap();
        for stage in &report.stages {
            assert!(stage.instances.iter().all(|i| i.is_disposed()));
        }
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let (plan, _) = loop_graph(3);
        let plan = StageAssignmentTraversal::assign(plan).unwrap();
        let executor = PlanExecutor::new(plan).with_config(ExecutorConfig {
            max_stage_executions: 4,
            ..ExecutorConfig::default()
        });

        let err = executor.execute(&mut ExecutionState::new()).await.unwrap_err();
        assert_eq!(err, ExecutionError::IterationLimit(4));
    }

    #[tokio::test]
    async fn test_missing_data_stalls() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let swallow = graph.add_task(Arc::new(Swallow::new("swallow", spark())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        graph.connect(source, 0, swallow, 0).unwrap();
        graph.connect(swallow, 0, sink, 0).unwrap();

        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();
        let sink_stage = plan.stage_of(sink).unwrap().id();
        let executor = PlanExecutor::new(plan);

        let err = executor.execute(&mut ExecutionState::new()).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Stalled {
                pending: vec![sink_stage]
            }
        );
    }

    #[tokio::test]
    async fn test_failure_reports_unsuccessful_plan() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let sink = graph.add_task(Arc::new(Failing::new("sink", spark())));
        graph.connect(source, 0, sink, 0).unwrap();
        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();

        let (tx, mut rx) = progress_channel();
        let executor = PlanExecutor::new(plan).with_progress(tx);
        let err = executor.execute(&mut ExecutionState::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Task(ref failure) if failure.task == sink));

        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::PlanCompleted {
                success,
                stage_executions,
                ..
            } = event
            {
                completed = Some((success, stage_executions));
            }
        }
        assert_eq!(completed, Some((false, 1)));
    }

    #[tokio::test]
    async fn test_engine_config_applies_instrumentation() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(
            PassThrough::source("source", java()).with_cardinality(12),
        ));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", spark())));
        let channel = graph.connect(source, 0, sink, 0).unwrap();
        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();

        let config = EngineConfig {
            instrumentation: InstrumentationMode::Outbound,
            ..EngineConfig::default()
        };
        let executor = PlanExecutor::new(plan).with_engine_config(&config);
        assert!(executor
            .plan()
            .graph()
            .channel(channel)
            .is_marked_for_instrumentation());

        let mut state = ExecutionState::new();
        let report = executor.execute(&mut state).await.unwrap();
        assert_eq!(report.cardinalities.get(&channel), Some(&12));
    }
}
