// Push Executor
// Executes one stage by pushing channel instances through ready tasks

use crate::error::{ExecutionError, SchedulingError, TaskExecutionError};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::plan::{ExecutionPlan, ExecutionStage, StageId};
use crate::execution::task::{ExecutionTask, TaskId};
use crate::plan::loop_head::LoopState;
use crate::platform::{Activation, ChannelInstance, ExecutionState, TaskContext};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Configuration for plan execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on stage executions of one plan run, loop iterations included
    pub max_stage_executions: usize,
    /// Whether measured cardinalities of instrumented channels are kept
    pub collect_cardinalities: bool,
    /// Whether a run only succeeds once every loop head is finished
    pub require_finished_loops: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_stage_executions: 10_000,
            collect_cardinalities: true,
            require_finished_loops: true,
        }
    }
}

/// Activation `task` is ready for, given which inputs are bound.
///
/// Loop heads only run through their loop roles: initialization while not
/// started, iteration while running. Every other task needs all inputs.
fn readiness(task: &ExecutionTask, bound: impl Fn(usize) -> bool) -> Option<Activation> {
    let Some(head) = task.loop_head() else {
        return (0..task.num_inputs())
            .all(bound)
            .then_some(Activation::Plain);
    };

    match head.state() {
        LoopState::NotStarted if head.loop_initialization_inputs().iter().all(|&i| bound(i)) => {
            Some(Activation::LoopInitialization)
        }
        LoopState::Running if head.loop_body_inputs().iter().all(|&i| bound(i)) => {
            Some(Activation::LoopIteration)
        }
        _ => None,
    }
}

/// Whether input `input` of `task` is fed through `ExecutionState` rather than
/// from within the task's own stage
fn is_fed_externally(plan: &ExecutionPlan, task: &ExecutionTask, input: usize) -> bool {
    let Some(channel) = task.input_channel(input) else {
        return false;
    };
    let channel = plan.graph().channel(channel);
    channel.is_stage_execution_barrier()
        || plan.graph().task(channel.producer()).stage() != task.stage()
}

/// Whether the inputs `task` receives from other stages allow it to run now
pub(crate) fn inbound_ready(
    plan: &ExecutionPlan,
    task: &ExecutionTask,
    state: &ExecutionState,
) -> bool {
    readiness(task, |input| {
        if !is_fed_externally(plan, task, input) {
            return true;
        }
        task.input_channel(input)
            .is_some_and(|channel| state.contains(channel))
    })
    .is_some()
}

/// Partially filled input list of one task activation
#[derive(Debug)]
pub struct TaskActivator {
    task: TaskId,
    inputs: Vec<Option<ChannelInstance>>,
}

impl TaskActivator {
    pub fn new(task: &ExecutionTask) -> Self {
        Self {
            task: task.id(),
            inputs: vec![None; task.num_inputs()],
        }
    }

    /// Bind every input that is fed from another stage and published in `state`
    pub fn from_state(
        plan: &ExecutionPlan,
        task: &ExecutionTask,
        state: &ExecutionState,
    ) -> Result<Self, SchedulingError> {
        let mut activator = Self::new(task);
        for input in 0..task.num_inputs() {
            if !is_fed_externally(plan, task, input) {
                continue;
            }
            let instance = task.input_channel(input).and_then(|c| state.get(c));
            if let Some(instance) = instance {
                activator.accept(input, instance)?;
            }
        }
        Ok(activator)
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn is_bound(&self, input: usize) -> bool {
        matches!(self.inputs.get(input), Some(Some(_)))
    }

    /// Bind `instance` to input `input`, taking a reference on it
    pub fn accept(&mut self, input: usize, instance: &ChannelInstance) -> Result<(), SchedulingError> {
        let slot = self
            .inputs
            .get_mut(input)
            .ok_or(SchedulingError::UnknownInput {
                task: self.task,
                channel: instance.channel(),
            })?;
        if slot.is_some() {
            return Err(SchedulingError::DuplicateInput {
                task: self.task,
                input,
                channel: instance.channel(),
            });
        }

        instance.obtain()?;
        *slot = Some(instance.clone());
        Ok(())
    }

    pub fn readiness(&self, task: &ExecutionTask) -> Option<Activation> {
        readiness(task, |input| self.is_bound(input))
    }

    /// Release every bound input
    pub fn dispose(self) -> Result<(), SchedulingError> {
        for instance in self.inputs.into_iter().flatten() {
            instance.release()?;
        }
        Ok(())
    }
}

/// One executed task activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedTask {
    pub task: TaskId,
    pub activation: Activation,
}

/// Outcome of one stage execution
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageId,
    pub executed: Vec<ExecutedTask>,
    /// Every instance produced by the stage
    pub instances: Vec<ChannelInstance>,
    /// Tasks of the stage that never became ready
    pub unexecuted: Vec<TaskId>,
    pub duration: Duration,
}

/// Bookkeeping of one stage execution
#[derive(Default)]
struct StageRun {
    staged: BTreeMap<TaskId, TaskActivator>,
    ready: VecDeque<(TaskActivator, Activation)>,
    all_instances: Vec<ChannelInstance>,
    executed: Vec<ExecutedTask>,
}

impl StageRun {
    /// Give back every reference this run holds, keeping the first failure
    fn release_all(&mut self) -> Result<(), SchedulingError> {
        let mut result = Ok(());
        let activators = std::mem::take(&mut self.staged)
            .into_values()
            .chain(std::mem::take(&mut self.ready).into_iter().map(|(a, _)| a));
        for activator in activators {
            if let Err(e) = activator.dispose() {
                result = result.and(Err(e));
            }
        }
        for instance in self.all_instances.drain(..) {
            if let Err(e) = instance.release() {
                result = result.and(Err(e));
            }
        }
        result
    }
}

/// Per-stage scheduler
pub struct PushExecutor<'a> {
    plan: &'a ExecutionPlan,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

impl<'a> PushExecutor<'a> {
    pub fn new(plan: &'a ExecutionPlan) -> Self {
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

    /// Execute every task of `stage` once (loop heads once per activation).
    ///
    /// On failure nothing is published to `state` and every reference taken
    /// during the run is given back.
    pub async fn execute(
        &self,
        stage: StageId,
        state: &mut ExecutionState,
    ) -> Result<StageReport, ExecutionError> {
        let start = Instant::now();
        let stage = self.plan.stage(stage);

        self.event_tx.send_event(ExecutionEvent::stage_started(
            stage.id(),
            stage.platform().clone(),
            stage.tasks().len(),
        ));
        tracing::debug!(
            stage = %stage.id(),
            platform = %stage.platform(),
            tasks = stage.tasks().len(),
            "executing stage"
        );

        let mut run = StageRun::default();
        let result = match self.push(stage, state, &mut run).await {
            Ok(()) => self.commit(stage, state, &mut run, start),
            Err(e) => Err(e),
        };
        let report = match result {
            Ok(report) => report,
            Err(e) => return Err(self.abort(stage, run, e)),
        };

        self.event_tx.send_event(ExecutionEvent::stage_completed(
            stage.id(),
            report.executed.len(),
            report.duration,
        ));
        Ok(report)
    }

    fn abort(&self, stage: &ExecutionStage, mut run: StageRun, e: ExecutionError) -> ExecutionError {
        if let Err(release) = run.release_all() {
            tracing::warn!(stage = %stage.id(), error = %release, "release after failure failed");
        }
        let task = match &e {
            ExecutionError::Task(failure) => Some(failure.task),
            _ => None,
        };
        tracing::warn!(stage = %stage.id(), error = %e, "stage execution aborted");
        self.event_tx
            .send_event(ExecutionEvent::stage_failed(stage.id(), task, e.to_string()));
        e
    }

    async fn push(
        &self,
        stage: &ExecutionStage,
        state: &ExecutionState,
        run: &mut StageRun,
    ) -> Result<(), ExecutionError> {
        // Seed the queue with the start tasks
        for &id in stage.start_tasks() {
            let task = self.plan.graph().task(id);
            let activator = TaskActivator::from_state(self.plan, task, state)?;
            match activator.readiness(task) {
                Some(activation) => run.ready.push_back((activator, activation)),
                None => {
                    activator.dispose()?;
                    return Err(SchedulingError::NotReady {
                        task: id,
                        stage: stage.id(),
                    }
                    .into());
                }
            }
        }

        while let Some((activator, activation)) = run.ready.pop_front() {
            self.execute_task(stage, activator, activation, state, run)
                .await?;
        }
        Ok(())
    }

    async fn execute_task(
        &self,
        stage: &ExecutionStage,
        activator: TaskActivator,
        activation: Activation,
        state: &ExecutionState,
        run: &mut StageRun,
    ) -> Result<(), ExecutionError> {
        let task = self.plan.graph().task(activator.task());
        let operator = task.operator();
        let forced = stage.terminal_tasks().contains(&task.id());
        let before = task.loop_head().map(|head| head.state());

        let evaluated = {
            let mut ctx = TaskContext::new(
                task.id(),
                &activator.inputs,
                task.num_outputs(),
                activation,
                forced,
            );
            let opened = operator.open(&ctx).await;
            let evaluated = match opened {
                Ok(()) => operator.evaluate(&mut ctx).await,
                Err(e) => Err(e),
            };
            evaluated.map(|()| ctx.into_outputs())
        };

        let outputs = match evaluated {
            Ok(outputs) => outputs,
            Err(source) => {
                activator.dispose()?;
                return Err(TaskExecutionError {
                    task: task.id(),
                    operator: task.name().to_string(),
                    stage: stage.id(),
                    source,
                }
                .into());
            }
        };

        if let (Some(head), Some(before)) = (task.loop_head(), before) {
            if activation == Activation::LoopInitialization && head.state() == LoopState::NotStarted {
                head.advance_state(LoopState::Running)?;
            }
            let after = head.state();
            if after != before {
                tracing::debug!(task = %task.id(), from = %before, to = %after, "loop state changed");
                self.event_tx.send_event(ExecutionEvent::LoopStateChanged {
                    task: task.id(),
                    from: before,
                    to: after,
                });
            }
        }

        // Wrap emitted data into channel instances
        let mut produced = Vec::new();
        for (index, emission) in outputs.into_iter().enumerate() {
            let Some(emission) = emission else { continue };
            let Some(channel) = task.output_channel(index) else {
                tracing::trace!(task = %task.id(), output = index, "dropping data of unconnected output");
                continue;
            };
            let instance = ChannelInstance::new(
                channel,
                task.id(),
                emission.payload,
                self.plan.graph().channel(channel).is_marked_for_instrumentation(),
            );
            if let Some(cardinality) = emission.cardinality {
                instance.set_measured_cardinality(cardinality);
            }
            produced.push(instance);
        }

        activator.dispose()?;
        run.all_instances.extend(produced.iter().cloned());
        run.executed.push(ExecutedTask {
            task: task.id(),
            activation,
        });
        self.event_tx.send_event(ExecutionEvent::task_executed(
            stage.id(),
            task.id(),
            task.name(),
            activation,
        ));
        tracing::trace!(task = %task, ?activation, outputs = produced.len(), "task executed");

        // Feed consumers inside this stage
        for instance in &produced {
            let channel = self.plan.graph().channel(instance.channel());
            if channel.is_stage_execution_barrier() {
                continue;
            }
            for consumer in channel.consumers() {
                let target = self.plan.graph().task(consumer.task);
                if target.stage() != Some(stage.id()) {
                    continue;
                }
                self.feed(target, consumer.input, instance, state, run)?;
            }
        }

        Ok(())
    }

    fn feed(
        &self,
        task: &ExecutionTask,
        input: usize,
        instance: &ChannelInstance,
        state: &ExecutionState,
        run: &mut StageRun,
    ) -> Result<(), SchedulingError> {
        if !run.staged.contains_key(&task.id()) {
            let activator = TaskActivator::from_state(self.plan, task, state)?;
            run.staged.insert(task.id(), activator);
        }
        let Some(activator) = run.staged.get_mut(&task.id()) else {
            return Ok(());
        };
        activator.accept(input, instance)?;

        if let Some(activation) = activator.readiness(task) {
            if let Some(activator) = run.staged.remove(&task.id()) {
                run.ready.push_back((activator, activation));
            }
        }
        Ok(())
    }

    /// Publish outward-facing instances and release the stage's own references
    fn commit(
        &self,
        stage: &ExecutionStage,
        state: &mut ExecutionState,
        run: &mut StageRun,
        start: Instant,
    ) -> Result<StageReport, ExecutionError> {
        let collect = self.config.collect_cardinalities
            && !stage.is_in_loop()
            && !stage.is_loop_head_stage();

        let outward: Vec<&ChannelInstance> = run
            .all_instances
            .iter()
            .filter(|instance| {
                let channel = self.plan.graph().channel(instance.channel());
                channel.is_between_stages() || channel.is_stage_execution_barrier()
            })
            .collect();
        // State stays untouched unless every outward instance can be published
        if let Some(released) = outward.iter().find(|instance| instance.is_disposed()) {
            return Err(SchedulingError::UseAfterRelease {
                channel: released.channel(),
            }
            .into());
        }
        for instance in outward {
            state.register(instance)?;
        }

        for instance in &run.all_instances {
            let channel = self.plan.graph().channel(instance.channel());
            if collect && instance.is_marked_for_instrumentation() {
                if let Some(cardinality) = instance.measured_cardinality() {
                    state.record_cardinality(channel.id(), cardinality);
                    self.event_tx.send_event(ExecutionEvent::CardinalityMeasured {
                        channel: channel.id(),
                        cardinality,
                    });
                }
            }
        }

        let instances = run.all_instances.clone();
        let executed = std::mem::take(&mut run.executed);
        let ran: HashSet<TaskId> = executed.iter().map(|e| e.task).collect();
        let unexecuted: Vec<TaskId> = stage
            .tasks()
            .iter()
            .copied()
            .filter(|t| !ran.contains(t))
            .collect();
        if !unexecuted.is_empty() {
            tracing::warn!(
                stage = %stage.id(),
                tasks = ?unexecuted,
                "stage completed with tasks that never became ready"
            );
        }

        run.release_all()?;

        let duration = start.elapsed();
        tracing::debug!(
            stage = %stage.id(),
            executed = executed.len(),
            instances = instances.len(),
            ?duration,
            "stage completed"
        );

        Ok(StageReport {
            stage: stage.id(),
            executed,
            instances,
            unexecuted,
            duration,
        })
    }
}
