// Task Graph
// Platform-annotated tasks wired by channels, the input of stage assignment

use crate::error::PlanningError;
use crate::execution::channel::{Channel, ChannelDescriptor, ChannelId, Consumer};
use crate::execution::task::{ExecutionTask, TaskId};
use crate::platform::ExecutionOperator;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Arena of execution tasks and the channels between them
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<ExecutionTask>,
    channels: Vec<Channel>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, operator: Arc<dyn ExecutionOperator>) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(ExecutionTask::new(id, operator));
        id
    }

    /// Append a broadcast input to `task`, returning its index
    pub fn add_broadcast_input(&mut self, task: TaskId) -> Result<usize, PlanningError> {
        let t = self.get_task_mut(task)?;
        if !t.operator().supports_broadcast_inputs() {
            return Err(PlanningError::inconsistent_wiring(format!(
                "{task} ('{}') does not accept broadcast inputs",
                t.name()
            )));
        }
        Ok(t.push_input())
    }

    /// Connect with a default (reusable) channel
    pub fn connect(
        &mut self,
        producer: TaskId,
        output: usize,
        consumer: TaskId,
        input: usize,
    ) -> Result<ChannelId, PlanningError> {
        self.connect_with(producer, output, consumer, input, ChannelDescriptor::default())
    }

    /// Feed input `input` of `consumer` from output `output` of `producer`.
    ///
    /// An output owns at most one channel: if it already has one, the new
    /// consumer is added to it and `descriptor` is ignored.
    pub fn connect_with(
        &mut self,
        producer: TaskId,
        output: usize,
        consumer: TaskId,
        input: usize,
        descriptor: ChannelDescriptor,
    ) -> Result<ChannelId, PlanningError> {
        let p = self.get_task(producer)?;
        if output >= p.num_outputs() {
            return Err(PlanningError::inconsistent_wiring(format!(
                "{producer} has no output {output}"
            )));
        }
        let output_type = p.operator().output_type(output);
        let existing = p.output_channel(output);

        let c = self.get_task(consumer)?;
        if input >= c.num_inputs() {
            return Err(PlanningError::inconsistent_wiring(format!(
                "{consumer} has no input {input}"
            )));
        }
        if let Some(bound) = c.input_channel(input) {
            return Err(PlanningError::inconsistent_wiring(format!(
                "input {input} of {consumer} is already fed by {bound}"
            )));
        }
        // broadcast inputs are untyped
        if input < c.operator().num_inputs() {
            let input_type = c.operator().input_type(input);
            if !output_type.is_compatible_with(&input_type) {
                return Err(PlanningError::inconsistent_wiring(format!(
                    "cannot feed {input_type} input {input} of {consumer} from {output_type} output {output} of {producer}"
                )));
            }
        }

        let channel = match existing {
            Some(channel) => channel,
            None => {
                let id = ChannelId(self.channels.len());
                self.channels
                    .push(Channel::new(id, descriptor, producer, output));
                self.tasks[producer.0].bind_output(output, id);
                id
            }
        };

        self.channels[channel.0].add_consumer(Consumer {
            task: consumer,
            input,
        });
        self.tasks[consumer.0].bind_input(input, channel);
        Ok(channel)
    }

    fn get_task(&self, id: TaskId) -> Result<&ExecutionTask, PlanningError> {
        self.tasks
            .get(id.0)
            .ok_or_else(|| PlanningError::inconsistent_wiring(format!("unknown task {id}")))
    }

    fn get_task_mut(&mut self, id: TaskId) -> Result<&mut ExecutionTask, PlanningError> {
        self.tasks
            .get_mut(id.0)
            .ok_or_else(|| PlanningError::inconsistent_wiring(format!("unknown task {id}")))
    }

    /// Panics if `id` does not belong to this graph
    pub fn task(&self, id: TaskId) -> &ExecutionTask {
        &self.tasks[id.0]
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut ExecutionTask {
        &mut self.tasks[id.0]
    }

    /// Panics if `id` does not belong to this graph
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ExecutionTask> {
        self.tasks.iter()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Force consumers of `channel` into other stages than its producer
    pub fn mark_stage_execution_barrier(&mut self, channel: ChannelId) {
        self.channel_mut(channel).mark_stage_execution_barrier();
    }

    pub fn set_instrumented(&mut self, channel: ChannelId, instrumented: bool) {
        self.channel_mut(channel).set_instrumented(instrumented);
    }

    /// The task feeding input `input` of `task`
    pub fn producer_of(&self, task: TaskId, input: usize) -> Option<TaskId> {
        self.task(task)
            .input_channel(input)
            .map(|channel| self.channel(channel).producer())
    }

    /// Every (channel, consumer) pair leaving `task`
    pub fn consumers_of(&self, task: TaskId) -> impl Iterator<Item = (ChannelId, Consumer)> + '_ {
        self.task(task)
            .output_channels()
            .iter()
            .flatten()
            .flat_map(move |&channel| {
                self.channel(channel)
                    .consumers()
                    .iter()
                    .map(move |consumer| (channel, *consumer))
            })
    }

    /// Tasks without any consumed output
    pub fn sinks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|task| task.output_channels().iter().all(Option::is_none))
            .map(ExecutionTask::id)
            .collect()
    }
}

/// Terminal tasks of a fully wired, platform-annotated task graph
#[derive(Debug)]
pub struct PreliminaryExecutionPlan {
    graph: TaskGraph,
    sinks: Vec<TaskId>,
}

impl PreliminaryExecutionPlan {
    pub fn new(graph: TaskGraph, sinks: Vec<TaskId>) -> Self {
        Self { graph, sinks }
    }

    /// Use every task without consumers as a sink
    pub fn from_graph(graph: TaskGraph) -> Self {
        let sinks = graph.sinks();
        Self { graph, sinks }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    pub fn sinks(&self) -> &[TaskId] {
        &self.sinks
    }

    /// Check that every task reachable backward from the sinks has all of its
    /// inputs fed
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.sinks.is_empty() {
            return Err(PlanningError::empty_plan("the plan has no terminal tasks"));
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for &sink in &self.sinks {
            self.graph.get_task(sink)?;
            if visited.insert(sink) {
                queue.push_back(sink);
            }
        }

        while let Some(id) = queue.pop_front() {
            let task = self.graph.task(id);
            for (index, channel) in task.input_channels().iter().enumerate() {
                let Some(channel) = channel else {
                    return Err(PlanningError::missing_producer(format!(
                        "input {index} of {task} has no producer"
                    )));
                };
                let producer = self.graph.channel(*channel).producer();
                if visited.insert(producer) {
                    queue.push_back(producer);
                }
            }
        }

        for channel in self.graph.channels() {
            if channel.consumers().is_empty() {
                return Err(PlanningError::inconsistent_wiring(format!(
                    "{channel} has no consumer"
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn into_parts(self) -> (TaskGraph, Vec<TaskId>) {
        (self.graph, self.sinks)
    }
}
