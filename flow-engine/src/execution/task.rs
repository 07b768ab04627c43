// Execution Tasks
// Execution-time wrapper around one executable operator instance

use crate::execution::channel::ChannelId;
use crate::execution::plan::StageId;
use crate::plan::loop_head::LoopHead;
use crate::platform::{ExecutionOperator, Platform};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Index of a task within its `TaskGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

pub struct ExecutionTask {
    id: TaskId,
    operator: Arc<dyn ExecutionOperator>,
    /// One entry per input slot, broadcast inputs last
    inputs: Vec<Option<ChannelId>>,
    outputs: Vec<Option<ChannelId>>,
    /// Set once stage assignment has placed the task
    stage: Option<StageId>,
}

impl ExecutionTask {
    pub(crate) fn new(id: TaskId, operator: Arc<dyn ExecutionOperator>) -> Self {
        Self {
            id,
            inputs: vec![None; operator.num_inputs()],
            outputs: vec![None; operator.num_outputs()],
            operator,
            stage: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn operator(&self) -> &Arc<dyn ExecutionOperator> {
        &self.operator
    }

    pub fn name(&self) -> &str {
        self.operator.name()
    }

    pub fn platform(&self) -> &Platform {
        self.operator.platform()
    }

    pub fn loop_head(&self) -> Option<&dyn LoopHead> {
        self.operator.as_loop_head()
    }

    pub fn is_loop_head(&self) -> bool {
        self.loop_head().is_some()
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_channel(&self, index: usize) -> Option<ChannelId> {
        self.inputs.get(index).copied().flatten()
    }

    pub fn output_channel(&self, index: usize) -> Option<ChannelId> {
        self.outputs.get(index).copied().flatten()
    }

    pub fn input_channels(&self) -> &[Option<ChannelId>] {
        &self.inputs
    }

    pub fn output_channels(&self) -> &[Option<ChannelId>] {
        &self.outputs
    }

    /// The stage this task was assigned to
    pub fn stage(&self) -> Option<StageId> {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: StageId) {
        self.stage = Some(stage);
    }

    pub(crate) fn push_input(&mut self) -> usize {
        self.inputs.push(None);
        self.inputs.len() - 1
    }

    pub(crate) fn bind_input(&mut self, index: usize, channel: ChannelId) {
        self.inputs[index] = Some(channel);
    }

    pub(crate) fn bind_output(&mut self, index: usize, channel: ChannelId) {
        self.outputs[index] = Some(channel);
    }
}

impl fmt::Debug for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTask")
            .field("id", &self.id)
            .field("operator", &self.operator.name())
            .field("platform", self.operator.platform())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("stage", &self.stage)
            .finish()
    }
}

impl fmt::Display for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}@{}]", self.id, self.name(), self.platform())
    }
}
