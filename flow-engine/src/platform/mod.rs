// Platform Module
// Execution platforms and the operator interface the scheduler drives

pub mod instance;
pub mod instrumentation;
pub mod state;

pub use instance::{ChannelInstance, Payload};
pub use instrumentation::{
    FullInstrumentation, InstrumentationStrategy, NoInstrumentation, OutboundInstrumentation,
};
pub use state::ExecutionState;

use crate::error::OperatorError;
use crate::execution::task::TaskId;
use crate::plan::loop_head::LoopHead;
use crate::plan::types::DataSetType;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Identity of an execution platform (e.g. a local stream engine or a database)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform {
    name: String,
}

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Which readiness condition triggered a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    /// All declared inputs are bound
    Plain,
    /// A loop head that has not started received its initialization inputs
    LoopInitialization,
    /// A running loop head received its loop-body inputs
    LoopIteration,
}

/// An operator bound to a platform that the push executor can run.
#[async_trait]
pub trait ExecutionOperator: Send + Sync {
    fn name(&self) -> &str;

    fn platform(&self) -> &Platform;

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn input_type(&self, _index: usize) -> DataSetType {
        DataSetType::any()
    }

    fn output_type(&self, _index: usize) -> DataSetType {
        DataSetType::any()
    }

    fn supports_broadcast_inputs(&self) -> bool {
        false
    }

    /// Loop-head capability, if this operator drives an iteration
    fn as_loop_head(&self) -> Option<&dyn LoopHead> {
        None
    }

    /// Prepare for `evaluate`, e.g. compile functions
    async fn open(&self, _ctx: &TaskContext<'_>) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Consume the bound inputs and emit outputs through the context
    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError>;
}

/// Emitted data of one output slot
#[derive(Clone)]
pub(crate) struct Emission {
    pub payload: Payload,
    pub cardinality: Option<u64>,
}

/// View of one task activation handed to its operator
pub struct TaskContext<'a> {
    task: TaskId,
    inputs: &'a [Option<ChannelInstance>],
    outputs: Vec<Option<Emission>>,
    activation: Activation,
    forced: bool,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task: TaskId,
        inputs: &'a [Option<ChannelInstance>],
        num_outputs: usize,
        activation: Activation,
        forced: bool,
    ) -> Self {
        Self {
            task,
            inputs,
            outputs: vec![None; num_outputs],
            activation,
            forced,
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Terminal tasks must materialize their results before the stage completes
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn has_input(&self, index: usize) -> bool {
        matches!(self.inputs.get(index), Some(Some(_)))
    }

    pub fn input(&self, index: usize) -> Result<&ChannelInstance, OperatorError> {
        self.inputs
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(OperatorError::MissingInput(index))
    }

    pub fn input_payload(&self, index: usize) -> Result<Payload, OperatorError> {
        self.input(index)?
            .payload()
            .map_err(|_| OperatorError::MissingInput(index))
    }

    /// Typed access to the data bound to input `index`
    pub fn input_data<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, OperatorError> {
        self.input_payload(index)?
            .downcast::<T>()
            .map_err(|_| OperatorError::UnexpectedPayload {
                index,
                expected: type_name::<T>(),
            })
    }

    pub fn emit<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> Result<(), OperatorError> {
        self.emit_payload(index, Arc::new(value))
    }

    /// Emit `value` together with its measured cardinality
    pub fn emit_measured<T: Any + Send + Sync>(
        &mut self,
        index: usize,
        value: T,
        cardinality: u64,
    ) -> Result<(), OperatorError> {
        self.store(index, Arc::new(value), Some(cardinality))
    }

    /// Emit already shared data, e.g. to forward an input unchanged
    pub fn emit_payload(&mut self, index: usize, payload: Payload) -> Result<(), OperatorError> {
        self.store(index, payload, None)
    }

    fn store(
        &mut self,
        index: usize,
        payload: Payload,
        cardinality: Option<u64>,
    ) -> Result<(), OperatorError> {
        let slot = self
            .outputs
            .get_mut(index)
            .ok_or(OperatorError::NoSuchOutput(index))?;
        *slot = Some(Emission {
            payload,
            cardinality,
        });
        Ok(())
    }

    pub(crate) fn into_outputs(self) -> Vec<Option<Emission>> {
        self.outputs
    }
}
