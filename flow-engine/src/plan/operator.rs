// Operator Graph
// Arena of operators wired through typed slots, and its materialization into tasks

use crate::error::{EngineResult, IllegalStateError, SlotError};
use crate::execution::channel::ChannelDescriptor;
use crate::execution::graph::{PreliminaryExecutionPlan, TaskGraph};
use crate::plan::loop_head::{
    INITIAL_CONVERGENCE_INPUT_INDEX, INITIAL_INPUT_INDEX, ITERATION_CONVERGENCE_INPUT_INDEX,
    ITERATION_CONVERGENCE_OUTPUT_INDEX, ITERATION_INPUT_INDEX, ITERATION_OUTPUT_INDEX,
    FINAL_OUTPUT_INDEX,
};
use crate::plan::slot::{InputRef, InputSlot, OutputRef, OutputSlot};
use crate::plan::types::DataSetType;
use crate::platform::ExecutionOperator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of an operator within its `OperatorGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub(crate) usize);

impl OperatorId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// What an operator stands for
#[derive(Clone)]
pub enum OperatorKind {
    /// Directly executable on its platform
    Elementary(Arc<dyn ExecutionOperator>),
    /// Placeholder that still has to be replaced by the optimizer
    Logical { loop_head: bool },
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Elementary(op) => f
                .debug_tuple("Elementary")
                .field(&op.name())
                .field(op.platform())
                .finish(),
            OperatorKind::Logical { loop_head } => f
                .debug_struct("Logical")
                .field("loop_head", loop_head)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operator {
    id: OperatorId,
    name: String,
    kind: OperatorKind,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
}

impl Operator {
    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn is_elementary(&self) -> bool {
        matches!(self.kind, OperatorKind::Elementary(_))
    }

    pub fn is_loop_head(&self) -> bool {
        match &self.kind {
            OperatorKind::Elementary(op) => op.as_loop_head().is_some(),
            OperatorKind::Logical { loop_head } => *loop_head,
        }
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    pub fn num_regular_inputs(&self) -> usize {
        self.inputs.iter().filter(|slot| !slot.is_broadcast()).count()
    }

    pub fn input(&self, index: usize) -> Result<&InputSlot, SlotError> {
        self.inputs.get(index).ok_or(SlotError::InputOutOfBounds {
            operator: self.id,
            index,
            declared: self.inputs.len(),
        })
    }

    pub fn output(&self, index: usize) -> Result<&OutputSlot, SlotError> {
        self.outputs.get(index).ok_or(SlotError::OutputOutOfBounds {
            operator: self.id,
            index,
            declared: self.outputs.len(),
        })
    }

    fn supports_broadcast_inputs(&self) -> bool {
        match &self.kind {
            OperatorKind::Elementary(op) => op.supports_broadcast_inputs(),
            OperatorKind::Logical { .. } => true,
        }
    }

    fn require_loop_head(&self) -> Result<(), IllegalStateError> {
        if self.is_loop_head() {
            Ok(())
        } else {
            Err(IllegalStateError::NotALoopHead(self.name.clone()))
        }
    }
}

/// Operators and their slot connections.
///
/// Connections are recorded on both ends: the input remembers its occupant
/// and the output lists every input it feeds.
#[derive(Debug, Clone, Default)]
pub struct OperatorGraph {
    operators: Vec<Operator>,
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.iter()
    }

    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(id.0)
    }

    /// Add an operator that is directly executable
    pub fn add_execution_operator(&mut self, operator: Arc<dyn ExecutionOperator>) -> OperatorId {
        let id = OperatorId(self.operators.len());
        let inputs = (0..operator.num_inputs())
            .map(|i| InputSlot::new(format!("in{i}"), id, i, operator.input_type(i)))
            .collect();
        let outputs = (0..operator.num_outputs())
            .map(|i| OutputSlot::new(format!("out{i}"), id, i, operator.output_type(i)))
            .collect();

        self.operators.push(Operator {
            id,
            name: operator.name().to_string(),
            kind: OperatorKind::Elementary(operator),
            inputs,
            outputs,
        });
        id
    }

    /// Add a logical operator with the given slot types
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        input_types: Vec<DataSetType>,
        output_types: Vec<DataSetType>,
    ) -> OperatorId {
        self.push_logical(name.into(), input_types, output_types, false)
    }

    /// Add a logical loop head with the four loop inputs and three loop outputs
    pub fn add_loop_operator(
        &mut self,
        name: impl Into<String>,
        data_type: DataSetType,
        convergence_type: DataSetType,
    ) -> OperatorId {
        let mut inputs = vec![DataSetType::any(); 4];
        inputs[INITIAL_INPUT_INDEX] = data_type.clone();
        inputs[ITERATION_INPUT_INDEX] = data_type.clone();
        inputs[INITIAL_CONVERGENCE_INPUT_INDEX] = convergence_type.clone();
        inputs[ITERATION_CONVERGENCE_INPUT_INDEX] = convergence_type.clone();

        let mut outputs = vec![DataSetType::any(); 3];
        outputs[ITERATION_OUTPUT_INDEX] = data_type.clone();
        outputs[ITERATION_CONVERGENCE_OUTPUT_INDEX] = convergence_type;
        outputs[FINAL_OUTPUT_INDEX] = data_type;

        self.push_logical(name.into(), inputs, outputs, true)
    }

    fn push_logical(
        &mut self,
        name: String,
        input_types: Vec<DataSetType>,
        output_types: Vec<DataSetType>,
        loop_head: bool,
    ) -> OperatorId {
        let id = OperatorId(self.operators.len());
        let inputs = input_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| InputSlot::new(format!("in{i}"), id, i, ty))
            .collect();
        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| OutputSlot::new(format!("out{i}"), id, i, ty))
            .collect();

        self.operators.push(Operator {
            id,
            name,
            kind: OperatorKind::Logical { loop_head },
            inputs,
            outputs,
        });
        id
    }

    fn get(&self, id: OperatorId) -> Result<&Operator, SlotError> {
        self.operators.get(id.0).ok_or(SlotError::UnknownOperator(id))
    }

    fn get_mut(&mut self, id: OperatorId) -> Result<&mut Operator, SlotError> {
        self.operators
            .get_mut(id.0)
            .ok_or(SlotError::UnknownOperator(id))
    }

    /// Append a broadcast input after the regular inputs of `operator`
    pub fn add_broadcast_input(
        &mut self,
        operator: OperatorId,
        name: impl Into<String>,
        data_type: DataSetType,
    ) -> Result<InputRef, SlotError> {
        let op = self.get_mut(operator)?;
        if !op.supports_broadcast_inputs() {
            return Err(SlotError::BroadcastNotSupported { operator });
        }

        let index = op.inputs.len();
        op.inputs
            .push(InputSlot::broadcast(name, operator, index, data_type));
        Ok(InputRef::new(operator, index))
    }

    /// Feed `input` from `output`
    pub fn connect(&mut self, output: OutputRef, input: InputRef) -> Result<(), SlotError> {
        let output_type = self.get(output.operator)?.output(output.index)?.data_type().clone();
        let input_slot = self.get(input.operator)?.input(input.index)?;

        if input_slot.is_connected() {
            return Err(SlotError::AlreadyConnected {
                operator: input.operator,
                index: input.index,
            });
        }
        if !output_type.is_compatible_with(input_slot.data_type()) {
            return Err(SlotError::TypeMismatch {
                output_type: output_type.to_string(),
                input_type: input_slot.data_type().to_string(),
            });
        }

        self.operators[input.operator.0].inputs[input.index].set_occupant(Some(output));
        self.operators[output.operator.0].outputs[output.index].add_consumer(input);
        Ok(())
    }

    /// Remove the connection feeding `input`, returning the former occupant
    pub fn disconnect(&mut self, input: InputRef) -> Result<OutputRef, SlotError> {
        let occupant = self
            .get(input.operator)?
            .input(input.index)?
            .occupant()
            .ok_or(SlotError::NotConnected {
                operator: input.operator,
                index: input.index,
            })?;

        self.operators[input.operator.0].inputs[input.index].set_occupant(None);
        self.operators[occupant.operator.0].outputs[occupant.index].remove_consumer(input);
        Ok(occupant)
    }

    pub fn loop_initialization_inputs(
        &self,
        operator: OperatorId,
    ) -> EngineResult<Vec<InputRef>> {
        self.loop_inputs(operator, &[INITIAL_INPUT_INDEX, INITIAL_CONVERGENCE_INPUT_INDEX])
    }

    pub fn loop_body_inputs(&self, operator: OperatorId) -> EngineResult<Vec<InputRef>> {
        self.loop_inputs(operator, &[ITERATION_INPUT_INDEX, ITERATION_CONVERGENCE_INPUT_INDEX])
    }

    pub fn loop_body_outputs(&self, operator: OperatorId) -> EngineResult<Vec<OutputRef>> {
        self.loop_outputs(
            operator,
            &[ITERATION_OUTPUT_INDEX, ITERATION_CONVERGENCE_OUTPUT_INDEX],
        )
    }

    pub fn final_loop_outputs(&self, operator: OperatorId) -> EngineResult<Vec<OutputRef>> {
        self.loop_outputs(operator, &[FINAL_OUTPUT_INDEX])
    }

    fn loop_inputs(&self, operator: OperatorId, indices: &[usize]) -> EngineResult<Vec<InputRef>> {
        let op = self.get(operator)?;
        op.require_loop_head()?;
        Ok(indices.iter().map(|&i| op.inputs[i].address()).collect())
    }

    fn loop_outputs(
        &self,
        operator: OperatorId,
        indices: &[usize],
    ) -> EngineResult<Vec<OutputRef>> {
        let op = self.get(operator)?;
        op.require_loop_head()?;
        Ok(indices.iter().map(|&i| op.outputs[i].address()).collect())
    }

    /// One task per operator, one channel per connected output slot.
    ///
    /// Every operator must be elementary. Tasks keep the indices of their
    /// operators.
    pub fn to_task_graph(&self) -> EngineResult<TaskGraph> {
        let mut graph = TaskGraph::new();
        let mut tasks = HashMap::new();

        for op in &self.operators {
            let OperatorKind::Elementary(exec) = &op.kind else {
                return Err(IllegalStateError::NotExecutable(op.name.clone()).into());
            };
            let task = graph.add_task(Arc::clone(exec));
            for _ in op.inputs.iter().filter(|slot| slot.is_broadcast()) {
                graph.add_broadcast_input(task)?;
            }
            tasks.insert(op.id, task);
        }

        for op in &self.operators {
            for output in &op.outputs {
                for input in output.occupied_by() {
                    graph.connect_with(
                        tasks[&op.id],
                        output.index(),
                        tasks[&input.operator],
                        input.index,
                        ChannelDescriptor::default(),
                    )?;
                }
            }
        }

        Ok(graph)
    }

    /// Materialize the graph and designate its sinks as the plan's terminal tasks
    pub fn to_preliminary_plan(&self) -> EngineResult<PreliminaryExecutionPlan> {
        let graph = self.to_task_graph()?;
        Ok(PreliminaryExecutionPlan::from_graph(graph))
    }
}
