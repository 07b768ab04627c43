// Loop Heads
// Loop-head capability, its lifecycle state machine and a criterion-driven loop operator

use crate::error::{IllegalStateError, OperatorError};
use crate::platform::instance::Payload;
use crate::platform::{Activation, ExecutionOperator, Platform, TaskContext};
use crate::plan::types::DataSetType;

use async_trait::async_trait;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

pub const INITIAL_INPUT_INDEX: usize = 0;
pub const INITIAL_CONVERGENCE_INPUT_INDEX: usize = 1;
pub const ITERATION_INPUT_INDEX: usize = 2;
pub const ITERATION_CONVERGENCE_INPUT_INDEX: usize = 3;

pub const ITERATION_OUTPUT_INDEX: usize = 0;
pub const ITERATION_CONVERGENCE_OUTPUT_INDEX: usize = 1;
pub const FINAL_OUTPUT_INDEX: usize = 2;

/// Lifecycle of a loop head within one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoopState {
    NotStarted,
    Running,
    Finished,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::NotStarted,
            1 => LoopState::Running,
            _ => LoopState::Finished,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoopState::NotStarted => 0,
            LoopState::Running => 1,
            LoopState::Finished => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LoopState::Finished
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::NotStarted => write!(f, "NOT_STARTED"),
            LoopState::Running => write!(f, "RUNNING"),
            LoopState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Atomic holder of a `LoopState` that only ever moves forward
#[derive(Debug, Default)]
pub struct LoopStateCell(AtomicU8);

impl LoopStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(LoopState::NotStarted.as_u8()))
    }

    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`; staying in the current state is a no-op, going back is an error
    pub fn advance(&self, to: LoopState) -> Result<LoopState, IllegalStateError> {
        let target = to.as_u8();
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current <= target).then_some(target)
            })
            .map(LoopState::from_u8)
            .map_err(|current| IllegalStateError::LoopStateRegression {
                from: LoopState::from_u8(current).to_string(),
                to: to.to_string(),
            })
    }
}

/// Capability of elementary operators that drive an iteration.
///
/// Inputs and outputs have fixed roles; the index sets returned by the
/// accessors are disjoint and never change.
pub trait LoopHead: Send + Sync {
    fn state(&self) -> LoopState;

    fn advance_state(&self, to: LoopState) -> Result<LoopState, IllegalStateError>;

    fn loop_initialization_inputs(&self) -> &'static [usize] {
        &[INITIAL_INPUT_INDEX, INITIAL_CONVERGENCE_INPUT_INDEX]
    }

    fn loop_body_inputs(&self) -> &'static [usize] {
        &[ITERATION_INPUT_INDEX, ITERATION_CONVERGENCE_INPUT_INDEX]
    }

    fn loop_body_outputs(&self) -> &'static [usize] {
        &[ITERATION_OUTPUT_INDEX, ITERATION_CONVERGENCE_OUTPUT_INDEX]
    }

    fn final_loop_outputs(&self) -> &'static [usize] {
        &[FINAL_OUTPUT_INDEX]
    }
}

type Criterion = dyn Fn(&Payload) -> Result<bool, OperatorError> + Send + Sync;

/// Loop head that stops iterating once its criterion holds for the convergence data
pub struct LoopOperator {
    name: String,
    platform: Platform,
    data_type: DataSetType,
    convergence_type: DataSetType,
    criterion: Arc<Criterion>,
    max_iterations: Option<usize>,
    iterations: AtomicUsize,
    state: LoopStateCell,
}

impl LoopOperator {
    /// `criterion` returns `true` when the loop has converged
    pub fn new<C, F>(name: impl Into<String>, platform: Platform, criterion: F) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        let criterion = move |payload: &Payload| {
            payload
                .downcast_ref::<C>()
                .map(&criterion)
                .ok_or(OperatorError::UnexpectedPayload {
                    index: ITERATION_CONVERGENCE_INPUT_INDEX,
                    expected: type_name::<C>(),
                })
        };

        Self {
            name: name.into(),
            platform,
            data_type: DataSetType::any(),
            convergence_type: DataSetType::any(),
            criterion: Arc::new(criterion),
            max_iterations: None,
            iterations: AtomicUsize::new(0),
            state: LoopStateCell::new(),
        }
    }

    pub fn with_types(mut self, data_type: DataSetType, convergence_type: DataSetType) -> Self {
        self.data_type = data_type;
        self.convergence_type = convergence_type;
        self
    }

    /// Converge after at most `max` iteration activations
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Number of iteration activations so far
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LoopOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopOperator")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("state", &self.state.get())
            .field("iterations", &self.iterations())
            .finish()
    }
}

impl LoopHead for LoopOperator {
    fn state(&self) -> LoopState {
        self.state.get()
    }

    fn advance_state(&self, to: LoopState) -> Result<LoopState, IllegalStateError> {
        self.state.advance(to)
    }
}

#[async_trait]
impl ExecutionOperator for LoopOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        4
    }

    fn num_outputs(&self) -> usize {
        3
    }

    fn input_type(&self, index: usize) -> DataSetType {
        match index {
            INITIAL_CONVERGENCE_INPUT_INDEX | ITERATION_CONVERGENCE_INPUT_INDEX => {
                self.convergence_type.clone()
            }
            _ => self.data_type.clone(),
        }
    }

    fn output_type(&self, index: usize) -> DataSetType {
        match index {
            ITERATION_CONVERGENCE_OUTPUT_INDEX => self.convergence_type.clone(),
            _ => self.data_type.clone(),
        }
    }

    fn as_loop_head(&self) -> Option<&dyn LoopHead> {
        Some(self)
    }

    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        let (data_index, convergence_index) = match ctx.activation() {
            Activation::LoopInitialization => {
                (INITIAL_INPUT_INDEX, INITIAL_CONVERGENCE_INPUT_INDEX)
            }
            Activation::LoopIteration => (ITERATION_INPUT_INDEX, ITERATION_CONVERGENCE_INPUT_INDEX),
            Activation::Plain => {
                return Err(OperatorError::failed(format!(
                    "loop '{}' activated outside of its loop roles",
                    self.name
                )))
            }
        };

        let data = ctx.input_payload(data_index)?;
        let convergence = ctx.input_payload(convergence_index)?;

        if ctx.activation() == Activation::LoopInitialization {
            self.state.advance(LoopState::Running).map_err(|e| OperatorError::failed(e.to_string()))?;
        }

        let iterations = if ctx.activation() == Activation::LoopIteration {
            self.iterations.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.iterations()
        };
        let exhausted = self.max_iterations.is_some_and(|max| iterations >= max);

        if exhausted || (self.criterion)(&convergence)? {
            tracing::debug!(loop_name = %self.name, iterations, "loop converged");
            ctx.emit_payload(FINAL_OUTPUT_INDEX, data)?;
            self.state.advance(LoopState::Finished).map_err(|e| OperatorError::failed(e.to_string()))?;
        } else {
            ctx.emit_payload(ITERATION_OUTPUT_INDEX, data)?;
            ctx.emit_payload(ITERATION_CONVERGENCE_OUTPUT_INDEX, convergence)?;
        }

        Ok(())
    }
}
