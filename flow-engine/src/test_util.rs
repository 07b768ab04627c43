// Test Utilities
// Mock operators and task graph builders shared by unit tests

use crate::error::OperatorError;
use crate::execution::graph::{PreliminaryExecutionPlan, TaskGraph};
use crate::execution::task::TaskId;
use crate::plan::loop_head::LoopOperator;
use crate::plan::types::DataSetType;
use crate::platform::{ExecutionOperator, Platform, TaskContext};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn java() -> Platform {
    Platform::new("java")
}

pub fn spark() -> Platform {
    Platform::new("spark")
}

pub fn postgres() -> Platform {
    Platform::new("postgres")
}

/// Forwards input 0 to every output; without inputs it emits a fixed value
pub struct PassThrough {
    name: String,
    platform: Platform,
    inputs: usize,
    outputs: usize,
    input_type: DataSetType,
    output_type: DataSetType,
    value: u64,
    cardinality: Option<u64>,
}

impl PassThrough {
    pub fn with_arity(name: &str, platform: Platform, inputs: usize, outputs: usize) -> Self {
        Self {
            name: name.to_string(),
            platform,
            inputs,
            outputs,
            input_type: DataSetType::any(),
            output_type: DataSetType::any(),
            value: 0,
            cardinality: None,
        }
    }

    pub fn new(name: &str, platform: Platform) -> Self {
        Self::with_arity(name, platform, 1, 1)
    }

    pub fn source(name: &str, platform: Platform) -> Self {
        Self::with_arity(name, platform, 0, 1)
    }

    pub fn sink(name: &str, platform: Platform) -> Self {
        Self::with_arity(name, platform, 1, 0)
    }

    pub fn with_input_type(mut self, data_type: DataSetType) -> Self {
        self.input_type = data_type;
        self
    }

    pub fn with_output_type(mut self, data_type: DataSetType) -> Self {
        self.output_type = data_type;
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = Some(cardinality);
        self
    }
}

#[async_trait]
impl ExecutionOperator for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.outputs
    }

    fn input_type(&self, _index: usize) -> DataSetType {
        self.input_type.clone()
    }

    fn output_type(&self, _index: usize) -> DataSetType {
        self.output_type.clone()
    }

    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        for output in 0..self.outputs {
            if self.inputs == 0 {
                match self.cardinality {
                    Some(cardinality) => ctx.emit_measured(output, self.value, cardinality)?,
                    None => ctx.emit(output, self.value)?,
                }
            } else {
                let payload = ctx.input_payload(0)?;
                ctx.emit_payload(output, payload)?;
            }
        }
        Ok(())
    }
}

/// Adds one to a `u64`
pub struct Increment {
    name: String,
    platform: Platform,
}

impl Increment {
    pub fn new(name: &str, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            platform,
        }
    }
}

#[async_trait]
impl ExecutionOperator for Increment {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        let value = ctx.input_data::<u64>(0)?;
        ctx.emit(0, *value + 1)
    }
}

/// Sink recording every `u64` it receives
pub struct Collect {
    name: String,
    platform: Platform,
    values: Arc<Mutex<Vec<u64>>>,
    forced: Arc<Mutex<Vec<bool>>>,
}

impl Collect {
    pub fn new(name: &str, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            platform,
            values: Arc::default(),
            forced: Arc::default(),
        }
    }

    pub fn values(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.values)
    }

    pub fn forced_flags(&self) -> Arc<Mutex<Vec<bool>>> {
        Arc::clone(&self.forced)
    }
}

#[async_trait]
impl ExecutionOperator for Collect {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        let value = ctx.input_data::<u64>(0)?;
        self.values.lock().push(*value);
        self.forced.lock().push(ctx.is_forced());
        Ok(())
    }
}

/// Sink that always fails
pub struct Failing {
    name: String,
    platform: Platform,
}

impl Failing {
    pub fn new(name: &str, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            platform,
        }
    }
}

#[async_trait]
impl ExecutionOperator for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    async fn evaluate(&self, _ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        Err(OperatorError::failed("boom"))
    }
}

/// Consumes its input and never emits anything
pub struct Swallow {
    name: String,
    platform: Platform,
}

impl Swallow {
    pub fn new(name: &str, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            platform,
        }
    }
}

#[async_trait]
impl ExecutionOperator for Swallow {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    async fn evaluate(&self, ctx: &mut TaskContext<'_>) -> Result<(), OperatorError> {
        ctx.input_payload(0).map(|_| ())
    }
}

/// Counts how often it was dropped
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn new(drops: &Arc<AtomicUsize>) -> Self {
        Self(Arc::clone(drops))
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// java -> spark -> postgres -> java, with a java shortcut from the first
/// java task into the last java join
pub fn circular_graph() -> PreliminaryExecutionPlan {
    let mut graph = TaskGraph::new();
    let source_a = graph.add_task(Arc::new(PassThrough::source("source-a", java())));
    let map_b = graph.add_task(Arc::new(PassThrough::new("map-b", spark())));
    let map_c = graph.add_task(Arc::new(PassThrough::new("map-c", postgres())));
    let map_a = graph.add_task(Arc::new(PassThrough::new("map-a", java())));
    let join_a = graph.add_task(Arc::new(PassThrough::with_arity("join-a", java(), 2, 1)));
    let sink_a = graph.add_task(Arc::new(PassThrough::sink("sink-a", java())));

    let wiring = [
        (source_a, map_b, 0),
        (source_a, join_a, 1),
        (map_b, map_c, 0),
        (map_c, map_a, 0),
        (map_a, join_a, 0),
        (join_a, sink_a, 0),
    ];
    for (producer, consumer, input) in wiring {
        graph
            .connect(producer, 0, consumer, input)
            .expect("valid wiring");
    }
    PreliminaryExecutionPlan::from_graph(graph)
}

/// Two platforms alternating along every path
pub fn zig_zag_graph() -> PreliminaryExecutionPlan {
    let mut graph = TaskGraph::new();
    let source_a = graph.add_task(Arc::new(PassThrough::source("source-a", java())));
    let map_b = graph.add_task(Arc::new(PassThrough::new("map-b", spark())));
    let join_a = graph.add_task(Arc::new(PassThrough::with_arity("join-a", java(), 2, 1)));
    let join_b = graph.add_task(Arc::new(PassThrough::with_arity("join-b", spark(), 2, 1)));
    let sink_a = graph.add_task(Arc::new(PassThrough::with_arity("sink-a", java(), 2, 0)));

    let wiring = [
        (source_a, map_b, 0),
        (source_a, join_a, 0),
        (map_b, join_a, 1),
        (map_b, join_b, 0),
        (join_a, join_b, 1),
        (join_a, sink_a, 0),
        (join_b, sink_a, 1),
    ];
    for (producer, consumer, input) in wiring {
        graph
            .connect(producer, 0, consumer, input)
            .expect("valid wiring");
    }
    PreliminaryExecutionPlan::from_graph(graph)
}

pub struct LoopIds {
    pub source: TaskId,
    pub head: TaskId,
    pub step: TaskId,
    pub sink: TaskId,
    pub collected: Arc<Mutex<Vec<u64>>>,
}

/// source -> loop { +1 } -> sink, converging after `max_iterations`
pub fn loop_graph(max_iterations: usize) -> (PreliminaryExecutionPlan, LoopIds) {
    let mut graph = TaskGraph::new();
    let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
    let head = graph.add_task(Arc::new(
        LoopOperator::new("loop", java(), |value: &u64| *value >= 100)
            .with_max_iterations(max_iterations),
    ));
    let step = graph.add_task(Arc::new(Increment::new("step", java())));
    let collect = Collect::new("sink", java());
    let collected = collect.values();
    let sink = graph.add_task(Arc::new(collect));

    let wiring = [
        (source, 0, head, 0),
        (source, 0, head, 1),
        (head, 0, step, 0),
        (step, 0, head, 2),
        (step, 0, head, 3),
        (head, 2, sink, 0),
    ];
    for (producer, output, consumer, input) in wiring {
        graph
            .connect(producer, output, consumer, input)
            .expect("valid wiring");
    }

    let ids = LoopIds {
        source,
        head,
        step,
        sink,
        collected,
    };
    (PreliminaryExecutionPlan::from_graph(graph), ids)
}

/// Loop whose spark step also feeds a postgres sink that never reaches the head
pub fn side_output_loop_graph(
    max_iterations: usize,
) -> (PreliminaryExecutionPlan, LoopIds, TaskId, Arc<Mutex<Vec<u64>>>) {
    let mut graph = TaskGraph::new();
    let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
    let head = graph.add_task(Arc::new(
        LoopOperator::new("loop", java(), |value: &u64| *value >= 100)
            .with_max_iterations(max_iterations),
    ));
    let step = graph.add_task(Arc::new(Increment::new("step", spark())));
    let observer = Collect::new("side", postgres());
    let observed = observer.values();
    let side = graph.add_task(Arc::new(observer));
    let collect = Collect::new("sink", java());
    let collected = collect.values();
    let sink = graph.add_task(Arc::new(collect));

    let wiring = [
        (source, 0, head, 0),
        (source, 0, head, 1),
        (head, 0, step, 0),
        (step, 0, head, 2),
        (step, 0, head, 3),
        (step, 0, side, 0),
        (head, 2, sink, 0),
    ];
    for (producer, output, consumer, input) in wiring {
        graph
            .connect(producer, output, consumer, input)
            .expect("valid wiring");
    }

    let ids = LoopIds {
        source,
        head,
        step,
        sink,
        collected,
    };
    (PreliminaryExecutionPlan::from_graph(graph), ids, side, observed)
}
