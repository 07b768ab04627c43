// Channels
// Directed data conduits between task outputs and task inputs

use crate::execution::task::TaskId;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a channel within its `TaskGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Kind of a channel, as chosen by the optimizer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    /// Whether the same data can be handed to several consumers
    pub reusable: bool,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, reusable: bool) -> Self {
        Self {
            name: name.into(),
            reusable,
        }
    }

    /// Materialized, re-readable data
    pub fn collection() -> Self {
        Self::new("collection", true)
    }

    /// Data that can be consumed only once
    pub fn stream() -> Self {
        Self::new("stream", false)
    }
}

impl Default for ChannelDescriptor {
    fn default() -> Self {
        Self::collection()
    }
}

/// One consuming input of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Consumer {
    pub task: TaskId,
    pub input: usize,
}

#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    descriptor: ChannelDescriptor,
    producer: TaskId,
    output: usize,
    consumers: Vec<Consumer>,
    barrier: bool,
    between_stages: bool,
    instrumented: bool,
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        descriptor: ChannelDescriptor,
        producer: TaskId,
        output: usize,
    ) -> Self {
        Self {
            id,
            descriptor,
            producer,
            output,
            consumers: Vec::new(),
            barrier: false,
            between_stages: false,
            instrumented: false,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn is_reusable(&self) -> bool {
        self.descriptor.reusable
    }

    pub fn producer(&self) -> TaskId {
        self.producer
    }

    pub fn producer_output(&self) -> usize {
        self.output
    }

    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    /// Forces consumers into a different stage than the producer
    pub fn is_stage_execution_barrier(&self) -> bool {
        self.barrier
    }

    /// Whether some consumer lives in another stage than the producer
    pub fn is_between_stages(&self) -> bool {
        self.between_stages
    }

    pub fn is_marked_for_instrumentation(&self) -> bool {
        self.instrumented
    }

    pub(crate) fn add_consumer(&mut self, consumer: Consumer) {
        self.consumers.push(consumer);
    }

    pub(crate) fn mark_stage_execution_barrier(&mut self) {
        self.barrier = true;
    }

    pub(crate) fn set_between_stages(&mut self, between: bool) {
        self.between_stages = between;
    }

    pub(crate) fn set_instrumented(&mut self, instrumented: bool) {
        self.instrumented = instrumented;
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.id, self.descriptor.name)
    }
}
