// Execution State
// Registry of live channel instances carried across stage executions

use crate::error::SchedulingError;
use crate::execution::channel::ChannelId;
use crate::platform::instance::ChannelInstance;

use std::collections::{BTreeMap, HashMap};

/// Live instances keyed by channel, plus collected cardinality measurements.
///
/// The state holds one reference on every registered instance.
#[derive(Debug, Default)]
pub struct ExecutionState {
    instances: HashMap<ChannelId, ChannelInstance>,
    cardinalities: BTreeMap<ChannelId, u64>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `instance` for its channel, replacing the previous one
    pub fn register(&mut self, instance: &ChannelInstance) -> Result<(), SchedulingError> {
        instance.obtain()?;
        if let Some(previous) = self.instances.insert(instance.channel(), instance.clone()) {
            previous.release()?;
        }
        Ok(())
    }

    pub fn get(&self, channel: ChannelId) -> Option<&ChannelInstance> {
        self.instances.get(&channel)
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.instances.contains_key(&channel)
    }

    /// Drop the instance of `channel`, if any
    pub fn release(&mut self, channel: ChannelId) -> Result<bool, SchedulingError> {
        match self.instances.remove(&channel) {
            Some(instance) => {
                instance.release()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn release_all(&mut self) -> Result<(), SchedulingError> {
        for (_, instance) in self.instances.drain() {
            instance.release()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.instances.keys().copied()
    }

    pub fn record_cardinality(&mut self, channel: ChannelId, cardinality: u64) {
        self.cardinalities.insert(channel, cardinality);
    }

    pub fn cardinality(&self, channel: ChannelId) -> Option<u64> {
        self.cardinalities.get(&channel).copied()
    }

    /// Measurements collected so far, ordered by channel
    pub fn cardinalities(&self) -> &BTreeMap<ChannelId, u64> {
        &self.cardinalities
    }
}

impl Drop for ExecutionState {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            tracing::warn!(error = %e, "failed to release execution state");
        }
    }
}
