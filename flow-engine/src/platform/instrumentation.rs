// Instrumentation
// Strategies deciding which channels report measured cardinalities

use crate::execution::channel::ChannelId;
use crate::execution::plan::ExecutionPlan;

/// Marks channels of a finalized plan for instrumentation
pub trait InstrumentationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `channel` should be instrumented
    fn select(&self, plan: &ExecutionPlan, channel: ChannelId) -> bool;

    fn apply(&self, plan: &mut ExecutionPlan) {
        let selected: Vec<(ChannelId, bool)> = plan
            .graph()
            .channels()
            .map(|c| (c.id(), self.select(plan, c.id())))
            .collect();

        let marked = selected.iter().filter(|(_, on)| *on).count();
        for (channel, on) in selected {
            plan.graph.set_instrumented(channel, on);
        }
        tracing::debug!(strategy = self.name(), marked, "instrumented channels");
    }
}

/// Instruments nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstrumentation;

/// Instruments channels that leave their producer's stage
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundInstrumentation;

/// Instruments every channel
#[derive(Debug, Clone, Copy, Default)]
pub struct FullInstrumentation;

impl InstrumentationStrategy for NoInstrumentation {
    fn name(&self) -> &'static str {
        "none"
    }

    fn select(&self, _plan: &ExecutionPlan, _channel: ChannelId) -> bool {
        false
    }
}

impl InstrumentationStrategy for OutboundInstrumentation {
    fn name(&self) -> &'static str {
        "outbound"
    }

    fn select(&self, plan: &ExecutionPlan, channel: ChannelId) -> bool {
        plan.graph().channel(channel).is_between_stages()
    }
}

impl InstrumentationStrategy for FullInstrumentation {
    fn name(&self) -> &'static str {
        "full"
    }

    fn select(&self, _plan: &ExecutionPlan, _channel: ChannelId) -> bool {
        true
    }
}
