// Execution Plan
// Acyclic graph of single-platform execution stages

use crate::execution::channel::ChannelId;
use crate::execution::graph::TaskGraph;
use crate::execution::task::TaskId;
use crate::platform::Platform;

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Index of a stage within its `ExecutionPlan`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StageId(pub(crate) usize);

impl StageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Tasks of one platform that execute together without crossing a barrier
#[derive(Debug, Clone)]
pub struct ExecutionStage {
    pub(crate) id: StageId,
    pub(crate) platform: Platform,
    pub(crate) tasks: Vec<TaskId>,
    pub(crate) start_tasks: Vec<TaskId>,
    pub(crate) terminal_tasks: Vec<TaskId>,
    pub(crate) predecessors: Vec<StageId>,
    pub(crate) successors: Vec<StageId>,
    /// Stages feeding the loop-body inputs of this stage's loop head
    pub(crate) feedback_sources: Vec<StageId>,
    /// The loop head this stage consists of
    pub(crate) loop_head: Option<TaskId>,
    /// Stage of the innermost loop head whose body contains this stage
    pub(crate) loop_head_stage: Option<StageId>,
}

impl ExecutionStage {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains(&task)
    }

    pub fn start_tasks(&self) -> &[TaskId] {
        &self.start_tasks
    }

    pub fn terminal_tasks(&self) -> &[TaskId] {
        &self.terminal_tasks
    }

    pub fn predecessors(&self) -> &[StageId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[StageId] {
        &self.successors
    }

    pub fn feedback_sources(&self) -> &[StageId] {
        &self.feedback_sources
    }

    pub fn loop_head(&self) -> Option<TaskId> {
        self.loop_head
    }

    pub fn is_loop_head_stage(&self) -> bool {
        self.loop_head.is_some()
    }

    pub fn loop_head_stage(&self) -> Option<StageId> {
        self.loop_head_stage
    }

    pub fn is_in_loop(&self) -> bool {
        self.loop_head_stage.is_some()
    }

    pub fn is_starting(&self) -> bool {
        self.predecessors.is_empty()
    }
}

/// Finalized result of stage assignment.
///
/// Stage ids follow a topological order of the stage graph.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub(crate) graph: TaskGraph,
    pub(crate) stages: Vec<ExecutionStage>,
    pub(crate) starting_stages: Vec<StageId>,
    pub(crate) splits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub stages: Vec<StageSummary>,
    pub starting_stages: Vec<StageId>,
    pub channels: Vec<ChannelSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub id: StageId,
    pub platform: Platform,
    pub tasks: Vec<String>,
    pub start_tasks: Vec<TaskId>,
    pub terminal_tasks: Vec<TaskId>,
    pub successors: Vec<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_head_stage: Option<StageId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub kind: String,
    pub producer: TaskId,
    pub consumers: Vec<TaskId>,
    pub barrier: bool,
    pub between_stages: bool,
    pub instrumented: bool,
}

impl ExecutionPlan {
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    /// Panics if `id` does not belong to this plan
    pub fn stage(&self, id: StageId) -> &ExecutionStage {
        &self.stages[id.0]
    }

    pub fn stage_of(&self, task: TaskId) -> Option<&ExecutionStage> {
        self.graph.task(task).stage().map(|id| self.stage(id))
    }

    pub fn starting_stages(&self) -> &[StageId] {
        &self.starting_stages
    }

    /// Number of runs split off to break platform cycles
    pub fn splits(&self) -> usize {
        self.splits
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stages in dependency order
    pub fn topological_order(&self) -> Vec<&ExecutionStage> {
        // Kahn's algorithm, ties broken by id
        let mut in_degree: Vec<usize> = self.stages.iter().map(|s| s.predecessors.len()).collect();
        let mut queue: VecDeque<StageId> = self
            .stages
            .iter()
            .filter(|s| s.predecessors.is_empty())
            .map(|s| s.id)
            .collect();

        let mut result = Vec::with_capacity(self.stages.len());
        while let Some(id) = queue.pop_front() {
            let stage = self.stage(id);
            result.push(stage);

            for succ in &stage.successors {
                in_degree[succ.0] -= 1;
                if in_degree[succ.0] == 0 {
                    queue.push_back(*succ);
                }
            }
        }

        result
    }

    /// Groups of stages with no path between them
    pub fn parallel_stages(&self) -> Vec<Vec<&ExecutionStage>> {
        let mut levels: Vec<Vec<&ExecutionStage>> = Vec::new();
        let mut assigned: HashMap<StageId, usize> = HashMap::new();

        for stage in self.topological_order() {
            let level = stage
                .predecessors
                .iter()
                .filter_map(|pred| assigned.get(pred))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(stage.id, level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(stage);
        }

        levels
    }

    pub fn summary(&self) -> PlanSummary {
        let stages = self
            .stages
            .iter()
            .map(|stage| StageSummary {
                id: stage.id,
                platform: stage.platform.clone(),
                tasks: stage
                    .tasks
                    .iter()
                    .map(|&task| self.graph.task(task).to_string())
                    .collect(),
                start_tasks: stage.start_tasks.clone(),
                terminal_tasks: stage.terminal_tasks.clone(),
                successors: stage.successors.clone(),
                loop_head_stage: stage.loop_head_stage,
            })
            .collect();

        let channels = self
            .graph
            .channels()
            .map(|channel| ChannelSummary {
                id: channel.id(),
                kind: channel.descriptor().name.clone(),
                producer: channel.producer(),
                consumers: channel.consumers().iter().map(|c| c.task).collect(),
                barrier: channel.is_stage_execution_barrier(),
                between_stages: channel.is_between_stages(),
                instrumented: channel.is_marked_for_instrumentation(),
            })
            .collect();

        PlanSummary {
            stages,
            starting_stages: self.starting_stages.clone(),
            channels,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.summary())
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stage in &self.stages {
            let tasks: Vec<String> = stage
                .tasks
                .iter()
                .map(|&task| self.graph.task(task).name().to_string())
                .collect();
            write!(f, "{} @{} {{{}}}", stage.id, stage.platform, tasks.join(", "))?;
            if !stage.successors.is_empty() {
                let succ: Vec<String> = stage.successors.iter().map(|s| s.to_string()).collect();
                write!(f, " -> {}", succ.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
