// Stage Assignment
// Partitions a task graph into single-platform stages that form an acyclic plan

use crate::error::PlanningError;
use crate::execution::channel::ChannelId;
use crate::execution::graph::{PreliminaryExecutionPlan, TaskGraph};
use crate::execution::plan::{ExecutionPlan, ExecutionStage, StageId};
use crate::execution::task::TaskId;

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

/// One (channel, consumer input) pair of the task graph
#[derive(Debug, Clone, Copy)]
struct Edge {
    channel: ChannelId,
    producer: TaskId,
    consumer: TaskId,
    /// Feeds a loop-body input of a loop head
    feedback: bool,
    /// Producer and consumer run on different platforms
    crossing: bool,
    /// Producer or consumer is a loop head
    touches_loop_head: bool,
}

/// Grouping of tasks into platform runs plus the channels between them.
///
/// Two tasks share a run when a local channel connects them: same platform,
/// no barrier, and no loop head on either end. Feedback edges never take part
/// in cycle detection.
#[derive(Debug)]
struct RunGraph {
    tasks: Vec<TaskId>,
    run_of: HashMap<TaskId, usize>,
    run_count: usize,
    edges: Vec<Edge>,
    outgoing: HashMap<TaskId, Vec<usize>>,
    barriers: HashSet<ChannelId>,
    splits: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl RunGraph {
    fn build(graph: &TaskGraph, tasks: Vec<TaskId>) -> Self {
        let mut edges = Vec::new();
        let mut barriers = HashSet::new();

        for &id in &tasks {
            let task = graph.task(id);
            let body_inputs = task.loop_head().map(|h| h.loop_body_inputs()).unwrap_or(&[]);

            for (input, channel) in task.input_channels().iter().enumerate() {
                let Some(channel) = *channel else { continue };
                let producer = graph.channel(channel).producer();
                let feedback = body_inputs.contains(&input);
                if feedback || graph.channel(channel).is_stage_execution_barrier() {
                    barriers.insert(channel);
                }

                let producer_task = graph.task(producer);
                edges.push(Edge {
                    channel,
                    producer,
                    consumer: id,
                    feedback,
                    crossing: producer_task.platform() != task.platform(),
                    touches_loop_head: task.is_loop_head() || producer_task.is_loop_head(),
                });
            }
        }

        let mut outgoing: HashMap<TaskId, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.producer).or_default().push(i);
        }

        let mut runs = Self {
            tasks,
            run_of: HashMap::new(),
            run_count: 0,
            edges,
            outgoing,
            barriers,
            splits: 0,
        };
        runs.assign_initial_runs();
        runs
    }

    /// Union-find over local edges; run ids follow task order
    fn assign_initial_runs(&mut self) {
        let position: HashMap<TaskId, usize> =
            self.tasks.iter().enumerate().map(|(i, &t)| (t, i)).collect();
        let mut parent: Vec<usize> = (0..self.tasks.len()).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for edge in &self.edges {
            if self.is_local(edge) {
                let a = find(&mut parent, position[&edge.producer]);
                let b = find(&mut parent, position[&edge.consumer]);
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }

        let mut run_ids: HashMap<usize, usize> = HashMap::new();
        for (i, &task) in self.tasks.iter().enumerate() {
            let root = find(&mut parent, i);
            let next = run_ids.len();
            let run = *run_ids.entry(root).or_insert(next);
            self.run_of.insert(task, run);
        }
        self.run_count = run_ids.len();
    }

    fn run(&self, task: TaskId) -> usize {
        self.run_of[&task]
    }

    fn is_local(&self, edge: &Edge) -> bool {
        !edge.feedback
            && !edge.crossing
            && !edge.touches_loop_head
            && !self.barriers.contains(&edge.channel)
    }

    /// Edges that separate runs: different runs, or a non-local edge inside one run
    fn is_run_edge(&self, edge: &Edge) -> bool {
        !edge.feedback && (self.run(edge.producer) != self.run(edge.consumer) || !self.is_local(edge))
    }

    fn members(&self, run: usize) -> Vec<TaskId> {
        self.tasks
            .iter()
            .copied()
            .filter(|&t| self.run(t) == run)
            .collect()
    }

    fn run_adjacency(&self) -> Vec<BTreeSet<usize>> {
        let mut adjacency = vec![BTreeSet::new(); self.run_count];
        for edge in self.edges.iter().filter(|e| self.is_run_edge(e)) {
            adjacency[self.run(edge.producer)].insert(self.run(edge.consumer));
        }
        adjacency
    }

    /// Some cycle of runs `r0 -> r1 -> .. -> r0`, a self-loop being `[r0]`
    fn find_cycle(&self) -> Option<Vec<usize>> {
        let adjacency = self.run_adjacency();
        let mut marks = vec![Mark::Unvisited; self.run_count];
        let mut stack = Vec::new();

        for run in 0..self.run_count {
            if marks[run] == Mark::Unvisited {
                if let Some(cycle) = Self::dfs_run_cycle(run, &adjacency, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_run_cycle(
        run: usize,
        adjacency: &[BTreeSet<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[run] = Mark::OnStack;
        stack.push(run);

        for &next in &adjacency[run] {
            match marks[next] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&r| r == next)?;
                    return Some(stack[start..].to_vec());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = Self::dfs_run_cycle(next, adjacency, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[run] = Mark::Done;
        None
    }

    /// Split runs until the run graph is acyclic; returns the number of splits
    fn resolve_cycles(&mut self) -> Result<usize, PlanningError> {
        let mut splits = 0;
        while let Some(cycle) = self.find_cycle() {
            if !self.split_cycle(&cycle) {
                let runs: Vec<String> = cycle
                    .iter()
                    .map(|&run| {
                        let members: Vec<String> =
                            self.members(run).iter().map(|t| t.to_string()).collect();
                        format!("{{{}}}", members.join(", "))
                    })
                    .collect();
                return Err(PlanningError::data_cycle(format!(
                    "cannot break cycle between runs {}",
                    runs.join(" -> ")
                )));
            }
            splits += 1;
        }
        self.splits += splits;
        Ok(splits)
    }

    /// Split one run of `cycle` at an entry whose local downstream part does
    /// not lead back out towards the next run of the cycle
    fn split_cycle(&mut self, cycle: &[usize]) -> bool {
        let k = cycle.len();
        for j in 0..k {
            let run = cycle[j];
            let prev = cycle[(j + k - 1) % k];
            let next = cycle[(j + 1) % k];

            let mut entries = BTreeSet::new();
            let mut exits = HashSet::new();
            for edge in self.edges.iter().filter(|e| self.is_run_edge(e)) {
                let (from, to) = (self.run(edge.producer), self.run(edge.consumer));
                if from == prev && to == run {
                    entries.insert(edge.consumer);
                }
                if from == run && to == next {
                    exits.insert(edge.producer);
                }
            }

            for entry in entries {
                let part = self.local_closure(entry, run);
                if part.is_disjoint(&exits) {
                    self.split_off(run, &part);
                    return true;
                }
            }
        }
        false
    }

    fn local_closure(&self, start: TaskId, run: usize) -> HashSet<TaskId> {
        let mut part = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(task) = queue.pop_front() {
            for &i in self.outgoing.get(&task).into_iter().flatten() {
                let edge = &self.edges[i];
                if self.is_local(edge)
                    && self.run(edge.consumer) == run
                    && part.insert(edge.consumer)
                {
                    queue.push_back(edge.consumer);
                }
            }
        }
        part
    }

    fn split_off(&mut self, run: usize, part: &HashSet<TaskId>) {
        let new_run = self.run_count;
        self.run_count += 1;
        for task in part {
            self.run_of.insert(*task, new_run);
        }

        let cut: Vec<ChannelId> = self
            .edges
            .iter()
            .filter(|e| {
                self.is_local(e)
                    && self.run(e.producer) == run
                    && self.run(e.consumer) == new_run
            })
            .map(|e| e.channel)
            .collect();

        tracing::debug!(
            run,
            new_run,
            moved_tasks = part.len(),
            promoted_barriers = cut.len(),
            "split platform run"
        );
        self.barriers.extend(cut);
    }

    /// A data cycle among tasks that is not closed through a loop head
    fn find_task_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for &task in &self.tasks {
            if !visited.contains(&task) {
                if let Some(cycle) = self.dfs_task_cycle(task, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_task_cycle(
        &self,
        task: TaskId,
        visited: &mut HashSet<TaskId>,
        stack: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        visited.insert(task);
        stack.push(task);

        for &i in self.outgoing.get(&task).into_iter().flatten() {
            let edge = &self.edges[i];
            if edge.feedback {
                continue;
            }
            if let Some(start) = stack.iter().position(|&t| t == edge.consumer) {
                let mut cycle = stack[start..].to_vec();
                cycle.push(edge.consumer);
                return Some(cycle);
            }
            if !visited.contains(&edge.consumer) {
                if let Some(cycle) = self.dfs_task_cycle(edge.consumer, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }
}

/// Turns a preliminary plan into an acyclic `ExecutionPlan`
pub struct StageAssignmentTraversal {
    graph: TaskGraph,
    sinks: Vec<TaskId>,
}

impl StageAssignmentTraversal {
    pub fn new(plan: PreliminaryExecutionPlan) -> Result<Self, PlanningError> {
        plan.validate()?;
        let (graph, sinks) = plan.into_parts();
        Ok(Self { graph, sinks })
    }

    /// Validate and assign stages in one go
    pub fn assign(plan: PreliminaryExecutionPlan) -> Result<ExecutionPlan, PlanningError> {
        Self::new(plan)?.run()
    }

    pub fn run(self) -> Result<ExecutionPlan, PlanningError> {
        let tasks = self.collect_tasks();
        tracing::debug!(
            tasks = tasks.len(),
            sinks = self.sinks.len(),
            "assigning execution stages"
        );

        let mut runs = RunGraph::build(&self.graph, tasks);
        if let Some(cycle) = runs.find_task_cycle() {
            let path: Vec<String> = cycle
                .iter()
                .map(|&t| self.graph.task(t).to_string())
                .collect();
            return Err(PlanningError::data_cycle(format!(
                "data cycle outside of a loop: {}",
                path.join(" -> ")
            )));
        }

        runs.resolve_cycles()?;
        let plan = Self::materialize(self.graph, &runs)?;

        tracing::info!(
            stages = plan.stage_count(),
            starting_stages = plan.starting_stages().len(),
            splits = plan.splits(),
            "execution plan assembled"
        );
        Ok(plan)
    }

    /// Tasks reachable backward from the sinks, in id order
    fn collect_tasks(&self) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = self.sinks.iter().copied().collect();
        let mut queue: VecDeque<TaskId> = self.sinks.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            for input in 0..self.graph.task(id).num_inputs() {
                let Some(producer) = self.graph.producer_of(id, input) else { continue };
                if seen.insert(producer) {
                    queue.push_back(producer);
                }
            }
        }

        let mut tasks: Vec<TaskId> = seen.into_iter().collect();
        tasks.sort();
        tasks
    }

    fn materialize(mut graph: TaskGraph, runs: &RunGraph) -> Result<ExecutionPlan, PlanningError> {
        // Kahn's algorithm over runs, smallest run first
        let mut successors = vec![BTreeSet::new(); runs.run_count];
        let mut in_degree = vec![0usize; runs.run_count];
        for edge in runs.edges.iter().filter(|e| !e.feedback) {
            let (from, to) = (runs.run(edge.producer), runs.run(edge.consumer));
            if from != to && successors[from].insert(to) {
                in_degree[to] += 1;
            }
        }

        let mut heap: BinaryHeap<Reverse<usize>> = (0..runs.run_count)
            .filter(|&r| in_degree[r] == 0)
            .map(Reverse)
            .collect();
        let mut stage_of_run = vec![StageId(0); runs.run_count];
        let mut ordered = 0;
        while let Some(Reverse(run)) = heap.pop() {
            stage_of_run[run] = StageId(ordered);
            ordered += 1;
            for &next in &successors[run] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    heap.push(Reverse(next));
                }
            }
        }
        if ordered != runs.run_count {
            return Err(PlanningError::data_cycle(
                "platform runs still form a cycle after splitting",
            ));
        }

        let stage_of = |task: TaskId| stage_of_run[runs.run(task)];

        let mut members: Vec<Vec<TaskId>> = vec![Vec::new(); runs.run_count];
        for &task in &runs.tasks {
            members[stage_of(task).0].push(task);
        }

        let mut stages: Vec<ExecutionStage> = members
            .into_iter()
            .enumerate()
            .map(|(i, tasks)| {
                let first = graph.task(tasks[0]);
                ExecutionStage {
                    id: StageId(i),
                    platform: first.platform().clone(),
                    loop_head: first.is_loop_head().then_some(first.id()),
                    tasks,
                    start_tasks: Vec::new(),
                    terminal_tasks: Vec::new(),
                    predecessors: Vec::new(),
                    successors: Vec::new(),
                    feedback_sources: Vec::new(),
                    loop_head_stage: None,
                }
            })
            .collect();

        let mut has_local_producer = HashSet::new();
        let mut has_local_consumer = HashSet::new();
        let mut leaves_stage = HashSet::new();

        for edge in &runs.edges {
            let (from, to) = (stage_of(edge.producer), stage_of(edge.consumer));
            if edge.feedback {
                stages[to.0].feedback_sources.push(from);
                if from != to {
                    leaves_stage.insert(edge.producer);
                }
            } else if from == to {
                has_local_producer.insert(edge.consumer);
                has_local_consumer.insert(edge.producer);
            } else {
                leaves_stage.insert(edge.producer);
                stages[from.0].successors.push(to);
                stages[to.0].predecessors.push(from);
            }
        }

        for stage in &mut stages {
            for list in [
                &mut stage.predecessors,
                &mut stage.successors,
                &mut stage.feedback_sources,
            ] {
                list.sort();
                list.dedup();
            }
            stage.start_tasks = stage
                .tasks
                .iter()
                .copied()
                .filter(|t| !has_local_producer.contains(t))
                .collect();
            stage.terminal_tasks = stage
                .tasks
                .iter()
                .copied()
                .filter(|t| !has_local_consumer.contains(t) || leaves_stage.contains(t))
                .collect();
        }

        for &task in &runs.tasks {
            graph.task_mut(task).set_stage(stage_of(task));
        }
        Self::assign_loop_bodies(&graph, &mut stages);
        for &channel in &runs.barriers {
            graph.mark_stage_execution_barrier(channel);
        }

        let channels: Vec<ChannelId> = graph.channels().map(|c| c.id()).collect();
        for id in channels {
            let channel = graph.channel(id);
            if !runs.run_of.contains_key(&channel.producer()) {
                continue;
            }
            let producer_stage = stage_of(channel.producer());
            let consumer_stages: BTreeSet<StageId> = channel
                .consumers()
                .iter()
                .filter(|c| runs.run_of.contains_key(&c.task))
                .map(|c| stage_of(c.task))
                .collect();

            if !channel.is_reusable() && consumer_stages.len() > 1 {
                return Err(PlanningError::non_reusable_fan_out(format!(
                    "{channel} cannot feed consumers in {} stages",
                    consumer_stages.len()
                )));
            }

            let between = consumer_stages.iter().any(|&s| s != producer_stage);
            graph.channel_mut(id).set_between_stages(between);
        }

        let starting_stages = stages
            .iter()
            .filter(|s| s.predecessors.is_empty())
            .map(|s| s.id)
            .collect();

        Ok(ExecutionPlan {
            graph,
            stages,
            starting_stages,
            splits: runs.splits,
        })
    }

    /// Record for every stage the innermost loop whose body contains it.
    ///
    /// The body of a loop are the stages reachable from the consumers of the
    /// head's iteration outputs, without passing through the head stage or
    /// the consumers of its final outputs.
    fn assign_loop_bodies(graph: &TaskGraph, stages: &mut [ExecutionStage]) {
        let mut bodies: Vec<(StageId, HashSet<StageId>)> = Vec::new();

        for head_stage in stages.iter() {
            let Some(task) = head_stage.loop_head else { continue };
            let Some(head) = graph.task(task).loop_head() else { continue };

            let mut entries = Vec::new();
            let mut stops = HashSet::from([head_stage.id]);
            for (channel, consumer) in graph.consumers_of(task) {
                let Some(stage) = graph.task(consumer.task).stage() else { continue };
                let output = graph.channel(channel).producer_output();
                if head.loop_body_outputs().contains(&output) {
                    entries.push(stage);
                } else if head.final_loop_outputs().contains(&output) {
                    stops.insert(stage);
                }
            }
            entries.retain(|stage| !stops.contains(stage));

            let body = reach(stages, &entries, &stops);
            tracing::debug!(head = %head_stage.id, body = body.len(), "loop body resolved");
            bodies.push((head_stage.id, body));
        }

        // Outer loops first so inner bodies overwrite them
        bodies.sort_by_key(|(head, body)| (Reverse(body.len()), *head));
        for (head, body) in bodies {
            for stage in body {
                stages[stage.0].loop_head_stage = Some(head);
            }
        }
    }
}

/// Stages reachable along successor edges from `from`, never entering `stops`
fn reach(stages: &[ExecutionStage], from: &[StageId], stops: &HashSet<StageId>) -> HashSet<StageId> {
    let mut seen: HashSet<StageId> = from.iter().copied().collect();
    let mut queue: VecDeque<StageId> = from.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        for &next in &stages[id.0].successors {
            if !stops.contains(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanningErrorKind;
    use crate::execution::channel::ChannelDescriptor;
    use crate::test_util::{
        circular_graph, java, loop_graph, postgres, side_output_loop_graph, spark,
        zig_zag_graph, PassThrough,
    };
    use std::sync::Arc;

    fn names(plan: &ExecutionPlan, tasks: &[TaskId]) -> Vec<String> {
        tasks
            .iter()
            .map(|&t| plan.graph().task(t).name().to_string())
            .collect()
    }

    fn assert_acyclic(plan: &ExecutionPlan) {
        assert_eq!(plan.topological_order().len(), plan.stage_count());
        for stage in plan.stages() {
            for succ in stage.successors() {
                assert!(succ > &stage.id(), "{} -> {} breaks id order", stage.id(), succ);
            }
        }
    }

    #[test]
    fn test_single_platform_single_stage() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let map = graph.add_task(Arc::new(PassThrough::new("map", java())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        graph.connect(source, 0, map, 0).unwrap();
        graph.connect(map, 0, sink, 0).unwrap();

        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();

        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.starting_stages(), &[StageId(0)]);
        let stage = plan.stage(StageId(0));
        assert_eq!(stage.tasks().len(), 3);
        assert_eq!(stage.start_tasks(), &[source]);
        assert_eq!(stage.terminal_tasks(), &[sink]);
        assert_eq!(plan.graph().task(map).stage(), Some(StageId(0)));
        assert!(plan.graph().channels().all(|c| !c.is_between_stages()));
        assert_eq!(plan.splits(), 0);
    }

    #[test]
    fn test_circular_platform_assignment() {
        let plan = StageAssignmentTraversal::assign(circular_graph()).unwrap();
        assert_acyclic(&plan);

        let stages: Vec<Vec<String>> = plan
            .stages()
            .iter()
            .map(|s| names(&plan, s.tasks()))
            .collect();
        assert_eq!(
            stages,
            vec![
                vec!["source-a"],
                vec!["map-b"],
                vec!["map-c"],
                vec!["map-a", "join-a", "sink-a"],
            ]
        );
        assert_eq!(plan.starting_stages(), &[StageId(0)]);

        let last = plan.stage(StageId(3));
        assert_eq!(names(&plan, last.start_tasks()), vec!["map-a"]);
        assert_eq!(names(&plan, last.terminal_tasks()), vec!["sink-a"]);
        assert_eq!(last.predecessors(), &[StageId(0), StageId(2)]);
    }

    #[test]
    fn test_zig_zag() {
        let plan = StageAssignmentTraversal::assign(zig_zag_graph()).unwrap();
        assert_acyclic(&plan);

        assert_eq!(plan.starting_stages().len(), 1);
        let start = plan.stage(plan.starting_stages()[0]);
        assert_eq!(names(&plan, start.start_tasks()), vec!["source-a"]);
        assert_eq!(start.successors().len(), 2);
        assert_eq!(plan.stage_count(), 5);
    }

    #[test]
    fn test_barrier_insertion_is_idempotent() {
        let plan = zig_zag_graph();
        plan.validate().unwrap();
        let (graph, sinks) = plan.into_parts();
        let traversal = StageAssignmentTraversal { graph, sinks };

        let mut runs = RunGraph::build(&traversal.graph, traversal.collect_tasks());
        assert!(runs.resolve_cycles().unwrap() > 0);
        assert_eq!(runs.resolve_cycles().unwrap(), 0);
        assert!(runs.find_cycle().is_none());
    }

    #[test]
    fn test_platform_boundaries() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", postgres())));
        let map = graph.add_task(Arc::new(PassThrough::new("map", spark())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        let first = graph.connect(source, 0, map, 0).unwrap();
        graph.connect(map, 0, sink, 0).unwrap();

        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();
        assert_eq!(plan.stage_count(), 3);
        assert!(plan.graph().channel(first).is_between_stages());
        assert!(!plan.graph().channel(first).is_stage_execution_barrier());
        assert_eq!(plan.stage_of(sink).unwrap().platform(), &java());

        let levels = plan.parallel_stages();
        assert_eq!(levels.len(), 3);
    }

    #[test]
    fn test_explicit_barrier_splits_platform() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        let channel = graph.connect(source, 0, sink, 0).unwrap();
        graph.mark_stage_execution_barrier(channel);

        let plan =
            StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph)).unwrap();
        assert_eq!(plan.stage_count(), 2);
        assert!(plan.graph().channel(channel).is_between_stages());
    }

    #[test]
    fn test_loop_head_isolation() {
        let (plan, ids) = loop_graph(3);
        let plan = StageAssignmentTraversal::assign(plan).unwrap();
        assert_acyclic(&plan);

        let head_stage = plan.stage_of(ids.head).unwrap();
        assert_eq!(head_stage.tasks(), &[ids.head]);
        assert_eq!(head_stage.loop_head(), Some(ids.head));
        assert_eq!(head_stage.predecessors(), &[plan.stage_of(ids.source).unwrap().id()]);

        let step_stage = plan.stage_of(ids.step).unwrap();
        assert_eq!(head_stage.feedback_sources(), &[step_stage.id()]);
        assert_eq!(step_stage.loop_head_stage(), Some(head_stage.id()));

        let sink_stage = plan.stage_of(ids.sink).unwrap();
        assert!(!sink_stage.is_in_loop());
        assert!(!plan.stage_of(ids.source).unwrap().is_in_loop());

        let feedback = plan.graph().task(ids.head).input_channel(2).unwrap();
        assert!(plan.graph().channel(feedback).is_stage_execution_barrier());
    }

    #[test]
    fn test_loop_body_includes_stages_off_the_feedback_path() {
        let (plan, ids, side, _) = side_output_loop_graph(3);
        let plan = StageAssignmentTraversal::assign(plan).unwrap();
        assert_acyclic(&plan);

        let head_stage = plan.stage_of(ids.head).unwrap().id();
        let side_stage = plan.stage_of(side).unwrap();
        assert_eq!(side_stage.predecessors(), &[plan.stage_of(ids.step).unwrap().id()]);
        assert_eq!(side_stage.loop_head_stage(), Some(head_stage));
        assert_eq!(
            plan.stage_of(ids.step).unwrap().loop_head_stage(),
            Some(head_stage)
        );
        assert!(!plan.stage_of(ids.sink).unwrap().is_in_loop());
        assert!(!plan.stage(head_stage).is_in_loop());
    }

    #[test]
    fn test_data_cycle_outside_loop() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let join = graph.add_task(Arc::new(PassThrough::with_arity("join", java(), 2, 1)));
        let map = graph.add_task(Arc::new(PassThrough::new("map", java())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        graph.connect(source, 0, join, 0).unwrap();
        graph.connect(join, 0, map, 0).unwrap();
        graph.connect(map, 0, join, 1).unwrap();
        graph.connect(map, 0, sink, 0).unwrap();

        let err = StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph))
            .unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::DataCycle);
    }

    #[test]
    fn test_missing_producer() {
        let mut graph = TaskGraph::new();
        let map = graph.add_task(Arc::new(PassThrough::new("map", java())));
        let sink = graph.add_task(Arc::new(PassThrough::sink("sink", java())));
        graph.connect(map, 0, sink, 0).unwrap();

        let err = StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph))
            .unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::MissingProducer);
    }

    #[test]
    fn test_non_reusable_fan_out() {
        let mut graph = TaskGraph::new();
        let source = graph.add_task(Arc::new(PassThrough::source("source", java())));
        let local = graph.add_task(Arc::new(PassThrough::sink("local", java())));
        let remote = graph.add_task(Arc::new(PassThrough::sink("remote", spark())));
        graph
            .connect_with(source, 0, local, 0, ChannelDescriptor::stream())
            .unwrap();
        graph.connect(source, 0, remote, 0).unwrap();

        let err = StageAssignmentTraversal::assign(PreliminaryExecutionPlan::from_graph(graph))
            .unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::NonReusableFanOut);
    }

    #[test]
    fn test_summary_json() {
        let plan = StageAssignmentTraversal::assign(circular_graph()).unwrap();
        let json = plan.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["stages"].as_array().unwrap().len(), 4);
        assert_eq!(value["starting_stages"][0], 0);
        assert_eq!(value["stages"][0]["platform"], "java");
        assert!(plan.to_string().contains("stage#0 @java {source-a}"));
    }
}
