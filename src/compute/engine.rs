//! engine.rs
//! Executes an `ExecutionPlan`: batched window loads, leaf `calculate`,
//! and non-leaf `propagate`, each Field written exactly once.

use super::ledger::{FieldValue, Ledger};
use super::loader::{ChannelSet, LoadStats, RetryPolicy, WindowLoader};
use super::propagator::{propagate_node, settled};
use crate::analysis::topology;
use crate::error::{ComputationError, UnionizeError};
use crate::fields::{FieldContract, FieldInputs, FieldRegistry};
use crate::graph::{DependencyGraph, Edge, ExecutionPlan, NodeId, PlanNode};
use crate::store::{IntervalIndex, Key, VoxelRange};
use rayon::prelude::*;
use tracing::{debug, error, warn};

pub struct ComputationEngine<'a> {
    plan: &'a ExecutionPlan,
    registry: &'a FieldRegistry,
    intervals: &'a IntervalIndex,
    channels: &'a ChannelSet,
    policy: RetryPolicy,
    capacity: Option<usize>,
}

impl<'a> ComputationEngine<'a> {
    pub fn new(
        plan: &'a ExecutionPlan,
        registry: &'a FieldRegistry,
        intervals: &'a IntervalIndex,
        channels: &'a ChannelSet,
    ) -> Self {
        Self { plan, registry, intervals, channels, policy: RetryPolicy::default(), capacity: None }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on valid voxel indices, on top of each channel's length.
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Runs the whole plan. Independent components (no shared edges) run on
    /// the rayon pool when `parallel` is set; each keeps the global order.
    pub fn run(&self, parallel: bool) -> Result<(Ledger, LoadStats), UnionizeError> {
        let components = topology::components(&self.plan.graph.graph, &self.plan.order);
        debug!(components = components.len(), parallel, "running plan");

        let results: Vec<Result<(Ledger, LoadStats), UnionizeError>> = if parallel && components.len() > 1 {
            components.par_iter().map(|c| self.run_component(c)).collect()
        } else {
            components.iter().map(|c| self.run_component(c)).collect()
        };

        let mut ledger = Ledger::with_capacity(self.plan.graph.node_count());
        let mut stats = LoadStats::default();
        for result in results {
            let (part, part_stats) = result?;
            // Components are disjoint, so this cannot collide.
            if let Err(e) = ledger.absorb(part) {
                error!(error = %e, "component ledgers overlap");
            }
            stats.merge(&part_stats);
        }
        Ok((ledger, stats))
    }

    /// Walks one component's steps in order. Consecutive `Load` steps are
    /// handed to the loader as one batch.
    fn run_component(&self, order: &[NodeId]) -> Result<(Ledger, LoadStats), UnionizeError> {
        let graph = &self.plan.graph;
        let mut loader = WindowLoader::new(graph, self.intervals, self.channels, self.policy, self.capacity);
        let mut ledger = Ledger::with_capacity(graph.node_count());

        let mut i = 0;
        while i < order.len() {
            if !graph.node(order[i]).is_field() {
                let start = i;
                while i < order.len() && !graph.node(order[i]).is_field() {
                    i += 1;
                }
                loader.load_batch(&order[start..i])?;
                continue;
            }

            let node = order[i];
            let result = match graph.node(node) {
                PlanNode::Calculate(key) => self
                    .contract(key)
                    .and_then(|c| calculate_node(graph, &ledger, &loader, self.intervals, c, node, key)),
                PlanNode::Propagate(key) => self.contract(key).and_then(|c| propagate_node(graph, &ledger, c, node, key)),
                PlanNode::Load(_) => unreachable!("loads are batched above"),
            };
            if let Err(e) = &result {
                warn!(field = %graph.node(node), error = %e, "field failed");
            }
            if let Err(e) = ledger.insert(node, result) {
                error!(field = %graph.node(node), error = %e, "field visited twice");
            }

            for (input, edge) in graph.inputs(node) {
                if *edge == Edge::Interval {
                    loader.release(input);
                }
            }
            i += 1;
        }

        Ok((ledger, loader.stats().clone()))
    }

    fn contract(&self, key: &Key) -> Result<&'a dyn FieldContract, ComputationError> {
        self.registry
            .get(&key.field_name)
            .map(|c| c.as_ref())
            .map_err(|e| ComputationError::MissingInput(e.to_string()))
    }
}

/// Leaf value: the structure's windows plus dependency values.
///
/// Every window of one Field must cover the same number of voxels; the
/// kernels pair values by position.
fn calculate_node(
    graph: &DependencyGraph,
    ledger: &Ledger,
    loader: &WindowLoader<'_>,
    intervals: &IntervalIndex,
    contract: &dyn FieldContract,
    node: NodeId,
    key: &Key,
) -> FieldValue {
    let mut inputs = FieldInputs::new(VoxelRange::default());
    let mut expected: Option<usize> = None;
    for (input, edge) in graph.inputs(node) {
        if *edge != Edge::Interval {
            continue;
        }
        if let PlanNode::Load(interval) = graph.node(input) {
            let window = loader.window(input)?;
            match expected {
                None => expected = Some(window.len()),
                Some(len) if len != window.len() => {
                    return Err(ComputationError::RangeMismatch {
                        key: key.clone(),
                        channel: interval.channel,
                        expected: len,
                        got: window.len(),
                    });
                }
                Some(_) => {}
            }
            if let Some(range) = intervals.get(interval) {
                inputs.range = range;
            }
            inputs.push_channel(interval.channel, window);
        }
    }
    collect_dependencies(graph, ledger, node, &mut inputs)?;
    contract.calculate(key, &inputs)
}

/// Adds every `Dependency` input of `node` to `inputs` under its role.
pub(crate) fn collect_dependencies(
    graph: &DependencyGraph,
    ledger: &Ledger,
    node: NodeId,
    inputs: &mut FieldInputs<'_>,
) -> Result<(), ComputationError> {
    for (dep, edge) in graph.inputs(node) {
        if let Edge::Dependency(role) = edge {
            inputs.push_field(*role, settled(graph, ledger, dep)?);
        }
    }
    Ok(())
}
