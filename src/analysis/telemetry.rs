use crate::analysis::topology;
use crate::graph::{ExecutionPlan, PlanNode};
use serde::Serialize;
use std::collections::BTreeMap;

/// Shape of an execution plan, computed without touching any data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanTelemetry {
    pub total_steps: usize,
    pub loads: usize,
    pub calculations: usize,
    pub propagations: usize,
    /// Independent groups of steps; each may run on its own worker.
    pub components: usize,
    /// Longest chain of steps, counted in nodes.
    pub critical_path: usize,
    pub fields_by_name: BTreeMap<String, usize>,
    pub loads_by_channel: BTreeMap<String, usize>,
}

impl PlanTelemetry {
    pub fn analyze(plan: &ExecutionPlan) -> Self {
        let mut report = Self { total_steps: plan.order.len(), ..Self::default() };

        for node in plan.steps() {
            match node {
                PlanNode::Load(interval) => {
                    report.loads += 1;
                    *report.loads_by_channel.entry(interval.channel.to_string()).or_insert(0) += 1;
                }
                PlanNode::Calculate(key) | PlanNode::Propagate(key) => {
                    if matches!(node, PlanNode::Calculate(_)) {
                        report.calculations += 1;
                    } else {
                        report.propagations += 1;
                    }
                    *report.fields_by_name.entry(key.field_name.clone()).or_insert(0) += 1;
                }
            }
        }

        report.components = topology::components(&plan.graph.graph, &plan.order).len();
        report.critical_path = Self::critical_path(plan);
        report
    }

    // Order is topological, so one forward pass settles every depth.
    fn critical_path(plan: &ExecutionPlan) -> usize {
        let mut depth = vec![0usize; plan.graph.node_count()];
        let mut longest = 0;
        for &id in &plan.order {
            let d = plan
                .graph
                .inputs(id)
                .iter()
                .map(|(input, _)| depth[input.index()])
                .max()
                .unwrap_or(0)
                + 1;
            depth[id.index()] = d;
            longest = longest.max(d);
        }
        longest
    }
}
