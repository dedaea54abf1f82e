use crate::compute::Ledger;
use crate::graph::{Edge, ExecutionPlan, NodeId, PlanNode};
use crate::store::Key;
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the dependency tree below one Field with the values the run
/// produced. Nodes reachable along several paths are printed once and
/// referenced afterwards.
pub fn format_trace(plan: &ExecutionPlan, ledger: &Ledger, target: &Key) -> String {
    let mut tracer = Tracer { plan, ledger, visited_at_level: HashMap::new(), output: String::new() };

    match plan.graph.field_node(target) {
        Some(node) => {
            let _ = writeln!(tracer.output, "AUDIT TRACE for {}:", target);
            let _ = writeln!(tracer.output, "--------------------------------------------------");
            tracer.trace_node(node, 1, "", None);
        }
        None => {
            let _ = writeln!(tracer.output, "Error: {} is not in the plan", target);
        }
    }
    tracer.output
}

struct Tracer<'a> {
    plan: &'a ExecutionPlan,
    ledger: &'a Ledger,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl Tracer<'_> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str, via: Option<&Edge>) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let label = match via {
            Some(Edge::Dependency(role)) => format!("{}: ", role),
            Some(Edge::Child) => "child: ".to_string(),
            _ => String::new(),
        };
        let node = self.plan.graph.node(node_id);
        let _ = writeln!(self.output, "{}[L{}] {}{}{}", prefix, level, label, node, self.format_value(node_id));

        if !matches!(node, PlanNode::Load(_)) {
            let inputs = self.plan.graph.inputs(node_id);
            self.recurse_inputs(prefix, &inputs, level);
        }
    }

    fn recurse_inputs(&mut self, prefix: &str, inputs: &[(NodeId, &Edge)], level: usize) {
        let stem = self.build_child_stem(prefix);
        for (i, &(input, edge)) in inputs.iter().enumerate() {
            let connector = if i == inputs.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{} ", stem, connector);
            self.trace_node(input, level + 1, &full_prefix, Some(edge));
        }
    }

    fn format_value(&self, id: NodeId) -> String {
        match self.ledger.get(id) {
            Some(Ok(v)) => format!(" [{:.3}]", v),
            Some(Err(e)) => format!(" [Err: {}]", e),
            None => String::new(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}
