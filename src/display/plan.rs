use crate::graph::{ExecutionPlan, PlanNode};
use std::fmt::Write;

/// One line per step in execution order, with each step's inputs by
/// position so the listing can be checked by hand.
pub fn format_plan(plan: &ExecutionPlan) -> String {
    let positions = plan.positions();
    let width = plan.order.len().to_string().len();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "EXECUTION PLAN: {} steps ({} fields, {} loads)",
        plan.order.len(),
        plan.graph.field_count(),
        plan.graph.load_count()
    );
    let _ = writeln!(out, "--------------------------------------------------");

    for (i, &id) in plan.order.iter().enumerate() {
        let node = plan.graph.node(id);
        let inputs: Vec<String> = plan
            .graph
            .inputs(id)
            .into_iter()
            .filter_map(|(input, _)| positions.get(&input).map(|p| format!("#{}", p)))
            .collect();
        let marker = match node {
            PlanNode::Load(_) => "L",
            PlanNode::Calculate(_) => "C",
            PlanNode::Propagate(_) => "P",
        };
        if inputs.is_empty() {
            let _ = writeln!(out, "#{:>w$} {} {}", i, marker, node, w = width);
        } else {
            let _ = writeln!(out, "#{:>w$} {} {} <- {}", i, marker, node, inputs.join(", "), w = width);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldRegistry;
    use crate::graph::DependencyGraph;
    use crate::store::{Hemisphere, Ontology, Structure};
    use std::collections::BTreeSet;

    #[test]
    fn test_listing_has_a_line_per_step_and_loads_first() {
        let ontology = Ontology::new(vec![Structure::new(5, None, "only", "O")]).unwrap();
        let set: BTreeSet<_> = [5].into_iter().collect();
        let plan = DependencyGraph::build(
            FieldRegistry::builtin(),
            &ontology,
            &["sum_pixels".to_string()],
            &set,
            &[Hemisphere::Both],
        )
        .unwrap()
        .plan()
        .unwrap();

        let text = format_plan(&plan);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), plan.order.len() + 2);
        assert!(lines[2].contains(" L load "), "{text}");
        assert!(text.contains("<- #0"));
    }
}
