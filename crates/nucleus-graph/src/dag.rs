use std::collections::HashMap;

use nucleus_domain::ComponentName;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::GraphError;

fn node_index(
    graph: &mut DiGraph<ComponentName, ()>,
    index_of: &mut HashMap<ComponentName, NodeIndex>,
    name: &ComponentName,
) -> NodeIndex {
    *index_of
        .entry(name.clone())
        .or_insert_with(|| graph.add_node(name.clone()))
}

/// Builds a dependency DAG from `(dependent, dependency)` edges and returns
/// a topological order (dependencies before dependents). Used both to
/// forbid cyclic component graphs at recipe-parse time (§9) and by
/// Orchestrator to order START/STOP phases (§4.5).
///
/// Cycle detection runs before the topological sort is attempted, per §9 —
/// `toposort` would also detect the cycle, but checking explicitly first
/// keeps the error path independent of petgraph's internal algorithm choice.
pub fn topological_order(
    edges: &[(ComponentName, ComponentName)],
) -> Result<Vec<ComponentName>, GraphError> {
    let mut graph: DiGraph<ComponentName, ()> = DiGraph::new();
    let mut index_of: HashMap<ComponentName, NodeIndex> = HashMap::new();

    for (dependent, dependency) in edges {
        let from = node_index(&mut graph, &mut index_of, dependency);
        let to = node_index(&mut graph, &mut index_of, dependent);
        graph.add_edge(from, to, ());
    }

    if is_cyclic_directed(&graph) {
        return Err(GraphError::Cycle);
    }

    let order = toposort(&graph, None).map_err(|_| GraphError::Cycle)?;
    Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ComponentName {
        ComponentName::new(s).unwrap()
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let edges = vec![(name("CustomerApp"), name("Mosquitto"))];
        let order = topological_order(&edges).unwrap();
        let mosquitto_pos = order.iter().position(|n| n == &name("Mosquitto")).unwrap();
        let app_pos = order.iter().position(|n| n == &name("CustomerApp")).unwrap();
        assert!(mosquitto_pos < app_pos);
    }

    #[test]
    fn detects_cycle() {
        let edges = vec![
            (name("A"), name("B")),
            (name("B"), name("A")),
        ];
        assert!(matches!(topological_order(&edges), Err(GraphError::Cycle)));
    }
}
