//! Topological level assignment and ancestor/descendant closures.
//!
//! The graph is already validated acyclic by [`crate::graph::GraphBuilder::build`]; this
//! module turns that acyclic adjacency into the derived structures the rest of the engine
//! reads over and over: iteration sets (for the belief-update walk order) and full
//! ancestor/descendant closures (for diamond identification and cutset checks).

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use crate::error::{InputError, Result};
use crate::graph::{Graph, NodeId};

/// An ordered partition of all nodes by topological depth: level 0 is the sources, level
/// `i` holds nodes whose longest-path distance from any source is exactly `i`.
#[derive(Clone, Debug, Default)]
pub struct IterationSets(Vec<Vec<NodeId>>);

impl IterationSets {
    /// The levels, in ascending depth order. Nodes within a level are sorted ascending by id.
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.0
    }

    /// Total number of levels.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// Derived structures produced once per propagation run by the Topology Preprocessor.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    /// Nodes partitioned by topological depth.
    pub iteration_sets: IterationSets,
    /// Full transitive predecessor closure per node (excludes the node itself).
    pub ancestors: IndexMap<NodeId, IndexSet<NodeId>>,
    /// Full transitive successor closure per node (excludes the node itself).
    pub descendants: IndexMap<NodeId, IndexSet<NodeId>>,
    /// Nodes in a valid topological order (parents before children). Used internally by
    /// ancestor/descendant construction and exposed for callers that want a deterministic
    /// full-graph walk order without recomputing one.
    pub topo_order: Vec<NodeId>,
    level_of: IndexMap<NodeId, usize>,
}

impl Topology {
    /// Topological depth of `v`, if present.
    pub fn level_of(&self, v: NodeId) -> Option<usize> {
        self.level_of.get(&v).copied()
    }
}

/// Run the Topology Preprocessor: Kahn-style level assignment plus ancestor/descendant
/// closures, computed in a single topological pass each.
pub fn analyze(graph: &Graph) -> Result<Topology> {
    let (level_of, topo_order) = compute_levels(graph)?;
    let iteration_sets = build_iteration_sets(&level_of);
    let ancestors = compute_ancestors(graph, &topo_order);
    let descendants = compute_descendants(graph, &topo_order);

    Ok(Topology {
        iteration_sets,
        ancestors,
        descendants,
        topo_order,
        level_of,
    })
}

/// Kahn's algorithm, tracking `level[v] = 1 + max(level[parent])` (0 for sources) as nodes
/// are dequeued. Acyclicity (already enforced by [`Graph`]) guarantees every node is visited
/// exactly once.
fn compute_levels(graph: &Graph) -> Result<(IndexMap<NodeId, usize>, Vec<NodeId>)> {
    let mut remaining_in_degree: IndexMap<NodeId, usize> =
        graph.nodes().map(|n| (n, graph.in_degree(n))).collect();
    let mut level: IndexMap<NodeId, usize> = IndexMap::new();
    let mut topo_order = Vec::with_capacity(graph.node_count());

    let mut queue: VecDeque<NodeId> = graph.sources().iter().copied().collect();
    for &source in graph.sources() {
        level.insert(source, 0);
    }

    while let Some(node) = queue.pop_front() {
        topo_order.push(node);
        let node_level = level[&node];
        for child in graph.children(node) {
            let child_level = level.entry(child).or_insert(0);
            *child_level = (*child_level).max(node_level + 1);

            let remaining = remaining_in_degree
                .get_mut(&child)
                .expect("every child has a remaining in-degree entry");
            *remaining -= 1;
            if *remaining == 0 {
                queue.push_back(child);
            }
        }
    }

    if topo_order.len() != graph.node_count() {
        // Every node not reached has a parent that never reached in-degree zero, which can
        // only happen if the graph were cyclic -- excluded by construction -- or if a
        // non-source node declared with `GraphBuilder::node` has no path from any source.
        for node in graph.nodes() {
            if !level.contains_key(&node) {
                return Err(InputError::NonSourceWithoutParent(node).into());
            }
        }
    }

    Ok((level, topo_order))
}

fn build_iteration_sets(level: &IndexMap<NodeId, usize>) -> IterationSets {
    let Some(&max_level) = level.values().max() else {
        return IterationSets(Vec::new());
    };
    let mut sets: Vec<Vec<NodeId>> = vec![Vec::new(); max_level + 1];
    for (&node, &lvl) in level {
        sets[lvl].push(node);
    }
    for set in &mut sets {
        set.sort_unstable();
    }
    IterationSets(sets)
}

fn compute_ancestors(graph: &Graph, topo_order: &[NodeId]) -> IndexMap<NodeId, IndexSet<NodeId>> {
    let mut ancestors: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    for &node in topo_order {
        let mut closure = IndexSet::new();
        for parent in graph.parents(node) {
            closure.insert(parent);
            if let Some(parent_closure) = ancestors.get(&parent) {
                closure.extend(parent_closure.iter().copied());
            }
        }
        ancestors.insert(node, closure);
    }
    ancestors
}

fn compute_descendants(
    graph: &Graph,
    topo_order: &[NodeId],
) -> IndexMap<NodeId, IndexSet<NodeId>> {
    let mut descendants: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    for &node in topo_order.iter().rev() {
        let mut closure = IndexSet::new();
        for child in graph.children(node) {
            closure.insert(child);
            if let Some(child_closure) = descendants.get(&child) {
                closure.extend(child_closure.iter().copied());
            }
        }
        descendants.insert(node, closure);
    }
    descendants
}

/// Defensive re-validation of every invariant in the data model, against an already-built
/// [`Graph`] and [`Topology`]. `propagate` runs this before the belief engine so that a
/// caller never observes a partially-computed `BeliefMap` built over inconsistent derived
/// structures.
pub fn validate(graph: &Graph, topology: &Topology) -> Result<()> {
    for node in graph.nodes() {
        match graph.node_prior(node) {
            Some(p) if (0.0..=1.0).contains(&p) => {}
            Some(p) => {
                return Err(InputError::OutOfRange {
                    what: format!("node {node} prior"),
                    value: p,
                }
                .into());
            }
            None => return Err(InputError::MissingPrior(node).into()),
        }
    }

    for &(src, dst) in graph.edges() {
        match graph.edge_prob((src, dst)) {
            Some(p) if (0.0..=1.0).contains(&p) => {}
            Some(p) => {
                return Err(InputError::OutOfRange {
                    what: format!("edge {src}->{dst} probability"),
                    value: p,
                }
                .into());
            }
            None => return Err(InputError::MissingEdgeProbability { src, dst }.into()),
        }
    }

    for &source in graph.sources() {
        if graph.in_degree(source) != 0 {
            return Err(InputError::SourceWithParent(source).into());
        }
    }
    for node in graph.nodes() {
        if !graph.sources().contains(&node) && graph.in_degree(node) == 0 {
            return Err(InputError::NonSourceWithoutParent(node).into());
        }
    }

    for node in graph.nodes() {
        for child in graph.children(node) {
            if !graph.parents(child).any(|p| p == node) {
                return Err(InputError::InconsistentAdjacency(node).into());
            }
        }
    }

    let mut seen = IndexSet::new();
    for level in topology.iteration_sets.levels() {
        for &node in level {
            if !seen.insert(node) {
                return Err(InputError::InconsistentAdjacency(node).into());
            }
        }
    }
    for node in graph.nodes() {
        if !seen.contains(&node) {
            return Err(InputError::InconsistentAdjacency(node).into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Graph {
        Graph::builder()
            .node_prior(1, 1.0)
            .node_prior(2, 1.0)
            .node_prior(3, 1.0)
            .node_prior(4, 1.0)
            .edge(1, 2, 0.9)
            .edge(1, 3, 0.9)
            .edge(2, 4, 0.9)
            .edge(3, 4, 0.9)
            .build()
            .unwrap()
    }

    #[test]
    fn levels_follow_longest_path() {
        let g = diamond();
        let topo = analyze(&g).unwrap();
        assert_eq!(topo.level_of(NodeId(1)), Some(0));
        assert_eq!(topo.level_of(NodeId(2)), Some(1));
        assert_eq!(topo.level_of(NodeId(3)), Some(1));
        assert_eq!(topo.level_of(NodeId(4)), Some(2));
        assert_eq!(topo.iteration_sets.depth(), 3);
        assert_eq!(topo.iteration_sets.levels()[1], vec![NodeId(2), NodeId(3)]);
    }

    #[test]
    fn ancestors_and_descendants_are_full_closures() {
        let g = diamond();
        let topo = analyze(&g).unwrap();

        let mut anc4: Vec<_> = topo.ancestors[&NodeId(4)].iter().copied().collect();
        anc4.sort();
        assert_eq!(anc4, vec![NodeId(1), NodeId(2), NodeId(3)]);

        let mut desc1: Vec<_> = topo.descendants[&NodeId(1)].iter().copied().collect();
        desc1.sort();
        assert_eq!(desc1, vec![NodeId(2), NodeId(3), NodeId(4)]);

        assert!(topo.ancestors[&NodeId(1)].is_empty());
        assert!(topo.descendants[&NodeId(4)].is_empty());
    }

    #[test]
    fn longest_path_wins_over_shortest() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4, and additionally 3 -> 5 -> 4 so 4's level is
        // determined by the *longest* parent chain (via 5), not the shortest (via 2).
        let g = Graph::builder()
            .node_prior(1, 1.0)
            .node_prior(2, 1.0)
            .node_prior(3, 1.0)
            .node_prior(4, 1.0)
            .node_prior(5, 1.0)
            .edge(1, 2, 0.9)
            .edge(1, 3, 0.9)
            .edge(2, 4, 0.9)
            .edge(3, 4, 0.9)
            .edge(3, 5, 0.9)
            .edge(5, 4, 0.9)
            .build()
            .unwrap();
        let topo = analyze(&g).unwrap();
        assert_eq!(topo.level_of(NodeId(5)), Some(2));
        assert_eq!(topo.level_of(NodeId(4)), Some(3));
    }

    #[test]
    fn validate_accepts_well_formed_topology() {
        let g = diamond();
        let topo = analyze(&g).unwrap();
        validate(&g, &topo).unwrap();
    }

    #[test]
    fn isolated_node_gets_level_zero() {
        let g = Graph::builder().node_prior(1, 1.0).node(1).build().unwrap();
        let topo = analyze(&g).unwrap();
        assert_eq!(topo.level_of(NodeId(1)), Some(0));
        assert_eq!(topo.iteration_sets.depth(), 1);
    }
}
