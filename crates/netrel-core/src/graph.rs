//! The caller-facing graph model: nodes, edges, priors, and transmission probabilities.
//!
//! Mirrors the shape of [`crate::belief::BeliefMap`] deliberately: both are `NodeId`-keyed,
//! both are owned by the caller's propagation run, and both are built once and read many
//! times by the rest of the engine.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::error::{InputError, Result};

/// Opaque node identifier. Dense or sparse ids are both accepted; nothing in the engine
/// assumes contiguity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Construct a `NodeId` from a raw integer.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The underlying integer value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A directed edge, identified by its ordered endpoints. Not a newtype: the (src, dst) pair
/// is itself a stable, hashable key used directly as a map key throughout the engine.
pub type EdgeId = (NodeId, NodeId);

/// A directed acyclic graph with a per-node survival prior and a per-edge transmission
/// probability.
///
/// Construct via [`Graph::builder`]. All invariants in the data model (acyclicity, complete
/// priors/probabilities, mutual-inverse adjacency, exactly-the-sources-have-no-parents) are
/// enforced by [`GraphBuilder::build`]; a `Graph` that exists is always valid.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    edges: Vec<EdgeId>,
    out_adj: IndexMap<NodeId, IndexSet<NodeId>>,
    in_adj: IndexMap<NodeId, IndexSet<NodeId>>,
    sources: IndexSet<NodeId>,
    node_prior: IndexMap<NodeId, f64>,
    edge_prob: IndexMap<EdgeId, f64>,
}

impl Graph {
    /// Start building a graph.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// All edges, in the order they were added.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// All node ids, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.out_adj.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.out_adj.len()
    }

    /// Parents (direct predecessors) of `v`. Empty for sources.
    pub fn parents(&self, v: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.in_adj
            .get(&v)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Children (direct successors) of `v`.
    pub fn children(&self, v: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.out_adj
            .get(&v)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// In-degree of `v`.
    pub fn in_degree(&self, v: NodeId) -> usize {
        self.in_adj.get(&v).map_or(0, IndexSet::len)
    }

    /// Out-degree of `v`.
    pub fn out_degree(&self, v: NodeId) -> usize {
        self.out_adj.get(&v).map_or(0, IndexSet::len)
    }

    /// A fork is a node with out-degree >= 2.
    pub fn is_fork(&self, v: NodeId) -> bool {
        self.out_degree(v) >= 2
    }

    /// A join is a node with in-degree >= 2.
    pub fn is_join(&self, v: NodeId) -> bool {
        self.in_degree(v) >= 2
    }

    /// Nodes with no incoming edges.
    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }

    /// Survival prior of `v`, if declared.
    pub fn node_prior(&self, v: NodeId) -> Option<f64> {
        self.node_prior.get(&v).copied()
    }

    /// Transmission probability of edge `(src, dst)`, if declared.
    pub fn edge_prob(&self, edge: EdgeId) -> Option<f64> {
        self.edge_prob.get(&edge).copied()
    }

    /// All `(fork_set, join_set)` nodes, in ascending `NodeId` order.
    ///
    /// fork = out-degree >= 2; join = in-degree >= 2.
    pub fn identify_fork_and_join(&self) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut forks: Vec<NodeId> = self.nodes().filter(|&v| self.is_fork(v)).collect();
        let mut joins: Vec<NodeId> = self.nodes().filter(|&v| self.is_join(v)).collect();
        forks.sort_unstable();
        joins.sort_unstable();
        (forks, joins)
    }
}

/// Builder for [`Graph`], validating all data-model invariants on [`GraphBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct GraphBuilder {
    edges: Vec<EdgeId>,
    edge_prob: IndexMap<EdgeId, f64>,
    node_prior: IndexMap<NodeId, f64>,
    declared_nodes: IndexSet<NodeId>,
}

impl GraphBuilder {
    /// Add an edge `src -> dst` with the given transmission probability.
    pub fn edge(mut self, src: impl Into<NodeId>, dst: impl Into<NodeId>, prob: f64) -> Self {
        let src = src.into();
        let dst = dst.into();
        self.declared_nodes.insert(src);
        self.declared_nodes.insert(dst);
        self.edges.push((src, dst));
        self.edge_prob.insert((src, dst), prob);
        self
    }

    /// Declare a node's survival prior. Nodes appearing only as edge endpoints still need a
    /// prior declared here before [`build`](Self::build) succeeds.
    pub fn node_prior(mut self, id: impl Into<NodeId>, prior: f64) -> Self {
        let id = id.into();
        self.declared_nodes.insert(id);
        self.node_prior.insert(id, prior);
        self
    }

    /// Declare an isolated node with no edges (rare, but not forbidden: an isolated node is
    /// trivially its own source).
    pub fn node(mut self, id: impl Into<NodeId>) -> Self {
        self.declared_nodes.insert(id.into());
        self
    }

    /// Validate and construct the [`Graph`].
    ///
    /// Checks, in order: no self-loops, no duplicate edges, every node has a prior in
    /// `[0, 1]`, every edge has a probability in `[0, 1]`, the graph is acyclic, and the
    /// derived adjacency maps are mutual inverses (always true by construction, checked as a
    /// defensive assertion).
    pub fn build(self) -> Result<Graph> {
        let mut seen_edges = IndexSet::new();
        for &(src, dst) in &self.edges {
            if src == dst {
                return Err(InputError::SelfLoop(src).into());
            }
            if !seen_edges.insert((src, dst)) {
                return Err(InputError::DuplicateEdge { src, dst }.into());
            }
        }

        let mut out_adj: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
        let mut in_adj: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
        for &node in &self.declared_nodes {
            out_adj.entry(node).or_default();
            in_adj.entry(node).or_default();
        }
        for &(src, dst) in &self.edges {
            out_adj.entry(src).or_default().insert(dst);
            in_adj.entry(dst).or_default().insert(src);
        }

        for (&node, &value) in &self.node_prior {
            if !(0.0..=1.0).contains(&value) {
                return Err(InputError::OutOfRange {
                    what: format!("node {node} prior"),
                    value,
                }
                .into());
            }
        }
        for (&node, _) in &out_adj {
            if !self.node_prior.contains_key(&node) {
                return Err(InputError::MissingPrior(node).into());
            }
        }

        for (&(src, dst), &prob) in &self.edge_prob {
            if !(0.0..=1.0).contains(&prob) {
                return Err(InputError::OutOfRange {
                    what: format!("edge {src}->{dst} probability"),
                    value: prob,
                }
                .into());
            }
        }
        for &(src, dst) in &self.edges {
            if !self.edge_prob.contains_key(&(src, dst)) {
                return Err(InputError::MissingEdgeProbability { src, dst }.into());
            }
        }

        let sources: IndexSet<NodeId> = out_adj
            .keys()
            .copied()
            .filter(|&n| in_adj.get(&n).is_none_or(IndexSet::is_empty))
            .collect();

        detect_cycle(&out_adj)?;

        for (&node, children) in &out_adj {
            for &child in children {
                if !in_adj.get(&child).is_some_and(|p| p.contains(&node)) {
                    return Err(InputError::InconsistentAdjacency(node).into());
                }
            }
        }

        Ok(Graph {
            edges: self.edges,
            out_adj,
            in_adj,
            sources,
            node_prior: self.node_prior,
            edge_prob: self.edge_prob,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Done,
}

/// DFS-based cycle detection, reporting one offending cycle (source node first) if found.
fn detect_cycle(out_adj: &IndexMap<NodeId, IndexSet<NodeId>>) -> Result<()> {
    let mut state: IndexMap<NodeId, VisitState> = IndexMap::new();
    let mut path: Vec<NodeId> = Vec::new();

    for &start in out_adj.keys() {
        if state.contains_key(&start) {
            continue;
        }
        if let Some(cycle) = dfs_visit(start, out_adj, &mut state, &mut path) {
            return Err(InputError::CycleDetected(cycle).into());
        }
    }
    Ok(())
}

/// Recursive DFS, recursion depth bounded by the longest simple path in the graph.
fn dfs_visit(
    node: NodeId,
    out_adj: &IndexMap<NodeId, IndexSet<NodeId>>,
    state: &mut IndexMap<NodeId, VisitState>,
    path: &mut Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    state.insert(node, VisitState::Visiting);
    path.push(node);

    if let Some(children) = out_adj.get(&node) {
        for &child in children {
            match state.get(&child) {
                Some(VisitState::Visiting) => {
                    let start = path.iter().position(|&n| n == child).expect("on path");
                    let mut cycle = path[start..].to_vec();
                    cycle.push(child);
                    return Some(cycle);
                }
                Some(VisitState::Done) => continue,
                None => {
                    if let Some(cycle) = dfs_visit(child, out_adj, state, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    path.pop();
    state.insert(node, VisitState::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, InputError};

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
    fn sources_have_no_parents() {
        let g = diamond();
        assert_eq!(g.sources().iter().copied().collect::<Vec<_>>(), vec![NodeId(1)]);
        assert_eq!(g.parents(NodeId(1)).count(), 0);
    }

    #[test]
    fn fork_and_join_detection() {
        let g = diamond();
        let (forks, joins) = g.identify_fork_and_join();
        assert_eq!(forks, vec![NodeId(1)]);
        assert_eq!(joins, vec![NodeId(4)]);
    }

    #[test]
    fn parents_and_children_are_consistent() {
        let g = diamond();
        let mut children_of_1: Vec<_> = g.children(NodeId(1)).collect();
        children_of_1.sort();
        assert_eq!(children_of_1, vec![NodeId(2), NodeId(3)]);

        let mut parents_of_4: Vec<_> = g.parents(NodeId(4)).collect();
        parents_of_4.sort();
        assert_eq!(parents_of_4, vec![NodeId(2), NodeId(3)]);
    }

    #[test]
    fn self_loop_rejected() {
        let err = Graph::builder()
            .node_prior(1, 1.0)
            .edge(1, 1, 0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Input(InputError::SelfLoop(NodeId(1)))));
    }

    #[test]
    fn duplicate_edge_rejected() {
        let err = Graph::builder()
            .node_prior(1, 1.0)
            .node_prior(2, 1.0)
            .edge(1, 2, 0.5)
            .edge(1, 2, 0.7)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::DuplicateEdge {
                src: NodeId(1),
                dst: NodeId(2)
            })
        ));
    }

    #[test]
    fn missing_prior_rejected() {
        let err = Graph::builder().edge(1, 2, 0.5).build().unwrap_err();
        assert!(matches!(err, Error::Input(InputError::MissingPrior(_))));
    }

    #[test]
    fn out_of_range_prior_rejected() {
        let err = Graph::builder()
            .node_prior(1, 1.2)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Input(InputError::OutOfRange { .. })));
    }

    #[test]
    fn cycle_detected() {
        let err = Graph::builder()
            .node_prior(1, 1.0)
            .node_prior(2, 1.0)
            .node_prior(3, 1.0)
            .edge(1, 2, 0.9)
            .edge(2, 3, 0.9)
            .edge(3, 1, 0.9)
            .build()
            .unwrap_err();
        match err {
            Error::Input(InputError::CycleDetected(cycle)) => {
                assert!(cycle.len() >= 3);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn isolated_node_is_its_own_source() {
        let g = Graph::builder().node_prior(1, 1.0).node(1).build().unwrap();
        assert_eq!(g.node_count(), 1);
        assert!(g.sources().contains(&NodeId(1)));
    }
}
