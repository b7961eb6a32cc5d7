//! Diamond identification: finding re-convergent fork/join subgraphs.
//!
//! Adapted from the teacher's `algorithm/diamonds.rs`, which finds re-convergent subgraphs
//! by pairwise lowest-common-ancestor over BFS ancestor sets. The data model here needs a
//! stricter invariant than "some common ancestor" — every relevant node must lie on at least
//! two internally-disjoint paths from a fork to the join — so the search is restated as a
//! co-reachability computation per candidate fork rather than a single LCA pass, but the
//! overall shape (enumerate candidates in ascending id order, canonicalize, dedupe by
//! edgelist identity, group by join) is the teacher's.

use indexmap::{IndexMap, IndexSet};

use crate::graph::{EdgeId, Graph, NodeId};
use crate::topology::Topology;

/// A re-convergent fork/join subgraph: every node in `relevant_nodes` lies on at least two
/// internally-disjoint directed paths from some node in `highest_nodes` to the enclosing join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diamond {
    /// Edges internal to the diamond, in canonical (sorted by `(src, dst)`) order.
    pub edgelist: Vec<EdgeId>,
    /// All nodes touched by `edgelist`.
    pub relevant_nodes: IndexSet<NodeId>,
    /// The subset of `relevant_nodes` with zero in-degree inside the diamond: its fork roots.
    pub highest_nodes: IndexSet<NodeId>,
}

/// Every diamond converging at one join, plus the parents of that join not participating in
/// any of them.
#[derive(Clone, Debug, Default)]
pub struct DiamondsAtJoin {
    /// The join node these diamonds converge at.
    pub join_node: NodeId,
    /// Diamonds at this join, in the order their fork root was encountered (ascending
    /// `NodeId`). May contain one diamond nested inside another, when the graph's topology
    /// has multiple fork roots at different depths feeding the same join.
    pub diamonds: Vec<Diamond>,
    /// Parents of `join_node` whose edge into the join is not covered by any diamond above,
    /// ascending by `NodeId`.
    pub non_diamond_parents: Vec<NodeId>,
}

/// Find every diamond at every join in `graph`, using the ancestor closures already computed
/// by the Topology Preprocessor.
pub fn identify(graph: &Graph, topology: &Topology) -> IndexMap<NodeId, DiamondsAtJoin> {
    identify_with_frozen(graph, topology, &IndexSet::new())
}

/// Find every diamond at every join, excluding `frozen` nodes from fork candidacy.
///
/// Used by the Conditioning Solver when recursing into a conditioned sub-problem: a node it
/// just conditioned on is present in the sub-graph as a source fixed to the enumerated 0.0 or
/// 1.0, purely so its surviving edges still carry signal downstream. It is no longer a genuine
/// random variable at this recursion depth, so re-discovering a diamond rooted at it and
/// conditioning on it again would recurse forever, re-enumerating the same states under the
/// same cache key.
pub(crate) fn identify_with_frozen(
    graph: &Graph,
    topology: &Topology,
    frozen: &IndexSet<NodeId>,
) -> IndexMap<NodeId, DiamondsAtJoin> {
    let (_, joins) = graph.identify_fork_and_join();
    joins
        .into_iter()
        .map(|join| (join, diamonds_at_join(graph, topology, join, frozen)))
        .collect()
}

fn diamonds_at_join(
    graph: &Graph,
    topology: &Topology,
    join: NodeId,
    frozen: &IndexSet<NodeId>,
) -> DiamondsAtJoin {
    let ancestors_of_join = topology
        .ancestors
        .get(&join)
        .cloned()
        .unwrap_or_default();
    let allowed: IndexSet<NodeId> = ancestors_of_join
        .iter()
        .copied()
        .chain(std::iter::once(join))
        .collect();

    let mut fork_candidates: Vec<NodeId> = ancestors_of_join
        .iter()
        .copied()
        .filter(|&f| graph.is_fork(f) && !frozen.contains(&f))
        .collect();
    fork_candidates.sort_unstable();

    let mut seen_edgelists: IndexSet<Vec<EdgeId>> = IndexSet::new();
    let mut diamonds = Vec::new();
    for fork in fork_candidates {
        if let Some(diamond) = try_build_diamond(graph, &allowed, fork, join)
            && seen_edgelists.insert(diamond.edgelist.clone())
        {
            diamonds.push(diamond);
        }
    }

    let mut non_diamond_parents: Vec<NodeId> = graph
        .parents(join)
        .filter(|&parent| {
            !diamonds
                .iter()
                .any(|d| d.edgelist.contains(&(parent, join)))
        })
        .collect();
    non_diamond_parents.sort_unstable();

    DiamondsAtJoin {
        join_node: join,
        diamonds,
        non_diamond_parents,
    }
}

/// A diamond rooted at `fork` and converging at `join` exists iff the co-reachable set
/// (nodes reachable forward from `fork` that can also reach `join`, both restricted to
/// `allowed`) gives `fork` at least two distinct children within that set. The edges induced
/// by the co-reachable set are exactly the union of every directed `fork -> join` path
/// restricted to `allowed` -- the set the reference algorithm builds by explicit per-path BFS.
fn try_build_diamond(
    graph: &Graph,
    allowed: &IndexSet<NodeId>,
    fork: NodeId,
    join: NodeId,
) -> Option<Diamond> {
    let forward_from_fork = reachable_within(graph, fork, allowed, Direction::Forward);
    let backward_from_join = reachable_within(graph, join, allowed, Direction::Backward);
    let co_reachable: IndexSet<NodeId> = forward_from_fork
        .intersection(&backward_from_join)
        .copied()
        .collect();

    let fork_children_in_set = graph
        .children(fork)
        .filter(|c| co_reachable.contains(c))
        .count();
    if fork_children_in_set < 2 {
        return None;
    }

    let mut edgelist: IndexSet<EdgeId> = graph
        .edges()
        .iter()
        .copied()
        .filter(|&(src, dst)| co_reachable.contains(&src) && co_reachable.contains(&dst))
        .collect();

    extend_to_fixed_point(graph, &mut edgelist);

    let mut relevant_nodes: IndexSet<NodeId> = IndexSet::new();
    for &(src, dst) in &edgelist {
        relevant_nodes.insert(src);
        relevant_nodes.insert(dst);
    }

    let highest_nodes: IndexSet<NodeId> = relevant_nodes
        .iter()
        .copied()
        .filter(|&n| !edgelist.iter().any(|&(_, dst)| dst == n))
        .collect();

    let mut canonical: Vec<EdgeId> = edgelist.into_iter().collect();
    canonical.sort_unstable();

    Some(Diamond {
        edgelist: canonical,
        relevant_nodes,
        highest_nodes,
    })
}

/// Pulls in every parent edge of each non-fork node currently in the candidate, repeating
/// until no new edges appear. Forks are exempt: a fork missing some of its parents inside the
/// diamond simply becomes a fresh source of the conditioned sub-problem (its own marginal
/// belief already accounts for everything further upstream), so there is nothing to close.
fn extend_to_fixed_point(graph: &Graph, edgelist: &mut IndexSet<EdgeId>) {
    loop {
        let relevant: IndexSet<NodeId> = edgelist
            .iter()
            .flat_map(|&(src, dst)| [src, dst])
            .collect();

        let mut added = false;
        for node in relevant {
            if graph.is_fork(node) {
                continue;
            }
            for parent in graph.parents(node) {
                if edgelist.insert((parent, node)) {
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

fn reachable_within(
    graph: &Graph,
    start: NodeId,
    allowed: &IndexSet<NodeId>,
    direction: Direction,
) -> IndexSet<NodeId> {
    let mut visited = IndexSet::new();
    let mut stack = vec![start];
    visited.insert(start);
    while let Some(node) = stack.pop() {
        let neighbors: Vec<NodeId> = match direction {
            Direction::Forward => graph.children(node).collect(),
            Direction::Backward => graph.parents(node).collect(),
        };
        for neighbor in neighbors {
            if allowed.contains(&neighbor) && visited.insert(neighbor) {
                stack.push(neighbor);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::topology;

    fn analyze(edges: &[(u64, u64, f64)], priors: &[(u64, f64)]) -> (Graph, Topology) {
        let mut builder = Graph::builder();
        for &(node, prior) in priors {
            builder = builder.node_prior(node, prior);
        }
        for &(src, dst, prob) in edges {
            builder = builder.edge(src, dst, prob);
        }
        let graph = builder.build().unwrap();
        let topo = topology::analyze(&graph).unwrap();
        (graph, topo)
    }

    #[test]
    fn classic_diamond_is_detected() {
        let (graph, topo) = analyze(
            &[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)],
        );
        let diamonds = identify(&graph, &topo);
        let at_4 = &diamonds[&NodeId(4)];
        assert_eq!(at_4.diamonds.len(), 1);
        assert!(at_4.non_diamond_parents.is_empty());

        let d = &at_4.diamonds[0];
        assert_eq!(d.highest_nodes, IndexSet::from([NodeId(1)]));
        let mut nodes: Vec<_> = d.relevant_nodes.iter().copied().collect();
        nodes.sort_unstable();
        assert_eq!(nodes, vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
    }

    #[test]
    fn chain_has_no_diamond() {
        let (graph, topo) = analyze(
            &[(1, 2, 0.9), (2, 3, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0)],
        );
        let diamonds = identify(&graph, &topo);
        assert!(diamonds.is_empty());
    }

    #[test]
    fn independent_sources_are_not_a_diamond() {
        let (graph, topo) = analyze(
            &[(1, 3, 0.9), (2, 3, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0)],
        );
        let diamonds = identify(&graph, &topo);
        let at_3 = &diamonds[&NodeId(3)];
        assert!(at_3.diamonds.is_empty());
        assert_eq!(at_3.non_diamond_parents, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn nested_diamonds_are_both_emitted_at_the_shared_join() {
        let (graph, topo) = analyze(
            &[
                (1, 2, 0.9),
                (1, 3, 0.9),
                (2, 4, 0.9),
                (3, 4, 0.9),
                (4, 5, 0.9),
                (4, 6, 0.9),
                (5, 7, 0.9),
                (6, 7, 0.9),
            ],
            &[
                (1, 1.0),
                (2, 1.0),
                (3, 1.0),
                (4, 1.0),
                (5, 1.0),
                (6, 1.0),
                (7, 1.0),
            ],
        );
        let diamonds = identify(&graph, &topo);

        let at_4 = &diamonds[&NodeId(4)];
        assert_eq!(at_4.diamonds.len(), 1);
        assert_eq!(at_4.diamonds[0].edgelist.len(), 4);

        let at_7 = &diamonds[&NodeId(7)];
        assert_eq!(at_7.diamonds.len(), 2);
        let mut sizes: Vec<_> = at_7.diamonds.iter().map(|d| d.edgelist.len()).collect();
        sizes.sort_unstable();
        // the fork-root-4 inner diamond (4 edges) and the fork-root-1 outer diamond
        // that swallows the whole graph (8 edges).
        assert_eq!(sizes, vec![4, 8]);
    }

    #[test]
    fn extension_pulls_in_single_parent_feeder_chains() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4 is the diamond at 4; node 3 additionally has an
        // upstream-only feeder 0 -> 3 that must be pulled into the diamond because 3 is a
        // non-fork node inside it.
        let (graph, topo) = analyze(
            &[(0, 3, 0.9), (1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[
                (0, 1.0),
                (1, 1.0),
                (2, 1.0),
                (3, 1.0),
                (4, 1.0),
            ],
        );
        let diamonds = identify(&graph, &topo);
        let at_4 = &diamonds[&NodeId(4)];
        assert_eq!(at_4.diamonds.len(), 1);
        let d = &at_4.diamonds[0];
        assert!(d.edgelist.contains(&(NodeId(0), NodeId(3))));
        assert!(d.relevant_nodes.contains(&NodeId(0)));
        assert!(d.highest_nodes.contains(&NodeId(0)));
        assert!(d.highest_nodes.contains(&NodeId(1)));
    }

    #[test]
    fn empty_graph_has_no_diamonds() {
        let graph = Graph::default();
        let topo = topology::analyze(&graph).unwrap();
        assert!(identify(&graph, &topo).is_empty());
    }
}
