//! Breaking-cutset search: the minimal(-effort) set of nodes whose conditioning removes all
//! remaining fork/join multi-path structure from a diamond.
//!
//! Works directly over edge lists rather than a [`crate::graph::Graph`], since a diamond's
//! induced subgraph has no priors of its own yet -- those are assigned later by the
//! Conditioning Solver once a cutset is known.

use indexmap::{IndexMap, IndexSet};

use crate::diamond::Diamond;
use crate::graph::{EdgeId, NodeId};

/// Find a cutset for `diamond`, converging at `join`.
///
/// Starts from the diamond's fork roots (`highest_nodes`) -- always sufficient on their own
/// for a single-level diamond -- then greedily adds any internal fork still producing
/// multi-path structure in the residual subgraph, until conditioning on the accumulated set
/// leaves no diamond behind. Minimality is not attempted: the reference design accepts any
/// set that breaks every remaining diamond.
pub fn find_cutset(diamond: &Diamond, join: NodeId) -> IndexSet<NodeId> {
    let mut cutset: IndexSet<NodeId> = diamond.highest_nodes.clone();

    loop {
        let residual = residual_edges(diamond, &cutset);
        if !has_diamond_structure(&residual, join) {
            return cutset;
        }

        let (residual_out, _) = adjacency(&residual);
        let extra_fork = diamond
            .relevant_nodes
            .iter()
            .copied()
            .filter(|n| *n != join && !cutset.contains(n))
            .find(|n| residual_out.get(n).is_some_and(|children| children.len() >= 2));

        match extra_fork {
            Some(node) => {
                cutset.insert(node);
            }
            // No candidate left to add; the caller (Conditioning Solver) is responsible for
            // detecting that this cutset did not in fact break every diamond.
            None => return cutset,
        }
    }
}

/// Whether conditioning on `cutset` already breaks every diamond in `diamond`, without
/// searching for one to add. Used by the Conditioning Solver to validate a cutset before
/// trusting it.
pub fn is_diamond_free(diamond: &Diamond, join: NodeId, cutset: &IndexSet<NodeId>) -> bool {
    !has_diamond_structure(&residual_edges(diamond, cutset), join)
}

fn residual_edges(diamond: &Diamond, cutset: &IndexSet<NodeId>) -> Vec<EdgeId> {
    diamond
        .edgelist
        .iter()
        .copied()
        .filter(|&(src, dst)| !cutset.contains(&src) && !cutset.contains(&dst))
        .collect()
}

fn adjacency(
    edges: &[EdgeId],
) -> (
    IndexMap<NodeId, IndexSet<NodeId>>,
    IndexMap<NodeId, IndexSet<NodeId>>,
) {
    let mut out_adj: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    let mut in_adj: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    for &(src, dst) in edges {
        out_adj.entry(src).or_default().insert(dst);
        in_adj.entry(dst).or_default().insert(src);
        out_adj.entry(dst).or_default();
        in_adj.entry(src).or_default();
    }
    (out_adj, in_adj)
}

fn reachable(adj: &IndexMap<NodeId, IndexSet<NodeId>>, start: NodeId) -> IndexSet<NodeId> {
    let mut visited = IndexSet::new();
    let mut stack = vec![start];
    visited.insert(start);
    while let Some(node) = stack.pop() {
        if let Some(neighbors) = adj.get(&node) {
            for &neighbor in neighbors {
                if visited.insert(neighbor) {
                    stack.push(neighbor);
                }
            }
        }
    }
    visited
}

fn has_diamond_structure(edges: &[EdgeId], join: NodeId) -> bool {
    if edges.is_empty() {
        return false;
    }
    let (out_adj, in_adj) = adjacency(edges);
    let ancestors_of_join = reachable(&in_adj, join);

    let mut forks: Vec<NodeId> = ancestors_of_join
        .iter()
        .copied()
        .filter(|n| out_adj.get(n).is_some_and(|children| children.len() >= 2))
        .collect();
    forks.sort_unstable();

    forks.into_iter().any(|fork| {
        let forward = reachable(&out_adj, fork);
        let co_reachable: IndexSet<NodeId> =
            forward.intersection(&ancestors_of_join).copied().collect();
        out_adj
            .get(&fork)
            .map(|children| children.iter().filter(|c| co_reachable.contains(c)).count())
            .unwrap_or(0)
            >= 2
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diamond;
    use crate::graph::Graph;
    use crate::topology;

    fn build(edges: &[(u64, u64, f64)], priors: &[(u64, f64)]) -> Graph {
        let mut builder = Graph::builder();
        for &(node, prior) in priors {
            builder = builder.node_prior(node, prior);
        }
        for &(src, dst, prob) in edges {
            builder = builder.edge(src, dst, prob);
        }
        builder.build().unwrap()
    }

    #[test]
    fn classic_diamond_cutset_is_the_fork_root() {
        let graph = build(
            &[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)],
        );
        let topo = topology::analyze(&graph).unwrap();
        let diamonds = diamond::identify(&graph, &topo);
        let d = &diamonds[&NodeId(4)].diamonds[0];

        let cutset = find_cutset(d, NodeId(4));
        assert_eq!(cutset, IndexSet::from([NodeId(1)]));
        assert!(is_diamond_free(d, NodeId(4), &cutset));
    }

    #[test]
    fn nested_outer_diamond_needs_both_fork_roots() {
        let graph = build(
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
        let topo = topology::analyze(&graph).unwrap();
        let diamonds = diamond::identify(&graph, &topo);
        let at_7 = &diamonds[&NodeId(7)];
        let outer = at_7
            .diamonds
            .iter()
            .max_by_key(|d| d.edgelist.len())
            .unwrap();
        assert_eq!(outer.edgelist.len(), 8);

        let cutset = find_cutset(outer, NodeId(7));
        assert_eq!(cutset, IndexSet::from([NodeId(1), NodeId(4)]));
        assert!(is_diamond_free(outer, NodeId(7), &cutset));
    }

    #[test]
    fn inner_diamond_cutset_is_just_its_own_fork_root() {
        let graph = build(
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
        let topo = topology::analyze(&graph).unwrap();
        let diamonds = diamond::identify(&graph, &topo);
        let at_7 = &diamonds[&NodeId(7)];
        let inner = at_7
            .diamonds
            .iter()
            .min_by_key(|d| d.edgelist.len())
            .unwrap();
        assert_eq!(inner.edgelist.len(), 4);

        let cutset = find_cutset(inner, NodeId(7));
        assert_eq!(cutset, IndexSet::from([NodeId(4)]));
    }
}
