//! Shared DAG fixtures for `netrel-core`'s tests and benchmarks.
//!
//! Grounded on `csvizmo-test`'s role (a small test-support crate depended on by every other
//! crate's test suite) but with different contents: that crate wraps `assert_cmd` for CLI
//! testing, which this workspace has no CLI surface for. Instead this crate builds the six
//! concrete seed-scenario graphs and a parameterized layered-diamond generator used by
//! `netrel-core`'s property tests and `benches/propagate.rs`.

use netrel_core::Graph;

/// A single edge `(src, dst, prob)` with a uniform per-node prior of 1.0, for fixtures that
/// only vary edge probabilities.
fn uniform_prior_graph(edges: &[(u64, u64, f64)]) -> Graph {
    let mut nodes = std::collections::BTreeSet::new();
    for &(src, dst, _) in edges {
        nodes.insert(src);
        nodes.insert(dst);
    }
    let mut builder = Graph::builder();
    for node in nodes {
        builder = builder.node_prior(node, 1.0);
    }
    for &(src, dst, prob) in edges {
        builder = builder.edge(src, dst, prob);
    }
    builder.build().expect("fixture graphs are well-formed")
}

/// Seed scenario 1: a single edge `1 -> 2` with probability 0.9.
pub fn single_edge() -> Graph {
    uniform_prior_graph(&[(1, 2, 0.9)])
}

/// Seed scenario 2: a series of two edges, with node 2's prior reduced to 0.8.
pub fn series_of_two_edges() -> Graph {
    Graph::builder()
        .node_prior(1, 1.0)
        .node_prior(2, 0.8)
        .node_prior(3, 1.0)
        .edge(1, 2, 0.9)
        .edge(2, 3, 0.9)
        .build()
        .expect("fixture graphs are well-formed")
}

/// Seed scenario 3: the classic diamond, `1 -> {2, 3} -> 4`, all priors 1.0, all edges 0.9.
pub fn classic_diamond() -> Graph {
    uniform_prior_graph(&[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)])
}

/// Seed scenario 4: the classic diamond with the fork's own prior reduced to 0.9.
pub fn diamond_with_reduced_fork_prior() -> Graph {
    Graph::builder()
        .node_prior(1, 0.9)
        .node_prior(2, 1.0)
        .node_prior(3, 1.0)
        .node_prior(4, 1.0)
        .edge(1, 2, 0.9)
        .edge(1, 3, 0.9)
        .edge(2, 4, 0.9)
        .edge(3, 4, 0.9)
        .build()
        .expect("fixture graphs are well-formed")
}

/// Seed scenario 5: two independent sources `{1, 2}` converging on a single sink `3`.
pub fn two_independent_sources() -> Graph {
    uniform_prior_graph(&[(1, 3, 0.9), (2, 3, 0.9)])
}

/// Seed scenario 6: two stacked classic diamonds sharing node 4 as both the inner sink and
/// the outer fork (`1..4` then `4..7`).
pub fn nested_diamond() -> Graph {
    uniform_prior_graph(&[
        (1, 2, 0.9),
        (1, 3, 0.9),
        (2, 4, 0.9),
        (3, 4, 0.9),
        (4, 5, 0.9),
        (4, 6, 0.9),
        (5, 7, 0.9),
        (6, 7, 0.9),
    ])
}

/// All six seed scenarios from the spec, for tests that want to run the same assertion
/// (e.g. "every belief is in `[0, 1]`") across the whole corpus.
pub fn all_seed_scenarios() -> Vec<Graph> {
    vec![
        single_edge(),
        series_of_two_edges(),
        classic_diamond(),
        diamond_with_reduced_fork_prior(),
        two_independent_sources(),
        nested_diamond(),
    ]
}

/// A chain of `depth` classic diamonds stacked end to end: diamond `i`'s fork is diamond
/// `i - 1`'s sink (so they share one node, exactly as [`nested_diamond`] does for `depth = 2`),
/// giving `1 + 3*depth` nodes in total. Every node prior is 1.0, every edge probability is
/// `edge_prob`.
///
/// Used by `benches/propagate.rs` to measure how propagation time scales with the number of
/// nested conditioning levels the Conditioning Solver has to recurse through.
pub fn layered_diamond_chain(depth: usize, edge_prob: f64) -> Graph {
    assert!(depth >= 1, "a chain needs at least one diamond");

    let mut builder = Graph::builder().node_prior(1u64, 1.0);
    let mut fork = 1u64;
    for _ in 0..depth {
        let left = fork + 1;
        let right = fork + 2;
        let sink = fork + 3;
        builder = builder
            .node_prior(left, 1.0)
            .node_prior(right, 1.0)
            .node_prior(sink, 1.0)
            .edge(fork, left, edge_prob)
            .edge(fork, right, edge_prob)
            .edge(left, sink, edge_prob)
            .edge(right, sink, edge_prob);
        fork = sink;
    }
    builder.build().expect("layered diamond chains are well-formed")
}

/// A single join fed by `width` independent, single-edge sources, each with `edge_prob`
/// transmission probability. No diamond structure: exercises the non-diamond-parent
/// inclusion-exclusion path at a join with high fan-in.
pub fn fan_in_join(width: usize, edge_prob: f64) -> Graph {
    assert!(width >= 2, "a join needs at least two parents");

    let sink = width as u64 + 1;
    let mut builder = Graph::builder().node_prior(sink, 1.0);
    for source in 1..=width as u64 {
        builder = builder.node_prior(source, 1.0).edge(source, sink, edge_prob);
    }
    builder.build().expect("fan-in fixtures are well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_scenarios_build_without_error() {
        assert_eq!(all_seed_scenarios().len(), 6);
    }

    #[test]
    fn layered_chain_has_three_times_depth_plus_one_nodes() {
        let g = layered_diamond_chain(3, 0.9);
        assert_eq!(g.node_count(), 3 * 3 + 1);
    }

    #[test]
    fn fan_in_join_has_width_plus_one_nodes() {
        let g = fan_in_join(5, 0.9);
        assert_eq!(g.node_count(), 6);
    }
}
