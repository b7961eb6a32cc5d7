//! Monte-Carlo Validator: an independent reference implementation used only to check the
//! exact Belief Engine against, never to replace it.
//!
//! Each trial samples every node and edge as an independent Bernoulli, walks the surviving
//! subgraph forward by BFS from the surviving sources, and tallies which nodes were reached.
//! Averaging over many trials converges to the same belief the exact engine computes in one
//! pass; the two are compared directly in `tests/agreement.rs`-style integration tests.

use std::collections::VecDeque;

use indexmap::IndexMap;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::belief::BeliefMap;
use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Estimate per-node reachability by Monte-Carlo simulation over `n` trials.
///
/// `seed` makes a run reproducible: the same graph, `n`, and seed always produce the same
/// `BeliefMap`. Pass `None` to seed from OS entropy instead.
pub fn mc_estimate(graph: &Graph, n: u64, seed: Option<u64>) -> Result<BeliefMap> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut hits: IndexMap<NodeId, u64> = graph.nodes().map(|n| (n, 0u64)).collect();

    for _ in 0..n {
        run_trial(graph, &mut rng, &mut hits);
    }

    let mut beliefs = BeliefMap::default();
    for node in graph.nodes() {
        beliefs.insert(node, hits[&node] as f64 / n as f64);
    }
    Ok(beliefs)
}

fn run_trial(graph: &Graph, rng: &mut StdRng, hits: &mut IndexMap<NodeId, u64>) {
    let node_active: IndexMap<NodeId, bool> = graph
        .nodes()
        .map(|node| {
            let prior = graph.node_prior(node).unwrap_or(0.0);
            (node, rng.random_bool(prior))
        })
        .collect();

    let mut queue: VecDeque<NodeId> = VecDeque::new();
    let mut reached: IndexMap<NodeId, bool> = IndexMap::new();
    for &source in graph.sources() {
        if node_active[&source] {
            reached.insert(source, true);
            queue.push_back(source);
        }
    }

    while let Some(node) = queue.pop_front() {
        for child in graph.children(node) {
            if reached.contains_key(&child) {
                continue;
            }
            if !node_active[&child] {
                continue;
            }
            let edge_prob = graph.edge_prob((node, child)).unwrap_or(0.0);
            if rng.random_bool(edge_prob) {
                reached.insert(child, true);
                queue.push_back(child);
            }
        }
    }

    for node in graph.nodes() {
        let survived = if graph.sources().contains(&node) {
            node_active[&node]
        } else {
            reached.contains_key(&node)
        };
        if survived {
            *hits.get_mut(&node).expect("every node has a hit counter") += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn reproducible_with_a_fixed_seed() {
        let g = build(
            &[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)],
        );
        let a = mc_estimate(&g, 5_000, Some(7)).unwrap();
        let b = mc_estimate(&g, 5_000, Some(7)).unwrap();
        for node in g.nodes() {
            assert_eq!(a.get(node), b.get(node));
        }
    }

    #[test]
    fn source_belief_matches_its_prior_in_expectation() {
        let g = build(&[(1, 2, 0.9)], &[(1, 0.3), (2, 1.0)]);
        let beliefs = mc_estimate(&g, 200_000, Some(42)).unwrap();
        assert!((beliefs.get(NodeId(1)).unwrap() - 0.3).abs() < 0.01);
    }

    #[test]
    fn classic_diamond_converges_to_the_closed_form() {
        let g = build(
            &[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)],
        );
        let beliefs = mc_estimate(&g, 200_000, Some(123)).unwrap();
        // exact value is 0.9639; 4*sqrt(p(1-p)/n) bound at n=2e5 is well under 0.01
        assert!((beliefs.get(NodeId(4)).unwrap() - 0.9639).abs() < 0.01);
    }

    #[test]
    fn disconnected_nodes_never_accumulate_hits() {
        let g = build(
            &[(1, 2, 0.9), (2, 3, 0.9)],
            &[(1, 1.0), (2, 0.0), (3, 1.0)],
        );
        let beliefs = mc_estimate(&g, 10_000, Some(1)).unwrap();
        assert_eq!(beliefs.get(NodeId(3)).unwrap(), 0.0);
    }
}
