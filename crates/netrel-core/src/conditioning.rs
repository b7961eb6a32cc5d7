//! The Conditioning Solver: breaks a diamond's re-convergent dependency by enumerating every
//! binary state of its breaking cutset and re-invoking the Belief Engine on the conditioned
//! sub-problem.
//!
//! Conditioning a node means forcing it to a definite alive/dead state rather than letting its
//! belief propagate in from its own parents: the sub-graph built per state severs every
//! in-diamond edge *into* a cutset node, which is what turns that node into a source of the
//! sub-problem whose prior is the enumerated 0.0 or 1.0 rather than its real marginal.

use indexmap::{IndexMap, IndexSet};

use crate::cache::{BeliefCache, CacheKey};
use crate::config::PropagationConfig;
use crate::cutset;
use crate::diamond::{self, Diamond};
use crate::error::{InternalError, Result};
use crate::graph::{EdgeId, Graph, NodeId};
use crate::topology;

use crate::belief::{self, BeliefMap};

/// Resolve the belief contribution `join` receives through `diamond`, by conditioning on the
/// diamond's breaking cutset and weighting each of the `2^|cutset|` resulting sub-problems by
/// the probability of that cutset state actually occurring.
///
/// `frozen` is the set of nodes already conditioned by an enclosing call, forwarded so the
/// recursive sub-problem doesn't re-discover and re-condition on them (see
/// [`crate::diamond::identify_with_frozen`]).
pub(crate) fn update_diamond_join(
    graph: &Graph,
    diamond: &Diamond,
    join: NodeId,
    beliefs: &BeliefMap,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<f64> {
    let cutset = cutset::find_cutset(diamond, join);
    if !cutset::is_diamond_free(diamond, join, &cutset) {
        let cutset: Vec<NodeId> = cutset.into_iter().collect();
        tracing::error!(
            join = %join,
            ?cutset,
            edge_count = diamond.edgelist.len(),
            "cutset did not eliminate diamond structure; this is a Cutset Finder bug"
        );
        return Err(InternalError::CutsetInsufficient { join, cutset }.into());
    }
    let cutset: Vec<NodeId> = {
        let mut c: Vec<NodeId> = cutset.into_iter().collect();
        c.sort_unstable();
        c
    };

    let span = tracing::info_span!(
        "update_diamond_join",
        join = %join,
        cutset_size = cutset.len()
    );
    let _enter = span.enter();

    let mut cutset_weight = Vec::with_capacity(cutset.len());
    for &n in &cutset {
        let belief = beliefs.get(n).ok_or_else(|| {
            tracing::error!(
                join = %join,
                node = %n,
                "cutset node belief missing during conditioning; topological order was violated"
            );
            InternalError::MissingBeliefForCutsetNode(n)
        })?;
        cutset_weight.push(belief);
    }

    let base_priors = base_priors(graph, diamond, join, &cutset, beliefs)?;
    let edges = residual_edges(diamond, &cutset);

    let mut child_frozen = frozen.clone();
    child_frozen.extend(cutset.iter().copied());

    let states = 1u32 << cutset.len();
    let contributions = evaluate_states(
        states, &cutset, &cutset_weight, &base_priors, &edges, join, graph, cache, config,
        &child_frozen,
    )?;
    Ok(contributions.into_iter().sum())
}

/// Evaluate every cutset enumeration state's `join_belief * state_probability` contribution.
/// States are independent (§4.5/§5): under the `parallel` feature and `config.parallel`, they
/// are fanned out across the cache's shared, per-key-locked map; otherwise evaluated in order.
#[cfg(feature = "parallel")]
#[allow(clippy::too_many_arguments)]
fn evaluate_states(
    states: u32,
    cutset: &[NodeId],
    cutset_weight: &[f64],
    base_priors: &IndexMap<NodeId, f64>,
    edges: &[EdgeId],
    join: NodeId,
    graph: &Graph,
    cache: &BeliefCache,
    config: &PropagationConfig,
    child_frozen: &IndexSet<NodeId>,
) -> Result<Vec<f64>> {
    use rayon::prelude::*;

    if config.parallel {
        (0..states)
            .into_par_iter()
            .map(|mask| {
                evaluate_one_state(
                    mask, cutset, cutset_weight, base_priors, edges, join, graph, cache, config,
                    child_frozen,
                )
            })
            .collect()
    } else {
        (0..states)
            .map(|mask| {
                evaluate_one_state(
                    mask, cutset, cutset_weight, base_priors, edges, join, graph, cache, config,
                    child_frozen,
                )
            })
            .collect()
    }
}

#[cfg(not(feature = "parallel"))]
#[allow(clippy::too_many_arguments)]
fn evaluate_states(
    states: u32,
    cutset: &[NodeId],
    cutset_weight: &[f64],
    base_priors: &IndexMap<NodeId, f64>,
    edges: &[EdgeId],
    join: NodeId,
    graph: &Graph,
    cache: &BeliefCache,
    config: &PropagationConfig,
    child_frozen: &IndexSet<NodeId>,
) -> Result<Vec<f64>> {
    (0..states)
        .map(|mask| {
            evaluate_one_state(
                mask, cutset, cutset_weight, base_priors, edges, join, graph, cache, config,
                child_frozen,
            )
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn evaluate_one_state(
    mask: u32,
    cutset: &[NodeId],
    cutset_weight: &[f64],
    base_priors: &IndexMap<NodeId, f64>,
    edges: &[EdgeId],
    join: NodeId,
    graph: &Graph,
    cache: &BeliefCache,
    config: &PropagationConfig,
    child_frozen: &IndexSet<NodeId>,
) -> Result<f64> {
    let (state_probability, priors) = state_priors(cutset, cutset_weight, base_priors, mask);
    if state_probability == 0.0 {
        // Degenerate but valid: a cutset node with belief 0.0 or 1.0 makes the complementary
        // state impossible; skip the sub-problem evaluation entirely.
        return Ok(0.0);
    }

    let sub_graph = build_sub_graph(graph, edges, &priors)?;
    let key = CacheKey::new(edges, &priors, config.prior_rounding_bits);
    let belief_map = cache
        .get_or_compute(key, || evaluate_sub_problem(&sub_graph, cache, config, child_frozen))?;

    let join_belief = belief_map
        .get(join)
        .expect("join node is always present in its own conditioned sub-problem's belief map");
    Ok(join_belief * state_probability)
}

/// Priors shared by every enumeration state: the join's residual self-survival is applied
/// once outside (it's folded into the outer `node_prior[join]` multiplication in
/// [`crate::belief::update_node`]), every non-cutset/non-join node keeps its real prior, and
/// any fresh source the cutset algorithm left unconditioned (never happens with the current
/// cutset-equals-fork-roots strategy, but the data model allows it) takes its already-computed
/// marginal belief instead.
fn base_priors(
    graph: &Graph,
    diamond: &Diamond,
    join: NodeId,
    cutset: &[NodeId],
    beliefs: &BeliefMap,
) -> Result<IndexMap<NodeId, f64>> {
    let mut priors = IndexMap::new();
    for &node in &diamond.relevant_nodes {
        if node == join {
            priors.insert(node, 1.0);
            continue;
        }
        if cutset.contains(&node) {
            continue; // overridden per enumeration state
        }
        if diamond.highest_nodes.contains(&node) {
            let belief = beliefs.get(node).ok_or_else(|| {
                tracing::error!(
                    join = %join,
                    node = %node,
                    "fresh-source belief missing while building conditioned priors"
                );
                InternalError::MissingBeliefForCutsetNode(node)
            })?;
            priors.insert(node, belief);
            continue;
        }
        let prior = graph
            .node_prior(node)
            .ok_or(crate::error::InputError::MissingPrior(node))?;
        priors.insert(node, prior);
    }
    Ok(priors)
}

/// Every edge in `diamond` whose destination is not a cutset node. Edges into a cutset node
/// are severed so that node becomes a source of the conditioned sub-problem, fixed to its
/// enumerated state rather than derived from its own parents.
fn residual_edges(diamond: &Diamond, cutset: &[NodeId]) -> Vec<EdgeId> {
    diamond
        .edgelist
        .iter()
        .copied()
        .filter(|&(_, dst)| !cutset.contains(&dst))
        .collect()
}

/// Overlay one cutset enumeration state onto `base_priors`, returning the state's probability
/// of occurring alongside the full per-node prior assignment for this state's sub-problem.
fn state_priors(
    cutset: &[NodeId],
    cutset_weight: &[f64],
    base_priors: &IndexMap<NodeId, f64>,
    mask: u32,
) -> (f64, Vec<(NodeId, f64)>) {
    let mut priors: Vec<(NodeId, f64)> = base_priors.iter().map(|(&n, &p)| (n, p)).collect();
    let mut state_probability = 1.0;
    for (i, (&node, &weight)) in cutset.iter().zip(cutset_weight).enumerate() {
        let alive = mask & (1 << i) != 0;
        priors.push((node, if alive { 1.0 } else { 0.0 }));
        state_probability *= if alive { weight } else { 1.0 - weight };
    }
    (state_probability, priors)
}

fn build_sub_graph(graph: &Graph, edges: &[EdgeId], priors: &[(NodeId, f64)]) -> Result<Graph> {
    let mut builder = Graph::builder();
    for &(node, prior) in priors {
        builder = builder.node_prior(node, prior);
    }
    for &(src, dst) in edges {
        let prob = graph
            .edge_prob((src, dst))
            .ok_or(crate::error::InputError::MissingEdgeProbability { src, dst })?;
        builder = builder.edge(src, dst, prob);
    }
    builder.build()
}

fn evaluate_sub_problem(
    sub_graph: &Graph,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<BeliefMap> {
    let sub_topology = topology::analyze(sub_graph)?;
    let sub_diamonds = diamond::identify_with_frozen(sub_graph, &sub_topology, frozen);
    belief::run_belief_engine(sub_graph, &sub_topology, &sub_diamonds, cache, config, frozen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::propagate;
    use pretty_assertions::assert_eq;

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

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn diamond_join_matches_closed_form() {
        let g = build(
            &[(1, 2, 0.9), (1, 3, 0.9), (2, 4, 0.9), (3, 4, 0.9)],
            &[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)],
        );
        let beliefs = propagate(&g).unwrap();
        assert_close(beliefs.get(NodeId(4)).unwrap(), 0.9639);
    }

    #[test]
    fn cache_is_reused_across_conditioning_states() {
        // A wider diamond with two independent fork-rooted sub-diamonds below it shares
        // identical sub-problems across several of the outer enumeration states, so the
        // cache should see at least one hit over the whole run.
        let g = build(
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
        let beliefs = propagate(&g).unwrap();
        assert_close(beliefs.get(NodeId(7)).unwrap(), 0.9639 * 0.9639);
    }
}
