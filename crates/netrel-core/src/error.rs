//! Error types returned by the library.
//!
//! Most public APIs return [`crate::Result`], which uses [`Error`] as the error type. The two
//! sub-taxonomies mirror the propagation policy: [`InputError`] variants are caused by the
//! caller's graph/prior/probability inputs and always surface unmodified; [`InternalError`]
//! variants indicate a bug in this crate (an invariant the algorithm itself is supposed to
//! maintain was violated) and are logged with `tracing::error!` before being returned.

use thiserror::Error;

use crate::graph::NodeId;

/// Convenient result alias for the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top level error surfaced by the library's public APIs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller's graph, priors, or edge probabilities violate an input invariant.
    #[error(transparent)]
    Input(#[from] InputError),

    /// The propagation algorithm violated one of its own invariants.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Errors caused by the caller-supplied graph, priors, or edge probabilities.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InputError {
    /// The graph is not acyclic; `cycle` lists one offending cycle, source node first.
    #[error("graph contains a cycle: {0:?}")]
    CycleDetected(Vec<NodeId>),

    /// A node has no entry in the prior-probability map.
    #[error("node {0} has no prior survival probability")]
    MissingPrior(NodeId),

    /// An edge has no entry in the transmission-probability map.
    #[error("edge {src}->{dst} has no transmission probability")]
    MissingEdgeProbability {
        /// Edge source.
        src: NodeId,
        /// Edge destination.
        dst: NodeId,
    },

    /// A prior or edge probability fell outside `[0, 1]`.
    #[error("{what} is {value}, outside the valid range [0, 1]")]
    OutOfRange {
        /// Human-readable description of the value that was out of range.
        what: String,
        /// The offending value.
        value: f64,
    },

    /// A node's out/in adjacency entries are not mutual inverses.
    #[error("adjacency maps disagree for node {0}: out/in edge sets are not mutual inverses")]
    InconsistentAdjacency(NodeId),

    /// A node is not a declared source but has no incoming edges.
    #[error("node {0} is not a source but has no parents")]
    NonSourceWithoutParent(NodeId),

    /// A node is a declared source but has incoming edges.
    #[error("node {0} is declared a source but has incoming edges")]
    SourceWithParent(NodeId),

    /// An edge's source and destination are the same node.
    #[error("self-loop on node {0} is not permitted in a DAG")]
    SelfLoop(NodeId),

    /// The same (src, dst) pair was supplied more than once.
    #[error("duplicate edge {src}->{dst}")]
    DuplicateEdge {
        /// Edge source.
        src: NodeId,
        /// Edge destination.
        dst: NodeId,
    },
}

/// Errors indicating a bug in the propagation algorithm itself, not in the caller's input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InternalError {
    /// Conditioning on the computed cutset did not eliminate all diamond structure at `join`.
    /// This is always a Cutset Finder bug, never a user error.
    #[error("conditioning on cutset {cutset:?} left diamond structure at join {join} unresolved")]
    CutsetInsufficient {
        /// The join node the cutset was computed for.
        join: NodeId,
        /// The cutset that failed to break every diamond.
        cutset: Vec<NodeId>,
    },

    /// A parent's belief was read before it was computed, meaning topological order was
    /// violated somewhere in the engine.
    #[error(
        "belief for parent {parent} of node {node} was not available \
         (topological order violated)"
    )]
    MissingParentBelief {
        /// The node whose update needed the missing belief.
        node: NodeId,
        /// The parent whose belief was missing.
        parent: NodeId,
    },

    /// A cutset node's belief was not available during conditioning-state enumeration.
    #[error("belief for cutset node {0} was not available during conditioning")]
    MissingBeliefForCutsetNode(NodeId),
}
