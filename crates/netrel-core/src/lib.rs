//! Exact node-reachability belief propagation over probabilistic DAGs.
//!
//! Given a DAG whose nodes and edges each survive independently with a given probability, this
//! crate computes, for every node, the exact probability that at least one source survives and
//! there exists a fully operational path of surviving nodes and edges reaching it. Re-convergent
//! "diamond" structure is handled by conditioning on a breaking cutset rather than naive
//! sum-of-parents inclusion-exclusion, which would over-count.
//!
//! ```
//! use netrel_core::Graph;
//!
//! let graph = Graph::builder()
//!     .node_prior(1, 1.0)
//!     .node_prior(2, 1.0)
//!     .node_prior(3, 1.0)
//!     .node_prior(4, 1.0)
//!     .edge(1, 2, 0.9)
//!     .edge(1, 3, 0.9)
//!     .edge(2, 4, 0.9)
//!     .edge(3, 4, 0.9)
//!     .build()
//!     .unwrap();
//!
//! let beliefs = netrel_core::propagate(&graph).unwrap();
//! assert!((beliefs.get(4u64.into()).unwrap() - 0.9639).abs() < 1e-9);
//! ```

pub mod belief;
pub mod cache;
pub mod conditioning;
pub mod config;
pub mod cutset;
pub mod diamond;
pub mod error;
pub mod graph;
pub mod mc;
pub mod topology;

pub use belief::{propagate, propagate_with_config, BeliefMap};
pub use config::PropagationConfig;
pub use error::{Error, InputError, InternalError, Result};
pub use graph::{EdgeId, Graph, GraphBuilder, NodeId};
pub use mc::mc_estimate;
