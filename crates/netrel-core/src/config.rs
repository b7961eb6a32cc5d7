//! Run-time knobs for a `propagate` call: parallelism, cache eviction, and cache-key
//! rounding precision.

/// Configuration threaded through `propagate_with_config` into every recursive Conditioning
/// Solver / Belief Engine call within one run.
///
/// `PropagationConfig::default()` reproduces the reference single-threaded,
/// unbounded-cache, 2⁻⁴⁰-precision behavior.
#[derive(Clone, Copy, Debug)]
pub struct PropagationConfig {
    /// Enables iteration-set-level and cutset-state-level parallelism via `rayon`. Has no
    /// effect unless the crate's `parallel` feature is also enabled; both the gate and the
    /// feature must agree before any thread pool is used.
    pub parallel: bool,
    /// Bounds the memoization cache to this many entries via LRU eviction. `None` leaves it
    /// unbounded for the run.
    pub cache_capacity: Option<usize>,
    /// Fixed binary precision (bits after the point) used to round priors before hashing
    /// them into a cache key, so floating-point noise upstream can't produce spurious misses.
    pub prior_rounding_bits: u32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            cache_capacity: None,
            prior_rounding_bits: 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_behavior() {
        let config = PropagationConfig::default();
        assert!(!config.parallel);
        assert_eq!(config.cache_capacity, None);
        assert_eq!(config.prior_rounding_bits, 40);
    }
}
