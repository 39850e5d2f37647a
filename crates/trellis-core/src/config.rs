//! Engine configuration.

use std::time::Duration;

/// Default maximum number of edges a single step may produce.
pub const DEFAULT_MAX_EDGES_PER_STEP: usize = 50_000;

/// Default maximum number of nodes in a result tree.
pub const DEFAULT_MAX_NODES: usize = 100_000;

/// Default maximum number of rounds for a recursive hop.
pub const DEFAULT_MAX_RECURSION_ROUNDS: usize = 1_000;

/// Default threshold above which a step is logged as slow.
pub const DEFAULT_SLOW_STEP_THRESHOLD: Duration = Duration::from_millis(250);

/// Budget limits for query execution to prevent runaway traversals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutBudget {
    /// Maximum edges produced by one step (one recursion round counts as one step).
    pub max_edges_per_step: usize,
    /// Maximum nodes across the result tree, including sub-query children.
    pub max_nodes: usize,
    /// Maximum rounds of a `*`/`$` hop.
    pub max_recursion_rounds: usize,
}

impl Default for FanoutBudget {
    fn default() -> Self {
        Self {
            max_edges_per_step: DEFAULT_MAX_EDGES_PER_STEP,
            max_nodes: DEFAULT_MAX_NODES,
            max_recursion_rounds: DEFAULT_MAX_RECURSION_ROUNDS,
        }
    }
}

impl FanoutBudget {
    /// Create a budget with custom limits.
    pub fn new(max_edges_per_step: usize, max_nodes: usize, max_recursion_rounds: usize) -> Self {
        Self {
            max_edges_per_step,
            max_nodes,
            max_recursion_rounds,
        }
    }

    /// Create an unlimited budget (use with caution).
    pub fn unlimited() -> Self {
        Self {
            max_edges_per_step: usize::MAX,
            max_nodes: usize::MAX,
            max_recursion_rounds: usize::MAX,
        }
    }
}

/// Configuration for a [`QueryExecutor`](crate::query::QueryExecutor).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fanout limits.
    pub budget: FanoutBudget,
    /// Re-load full rows for the result tree, one batched load per entity type.
    pub materialize: bool,
    /// Steps slower than this are logged at `warn`.
    pub slow_step_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            budget: FanoutBudget::default(),
            materialize: true,
            slow_step_threshold: DEFAULT_SLOW_STEP_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fanout budget.
    pub fn with_budget(mut self, budget: FanoutBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Enable or disable result materialization.
    pub fn with_materialize(mut self, materialize: bool) -> Self {
        self.materialize = materialize;
        self
    }

    /// Set the slow-step logging threshold.
    pub fn with_slow_step_threshold(mut self, threshold: Duration) -> Self {
        self.slow_step_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.budget.max_edges_per_step, 50_000);
        assert_eq!(config.budget.max_nodes, 100_000);
        assert_eq!(config.budget.max_recursion_rounds, 1_000);
        assert!(config.materialize);
        assert_eq!(config.slow_step_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_budget(FanoutBudget::new(10, 20, 3))
            .with_materialize(false)
            .with_slow_step_threshold(Duration::from_millis(5));
        assert_eq!(config.budget, FanoutBudget::new(10, 20, 3));
        assert!(!config.materialize);
        assert_eq!(FanoutBudget::unlimited().max_nodes, usize::MAX);
    }
}
