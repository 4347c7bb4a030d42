/// Validated execution plan for a stage graph.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    /// Stage indices in topological order (upstream before downstream),
    /// ties broken by insertion order.
    pub order: Vec<usize>,

    /// Reader stages, in the order they are drained: a stage with several
    /// inputs receives them in connection order
    pub roots: Vec<usize>,

    /// Upstream stages of each stage, in connection order
    pub inputs: Vec<Vec<usize>>,

    /// Downstream stages of each stage, in connection order
    pub consumers: Vec<Vec<usize>>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub total_stages: usize,
    pub readers: usize,
    pub filters: usize,
    pub writers: usize,
    pub edges: usize,

    /// Filters whose output reaches no stage
    pub dead_end_filters: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    /// Check if the plan has any stages
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of `stage` in the topological order.
    pub fn position(&self, stage: usize) -> Option<usize> {
        self.order.iter().position(|&s| s == stage)
    }
}
