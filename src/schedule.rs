//! Order of conditional updates inside one Gibbs sweep.

/// One conditional update of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStep {
    /// Grow/prune step on the structure of tree `i`.
    TreeMutation(usize),
    /// Redraw every leaf value of tree `i`.
    LeafValues(usize),
    /// Redraw the residual standard deviation.
    Sigma,
}

/// For each tree in turn, a mutation step followed by its leaf-value step,
/// then a single sigma step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSchedule {
    n_trees: usize,
}

impl SampleSchedule {
    /// Schedule over `n_trees` trees.
    pub fn new(n_trees: usize) -> Self {
        Self { n_trees }
    }

    /// Number of trees covered.
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Steps of one sweep, in execution order.
    pub fn steps(&self) -> impl Iterator<Item = SampleStep> {
        (0..self.n_trees)
            .flat_map(|i| [SampleStep::TreeMutation(i), SampleStep::LeafValues(i)])
            .chain(std::iter::once(SampleStep::Sigma))
    }

    /// Number of steps in one sweep.
    pub fn len(&self) -> usize {
        2 * self.n_trees + 1
    }

    /// Never true: a sweep always ends with the sigma step.
    pub fn is_empty(&self) -> bool {
        false
    }
}
