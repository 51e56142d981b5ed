//! Per-chain tree state.
//!
//! A `TreeState` pairs a `DecisionTree` with the `DataPartition` of every
//! existing node and the tree's own target (the partial residuals the tree
//! is asked to explain). Structural mutations keep the partitions in sync,
//! so the samplers can read node sufficient statistics without routing the
//! data again.
#![allow(non_snake_case)]

use ndarray::{Array1, Array2};

use crate::data::{DataPartition, Target};
use crate::split_rules::{ContinuousSplit, SplitRule};
use crate::tree::{DecisionTree, TreeError};

/// A tree and the observations routed to each of its nodes.
#[derive(Debug, Clone)]
pub struct TreeState {
    tree: DecisionTree,
    partitions: Vec<Option<DataPartition>>,
    target: Target,
    in_sample: Array1<f64>,
}

impl TreeState {
    /// Builds the state of `tree` by routing every row of `X` through it.
    /// `target` becomes the tree's initial target.
    pub fn from_tree(tree: DecisionTree, X: &Array2<f64>, target: Target) -> Self {
        let mut partitions: Vec<Option<DataPartition>> = vec![None; tree.capacity()];
        partitions[0] = Some(DataPartition::full(X.nrows()));

        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            let Some((l, r)) = tree.children(node) else {
                continue;
            };
            let (left, right) = match &partitions[node] {
                Some(parent) => ContinuousSplit.divide(
                    X.column(tree.feature[node]),
                    parent.mask(),
                    &tree.threshold[node],
                ),
                None => continue,
            };
            partitions[l] = Some(DataPartition::from_mask(left));
            partitions[r] = Some(DataPartition::from_mask(right));
            stack.extend([l, r]);
        }

        let mut state = Self {
            tree,
            partitions,
            target,
            in_sample: Array1::zeros(X.nrows()),
        };
        state.in_sample = state.in_sample_predictions();
        state
    }

    /// Tree structure and leaf values.
    pub fn tree(&self) -> &DecisionTree {
        &self.tree
    }

    /// The partial residuals this tree currently explains.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Replaces the tree's target, invalidating every cached partition sum.
    pub fn update_target(&mut self, values: Array1<f64>) {
        self.target.update_values(values);
    }

    /// Leaf indices, in ascending order.
    pub fn leaf_nodes(&self) -> Vec<usize> {
        self.tree.leaf_nodes()
    }

    /// Depth of `node`.
    pub fn depth(&self, node: usize) -> usize {
        self.tree.node_depth(node)
    }

    /// Partition of an existing node.
    pub fn partition(&self, node: usize) -> Result<&DataPartition, TreeError> {
        self.partitions
            .get(node)
            .and_then(Option::as_ref)
            .ok_or(TreeError::InvalidNodeIndex)
    }

    /// Number of observations routed to `node`.
    pub fn n_obsv(&self, node: usize) -> usize {
        self.partition(node).map_or(0, DataPartition::n_obsv)
    }

    /// Sum of the tree's target over the observations routed to `node`.
    pub fn summed_value(&self, node: usize) -> Result<f64, TreeError> {
        Ok(self.partition(node)?.summed_masked_value(&self.target))
    }

    /// Leaves that admit at least one non-degenerate split.
    pub fn growable_leaves(&self, X: &Array2<f64>) -> Vec<usize> {
        self.tree
            .leaf_nodes()
            .into_iter()
            .filter(|&leaf| {
                self.partitions[leaf]
                    .as_ref()
                    .is_some_and(|p| p.is_splittable(X))
            })
            .collect()
    }

    /// Number of leaves that admit a split.
    pub fn n_growable_leaves(&self, X: &Array2<f64>) -> usize {
        self.growable_leaves(X).len()
    }

    /// Number of split nodes whose children are both leaves.
    pub fn n_prunable_nodes(&self) -> usize {
        self.tree.prunable_nodes().len()
    }

    /// Sets a leaf's value.
    pub fn set_value(&mut self, node: usize, value: f64) -> Result<(), TreeError> {
        self.tree.set_value(node, value)
    }

    /// Splits leaf `node` on `feature <= threshold` with the given child
    /// partitions. The children inherit the parent's value.
    pub fn apply_grow(
        &mut self,
        node: usize,
        feature: usize,
        threshold: f64,
        left: DataPartition,
        right: DataPartition,
    ) -> Result<(usize, usize), TreeError> {
        let value = self.tree.value.get(node).copied().unwrap_or(0.0);
        let (l, r) = self.tree.split_node(node, feature, threshold, value, value)?;

        if self.partitions.len() < self.tree.capacity() {
            self.partitions.resize(self.tree.capacity(), None);
        }
        self.partitions[l] = Some(left);
        self.partitions[r] = Some(right);

        Ok((l, r))
    }

    /// Collapses split `node` back into a leaf. The new leaf takes the
    /// observation-weighted mean of the two child values, leaving in-sample
    /// predictions unchanged.
    pub fn apply_prune(&mut self, node: usize) -> Result<(), TreeError> {
        let (l, r) = match self.tree.children(node) {
            Some(children) if self.tree.is_prunable(node) => children,
            _ => return Err(TreeError::NonPrunable),
        };

        let (n_l, n_r) = (self.n_obsv(l) as f64, self.n_obsv(r) as f64);
        let (v_l, v_r) = (self.tree.value[l], self.tree.value[r]);
        let value = if n_l + n_r > 0.0 {
            (n_l * v_l + n_r * v_r) / (n_l + n_r)
        } else {
            0.5 * (v_l + v_r)
        };

        self.tree.prune_node(node, value)?;
        self.partitions[l] = None;
        self.partitions[r] = None;
        self.partitions.truncate(self.tree.capacity());

        Ok(())
    }

    /// In-sample prediction of this tree, computed from the leaf partitions.
    pub fn in_sample_predictions(&self) -> Array1<f64> {
        let mut predictions = Array1::zeros(self.target.len());

        for leaf in self.tree.leaf_nodes() {
            if let Some(partition) = &self.partitions[leaf] {
                let leaf_value = self.tree.value[leaf];
                for sample_index in partition.indices() {
                    predictions[sample_index] = leaf_value;
                }
            }
        }

        predictions
    }

    /// In-sample prediction recorded at the last `commit_in_sample`.
    pub fn committed_in_sample(&self) -> &Array1<f64> {
        &self.in_sample
    }

    /// Records the current in-sample prediction and returns the change with
    /// respect to the previously committed one.
    pub fn commit_in_sample(&mut self) -> Array1<f64> {
        let current = self.in_sample_predictions();
        let delta = &current - &self.in_sample;
        self.in_sample = current;
        delta
    }
}
