//! A Binary Decision Tree is the core data structure for Bayesian Additive
//! Regression Trees (BART). The tree is implemented using an array (vector)
//! representation with explicit child links.
#![allow(non_snake_case)]

use std::cmp::Ordering;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Occupancy of a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Free slot, reused by the next split.
    Absent,
    /// Terminal node holding a value.
    Leaf,
    /// Internal node holding a feature and threshold.
    Split,
}

/// Represents errors related to binary decision tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// When attempting to split a leaf node, if the node is not a leaf.
    #[error("Cannot split a non-leaf node")]
    NonLeafSplit,
    /// When attempting to prune a node whose children are not both leaves.
    #[error("Cannot prune a node whose children are not both leaves")]
    NonPrunable,
    /// When the index does not address an existing node.
    #[error("Node index does not exist")]
    InvalidNodeIndex,
}

/// A `DecisionTree` is an array-based implementation of the binary decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Stores the feature index for splitting at the i'th node.
    pub feature: Vec<usize>,
    /// Stores the threshold value for the i'th node split.
    pub threshold: Vec<f64>,
    /// Stores output values for the i'th node.
    pub value: Vec<f64>,
    /// Stores whether the i'th slot is a leaf, a split or empty.
    pub kind: Vec<NodeKind>,
    /// Stores the left child of the i'th node when it is a split.
    pub left: Vec<usize>,
    /// Stores the right child of the i'th node when it is a split.
    pub right: Vec<usize>,
    /// Stores the parent of the i'th node, `None` for the root.
    pub parent: Vec<Option<usize>>,
    /// Stores the depth of the i'th node.
    pub depth: Vec<usize>,
}

impl DecisionTree {
    /// Creates a new `DecisionTree` with an initial value set as the root node.
    /// A decision tree is implemented as parallel vectors.
    ///
    /// The `i-th` element of each vector holds information about node `i`. Node 0
    /// is the tree's root. Children are stored in free slots (slots emptied by
    /// a prune are reused, otherwise new slots are appended), so the number of
    /// slots never exceeds the largest node count the tree has had. `feature`,
    /// `threshold`, `left` and `right` only apply to split nodes, `value` only
    /// to leaves; the other entries are arbitrary.
    pub fn new(init_value: f64) -> Self {
        Self {
            feature: vec![0],
            threshold: vec![0.0],
            value: vec![init_value],
            kind: vec![NodeKind::Leaf],
            left: vec![0],
            right: vec![0],
            parent: vec![None],
            depth: vec![0],
        }
    }

    /// Number of slots, including empty ones.
    pub fn capacity(&self) -> usize {
        self.kind.len()
    }

    /// Whether a node lives at `index`.
    pub fn exists(&self, index: usize) -> bool {
        self.kind.get(index).is_some_and(|k| *k != NodeKind::Absent)
    }

    /// Left child of _this_ node, if it is a split.
    pub fn left_child(&self, index: usize) -> Option<usize> {
        self.is_split(index).then(|| self.left[index])
    }

    /// Right child of _this_ node, if it is a split.
    pub fn right_child(&self, index: usize) -> Option<usize> {
        self.is_split(index).then(|| self.right[index])
    }

    /// Both children of a split node.
    pub fn children(&self, index: usize) -> Option<(usize, usize)> {
        self.is_split(index)
            .then(|| (self.left[index], self.right[index]))
    }

    /// Parent index, `None` for the root or an empty slot.
    pub fn parent(&self, index: usize) -> Option<usize> {
        if !self.exists(index) {
            return None;
        }
        self.parent[index]
    }

    /// Index of the other child of this node's parent.
    pub fn sibling(&self, index: usize) -> Option<usize> {
        let (l, r) = self.children(self.parent(index)?)?;
        Some(if l == index { r } else { l })
    }

    /// Checks whether the passed index is a leaf node.
    pub fn is_leaf(&self, index: usize) -> bool {
        self.kind.get(index) == Some(&NodeKind::Leaf)
    }

    /// Checks whether the passed index is a split node.
    pub fn is_split(&self, index: usize) -> bool {
        self.kind.get(index) == Some(&NodeKind::Split)
    }

    /// Computes the depth of _this_ node in the `DecisionTree`.
    #[inline]
    pub fn node_depth(&self, index: usize) -> usize {
        self.depth.get(index).copied().unwrap_or(0)
    }

    /// Indices of every leaf, in ascending order.
    pub fn leaf_nodes(&self) -> Vec<usize> {
        (0..self.kind.len()).filter(|&i| self.is_leaf(i)).collect()
    }

    /// Indices of every split node, in ascending order.
    pub fn split_nodes(&self) -> Vec<usize> {
        (0..self.kind.len()).filter(|&i| self.is_split(i)).collect()
    }

    /// Whether `index` is a split node whose two children are leaves.
    pub fn is_prunable(&self, index: usize) -> bool {
        self.children(index)
            .is_some_and(|(l, r)| self.is_leaf(l) && self.is_leaf(r))
    }

    /// Split nodes that could be collapsed back into a leaf.
    pub fn prunable_nodes(&self) -> Vec<usize> {
        (0..self.kind.len())
            .filter(|&i| self.is_prunable(i))
            .collect()
    }

    /// Number of split nodes.
    pub fn n_splits(&self) -> usize {
        self.kind.iter().filter(|&&k| k == NodeKind::Split).count()
    }

    /// Depth of the deepest leaf.
    pub fn max_depth(&self) -> usize {
        self.leaf_nodes()
            .into_iter()
            .map(|i| self.node_depth(i))
            .max()
            .unwrap_or(0)
    }

    /// Sets the value of a leaf.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<(), TreeError> {
        if !self.is_leaf(index) {
            return Err(TreeError::InvalidNodeIndex);
        }
        self.value[index] = value;
        Ok(())
    }

    /// Splits a leaf node into an internal node and returns the indices of
    /// the new left and right leaves.
    pub fn split_node(
        &mut self,
        node_index: usize,
        feature: usize,
        threshold: f64,
        left_value: f64,
        right_value: f64,
    ) -> Result<(usize, usize), TreeError> {
        if !self.exists(node_index) {
            return Err(TreeError::InvalidNodeIndex);
        }

        if !self.is_leaf(node_index) {
            return Err(TreeError::NonLeafSplit);
        }

        let depth = self.depth[node_index] + 1;
        let left_child_index = self.add_node(node_index, depth, left_value);
        let right_child_index = self.add_node(node_index, depth, right_value);

        // Update the current node
        self.feature[node_index] = feature;
        self.threshold[node_index] = threshold;
        self.left[node_index] = left_child_index;
        self.right[node_index] = right_child_index;
        self.kind[node_index] = NodeKind::Split;

        Ok((left_child_index, right_child_index))
    }

    /// Collapses a split node whose children are leaves back into a leaf
    /// holding `value`. The children's slots become free.
    pub fn prune_node(&mut self, node_index: usize, value: f64) -> Result<(), TreeError> {
        if !self.exists(node_index) {
            return Err(TreeError::InvalidNodeIndex);
        }

        let (l, r) = match self.children(node_index) {
            Some(children) if self.is_prunable(node_index) => children,
            _ => return Err(TreeError::NonPrunable),
        };

        for child in [l, r] {
            self.kind[child] = NodeKind::Absent;
            self.parent[child] = None;
        }
        self.set_leaf(node_index, value);
        self.shrink();

        Ok(())
    }

    /// Predicts the value for a given input sample.
    pub fn predict_sample(&self, sample: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            if !self.is_split(node) {
                return self.value[node];
            }

            let feature = self.feature[node];
            let threshold = self.threshold[node];

            node = match sample[feature].partial_cmp(&threshold) {
                Some(Ordering::Less | Ordering::Equal) => self.left[node],
                _ => self.right[node],
            };
        }
    }

    // Places a new leaf in the first free slot, or appends one.
    fn add_node(&mut self, parent: usize, depth: usize, value: f64) -> usize {
        let node_id = match self.kind.iter().position(|&k| k == NodeKind::Absent) {
            Some(free) => free,
            None => {
                self.feature.push(0);
                self.threshold.push(0.0);
                self.value.push(0.0);
                self.kind.push(NodeKind::Absent);
                self.left.push(0);
                self.right.push(0);
                self.parent.push(None);
                self.depth.push(0);
                self.kind.len() - 1
            }
        };

        self.set_leaf(node_id, value);
        self.parent[node_id] = Some(parent);
        self.depth[node_id] = depth;

        node_id
    }

    fn set_leaf(&mut self, index: usize, value: f64) {
        self.feature[index] = 0;
        self.threshold[index] = 0.0;
        self.value[index] = value;
        self.left[index] = 0;
        self.right[index] = 0;
        self.kind[index] = NodeKind::Leaf;
    }

    // Drops trailing free slots.
    fn shrink(&mut self) {
        let len = self
            .kind
            .iter()
            .rposition(|&k| k != NodeKind::Absent)
            .map_or(1, |i| i + 1);
        self.feature.truncate(len);
        self.threshold.truncate(len);
        self.value.truncate(len);
        self.kind.truncate(len);
        self.left.truncate(len);
        self.right.truncate(len);
        self.parent.truncate(len);
        self.depth.truncate(len);
    }
}

/// Prediction over every row of a covariate matrix.
pub trait Predict {
    /// Predicts one value per row of `X`.
    fn predict(&self, X: &Array2<f64>) -> Array1<f64>;
}

impl Predict for DecisionTree {
    fn predict(&self, X: &Array2<f64>) -> Array1<f64> {
        let mut predictions = Array1::zeros(X.nrows());
        let mut sample = vec![0.0; X.ncols()];

        for (prediction, row) in predictions.iter_mut().zip(X.rows()) {
            sample.iter_mut().zip(row).for_each(|(s, &x)| *s = x);
            *prediction = self.predict_sample(&sample);
        }

        predictions
    }
}
