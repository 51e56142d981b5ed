//! Metropolis-Hastings grow/prune moves on a single tree.
//!
//! - `UniformMutationProposer` picks a move kind by a weighted coin flip and
//!   then a uniformly random leaf (grow) or prunable node (prune).
//! - `MutationAcceptanceRatio` scores a proposal in log space as
//!   likelihood ratio + transition ratio + structure-prior ratio.
//! - `TreeMutationSampler` turns a proposal into a `Decision` and, in
//!   `step`, applies accepted moves to the tree.
//!
//! Every term is written for the grow direction (smaller tree `T` to larger
//! tree `T'`); a prune is scored as the exact negative of the grow that
//! would undo it. The probability of the chosen split rule enters both the
//! structure prior and the proposal distribution, and cancels.
#![allow(non_snake_case)]

use std::fmt;

use ndarray::Array2;
use rand::Rng;

use crate::data::{DataPartition, Target};
use crate::error::Result;
use crate::forest::TreeState;
use crate::math::{normalized_cumsum, sample_cumulative};
use crate::model::Model;
use crate::ops::TreePrior;
use crate::settings::validate_mutation_probabilities;
use crate::split_rules::{ContinuousSplit, SplitRule};
use crate::tree::TreeError;

/// The two structural moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Split a leaf into two leaves.
    Grow,
    /// Collapse a split whose children are leaves.
    Prune,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MutationKind::Grow => write!(f, "grow"),
            MutationKind::Prune => write!(f, "prune"),
        }
    }
}

/// Candidate split of a leaf.
#[derive(Debug, Clone)]
pub struct GrowProposal {
    /// Leaf to split.
    pub node: usize,
    /// Splitting feature.
    pub feature: usize,
    /// Observations with `x[feature] <= threshold` go left.
    pub threshold: f64,
    /// Partition of the new left child.
    pub left: DataPartition,
    /// Partition of the new right child.
    pub right: DataPartition,
}

impl GrowProposal {
    /// Whether either child would receive no observation.
    pub fn has_empty_child(&self) -> bool {
        self.left.is_empty() || self.right.is_empty()
    }
}

/// Candidate collapse of a split node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneProposal {
    /// Split node whose children are both leaves.
    pub node: usize,
}

/// A candidate structural change to one tree.
#[derive(Debug, Clone)]
pub enum Proposal {
    /// Split a leaf.
    Grow(GrowProposal),
    /// Collapse a split.
    Prune(PruneProposal),
}

impl Proposal {
    /// Kind of the proposed move.
    pub fn kind(&self) -> MutationKind {
        match self {
            Proposal::Grow(_) => MutationKind::Grow,
            Proposal::Prune(_) => MutationKind::Prune,
        }
    }

    /// Node the move applies to.
    pub fn node(&self) -> usize {
        match self {
            Proposal::Grow(grow) => grow.node,
            Proposal::Prune(prune) => prune.node,
        }
    }
}

/// Proposes grow or prune moves with fixed probabilities, choosing the
/// target node uniformly.
#[derive(Debug, Clone)]
pub struct UniformMutationProposer {
    p_grow: f64,
    p_prune: f64,
    cumulative: Vec<f64>,
    split_rule: ContinuousSplit,
}

impl UniformMutationProposer {
    /// Creates a proposer; the probabilities must sum to one.
    pub fn new(p_grow: f64, p_prune: f64) -> Result<Self> {
        validate_mutation_probabilities(p_grow, p_prune)?;

        Ok(Self {
            p_grow,
            p_prune,
            cumulative: normalized_cumsum(&[p_grow, p_prune]),
            split_rule: ContinuousSplit,
        })
    }

    /// Probabilities of `(grow, prune)`.
    pub fn probabilities(&self) -> (f64, f64) {
        (self.p_grow, self.p_prune)
    }

    /// Flips the weighted coin between grow and prune.
    pub fn sample_kind<R: Rng + ?Sized>(&self, rng: &mut R) -> MutationKind {
        match sample_cumulative(&self.cumulative, rng) {
            0 => MutationKind::Grow,
            _ => MutationKind::Prune,
        }
    }

    /// Proposes a move on `tree`, or `None` if the selected kind has no
    /// legal target.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        tree: &TreeState,
        X: &Array2<f64>,
        rng: &mut R,
    ) -> Option<Proposal> {
        match self.sample_kind(rng) {
            MutationKind::Grow => self.propose_grow(tree, X, rng).map(Proposal::Grow),
            MutationKind::Prune => self.propose_prune(tree, rng).map(Proposal::Prune),
        }
    }

    /// Picks a growable leaf, a feature that varies within it and a
    /// threshold among the leaf's observed values of that feature.
    pub fn propose_grow<R: Rng + ?Sized>(
        &self,
        tree: &TreeState,
        X: &Array2<f64>,
        rng: &mut R,
    ) -> Option<GrowProposal> {
        let leaves = tree.growable_leaves(X);
        if leaves.is_empty() {
            return None;
        }
        let node = leaves[rng.gen_range(0..leaves.len())];
        let partition = tree.partition(node).ok()?;

        let features = partition.splittable_features(X);
        if features.is_empty() {
            return None;
        }
        let feature = features[rng.gen_range(0..features.len())];

        let candidates = partition.feature_values(X, feature);
        let threshold = self.split_rule.sample_split_value(&candidates, rng)?;
        let (left, right) = self
            .split_rule
            .divide(X.column(feature), partition.mask(), &threshold);

        Some(GrowProposal {
            node,
            feature,
            threshold,
            left: DataPartition::from_mask(left),
            right: DataPartition::from_mask(right),
        })
    }

    /// Picks a split node whose children are both leaves.
    pub fn propose_prune<R: Rng + ?Sized>(
        &self,
        tree: &TreeState,
        rng: &mut R,
    ) -> Option<PruneProposal> {
        let nodes = tree.tree().prunable_nodes();
        if nodes.is_empty() {
            return None;
        }
        let node = nodes[rng.gen_range(0..nodes.len())];

        Some(PruneProposal { node })
    }
}

/// A move expressed in the grow direction: `combined` in the smaller tree
/// is replaced by `left` and `right` in the larger tree.
struct GrowMove<'a> {
    depth: usize,
    combined: &'a DataPartition,
    left: &'a DataPartition,
    right: &'a DataPartition,
    target: &'a Target,
    n_growable_small: usize,
    n_prunable_large: usize,
}

/// Log marginal-likelihood ratio of splitting a node, with the leaf values
/// integrated out under a `N(0, var_mu)` prior and `N(., var)` noise.
///
/// `n`/`summed` describe the combined node, the `_l`/`_r` variants its two
/// children.
#[allow(clippy::too_many_arguments)]
pub fn log_grow_likelihood_ratio(
    var: f64,
    var_mu: f64,
    n: usize,
    summed: f64,
    n_l: usize,
    summed_l: f64,
    n_r: usize,
    summed_r: f64,
) -> f64 {
    let (n, n_l, n_r) = (n as f64, n_l as f64, n_r as f64);

    let first_term = 0.5
        * ((var * (var + n * var_mu)) / ((var + n_l * var_mu) * (var + n_r * var_mu))).ln();

    let left_resp = summed_l.powi(2) / (var + n_l * var_mu);
    let right_resp = summed_r.powi(2) / (var + n_r * var_mu);
    let combined_resp = summed.powi(2) / (var + n * var_mu);

    first_term + (var_mu / (2. * var)) * (left_resp + right_resp - combined_resp)
}

/// Metropolis-Hastings log acceptance ratio of grow/prune proposals.
#[derive(Debug, Clone, Copy)]
pub struct MutationAcceptanceRatio {
    p_grow: f64,
    p_prune: f64,
    prior: TreePrior,
}

impl MutationAcceptanceRatio {
    /// Creates a ratio for the given proposal probabilities and structure
    /// prior.
    pub fn new(p_grow: f64, p_prune: f64, prior: TreePrior) -> Result<Self> {
        validate_mutation_probabilities(p_grow, p_prune)?;
        Ok(Self {
            p_grow,
            p_prune,
            prior,
        })
    }

    /// log(likelihood ratio) + log(transition ratio) + log(prior ratio).
    pub fn log_ratio(&self, model: &Model, tree_id: usize, proposal: &Proposal) -> Result<f64> {
        let Some((mv, sign)) = self.grow_move(model, tree_id, proposal)? else {
            return Ok(f64::NEG_INFINITY);
        };
        let grow = self.likelihood_term(model, &mv)
            + self.transition_term(&mv)
            + self.tree_term(&mv);

        Ok(sign * grow)
    }

    /// Log marginal-likelihood ratio of the proposed over the current tree.
    pub fn log_likelihood_ratio(
        &self,
        model: &Model,
        tree_id: usize,
        proposal: &Proposal,
    ) -> Result<f64> {
        Ok(match self.grow_move(model, tree_id, proposal)? {
            Some((mv, sign)) => sign * self.likelihood_term(model, &mv),
            None => f64::NEG_INFINITY,
        })
    }

    /// Log ratio of the reverse over the forward proposal probability.
    pub fn log_transition_ratio(
        &self,
        model: &Model,
        tree_id: usize,
        proposal: &Proposal,
    ) -> Result<f64> {
        Ok(match self.grow_move(model, tree_id, proposal)? {
            Some((mv, sign)) => sign * self.transition_term(&mv),
            None => f64::NEG_INFINITY,
        })
    }

    /// Log structure-prior ratio of the proposed over the current tree.
    pub fn log_tree_ratio(&self, model: &Model, tree_id: usize, proposal: &Proposal) -> Result<f64> {
        Ok(match self.grow_move(model, tree_id, proposal)? {
            Some((mv, sign)) => sign * self.tree_term(&mv),
            None => f64::NEG_INFINITY,
        })
    }

    // Returns the move in the grow direction and the sign to apply, or `None`
    // when the reverse move has zero probability.
    fn grow_move<'a>(
        &self,
        model: &'a Model,
        tree_id: usize,
        proposal: &'a Proposal,
    ) -> Result<Option<(GrowMove<'a>, f64)>> {
        let X = model.data().X();
        let state = model.tree(tree_id);
        let tree = state.tree();

        match proposal {
            Proposal::Grow(grow) => {
                let parent_loses_prunable = tree
                    .parent(grow.node)
                    .is_some_and(|parent| tree.is_prunable(parent));
                let n_prunable_large =
                    state.n_prunable_nodes() + 1 - usize::from(parent_loses_prunable);

                Ok(Some((
                    GrowMove {
                        depth: state.depth(grow.node),
                        combined: state.partition(grow.node)?,
                        left: &grow.left,
                        right: &grow.right,
                        target: state.target(),
                        n_growable_small: state.n_growable_leaves(X),
                        n_prunable_large,
                    },
                    1.,
                )))
            }
            Proposal::Prune(prune) => {
                let (l, r) = match tree.children(prune.node) {
                    Some(children) if tree.is_prunable(prune.node) => children,
                    _ => return Err(TreeError::NonPrunable.into()),
                };
                let combined = state.partition(prune.node)?;
                if !combined.is_splittable(X) {
                    return Ok(None);
                }
                let left = state.partition(l)?;
                let right = state.partition(r)?;

                let n_growable_small = state.n_growable_leaves(X) + 1
                    - usize::from(left.is_splittable(X))
                    - usize::from(right.is_splittable(X));

                Ok(Some((
                    GrowMove {
                        depth: state.depth(prune.node),
                        combined,
                        left,
                        right,
                        target: state.target(),
                        n_growable_small,
                        n_prunable_large: state.n_prunable_nodes(),
                    },
                    -1.,
                )))
            }
        }
    }

    fn likelihood_term(&self, model: &Model, mv: &GrowMove) -> f64 {
        let var = model.sigma().current_value().powi(2);
        let var_mu = model.sigma_m().powi(2);

        log_grow_likelihood_ratio(
            var,
            var_mu,
            mv.combined.n_obsv(),
            mv.combined.summed_masked_value(mv.target),
            mv.left.n_obsv(),
            mv.left.summed_masked_value(mv.target),
            mv.right.n_obsv(),
            mv.right.summed_masked_value(mv.target),
        )
    }

    // log q(T' -> T) - log q(T -> T')
    fn transition_term(&self, mv: &GrowMove) -> f64 {
        let prune_selected = self.p_prune.ln() - (mv.n_prunable_large as f64).ln();
        let grow_selected = self.p_grow.ln() - (mv.n_growable_small as f64).ln();
        prune_selected - grow_selected
    }

    // log p(T') - log p(T)
    fn tree_term(&self, mv: &GrowMove) -> f64 {
        let d = mv.depth;
        let numerator = self.prior.log_probability_split(d)
            + 2. * self.prior.log_probability_not_split(d + 1);
        let denominator = self.prior.log_probability_not_split(d);
        numerator - denominator
    }
}

/// Result of scoring a proposal, before any mutation.
#[derive(Debug, Clone)]
pub enum Decision {
    /// The proposal passed the Metropolis-Hastings test.
    Accept(Proposal),
    /// The proposal was rejected (including grows with an empty child).
    Reject(MutationKind),
    /// No legal move of the selected kind exists.
    Unavailable,
}

/// Outcome of one tree-mutation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The move was applied to the tree.
    Accepted(MutationKind),
    /// The move was discarded; the tree is unchanged.
    Rejected(MutationKind),
    /// Nothing to propose; the step was a no-op.
    Unavailable,
}

impl MutationOutcome {
    /// Whether the tree was mutated.
    pub fn is_accepted(&self) -> bool {
        matches!(self, MutationOutcome::Accepted(_))
    }
}

/// Accept/reject step on the structure of one tree.
#[derive(Debug, Clone)]
pub struct TreeMutationSampler {
    proposer: UniformMutationProposer,
    ratio: MutationAcceptanceRatio,
}

impl TreeMutationSampler {
    /// Creates a new `TreeMutationSampler`.
    pub fn new(proposer: UniformMutationProposer, ratio: MutationAcceptanceRatio) -> Self {
        Self { proposer, ratio }
    }

    /// Sampler with proposer and ratio sharing the same move probabilities.
    pub fn from_probabilities(p_grow: f64, p_prune: f64, prior: TreePrior) -> Result<Self> {
        Ok(Self::new(
            UniformMutationProposer::new(p_grow, p_prune)?,
            MutationAcceptanceRatio::new(p_grow, p_prune, prior)?,
        ))
    }

    /// The proposer.
    pub fn proposer(&self) -> &UniformMutationProposer {
        &self.proposer
    }

    /// The acceptance ratio.
    pub fn ratio(&self) -> &MutationAcceptanceRatio {
        &self.ratio
    }

    /// Proposes a move on tree `tree_id` and decides whether to accept it,
    /// without touching the tree.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        model: &Model,
        tree_id: usize,
        rng: &mut R,
    ) -> Result<Decision> {
        let Some(proposal) = self.proposer.propose(model.tree(tree_id), model.data().X(), rng)
        else {
            log::trace!("tree {tree_id}: no proposal available");
            return Ok(Decision::Unavailable);
        };

        if let Proposal::Grow(grow) = &proposal {
            if grow.has_empty_child() {
                log::trace!("tree {tree_id}: grow at node {} leaves a child empty", grow.node);
                return Ok(Decision::Reject(MutationKind::Grow));
            }
        }

        let log_ratio = self.ratio.log_ratio(model, tree_id, &proposal)?;
        let u: f64 = rng.gen();

        if u.ln() < log_ratio {
            Ok(Decision::Accept(proposal))
        } else {
            Ok(Decision::Reject(proposal.kind()))
        }
    }

    /// Runs one Metropolis-Hastings step on tree `tree_id`, mutating it in
    /// place on acceptance.
    pub fn step<R: Rng + ?Sized>(
        &self,
        model: &mut Model,
        tree_id: usize,
        rng: &mut R,
    ) -> Result<MutationOutcome> {
        match self.sample(model, tree_id, rng)? {
            Decision::Accept(proposal) => {
                let kind = proposal.kind();
                apply(model.tree_mut(tree_id), proposal)?;
                Ok(MutationOutcome::Accepted(kind))
            }
            Decision::Reject(kind) => Ok(MutationOutcome::Rejected(kind)),
            Decision::Unavailable => Ok(MutationOutcome::Unavailable),
        }
    }
}

/// Applies an accepted proposal to `tree`.
pub fn apply(tree: &mut TreeState, proposal: Proposal) -> Result<()> {
    match proposal {
        Proposal::Grow(grow) => {
            tree.apply_grow(grow.node, grow.feature, grow.threshold, grow.left, grow.right)?;
        }
        Proposal::Prune(prune) => tree.apply_prune(prune.node)?,
    }

    Ok(())
}
