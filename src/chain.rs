//! A single Gibbs chain: repeated sweeps over the sample schedule, burn-in,
//! thinning and storage of retained samples.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Model, ModelSample};
use crate::mutation::TreeMutationSampler;
use crate::ops::{LeafValueSampler, TreePrior, VarianceSampler};
use crate::sampler::NormalScalarSampler;
use crate::schedule::{SampleSchedule, SampleStep};
use crate::settings::BartSettings;

/// Whether the mutation of each tree was accepted in one sweep, keyed by
/// `tree_{i}`.
pub type AcceptanceRecord = BTreeMap<String, bool>;

/// Iteration counts of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Sweeps discarded before sampling.
    pub n_burn: usize,
    /// Sweeps run after burn-in.
    pub n_samples: usize,
    /// Fraction of post-burn-in sweeps to keep.
    pub thin: f64,
    /// Keep the in-sample prediction of every retained sweep.
    pub store_in_sample_predictions: bool,
    /// Keep the acceptance record of every retained sweep.
    pub store_acceptance_trace: bool,
}

/// Keeps every `stride`-th post-burn-in sweep, starting with the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thinning {
    stride: usize,
}

impl Thinning {
    /// Keeps roughly a `thin` fraction of the sweeps; `thin` in `(0, 1]`.
    pub fn from_fraction(thin: f64) -> Self {
        let stride = (1. / thin).round();
        let stride = if stride.is_finite() && stride >= 1. {
            stride as usize
        } else {
            1
        };
        Self { stride }
    }

    /// Distance between retained sweeps.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Whether post-burn-in sweep `iteration` is retained.
    pub fn keeps(&self, iteration: usize) -> bool {
        iteration % self.stride == 0
    }

    /// Number of sweeps retained out of `n_samples`.
    pub fn n_kept(&self, n_samples: usize) -> usize {
        n_samples.div_ceil(self.stride)
    }
}

/// Where a chain is in its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    /// Sweeps whose state is discarded.
    BurnIn,
    /// Sweeps eligible for retention.
    Sampling,
    /// Every sweep has run.
    Done,
}

impl ChainPhase {
    /// Phase of sweep `iteration` (counting burn-in) under `config`.
    pub fn at(iteration: usize, config: &ChainConfig) -> Self {
        if iteration < config.n_burn {
            ChainPhase::BurnIn
        } else if iteration < config.n_burn + config.n_samples {
            ChainPhase::Sampling
        } else {
            ChainPhase::Done
        }
    }
}

/// Samples retained by one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExtract {
    /// Retained ensemble states, in order.
    pub models: Vec<ModelSample>,
    /// One row of normalized in-sample predictions per retained model, or no
    /// rows if they were not stored.
    pub in_sample_predictions: Array2<f64>,
    /// Acceptance record per retained model, or empty if not stored.
    pub acceptance: Vec<AcceptanceRecord>,
}

impl ChainExtract {
    /// Number of retained models.
    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    /// Fraction of accepted tree mutations across the stored records.
    pub fn acceptance_rate(&self) -> Option<f64> {
        acceptance_rate(&self.acceptance)
    }
}

pub(crate) fn acceptance_rate(records: &[AcceptanceRecord]) -> Option<f64> {
    let (accepted, total) = records
        .iter()
        .flat_map(|record| record.values())
        .fold((0usize, 0usize), |(a, t), &ok| (a + usize::from(ok), t + 1));

    (total > 0).then(|| accepted as f64 / total as f64)
}

/// Runs Gibbs sweeps over one model.
#[derive(Debug, Clone)]
pub struct ChainSampler {
    schedule: SampleSchedule,
    mutation: TreeMutationSampler,
    leaf: LeafValueSampler,
    variance: VarianceSampler,
}

impl ChainSampler {
    /// Creates a new `ChainSampler`.
    pub fn new(schedule: SampleSchedule, mutation: TreeMutationSampler) -> Self {
        Self {
            schedule,
            mutation,
            leaf: LeafValueSampler,
            variance: VarianceSampler,
        }
    }

    /// Sampler configured from validated settings.
    pub fn from_settings(settings: &BartSettings) -> Result<Self> {
        let prior = TreePrior::new(settings.alpha, settings.beta);
        let mutation =
            TreeMutationSampler::from_probabilities(settings.p_grow, settings.p_prune, prior)?;
        Ok(Self::new(SampleSchedule::new(settings.n_trees), mutation))
    }

    /// The sweep schedule.
    pub fn schedule(&self) -> &SampleSchedule {
        &self.schedule
    }

    /// Executes every step of the schedule once.
    pub fn sweep<R: Rng + ?Sized>(
        &self,
        model: &mut Model,
        normal: &mut NormalScalarSampler,
        rng: &mut R,
    ) -> Result<AcceptanceRecord> {
        let mut record = AcceptanceRecord::new();

        for step in self.schedule.steps() {
            match step {
                SampleStep::TreeMutation(tree_id) => {
                    model.refresh_residuals(tree_id);
                    let outcome = self.mutation.step(model, tree_id, rng)?;
                    record.insert(format!("tree_{tree_id}"), outcome.is_accepted());
                }
                SampleStep::LeafValues(tree_id) => {
                    for leaf in model.tree(tree_id).leaf_nodes() {
                        self.leaf.step(model, tree_id, leaf, normal)?;
                    }
                    model.commit_tree(tree_id);
                }
                SampleStep::Sigma => {
                    self.variance.step(model, rng)?;
                }
            }
        }

        Ok(record)
    }

    /// Runs burn-in then sampling on `model`, returning the retained samples.
    ///
    /// Stops with `Error::Cancelled` at the next sweep boundary once `cancel`
    /// is set.
    pub fn samples<R: Rng + ?Sized>(
        &self,
        model: &mut Model,
        config: &ChainConfig,
        normal: &mut NormalScalarSampler,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> Result<ChainExtract> {
        let thinning = Thinning::from_fraction(config.thin);
        let n_kept = thinning.n_kept(config.n_samples);
        let n_rows = if config.store_in_sample_predictions {
            n_kept
        } else {
            0
        };

        let mut models = Vec::with_capacity(n_kept);
        let mut in_sample_predictions = Array2::zeros((n_rows, model.data().n_obsv()));
        let mut acceptance = Vec::new();

        let mut phase = ChainPhase::at(0, config);
        log::debug!(
            "chain start: {} burn-in sweeps, {} sampling sweeps, keeping every {}",
            config.n_burn,
            config.n_samples,
            thinning.stride()
        );

        for iteration in 0..config.n_burn + config.n_samples {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }

            let current = ChainPhase::at(iteration, config);
            if current != phase {
                log::debug!("chain entering {current:?} at sweep {iteration}");
                phase = current;
            }

            let record = self.sweep(model, normal, rng)?;

            if phase == ChainPhase::Sampling && thinning.keeps(iteration - config.n_burn) {
                if config.store_in_sample_predictions {
                    in_sample_predictions
                        .row_mut(models.len())
                        .assign(model.predict());
                }
                if config.store_acceptance_trace {
                    acceptance.push(record);
                }
                models.push(model.snapshot());
            }
        }

        log::debug!(
            "chain done: {} models retained, acceptance rate {:?}",
            models.len(),
            acceptance_rate(&acceptance)
        );

        Ok(ChainExtract {
            models,
            in_sample_predictions,
            acceptance,
        })
    }
}
