//! Runs independent chains in parallel and combines their samples.
//!
//! Each chain gets seed `seed + chain_id` and builds its own `Model` from the
//! shared template, so chains only share read-only data. The first chain to
//! fail raises a cancellation flag that the others check between sweeps.
#![allow(non_snake_case)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chain::{acceptance_rate, AcceptanceRecord, ChainExtract, ChainSampler};
use crate::data::Data;
use crate::error::{Error, Result};
use crate::model::{Model, ModelSample, ModelTemplate};
use crate::sampler::NormalScalarSampler;
use crate::settings::BartSettings;
use crate::tree::Predict;

/// Per-chain samples, indexed by chain id.
pub type Extract = Vec<ChainExtract>;

/// Runs one chain, seeded with `seed`, to completion from `template`.
pub fn run_chain(
    template: &ModelTemplate,
    data: Arc<Data>,
    sampler: &ChainSampler,
    settings: &BartSettings,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<ChainExtract> {
    let mut model = Model::from_template(template, data)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut normal = NormalScalarSampler::new(settings.scalar_pool_size, rng.gen());

    sampler.samples(
        &mut model,
        &settings.chain_config(),
        &mut normal,
        &mut rng,
        cancel,
    )
}

/// Runs `settings.n_chains` chains in parallel.
///
/// Uses the global rayon pool unless `n_jobs` is set. On failure, returns the
/// error of the lowest-indexed chain that failed on its own.
pub fn run_chains(
    template: &ModelTemplate,
    data: Arc<Data>,
    settings: &BartSettings,
) -> Result<Extract> {
    settings.validate()?;

    let seed = settings
        .seed
        .unwrap_or_else(|| rand::thread_rng().gen::<u64>());
    let sampler = ChainSampler::from_settings(settings)?;
    let cancel = AtomicBool::new(false);

    log::info!(
        "sampling {} chains of {} trees (seed {seed})",
        settings.n_chains,
        settings.n_trees
    );

    let job = || {
        (0..settings.n_chains)
            .into_par_iter()
            .map(|chain_id| {
                let chain_seed = seed.wrapping_add(chain_id as u64);
                let result = run_chain(
                    template,
                    Arc::clone(&data),
                    &sampler,
                    settings,
                    chain_seed,
                    &cancel,
                );
                if let Err(e) = &result {
                    if !matches!(e, Error::Cancelled) {
                        log::warn!("chain {chain_id} failed: {e}");
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
                result
            })
            .collect::<Vec<Result<ChainExtract>>>()
    };

    let results = match settings.n_jobs {
        Some(n_jobs) => rayon::ThreadPoolBuilder::new()
            .num_threads(n_jobs)
            .build()?
            .install(job),
        None => job(),
    };

    collect_chains(results)
}

fn collect_chains(results: Vec<Result<ChainExtract>>) -> Result<Extract> {
    let mut extracts = Vec::with_capacity(results.len());
    let mut cancelled = false;
    let mut failure = None;

    for (chain, result) in results.into_iter().enumerate() {
        match result {
            Ok(extract) => extracts.push(extract),
            Err(Error::Cancelled) => cancelled = true,
            Err(source) => {
                if failure.is_none() {
                    failure = Some(Error::ChainExecution {
                        chain,
                        source: Box::new(source),
                    });
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None if cancelled => Err(Error::Cancelled),
        None => {
            log::info!("all {} chains finished", extracts.len());
            Ok(extracts)
        }
    }
}

/// Samples of every chain, concatenated in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedExtract {
    /// Retained ensemble states.
    pub models: Vec<ModelSample>,
    /// Normalized in-sample predictions, one row per model; empty if not
    /// stored.
    pub in_sample_predictions: Array2<f64>,
    /// Acceptance records; empty if not stored.
    pub acceptance: Vec<AcceptanceRecord>,
}

/// Concatenates chain extracts in chain order.
pub fn combine(extracts: Extract) -> Result<CombinedExtract> {
    let n_obsv = extracts
        .first()
        .map_or(0, |e| e.in_sample_predictions.ncols());

    let views: Vec<ArrayView2<f64>> = extracts
        .iter()
        .map(|e| e.in_sample_predictions.view())
        .collect();
    let in_sample_predictions = if views.is_empty() {
        Array2::zeros((0, n_obsv))
    } else {
        concatenate(Axis(0), &views)?
    };

    let mut models = Vec::new();
    let mut acceptance = Vec::new();
    for extract in extracts {
        models.extend(extract.models);
        acceptance.extend(extract.acceptance);
    }

    Ok(CombinedExtract {
        models,
        in_sample_predictions,
        acceptance,
    })
}

impl CombinedExtract {
    /// Serializes to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of retained models.
    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    /// Fraction of accepted tree mutations across the stored records.
    pub fn acceptance_rate(&self) -> Option<f64> {
        acceptance_rate(&self.acceptance)
    }

    /// Posterior-mean in-sample prediction in target units.
    pub fn predict_in_sample(&self, data: &Data) -> Result<Array1<f64>> {
        let mean = self
            .in_sample_predictions
            .mean_axis(Axis(0))
            .ok_or(Error::PredictionsNotStored)?;
        Ok(data.unnormalize_y(mean.view()))
    }

    /// Posterior-mean prediction at `X` in target units.
    pub fn predict(&self, data: &Data, X: &Array2<f64>) -> Result<Array1<f64>> {
        if self.models.is_empty() {
            return Err(Error::NotFitted);
        }
        if X.ncols() != data.n_features() {
            return Err(Error::DegenerateData(format!(
                "expected {} features, got {}",
                data.n_features(),
                X.ncols()
            )));
        }

        let mut summed = Array1::zeros(X.nrows());
        for model in &self.models {
            summed += &model.predict(X);
        }
        let mean = summed / self.models.len() as f64;

        Ok(data.unnormalize_y(mean.view()))
    }

    /// In-sample predictions of every retained model, in target units.
    pub fn in_sample_prediction_samples(&self, data: &Data) -> Result<Array2<f64>> {
        if self.in_sample_predictions.nrows() == 0 {
            return Err(Error::PredictionsNotStored);
        }
        let mut samples = self.in_sample_predictions.clone();
        for mut row in samples.rows_mut() {
            let raw = data.unnormalize_y(row.view());
            row.assign(&raw);
        }
        Ok(samples)
    }
}
