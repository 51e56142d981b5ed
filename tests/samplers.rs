#![allow(non_snake_case)]

use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use gibbs_bart::data::Data;
use gibbs_bart::model::{Hyperparameters, Model, ModelTemplate, Sigma};
use gibbs_bart::ops::{LeafPosterior, LeafValueSampler, TreePrior, VarianceSampler};
use gibbs_bart::sampler::NormalScalarSampler;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn params(n_trees: usize) -> Hyperparameters {
    Hyperparameters {
        n_trees,
        alpha: 0.95,
        beta: 2.0,
        sigma_a: 0.001,
        sigma_b: 0.001,
        k: 2.0,
    }
}

fn linear_data(n: usize) -> Arc<Data> {
    let x: Vec<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
    let y = Array1::from_iter(x.iter().map(|v| 2.0 * v + 1.0));
    let X = Array2::from_shape_vec((n, 1), x).unwrap();
    Arc::new(Data::new(X, y, true).unwrap())
}

#[test]
fn test_scalar_sampler_is_seed_restartable() {
    let mut a = NormalScalarSampler::new(4, 11);
    let mut b = NormalScalarSampler::new(4, 11);

    // Cross several refills.
    let first: Vec<f64> = (0..10).map(|_| a.sample()).collect();
    let second: Vec<f64> = b.by_ref().take(10).collect();
    assert_eq!(first, second);
    assert_eq!(a.remaining(), 2);

    let mut c = NormalScalarSampler::new(4, 12);
    assert_ne!(first[0], c.sample());
}

#[test]
fn test_scalar_sampler_moments() {
    let draws: Vec<f64> = NormalScalarSampler::new(1000, 3).take(20_000).collect();
    let mean = draws.iter().sum::<f64>() / draws.len() as f64;
    let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;

    assert_abs_diff_eq!(mean, 0.0, epsilon = 0.05);
    assert_abs_diff_eq!(var, 1.0, epsilon = 0.05);
}

#[test]
fn test_tree_prior() {
    let prior = TreePrior::new(0.95, 2.0);
    assert_relative_eq!(prior.probability_split(0), 0.95);
    assert_relative_eq!(prior.probability_split(1), 0.95 / 4.0);
    assert_relative_eq!(prior.log_probability_not_split(2), (1.0 - 0.95 / 9.0f64).ln());
}

#[test]
fn test_leaf_posterior_with_no_observations_is_prior() {
    let posterior = LeafPosterior::new(0.04, 0.7, 0, 0.0);
    assert_eq!(posterior.mean, 0.0);
    assert_relative_eq!(posterior.variance, 0.04);
}

#[test]
fn test_leaf_posterior_concentrates_on_data_mean() {
    let n = 100_000;
    let posterior = LeafPosterior::new(0.04, 0.5, n, 0.3 * n as f64);
    assert_relative_eq!(posterior.mean, 0.3, max_relative = 1e-3);
    assert!(posterior.variance < 1e-5);

    // With a tiny noise level the posterior mean is the sample mean.
    let posterior = LeafPosterior::new(0.04, 1e-6, 10, 2.5);
    assert_relative_eq!(posterior.mean, 0.25, max_relative = 1e-9);
}

#[test]
fn test_leaf_posterior_prior_variance_limits() {
    // A flat prior leaves the sample mean with variance sigma^2 / n.
    let flat = LeafPosterior::new(1e12, 0.5, 10, 2.5);
    assert_relative_eq!(flat.mean, 0.25, max_relative = 1e-9);
    assert_relative_eq!(flat.variance, 0.025, max_relative = 1e-9);

    // A degenerate prior pins the leaf at zero.
    let pinned = LeafPosterior::new(1e-12, 0.5, 10, 2.5);
    assert!(pinned.mean.abs() < 1e-10, "mean {}", pinned.mean);
    assert_relative_eq!(pinned.variance, 1e-12, max_relative = 1e-9);

    // Shrinkage grows as the prior tightens.
    let means: Vec<f64> = [1e-3, 1e-2, 1e-1, 1.0]
        .iter()
        .map(|&prior_var| LeafPosterior::new(prior_var, 0.5, 10, 2.5).mean)
        .collect();
    assert!(means.windows(2).all(|w| w[0] < w[1] && w[1] < 0.25));
}

#[test]
fn test_leaf_sampler_reads_tree_residuals() {
    let data = linear_data(20);
    let template = ModelTemplate::new(params(1), &data);
    let mut model = Model::from_template(&template, data.clone()).unwrap();
    model.refresh_residuals(0);

    let summed: f64 = data.y().values().sum();
    let posterior = LeafValueSampler.posterior(&model, 0, 0).unwrap();
    let prior_var = model.sigma_m().powi(2);
    assert_relative_eq!(posterior.mean, summed * prior_var / (1.0 + 20.0 * prior_var));

    let mut normal = NormalScalarSampler::new(16, 0);
    let value = LeafValueSampler.step(&mut model, 0, 0, &mut normal).unwrap();
    assert_eq!(model.tree(0).tree().value[0], value);
    assert!(LeafValueSampler.step(&mut model, 0, 3, &mut normal).is_err());
}

#[test]
fn test_variance_posterior() {
    let sigma = Sigma::new(1.0, 2.0, 1.0);
    let (shape, scale) = VarianceSampler.posterior(&sigma, &[1.0, -1.0, 2.0, 0.0]);
    assert_relative_eq!(shape, 3.0);
    assert_relative_eq!(scale, 5.0);
}

#[test]
fn test_variance_draws_are_positive() {
    let data = linear_data(30);
    let template = ModelTemplate::new(params(5), &data);
    let mut model = Model::from_template(&template, data).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..200 {
        let draw = VarianceSampler.step(&mut model, &mut rng).unwrap();
        assert!(draw.is_finite() && draw > 0.0);
        assert_eq!(model.sigma().current_value(), draw);
    }
}
