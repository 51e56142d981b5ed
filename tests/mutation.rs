#![allow(non_snake_case)]

use std::sync::Arc;

use approx::assert_relative_eq;
use gibbs_bart::data::Data;
use gibbs_bart::model::{Hyperparameters, Model, ModelTemplate};
use gibbs_bart::mutation::{
    apply, log_grow_likelihood_ratio, Decision, MutationAcceptanceRatio, MutationKind,
    MutationOutcome, Proposal, PruneProposal, TreeMutationSampler, UniformMutationProposer,
};
use gibbs_bart::ops::TreePrior;
use gibbs_bart::Error;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn params() -> Hyperparameters {
    Hyperparameters {
        n_trees: 1,
        alpha: 0.95,
        beta: 2.0,
        sigma_a: 0.001,
        sigma_b: 0.001,
        k: 2.0,
    }
}

fn model_from(X: Array2<f64>, y: Array1<f64>) -> Model {
    let data = Arc::new(Data::new(X, y, true).unwrap());
    let template = ModelTemplate::new(params(), &data);
    let mut model = Model::from_template(&template, data).unwrap();
    model.refresh_residuals(0);
    model
}

fn step_model(n: usize) -> Model {
    let x: Vec<f64> = (0..2 * n).map(|i| (i % n) as f64 + (i / n) as f64 * 0.5).collect();
    let X = Array2::from_shape_vec((n, 2), x).unwrap();
    let y = Array1::from_iter((0..n).map(|i| if i < n / 2 { 0.0 } else { 1.0 }));
    model_from(X, y)
}

// Proposes with `proposer` until a grow with two non-empty children turns up.
fn non_empty_grow(
    proposer: &UniformMutationProposer,
    model: &Model,
    rng: &mut StdRng,
) -> gibbs_bart::mutation::GrowProposal {
    loop {
        if let Some(grow) = proposer.propose_grow(model.tree(0), model.data().X(), rng) {
            if !grow.has_empty_child() {
                return grow;
            }
        }
    }
}

#[test]
fn test_grow_likelihood_ratio_value() {
    let ratio = log_grow_likelihood_ratio(1.0, 1.0, 2, 2.0, 1, 1.0, 1, 1.0);
    assert_relative_eq!(ratio, 0.5 * 0.75f64.ln() - 1.0 / 6.0, epsilon = 1e-12);
}

#[test]
fn test_prune_ratio_is_negated_grow_ratio() {
    let prior = TreePrior::new(0.95, 2.0);
    let ratio = MutationAcceptanceRatio::new(0.5, 0.5, prior).unwrap();
    let proposer = UniformMutationProposer::new(0.5, 0.5).unwrap();

    for seed in 0..10 {
        let mut model = step_model(24);
        let mut rng = StdRng::seed_from_u64(seed);

        // Grow the root first so that the second grow may sit below a
        // prunable node.
        let first = non_empty_grow(&proposer, &model, &mut rng);
        apply(model.tree_mut(0), Proposal::Grow(first)).unwrap();

        let grow = Proposal::Grow(non_empty_grow(&proposer, &model, &mut rng));
        let node = grow.node();
        let grow_ratio = ratio.log_ratio(&model, 0, &grow).unwrap();
        let grow_parts = [
            ratio.log_likelihood_ratio(&model, 0, &grow).unwrap(),
            ratio.log_transition_ratio(&model, 0, &grow).unwrap(),
            ratio.log_tree_ratio(&model, 0, &grow).unwrap(),
        ];
        assert_relative_eq!(grow_ratio, grow_parts.iter().sum::<f64>(), epsilon = 1e-12);

        apply(model.tree_mut(0), grow).unwrap();
        let prune = Proposal::Prune(PruneProposal { node });
        let prune_ratio = ratio.log_ratio(&model, 0, &prune).unwrap();

        assert_relative_eq!(prune_ratio, -grow_ratio, epsilon = 1e-9);
        assert_relative_eq!(
            ratio.log_likelihood_ratio(&model, 0, &prune).unwrap(),
            -grow_parts[0],
            epsilon = 1e-9
        );
    }
}

#[test]
fn test_prune_of_non_prunable_node_is_an_error() {
    let model = step_model(8);
    let ratio = MutationAcceptanceRatio::new(0.5, 0.5, TreePrior::new(0.95, 2.0)).unwrap();
    let prune = Proposal::Prune(PruneProposal { node: 0 });

    assert!(matches!(ratio.log_ratio(&model, 0, &prune), Err(Error::Tree(_))));
}

#[test]
fn test_probabilities_are_validated() {
    assert!(matches!(
        UniformMutationProposer::new(0.7, 0.7),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        MutationAcceptanceRatio::new(-0.5, 1.5, TreePrior::new(0.95, 2.0)),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_proposer_respects_probabilities() {
    let grow_only = UniformMutationProposer::new(1.0, 0.0).unwrap();
    let prune_only = UniformMutationProposer::new(0.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    for _ in 0..100 {
        assert_eq!(grow_only.sample_kind(&mut rng), MutationKind::Grow);
        assert_eq!(prune_only.sample_kind(&mut rng), MutationKind::Prune);
    }
}

#[test]
fn test_unavailable_moves_are_no_ops() {
    let mut rng = StdRng::seed_from_u64(5);

    // A single leaf cannot be pruned.
    let mut model = step_model(8);
    let prune_only = TreeMutationSampler::from_probabilities(0.0, 1.0, TreePrior::new(0.95, 2.0)).unwrap();
    let before = model.tree(0).tree().clone();
    assert_eq!(prune_only.step(&mut model, 0, &mut rng).unwrap(), MutationOutcome::Unavailable);
    assert_eq!(model.tree(0).tree(), &before);

    // Constant covariates cannot be split.
    let X = Array2::from_elem((6, 2), 1.0);
    let y = Array1::from_vec(vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    let mut model = model_from(X, y);
    let grow_only = TreeMutationSampler::from_probabilities(1.0, 0.0, TreePrior::new(0.95, 2.0)).unwrap();
    let outcome = grow_only.step(&mut model, 0, &mut rng).unwrap();
    assert_eq!(outcome, MutationOutcome::Unavailable);
    assert!(!outcome.is_accepted());
}

#[test]
fn test_grow_with_empty_child_is_rejected() {
    // With two observations the sampled threshold is the larger value half
    // of the time, leaving the right child empty.
    let X = Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap();
    let model = model_from(X, Array1::from_vec(vec![0.0, 1.0]));
    let sampler = TreeMutationSampler::from_probabilities(1.0, 0.0, TreePrior::new(0.95, 2.0)).unwrap();

    let mut rejected = 0;
    for seed in 0..50 {
        let mut rng = StdRng::seed_from_u64(seed);
        match sampler.sample(&model, 0, &mut rng).unwrap() {
            Decision::Accept(Proposal::Grow(grow)) => assert!(!grow.has_empty_child()),
            Decision::Reject(kind) => {
                assert_eq!(kind, MutationKind::Grow);
                rejected += 1;
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }
    assert!(rejected > 0);
}

#[test]
fn test_accepted_grow_keeps_partitions_consistent() {
    let mut model = step_model(40);
    let sampler = TreeMutationSampler::from_probabilities(1.0, 0.0, TreePrior::new(0.95, 2.0)).unwrap();
    let mut rng = StdRng::seed_from_u64(9);

    for _ in 0..50 {
        model.refresh_residuals(0);
        sampler.step(&mut model, 0, &mut rng).unwrap();
    }

    let state = model.tree(0);
    let total: usize = state.leaf_nodes().iter().map(|&leaf| state.n_obsv(leaf)).sum();
    assert_eq!(total, 40);
    // Grow-only walks never leave free slots behind.
    assert_eq!(state.tree().capacity(), 2 * state.leaf_nodes().len() - 1);
    for node in state.tree().split_nodes() {
        let (l, r) = state.tree().children(node).unwrap();
        assert_eq!(state.n_obsv(node), state.n_obsv(l) + state.n_obsv(r));
    }
}
