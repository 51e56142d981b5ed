#![allow(non_snake_case)]

use std::sync::Arc;

use gibbs_bart::chain::ChainExtract;
use gibbs_bart::data::Data;
use gibbs_bart::model::ModelTemplate;
use gibbs_bart::orchestrator::{combine, run_chains, CombinedExtract};
use gibbs_bart::tree::DecisionTree;
use gibbs_bart::{BartSettings, Error};
use ndarray::{Array1, Array2};

fn data() -> Arc<Data> {
    let n = 25;
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let y = Array1::from_iter(x.iter().map(|v| if *v < 12.0 { -1.0 } else { 1.0 }));
    let X = Array2::from_shape_vec((n, 1), x).unwrap();
    Arc::new(Data::new(X, y, true).unwrap())
}

fn settings() -> BartSettings {
    BartSettings {
        n_trees: 4,
        n_chains: 3,
        n_burn: 3,
        n_samples: 4,
        thin: 1.0,
        seed: Some(2024),
        ..BartSettings::default()
    }
}

#[test]
fn test_multichain_counts() {
    let settings = settings();
    let data = data();
    let template = ModelTemplate::new(settings.hyperparameters(), &data);

    let extract = run_chains(&template, data.clone(), &settings).unwrap();
    assert_eq!(extract.len(), 3);
    assert!(extract.iter().all(|chain| chain.n_models() == 4));

    let combined = combine(extract).unwrap();
    assert_eq!(combined.n_models(), 12);
    assert_eq!(combined.in_sample_predictions.dim(), (12, 25));
    assert_eq!(combined.acceptance.len(), 12);

    let prediction = combined.predict_in_sample(&data).unwrap();
    assert_eq!(prediction.len(), 25);
    let out_of_sample = combined.predict(&data, data.X()).unwrap();
    assert_eq!(out_of_sample.len(), 25);
}

#[test]
fn test_multichain_deterministic() {
    let settings = settings();
    let data = data();
    let template = ModelTemplate::new(settings.hyperparameters(), &data);

    let first = run_chains(&template, data.clone(), &settings).unwrap();
    let second = run_chains(&template, data.clone(), &settings).unwrap();
    assert_eq!(first, second, "Multi-chain should be deterministic");

    // Chains use distinct seeds.
    assert_ne!(first[0].models, first[1].models);

    // A dedicated pool does not change the draws.
    let pooled = BartSettings {
        n_jobs: Some(2),
        ..settings
    };
    let third = run_chains(&template, data, &pooled).unwrap();
    assert_eq!(first, third);
}

#[test]
fn test_invalid_settings_fail_before_sampling() {
    let data = data();
    let settings = BartSettings {
        p_grow: 0.9,
        p_prune: 0.5,
        ..settings()
    };
    let template = ModelTemplate::new(settings.hyperparameters(), &data);

    assert!(matches!(
        run_chains(&template, data, &settings),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_chain_failure_is_reported_with_index() {
    let settings = settings();
    let data = data();
    let template = ModelTemplate {
        params: settings.hyperparameters(),
        initial_trees: vec![DecisionTree::new(0.0)],
    };

    match run_chains(&template, data, &settings) {
        Err(Error::ChainExecution { chain, source }) => {
            assert_eq!(chain, 0);
            assert!(matches!(*source, Error::Configuration(_)));
        }
        other => panic!("expected a chain failure, got {other:?}"),
    }
}

#[test]
fn test_extract_json_round_trip() {
    let settings = BartSettings {
        n_chains: 2,
        ..settings()
    };
    let data = data();
    let template = ModelTemplate::new(settings.hyperparameters(), &data);
    let extract = run_chains(&template, data.clone(), &settings).unwrap();

    let json = serde_json::to_string(&extract[0]).unwrap();
    let chain: ChainExtract = serde_json::from_str(&json).unwrap();
    assert_eq!(chain, extract[0]);

    let combined = combine(extract).unwrap();
    let restored = CombinedExtract::from_json(&combined.to_json().unwrap()).unwrap();
    assert_eq!(restored.n_models(), combined.n_models());
    assert_eq!(
        restored.predict(&data, data.X()).unwrap(),
        combined.predict(&data, data.X()).unwrap()
    );
}

#[test]
fn test_combine_without_predictions() {
    let settings = BartSettings {
        store_in_sample_predictions: false,
        ..settings()
    };
    let data = data();
    let template = ModelTemplate::new(settings.hyperparameters(), &data);
    let combined = combine(run_chains(&template, data.clone(), &settings).unwrap()).unwrap();

    assert_eq!(combined.n_models(), 12);
    assert_eq!(combined.in_sample_predictions.nrows(), 0);
    assert!(matches!(
        combined.predict_in_sample(&data),
        Err(Error::PredictionsNotStored)
    ));
}
