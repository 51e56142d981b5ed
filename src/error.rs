//! Error types for the BART Gibbs sampler.

use thiserror::Error;

use crate::tree::TreeError;

/// Errors raised while configuring, fitting or combining BART chains.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid hyperparameters, detected before any sampling starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Data that cannot be sampled from (empty, mis-shaped or non-finite).
    #[error("Degenerate data: {0}")]
    DegenerateData(String),

    /// A structural tree primitive was misused.
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// A worker chain failed; `chain` is the index of the failing chain.
    #[error("Chain {chain} failed: {source}")]
    ChainExecution {
        /// Index of the chain that failed first.
        chain: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The chain stopped because another chain failed.
    #[error("Chain cancelled after a failure in another chain")]
    Cancelled,

    /// The dedicated worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Chain outputs with incompatible shapes.
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// JSON (de)serialization of settings or extracts.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Prediction requested before `fit`.
    #[error("Model has not been fit")]
    NotFitted,

    /// In-sample predictions requested but they were not stored.
    #[error(
        "In sample predictions are only available if `store_in_sample_predictions` is true; \
         pass covariates to predict out of sample instead"
    )]
    PredictionsNotStored,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
