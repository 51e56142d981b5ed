//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.
#![warn(missing_docs)]
#![allow(non_snake_case)]

//! gibbs_bart implements Bayesian Additive Regression Trees (BART) with the
//! classic Metropolis-within-Gibbs sampler of Chipman et al. [2010]. BART
//! approximates a function by a sum of many small trees whose priors keep
//! any single tree from explaining the data on its own.
//!
//! One sweep of a chain visits every tree in turn: a grow or prune move on
//! its structure is accepted or rejected against the partial residuals of
//! the other trees, then its leaf values are redrawn from their conjugate
//! normal posterior. The sweep ends with an inverse-gamma draw of the
//! residual variance. Independent chains run in parallel and their retained
//! samples are concatenated.

pub mod chain;
pub mod data;
pub mod error;
pub mod estimator;
pub mod forest;
pub mod math;
pub mod model;
pub mod mutation;
pub mod ops;
pub mod orchestrator;
pub mod sampler;
pub mod schedule;
pub mod settings;
pub mod split_rules;
pub mod tree;

pub use crate::chain::{AcceptanceRecord, ChainConfig, ChainExtract, ChainSampler};
pub use crate::data::{Data, DataPartition, Target};
pub use crate::error::{Error, Result};
pub use crate::estimator::BartRegressor;
pub use crate::model::{Hyperparameters, Model, ModelSample, ModelTemplate};
pub use crate::mutation::{MutationKind, MutationOutcome, TreeMutationSampler};
pub use crate::orchestrator::{combine, run_chains, CombinedExtract, Extract};
pub use crate::settings::BartSettings;
pub use crate::tree::{DecisionTree, Predict};
