//! Fit/predict facade over the chain orchestrator.
#![allow(non_snake_case)]

use std::sync::Arc;

use ndarray::{Array1, Array2};

use crate::chain::AcceptanceRecord;
use crate::data::Data;
use crate::error::{Error, Result};
use crate::math;
use crate::model::{ModelSample, ModelTemplate};
use crate::orchestrator::{combine, run_chains, CombinedExtract};
use crate::settings::BartSettings;

#[derive(Debug, Clone)]
struct Fitted {
    data: Arc<Data>,
    extract: CombinedExtract,
}

/// Bayesian Additive Regression Trees regressor sampled with independent
/// Gibbs chains.
#[derive(Debug, Clone)]
pub struct BartRegressor {
    settings: BartSettings,
    fitted: Option<Fitted>,
}

impl BartRegressor {
    /// Creates an unfitted regressor, validating `settings`.
    pub fn new(settings: BartSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            fitted: None,
        })
    }

    /// Rebuilds a fitted regressor from an extract computed elsewhere on the
    /// same training data.
    pub fn from_extract(
        settings: BartSettings,
        extract: CombinedExtract,
        X: Array2<f64>,
        y: Array1<f64>,
    ) -> Result<Self> {
        settings.validate()?;
        let data = Data::new(X, y, settings.normalize)?;

        if extract.in_sample_predictions.nrows() > 0
            && extract.in_sample_predictions.ncols() != data.n_obsv()
        {
            return Err(Error::DegenerateData(format!(
                "extract holds predictions for {} observations, data has {}",
                extract.in_sample_predictions.ncols(),
                data.n_obsv()
            )));
        }

        Ok(Self {
            settings,
            fitted: Some(Fitted {
                data: Arc::new(data),
                extract,
            }),
        })
    }

    /// Settings used for fitting.
    pub fn settings(&self) -> &BartSettings {
        &self.settings
    }

    /// Whether `fit` has completed.
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Samples the posterior given covariates `X` and target `y`.
    pub fn fit(&mut self, X: Array2<f64>, y: Array1<f64>) -> Result<&mut Self> {
        let data = Arc::new(Data::new(X, y, self.settings.normalize)?);
        let template = ModelTemplate::new(self.settings.hyperparameters(), &data);

        log::info!(
            "fitting {} observations with {} features",
            data.n_obsv(),
            data.n_features()
        );
        let extract = combine(run_chains(&template, Arc::clone(&data), &self.settings)?)?;

        self.fitted = Some(Fitted { data, extract });
        Ok(self)
    }

    /// Fits then returns the in-sample posterior-mean prediction.
    pub fn fit_predict(&mut self, X: Array2<f64>, y: Array1<f64>) -> Result<Array1<f64>> {
        self.fit(X, y)?;
        self.predict(None)
    }

    fn fitted(&self) -> Result<&Fitted> {
        self.fitted.as_ref().ok_or(Error::NotFitted)
    }

    /// Posterior-mean prediction in target units.
    ///
    /// With `None`, returns the stored in-sample prediction, which requires
    /// `store_in_sample_predictions`.
    pub fn predict(&self, X: Option<&Array2<f64>>) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        match X {
            Some(X) => fitted.extract.predict(&fitted.data, X),
            None => fitted.extract.predict_in_sample(&fitted.data),
        }
    }

    /// `y - predict(X)`; with `None`, the training residuals.
    pub fn residuals(&self, X: Option<&Array2<f64>>, y: Option<&Array1<f64>>) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        let y = y.unwrap_or(fitted.data.unnormalized_y());
        let prediction = self.predict(X)?;

        if y.len() != prediction.len() {
            return Err(Error::DegenerateData(format!(
                "target has {} values, prediction has {}",
                y.len(),
                prediction.len()
            )));
        }
        Ok(y - &prediction)
    }

    /// Squared residuals.
    pub fn l2_error(&self, X: Option<&Array2<f64>>, y: Option<&Array1<f64>>) -> Result<Array1<f64>> {
        Ok(self.residuals(X, y)?.mapv(|r| r * r))
    }

    /// Root mean squared error.
    pub fn rmse(&self, X: Option<&Array2<f64>>, y: Option<&Array1<f64>>) -> Result<f64> {
        let fitted = self.fitted()?;
        let y = y.unwrap_or(fitted.data.unnormalized_y());
        let prediction = self.predict(X)?;

        if y.len() != prediction.len() {
            return Err(Error::DegenerateData(format!(
                "target has {} values, prediction has {}",
                y.len(),
                prediction.len()
            )));
        }
        Ok(math::rmse(&y.to_vec(), &prediction.to_vec()))
    }

    /// Retained ensemble states across every chain.
    pub fn model_samples(&self) -> Result<&[ModelSample]> {
        Ok(&self.fitted()?.extract.models)
    }

    /// Per-sample acceptance records, empty if not stored.
    pub fn acceptance_trace(&self) -> Result<&[AcceptanceRecord]> {
        Ok(&self.fitted()?.extract.acceptance)
    }

    /// In-sample prediction of every retained model, in target units.
    pub fn prediction_samples(&self) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        fitted.extract.in_sample_prediction_samples(&fitted.data)
    }

    /// Combined chain samples.
    pub fn extract(&self) -> Result<&CombinedExtract> {
        Ok(&self.fitted()?.extract)
    }

    /// Training data.
    pub fn data(&self) -> Result<&Data> {
        Ok(&self.fitted()?.data)
    }
}
