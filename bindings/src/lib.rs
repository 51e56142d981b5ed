#![allow(non_snake_case)]

use gibbs_bart::{BartRegressor, BartSettings};
use numpy::{PyArray1, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict};
use serde_json::{Map, Number, Value};

fn to_py_err(e: gibbs_bart::Error) -> PyErr {
    PyValueError::new_err(e.to_string())
}

// Keyword arguments become a JSON object so unknown keys and defaults follow
// the same rules as `BartSettings::from_json`.
fn settings_from_kwargs(kwargs: Option<&Bound<'_, PyDict>>) -> PyResult<BartSettings> {
    let mut map = Map::new();

    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs.iter() {
            let key: String = key.extract()?;
            let value = if value.is_none() {
                Value::Null
            } else if value.is_instance_of::<PyBool>() {
                Value::Bool(value.extract()?)
            } else if let Ok(i) = value.extract::<u64>() {
                Value::Number(Number::from(i))
            } else if let Ok(f) = value.extract::<f64>() {
                Number::from_f64(f).map(Value::Number).ok_or_else(|| {
                    PyValueError::new_err(format!("setting `{key}` must be finite"))
                })?
            } else {
                return Err(PyTypeError::new_err(format!(
                    "setting `{key}` must be a bool, a number or None"
                )));
            };
            map.insert(key, value);
        }
    }

    BartSettings::from_json(&Value::Object(map).to_string()).map_err(to_py_err)
}

/// `FittedBart` holds the retained posterior samples of a BART fit.
#[pyclass]
struct FittedBart {
    regressor: BartRegressor,
}

#[pymethods]
impl FittedBart {
    /// Posterior-mean prediction; in-sample when `X` is omitted.
    #[pyo3(signature = (X=None))]
    fn predict<'py>(
        &self,
        py: Python<'py>,
        X: Option<PyReadonlyArray2<f64>>,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let X = X.map(|X| X.as_array().to_owned());
        let predictions = self.regressor.predict(X.as_ref()).map_err(to_py_err)?;
        Ok(PyArray1::from_array_bound(py, &predictions))
    }

    /// Root mean squared error; on the training data when omitted.
    #[pyo3(signature = (X=None, y=None))]
    fn rmse(&self, X: Option<PyReadonlyArray2<f64>>, y: Option<PyReadonlyArray1<f64>>) -> PyResult<f64> {
        let X = X.map(|X| X.as_array().to_owned());
        let y = y.map(|y| y.as_array().to_owned());
        self.regressor
            .rmse(X.as_ref(), y.as_ref())
            .map_err(to_py_err)
    }

    /// Number of retained posterior samples across every chain.
    fn n_samples(&self) -> PyResult<usize> {
        Ok(self.regressor.model_samples().map_err(to_py_err)?.len())
    }

    /// Fraction of accepted tree mutations, if the trace was stored.
    fn acceptance_rate(&self) -> PyResult<Option<f64>> {
        Ok(self.regressor.extract().map_err(to_py_err)?.acceptance_rate())
    }

    /// Combined samples as a JSON string.
    fn to_json(&self) -> PyResult<String> {
        self.regressor
            .extract()
            .and_then(|extract| extract.to_json())
            .map_err(to_py_err)
    }
}

/// Fits a BART ensemble; keyword arguments override the default settings.
#[pyfunction]
#[pyo3(signature = (X, y, **settings))]
fn fit(
    py: Python<'_>,
    X: PyReadonlyArray2<f64>,
    y: PyReadonlyArray1<f64>,
    settings: Option<&Bound<'_, PyDict>>,
) -> PyResult<FittedBart> {
    let settings = settings_from_kwargs(settings)?;
    let X = X.as_array().to_owned();
    let y = y.as_array().to_owned();

    let mut regressor = BartRegressor::new(settings).map_err(to_py_err)?;
    py.allow_threads(|| regressor.fit(X, y).map(|_| ()))
        .map_err(to_py_err)?;

    Ok(FittedBart { regressor })
}

#[pymodule]
fn gibbs_bart_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<FittedBart>()?;
    m.add_function(wrap_pyfunction!(fit, m)?)?;

    Ok(())
}
