//! Small numeric helpers shared by the samplers and the estimator.

use rand::Rng;

/// Cumulative sum of `v` divided by its total, so the last entry is one.
pub fn normalized_cumsum(v: &[f64]) -> Vec<f64> {
    let total: f64 = v.iter().sum();
    let ret: Vec<f64> = v
        .iter()
        .scan(0f64, |state, item| {
            *state += *item;
            let ret = *state / total;
            Some(ret)
        })
        .collect();

    ret
}

/// Samples an index from a cumulative distribution built by
/// `normalized_cumsum`.
pub fn sample_cumulative<R: Rng + ?Sized>(cumulative: &[f64], rng: &mut R) -> usize {
    let p = rng.gen::<f64>();
    for (idx, value) in cumulative.iter().enumerate() {
        if p < *value {
            return idx;
        }
    }

    cumulative.len().saturating_sub(1)
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Pearson correlation of two equally long samples.
///
/// Returns `None` when the lengths differ, fewer than two points are given,
/// or either sample is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;

    let (sxy, sxx, syy) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0, 0.0), |(sxy, sxx, syy), (&a, &b)| {
            let (da, db) = (a - mx, b - my);
            (sxy + da * db, sxx + da * da, syy + db * db)
        });

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }

    Some(sxy / (sxx * syy).sqrt())
}

/// Root of the mean squared difference between `y` and `y_hat`.
pub fn rmse(y: &[f64], y_hat: &[f64]) -> f64 {
    debug_assert_eq!(y.len(), y_hat.len());
    let sse: f64 = y.iter().zip(y_hat).map(|(a, b)| (a - b).powi(2)).sum();
    (sse / y.len().max(1) as f64).sqrt()
}
