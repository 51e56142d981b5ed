//! Split rule trait definition and the continuous split rule used by the grow
//! proposal. A rule samples a split value from a set of candidates and
//! divides a node's observations according to it.

use ndarray::{Array1, ArrayView1, Zip};
use rand::Rng;

/// Split rule interface for defining split rule strategies.
pub trait SplitRule {
    /// The data type associated with the split rule strategy.
    type Value;

    /// Samples a split value uniformly from the candidate points.
    fn sample_split_value<R: Rng + ?Sized>(
        &self,
        candidates: &[Self::Value],
        rng: &mut R,
    ) -> Option<Self::Value>;

    /// Whether `value` is routed to the left child of a split at `split_value`.
    fn goes_left(&self, value: &Self::Value, split_value: &Self::Value) -> bool;

    /// Divides the observations not excluded by `mask` into left and right
    /// exclusion masks.
    fn divide(
        &self,
        column: ArrayView1<Self::Value>,
        mask: &Array1<bool>,
        split_value: &Self::Value,
    ) -> (Array1<bool>, Array1<bool>) {
        let mut left = Array1::from_elem(mask.len(), true);
        let mut right = Array1::from_elem(mask.len(), true);

        Zip::from(&mut left)
            .and(&mut right)
            .and(mask)
            .and(column)
            .for_each(|l, r, &excluded, value| {
                if !excluded {
                    if self.goes_left(value, split_value) {
                        *l = false;
                    } else {
                        *r = false;
                    }
                }
            });

        (left, right)
    }
}

/// Standard continuous split rule. Pick a pivot value and split
/// depending on if variable is smaller or greater than the value picked.
///
/// Values less than or equal to the pivot go left; NaN goes right.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuousSplit;

impl SplitRule for ContinuousSplit {
    type Value = f64;

    fn sample_split_value<R: Rng + ?Sized>(&self, candidates: &[f64], rng: &mut R) -> Option<f64> {
        if candidates.len() > 1 {
            let idx = rng.gen_range(0..candidates.len());
            Some(candidates[idx])
        } else {
            None
        }
    }

    fn goes_left(&self, value: &f64, split_value: &f64) -> bool {
        *value <= *split_value
    }
}
