#![allow(non_snake_case)]

use approx::assert_abs_diff_eq;
use gibbs_bart::data::{Data, DataPartition, Normalization, Target};
use gibbs_bart::Error;
use ndarray::{array, Array1, Array2};

#[test]
fn test_normalization_round_trip() {
    let y = array![3.0, -1.0, 7.5, 2.0];
    let normalization = Normalization::fit(y.view()).unwrap();

    let normalized = normalization.normalize(y.view());
    assert_abs_diff_eq!(normalized[1], -0.5);
    assert_abs_diff_eq!(normalized[2], 0.5);
    assert!(normalized.iter().all(|v| (-0.5..=0.5).contains(v)));

    let restored = normalization.unnormalize(normalized.view());
    for (a, b) in restored.iter().zip(y.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn test_constant_target_maps_to_zero() {
    let X = Array2::from_shape_vec((3, 1), vec![0.0, 1.0, 2.0]).unwrap();
    let data = Data::new(X, array![4.0, 4.0, 4.0], true).unwrap();

    assert!(data.y().values().iter().all(|&v| v == 0.0));
    assert_eq!(data.normalizing_scale(), 0.0);

    let restored = data.unnormalize_y(data.y().values().view());
    assert_eq!(restored, array![4.0, 4.0, 4.0]);
}

#[test]
fn test_data_rejects_bad_shapes() {
    let X = Array2::<f64>::zeros((3, 2));
    let result = Data::new(X, array![1.0, 2.0], true);
    assert!(matches!(result, Err(Error::DegenerateData(_))));

    let X = Array2::<f64>::zeros((0, 2));
    let result = Data::new(X, Array1::zeros(0), true);
    assert!(matches!(result, Err(Error::DegenerateData(_))));

    let X = Array2::from_shape_vec((2, 1), vec![0.0, f64::INFINITY]).unwrap();
    let result = Data::new(X, array![1.0, 2.0], true);
    assert!(matches!(result, Err(Error::DegenerateData(_))));

    let X = Array2::from_shape_vec((2, 1), vec![f64::NAN, 1.0]).unwrap();
    let result = Data::new(X, array![1.0, 2.0], true);
    assert!(matches!(result, Err(Error::DegenerateData(_))));

    let X = Array2::<f64>::zeros((2, 1));
    let result = Data::new(X, array![1.0, f64::NAN], true);
    assert!(matches!(result, Err(Error::DegenerateData(_))));
}

#[test]
fn test_unnormalized_data_keeps_target() {
    let X = Array2::<f64>::zeros((3, 1));
    let data = Data::new(X, array![1.0, 5.0, 9.0], false).unwrap();

    assert!(data.normalization().is_none());
    assert_eq!(data.y().values(), &array![1.0, 5.0, 9.0]);
    assert_eq!(data.normalizing_scale(), 1.0);
    assert_abs_diff_eq!(data.y_mean(), 5.0);
}

#[test]
fn test_summed_value_cache_follows_target_version() {
    let mut target = Target::new(array![1.0, 2.0, 3.0, 4.0]);
    let partition = DataPartition::from_mask(array![false, true, false, true]);

    assert!(!partition.cache_up_to_date(&target));
    assert_abs_diff_eq!(partition.summed_masked_value(&target), 4.0);
    assert!(partition.cache_up_to_date(&target));

    target.update_values(array![10.0, 20.0, 30.0, 40.0]);
    assert_eq!(target.version(), 1);
    assert!(!partition.cache_up_to_date(&target));
    assert_abs_diff_eq!(partition.summed_masked_value(&target), 40.0);
    assert_abs_diff_eq!(partition.mean_value(&target), 20.0);
}

#[test]
fn test_update_with_equal_values_still_invalidates() {
    let mut target = Target::new(array![1.0, 1.0]);
    let partition = DataPartition::full(2);
    partition.summed_masked_value(&target);

    target.update_values(array![1.0, 1.0]);
    assert!(!partition.cache_up_to_date(&target));
}

#[test]
fn test_partition_splittability() {
    let X = Array2::from_shape_vec(
        (4, 3),
        vec![
            1.0, 5.0, f64::NAN, //
            1.0, 6.0, 2.0, //
            1.0, 5.0, f64::NAN, //
            1.0, 7.0, f64::NAN,
        ],
    )
    .unwrap();
    let partition = DataPartition::full(4);

    assert!(!partition.is_splittable_on(&X, 0));
    assert!(partition.is_splittable_on(&X, 1));
    // A single finite value cannot split.
    assert!(!partition.is_splittable_on(&X, 2));
    assert_eq!(partition.splittable_features(&X), vec![1]);
    assert_eq!(partition.feature_values(&X, 2), vec![2.0]);

    let single = DataPartition::from_mask(array![false, true, true, true]);
    assert!(!single.is_splittable(&X));
    assert_eq!(single.indices().collect::<Vec<_>>(), vec![0]);
}
