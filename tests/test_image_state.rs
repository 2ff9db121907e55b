//! Tests for the stateful image pipeline: caching, masking, smoothing.

use mhdrs::mhd::{self, ElementType};
use mhdrs::{Error, Mask, MedicalImage};
use ndarray::{ArrayD, IxDyn};

const IDENTITY: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn ramp_volume(shape: &[usize]) -> ArrayD<f64> {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|i| i as f64).collect()).unwrap()
}

fn save_volume(dir: &std::path::Path, name: &str, volume: &ArrayD<f64>) -> std::path::PathBuf {
    let path = dir.join(name);
    mhd::save(
        &path,
        volume,
        &mhd::file_order_shape(volume.shape()),
        ElementType::Float64,
    )
    .unwrap();
    path
}

/// A mask over a (4, 3, 2) volume keeping the first half of the voxels.
fn half_mask() -> Mask {
    let mut mask = ArrayD::zeros(IxDyn(&[4, 3, 2]));
    for (i, v) in mask.iter_mut().enumerate() {
        if i < 12 {
            *v = 1.0;
        }
    }
    Mask::from_volume(&mask)
}

#[test]
fn plain_data_access_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    assert_eq!(img.shape(), &[4, 3, 2]);
    assert_eq!(img.ndim(), 3);
    assert_eq!(img.dtype(), ElementType::Float64);
    assert!(img.has_data_loaded());

    let data = img.get_data(false, false, false).unwrap();
    assert_eq!(data.to_owned().into_dyn(), volume);
}

#[test]
fn repeated_access_returns_cached_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();
    img.set_smooth_fwhm(2.0);

    let first = img.get_data(true, true, false).unwrap();
    let second = img.get_data(true, true, false).unwrap();
    // Same buffer, no recomputation.
    assert_eq!(first.as_ptr(), second.as_ptr());
}

#[test]
fn changing_fwhm_invalidates_smoothed_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_smooth_fwhm(2.0);
    let first = img.get_data(true, false, false).unwrap();
    assert!(img.is_smoothed());

    img.set_smooth_fwhm(4.0);
    assert!(!img.is_smoothed());
    let second = img.get_data(true, false, false).unwrap();
    assert_ne!(first.as_ptr(), second.as_ptr());

    // Setting the same width again must not invalidate.
    img.set_smooth_fwhm(4.0);
    assert!(img.is_smoothed());
    let third = img.get_data(true, false, false).unwrap();
    assert_eq!(second.as_ptr(), third.as_ptr());
}

#[test]
fn safe_copy_is_an_isolated_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let cached = img.get_data(false, false, false).unwrap();
    let snapshot = img.get_data(false, false, true).unwrap();
    assert_ne!(cached.as_ptr(), snapshot.as_ptr());

    // Snapshot access does not disturb the cache flags or buffer.
    let cached_again = img.get_data(false, false, false).unwrap();
    assert_eq!(cached.as_ptr(), cached_again.as_ptr());
}

#[test]
fn snapshot_does_not_commit_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_smooth_fwhm(2.0);
    let _ = img.get_data(true, false, true).unwrap();
    // The snapshot was smoothed but the image state must not claim it.
    assert!(!img.is_smoothed());
}

#[test]
fn set_mask_rejects_incompatible_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();

    let wrong = Mask::from_volume(&ArrayD::from_elem(IxDyn(&[2, 2, 2]), 1.0));
    let err = img.set_mask(wrong).unwrap_err();
    assert!(matches!(err, Error::IncompatibleShape { .. }));
    // Prior mask untouched.
    assert!(img.has_mask());
    assert_eq!(
        img.get_mask_indices().unwrap().unwrap().len(),
        12,
        "original mask must survive the failed set_mask"
    );
}

#[test]
fn masking_zeroes_outside_and_keeps_inside() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();

    let masked = img.get_data(false, true, false).unwrap();
    let flat: Vec<f64> = masked.iter().copied().collect();
    for (i, &v) in flat.iter().enumerate() {
        if i < 12 {
            assert_eq!(v, i as f64);
        } else {
            assert_eq!(v, 0.0);
        }
    }
}

#[test]
fn mask_and_flatten_round_trips_through_unmask() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();

    let (values, indices, mask_shape) = img.mask_and_flatten().unwrap().unwrap();
    assert_eq!(mask_shape, vec![4, 3, 2]);
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(values.shape(), &[12]);

    let rebuilt = img.unmask(&values).unwrap();
    let flat: Vec<f64> = rebuilt.iter().copied().collect();
    for (i, &v) in flat.iter().enumerate() {
        if i < 12 {
            assert_eq!(v, i as f64);
        } else {
            assert_eq!(v, 0.0);
        }
    }
}

#[test]
fn mask_and_flatten_without_mask_is_not_applicable() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    assert!(img.mask_and_flatten().unwrap().is_none());
    assert!(img.get_mask_indices().unwrap().is_none());
}

#[test]
fn unmask_without_mask_returns_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let arr = ArrayD::from_elem(IxDyn(&[5]), 7.0);
    assert_eq!(img.unmask(&arr).unwrap(), arr);
}

#[test]
fn unmask_rejects_bad_rank() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();
    let arr = ArrayD::zeros(IxDyn(&[2, 2, 2]));
    assert!(matches!(img.unmask(&arr).unwrap_err(), Error::InvalidRank(3)));
}

#[test]
fn apply_smoothing_non_positive_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    assert!(img.apply_smoothing(0.0).unwrap().is_none());
    assert!(img.apply_smoothing(-1.0).unwrap().is_none());
    assert_eq!(img.smooth_fwhm(), 0.0);
    assert!(!img.is_smoothed());
}

#[test]
fn apply_smoothing_failure_restores_previous_width() {
    // Smoothing rejects 2-D data, so the new width must be rolled back
    // before the error propagates.
    let data = ArrayD::from_elem(IxDyn(&[4, 4]), 1.0);
    let mut img = MedicalImage::from_volume(data, IDENTITY, ElementType::Float64);
    img.set_smooth_fwhm(1.5);

    let err = img.apply_smoothing(4.0).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDimensionality(2)));
    assert_eq!(img.smooth_fwhm(), 1.5);
    assert!(!img.is_smoothed());
}

#[test]
fn apply_smoothing_sets_width_and_returns_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[6, 5, 4]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let data = img.apply_smoothing(3.0).unwrap().unwrap();
    assert_eq!(img.smooth_fwhm(), 3.0);
    assert_eq!(data.shape(), &[6, 5, 4]);
    // Smoothing pulls the extremes toward the mean.
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max < 119.0);
}

#[test]
fn four_d_masking_applies_per_volume() {
    let mut data = ArrayD::zeros(IxDyn(&[2, 2, 2, 3]));
    for (i, v) in data.iter_mut().enumerate() {
        *v = i as f64;
    }
    let mut img = MedicalImage::from_volume(data, IDENTITY, ElementType::Float64);

    let mut mask = ArrayD::zeros(IxDyn(&[2, 2, 2]));
    mask[[0, 0, 0]] = 1.0;
    mask[[1, 1, 1]] = 1.0;
    img.set_mask(Mask::from_volume(&mask)).unwrap();

    let masked = img.get_data(false, true, false).unwrap();
    assert_eq!(masked.shape(), &[2, 2, 2, 3]);
    // Kept voxels preserve all volumes; everything else is zero.
    for t in 0..3 {
        assert_eq!(masked[[0, 0, 0, t]], t as f64);
        assert_eq!(masked[[1, 1, 1, t]], (21 + t) as f64);
        assert_eq!(masked[[0, 1, 0, t]], 0.0);
    }

    let (values, indices, _) = img.mask_and_flatten().unwrap().unwrap();
    assert_eq!(values.shape(), &[2, 3]);
    assert_eq!(indices, vec![0, 7]);
}

#[test]
fn clear_data_evicts_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let _ = img.get_data(false, false, false).unwrap();
    img.clear_data();
    assert!(!img.has_data_loaded());

    // Next access decodes from the backing file again.
    let data = img.get_data(false, false, false).unwrap();
    assert_eq!(data.to_owned().into_dyn(), volume);
    assert!(img.has_data_loaded());
}

#[test]
fn uncached_policy_never_keeps_data_resident() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, false).unwrap();
    assert!(!img.has_data_loaded());
    let first = img.get_data(false, false, false).unwrap();
    assert!(!img.has_data_loaded());
    let second = img.get_data(false, false, false).unwrap();
    // No cache, so each access decodes a fresh buffer.
    assert_ne!(first.as_ptr(), second.as_ptr());
    assert_eq!(first, second);
}

#[test]
fn to_file_unsmoothed_preserves_original() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let out = dir.path().join("copy.mhd");
    img.to_file(&out).unwrap();

    let (reloaded, _) = mhd::load(&out).unwrap();
    assert_eq!(reloaded, volume);
}

#[test]
fn to_file_with_mask_writes_masked_data() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask(half_mask()).unwrap();
    let out = dir.path().join("masked.mhd");
    img.to_file(&out).unwrap();

    let (reloaded, _) = mhd::load(&out).unwrap();
    let flat: Vec<f64> = reloaded.iter().copied().collect();
    assert_eq!(flat[5], 5.0);
    assert_eq!(flat[20], 0.0);
}

#[test]
fn apply_mask_returns_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_volume(dir.path(), "img.mhd", &ramp_volume(&[4, 3, 2]));

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    let data = img.apply_mask(half_mask()).unwrap();
    assert!(img.has_mask());
    let flat: Vec<f64> = data.iter().copied().collect();
    assert_eq!(flat[0], 0.0);
    assert_eq!(flat[11], 11.0);
    assert_eq!(flat[12], 0.0);
}

#[test]
fn mask_loaded_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let volume = ramp_volume(&[4, 3, 2]);
    let path = save_volume(dir.path(), "img.mhd", &volume);

    let mut mask_volume = ArrayD::zeros(IxDyn(&[4, 3, 2]));
    mask_volume[[0, 0, 0]] = 1.0;
    mask_volume[[3, 2, 1]] = 1.0;
    let mask_path = save_volume(dir.path(), "mask.mhd", &mask_volume);

    let mut img = MedicalImage::from_file(&path, true).unwrap();
    img.set_mask_from_file(&mask_path).unwrap();
    let indices = img.get_mask_indices().unwrap().unwrap();
    assert_eq!(indices, vec![0, 23]);
}
