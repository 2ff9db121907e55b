//! Binary masks and the mask/unmask reshaping helpers.
//!
//! A mask marks which voxels participate in data operations (true = keep).
//! Voxel positions are addressed by flat row-major index into the mask's
//! shape, which is also the in-memory order of loaded volumes.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::mhd;

/// A boolean volume with explicit buffer residency.
///
/// File-backed masks can release their decoded booleans with
/// [`uncache`](Mask::uncache) and reload them on demand; in-memory masks
/// stay resident for their lifetime.
#[derive(Debug, Clone)]
pub struct Mask {
    source: Option<PathBuf>,
    shape: Vec<usize>,
    data: Option<ArrayD<bool>>,
}

impl Mask {
    /// Load a mask from a MetaImage file. Any nonzero sample is true.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (volume, _) = mhd::load(path)?;
        Ok(Self {
            source: Some(path.to_path_buf()),
            shape: volume.shape().to_vec(),
            data: Some(binarize(&volume)),
        })
    }

    /// Build a mask from an in-memory volume. Any nonzero sample is true.
    pub fn from_volume(volume: &ArrayD<f64>) -> Self {
        Self {
            source: None,
            shape: volume.shape().to_vec(),
            data: Some(binarize(volume)),
        }
    }

    /// Spatial shape of the mask.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Whether the boolean buffer is currently resident.
    pub fn is_resident(&self) -> bool {
        self.data.is_some()
    }

    /// Access the boolean volume, reloading from the backing file if it was
    /// released.
    pub fn load(&mut self) -> Result<&ArrayD<bool>> {
        if self.data.is_none() {
            let source = self.source.clone().ok_or_else(|| {
                Error::MissingData("mask data was released and has no backing file".to_string())
            })?;
            let (volume, _) = mhd::load(&source)?;
            self.data = Some(binarize(&volume));
        }
        self.data
            .as_ref()
            .ok_or_else(|| Error::MissingData("mask data unavailable".to_string()))
    }

    /// Release the resident booleans when a backing file exists.
    ///
    /// In-memory masks keep their data; releasing it would lose the mask.
    pub fn uncache(&mut self) {
        if self.source.is_some() {
            self.data = None;
        }
    }
}

fn binarize(volume: &ArrayD<f64>) -> ArrayD<bool> {
    volume.mapv(|v| v != 0.0)
}

/// Flat row-major positions of the mask's true voxels.
pub fn mask_indices(mask: &ArrayD<bool>) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &m)| m.then_some(i))
        .collect()
}

/// Rebuild a full volume from a flat value vector and a mask.
///
/// Values are placed at the mask's true positions in row-major order;
/// everything else is zero. The vector length must equal the mask's
/// true-voxel count.
pub fn vector_to_volume(vector: &ArrayD<f64>, mask: &ArrayD<bool>) -> Result<ArrayD<f64>> {
    if vector.ndim() != 1 {
        return Err(Error::InvalidRank(vector.ndim()));
    }
    let count = mask.iter().filter(|&&m| m).count();
    if vector.len() != count {
        return Err(Error::InvalidDimensions(format!(
            "vector holds {} values but the mask selects {count} voxels",
            vector.len()
        )));
    }
    let mut out = ArrayD::zeros(IxDyn(mask.shape()));
    let mut values = vector.iter();
    for (slot, &m) in out.iter_mut().zip(mask.iter()) {
        if m {
            if let Some(&v) = values.next() {
                *slot = v;
            }
        }
    }
    Ok(out)
}

/// Rebuild a 4-D volume from a `(n_voxels, n_volumes)` matrix and a mask.
///
/// The result is shaped `mask.shape + [n_volumes]` with zeros outside the
/// mask.
pub fn matrix_to_volume4d(matrix: &ArrayD<f64>, mask: &ArrayD<bool>) -> Result<ArrayD<f64>> {
    if matrix.ndim() != 2 {
        return Err(Error::InvalidRank(matrix.ndim()));
    }
    let n_voxels = matrix.shape()[0];
    let n_volumes = matrix.shape()[1];
    let indices = mask_indices(mask);
    if n_voxels != indices.len() {
        return Err(Error::InvalidDimensions(format!(
            "matrix holds {n_voxels} voxel rows but the mask selects {} voxels",
            indices.len()
        )));
    }

    let mut shape = mask.shape().to_vec();
    shape.push(n_volumes);
    let mut out = ArrayD::zeros(IxDyn(&shape));
    // Row-major layout: the trailing volume axis is the fastest-varying one.
    let flat = out
        .as_slice_mut()
        .ok_or_else(|| Error::MissingData("volume buffer is not contiguous".to_string()))?;
    for (row, &voxel) in indices.iter().enumerate() {
        for t in 0..n_volumes {
            flat[voxel * n_volumes + t] = matrix[[row, t]];
        }
    }
    Ok(out)
}

/// Project 4-D data through a 3-D mask.
///
/// Returns the `(n_voxels, n_volumes)` value matrix and the flat selection
/// indices. The data's spatial shape must equal the mask's shape.
pub fn apply_mask_to_4d(
    data: &ArrayD<f64>,
    mask: &ArrayD<bool>,
) -> Result<(ArrayD<f64>, Vec<usize>)> {
    if data.ndim() != 4 {
        return Err(Error::UnsupportedDimensionality(data.ndim()));
    }
    if &data.shape()[..3] != mask.shape() {
        return Err(Error::IncompatibleShape {
            volume: data.shape()[..3].to_vec(),
            mask: mask.shape().to_vec(),
        });
    }

    let n_volumes = data.shape()[3];
    let indices = mask_indices(mask);
    let mut matrix = Array2::<f64>::zeros((indices.len(), n_volumes));
    let contiguous = data.as_standard_layout();
    let flat = contiguous
        .as_slice()
        .ok_or_else(|| Error::MissingData("volume buffer is not contiguous".to_string()))?;
    for (row, &voxel) in indices.iter().enumerate() {
        for t in 0..n_volumes {
            matrix[[row, t]] = flat[voxel * n_volumes + t];
        }
    }
    Ok((matrix.into_dyn(), indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn checker_mask() -> ArrayD<bool> {
        // 2x2x2 mask with four true voxels.
        let values = vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let volume = ArrayD::from_shape_vec(IxDyn(&[2, 2, 2]), values).unwrap();
        binarize(&volume)
    }

    #[test]
    fn indices_are_flat_row_major() {
        let mask = checker_mask();
        assert_eq!(mask_indices(&mask), vec![0, 3, 4, 7]);
    }

    #[test]
    fn vector_round_trip_through_mask() {
        let mask = checker_mask();
        let values = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]).into_dyn();
        let volume = vector_to_volume(&values, &mask).unwrap();
        assert_eq!(volume.shape(), &[2, 2, 2]);
        assert_eq!(volume[[0, 0, 0]], 1.0);
        assert_eq!(volume[[0, 1, 1]], 2.0);
        assert_eq!(volume[[1, 0, 0]], 3.0);
        assert_eq!(volume[[1, 1, 1]], 4.0);
        // Unselected voxels are background.
        assert_eq!(volume[[0, 0, 1]], 0.0);
    }

    #[test]
    fn vector_length_must_match_mask() {
        let mask = checker_mask();
        let values = Array1::from_vec(vec![1.0, 2.0]).into_dyn();
        let err = vector_to_volume(&values, &mask).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions(_)));
    }

    #[test]
    fn vector_rank_is_enforced() {
        let mask = checker_mask();
        let matrix = ArrayD::zeros(IxDyn(&[2, 2]));
        let err = vector_to_volume(&matrix, &mask).unwrap_err();
        assert!(matches!(err, Error::InvalidRank(2)));
    }

    #[test]
    fn matrix_round_trip_through_mask() {
        let mask = checker_mask();
        let mut data = ArrayD::zeros(IxDyn(&[2, 2, 2, 3]));
        for (i, &voxel) in mask_indices(&mask).iter().enumerate() {
            for t in 0..3 {
                let i0 = voxel / 4;
                let i1 = (voxel % 4) / 2;
                let i2 = voxel % 2;
                data[[i0, i1, i2, t]] = (i * 10 + t) as f64;
            }
        }
        let (matrix, indices) = apply_mask_to_4d(&data, &mask).unwrap();
        assert_eq!(matrix.shape(), &[4, 3]);
        assert_eq!(indices, mask_indices(&mask));
        assert_eq!(matrix[[2, 1]], 21.0);

        let rebuilt = matrix_to_volume4d(&matrix, &mask).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn apply_mask_shape_mismatch() {
        let mask = checker_mask();
        let data = ArrayD::zeros(IxDyn(&[3, 2, 2, 1]));
        let err = apply_mask_to_4d(&data, &mask).unwrap_err();
        assert!(matches!(err, Error::IncompatibleShape { .. }));
    }

    #[test]
    fn in_memory_mask_survives_uncache() {
        let volume = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 1.0);
        let mut mask = Mask::from_volume(&volume);
        mask.uncache();
        assert!(mask.is_resident());
        assert_eq!(mask.load().unwrap().iter().filter(|&&m| m).count(), 8);
    }
}
