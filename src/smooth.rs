//! Gaussian smoothing of volume data.
//!
//! The kernel width is given as FWHM in physical units (mm); per-axis sigmas
//! in voxels are derived from the affine's column norms. Smoothing is a pure
//! function of its inputs and never touches image state.

use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Smooth a volume with a Gaussian kernel of the given FWHM in mm.
///
/// A non-positive `fwhm` returns the input unchanged. 3-D volumes are
/// smoothed along all three axes; 4-D volumes are smoothed per-volume across
/// the trailing axis. Lower ranks fail with
/// [`Error::UnsupportedDimensionality`].
///
/// Separable 1-D convolutions with replicate padding, kernel radius `3σ`.
pub fn smooth_data_array(
    data: &ArrayD<f64>,
    affine: &[[f64; 4]; 4],
    fwhm: f64,
) -> Result<ArrayD<f64>> {
    if fwhm <= 0.0 {
        return Ok(data.clone());
    }
    let ndim = data.ndim();
    if ndim < 3 || ndim > 4 {
        return Err(Error::UnsupportedDimensionality(ndim));
    }

    // FWHM = sqrt(8 ln 2) * sigma. Affine columns follow the file axis
    // order; in-memory spatial axes are reversed, so array axis a reads
    // column 2-a.
    let fwhm_per_sigma = (8.0 * std::f64::consts::LN_2).sqrt();
    let mut sigmas = [0.0; 3];
    for (axis, sigma) in sigmas.iter_mut().enumerate() {
        let col = 2 - axis;
        let norm = (0..3)
            .map(|row| affine[row][col] * affine[row][col])
            .sum::<f64>()
            .sqrt();
        let voxel_size = if norm > 0.0 { norm } else { 1.0 };
        *sigma = fwhm / (fwhm_per_sigma * voxel_size);
    }

    if ndim == 3 {
        let shape = [data.shape()[0], data.shape()[1], data.shape()[2]];
        let contiguous = data.as_standard_layout();
        let flat = contiguous
            .as_slice()
            .ok_or_else(|| Error::MissingData("volume buffer is not contiguous".to_string()))?;
        let smoothed = smooth_3d(flat, shape, &sigmas);
        ArrayD::from_shape_vec(IxDyn(&shape), smoothed)
            .map_err(|e| Error::InvalidDimensions(e.to_string()))
    } else {
        let shape = [data.shape()[0], data.shape()[1], data.shape()[2]];
        let mut out = data.to_owned();
        for t in 0..data.shape()[3] {
            let slab = data.index_axis(Axis(3), t).to_owned();
            let flat = slab
                .as_slice()
                .ok_or_else(|| Error::MissingData("volume buffer is not contiguous".to_string()))?;
            let smoothed = smooth_3d(flat, shape, &sigmas);
            let smoothed = ArrayD::from_shape_vec(IxDyn(&shape), smoothed)
                .map_err(|e| Error::InvalidDimensions(e.to_string()))?;
            out.index_axis_mut(Axis(3), t).assign(&smoothed);
        }
        Ok(out)
    }
}

fn smooth_3d(data: &[f64], shape: [usize; 3], sigmas: &[f64; 3]) -> Vec<f64> {
    let mut current = data.to_vec();
    for (axis, &sigma) in sigmas.iter().enumerate() {
        let kernel = gaussian_kernel(sigma);
        if kernel.len() > 1 {
            current = convolve_axis(&current, shape, &kernel, axis);
        }
    }
    current
}

/// Normalized 1-D Gaussian taps with radius `ceil(3σ)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = Vec::with_capacity(size);
    for i in 0..size {
        let x = i as f64 - radius as f64;
        kernel.push((-x * x / (2.0 * sigma * sigma)).exp());
    }
    let sum: f64 = kernel.iter().sum();
    for tap in kernel.iter_mut() {
        *tap /= sum;
    }
    kernel
}

/// 1-D convolution along one axis of a row-major 3-D block, replicate
/// padding at the boundaries.
fn convolve_axis(data: &[f64], shape: [usize; 3], kernel: &[f64], axis: usize) -> Vec<f64> {
    let [n0, n1, n2] = shape;
    let radius = (kernel.len() / 2) as isize;
    let clamp = |x: isize, n: usize| x.clamp(0, n as isize - 1) as usize;

    (0..n0 * n1 * n2)
        .into_par_iter()
        .map(|flat| {
            let i0 = flat / (n1 * n2);
            let rem = flat % (n1 * n2);
            let i1 = rem / n2;
            let i2 = rem % n2;
            let mut sum = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let off = k as isize - radius;
                let (j0, j1, j2) = match axis {
                    0 => (clamp(i0 as isize + off, n0), i1, i2),
                    1 => (i0, clamp(i1 as isize + off, n1), i2),
                    _ => (i0, i1, clamp(i2 as isize + off, n2)),
                };
                sum += weight * data[(j0 * n1 + j1) * n2 + j2];
            }
            sum
        })
        .collect()
}
