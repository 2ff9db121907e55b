//! Stateful medical image with lazy masking, smoothing, and data caching.
//!
//! [`MedicalImage`] owns one volume (data, affine, header), an optional
//! [`Mask`], a smoothing width, and the cache-validity flags that record
//! which transforms the resident data reflects. Data access is lazy: nothing
//! is recomputed while the requested `(smoothed, masked)` combination
//! matches what is already resident.

use std::path::{Path, PathBuf};

use ndarray::{ArcArray, Array2, ArrayD, IxDyn, Zip};

use crate::error::{Error, Result};
use crate::mask::{self, Mask};
use crate::mhd::{self, ElementType, MetaHeader};
use crate::smooth;

/// Shared handle to decoded volume data.
///
/// Cache hits hand out the same buffer without copying; copy-on-write keeps
/// callers from mutating the resident cache through it.
pub type Volume = ArcArray<f64, IxDyn>;

/// Residency policy for decoded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep decoded data resident after access.
    Fill,
    /// Never force residency; reload from the backing file per access.
    Unchanged,
}

/// A volumetric image with lazy masking, Gaussian smoothing, and explicit
/// buffer residency.
#[derive(Debug)]
pub struct MedicalImage {
    source: Option<PathBuf>,
    header: MetaHeader,
    affine: [[f64; 4]; 4],
    elem: ElementType,
    shape: Vec<usize>,
    /// Pristine decoded volume, when resident.
    base: Option<Volume>,
    /// Last non-snapshot pipeline result; what the cache flags describe.
    computed: Option<Volume>,
    mask: Option<Mask>,
    caching: CachePolicy,
    smooth_fwhm: f64,
    is_data_smooth: bool,
    is_data_masked: bool,
}

impl MedicalImage {
    /// Open a MetaImage file.
    ///
    /// With `cache_data` the decoded volume stays resident
    /// ([`CachePolicy::Fill`]); without it every access re-reads the file.
    pub fn from_file<P: AsRef<Path>>(path: P, cache_data: bool) -> Result<Self> {
        let path = path.as_ref();
        let (volume, header) = mhd::load(path)?;
        let caching = if cache_data {
            CachePolicy::Fill
        } else {
            CachePolicy::Unchanged
        };
        Ok(Self {
            source: Some(path.to_path_buf()),
            affine: header.affine(),
            elem: header.element_type()?,
            shape: volume.shape().to_vec(),
            base: match caching {
                CachePolicy::Fill => Some(volume.into_shared()),
                CachePolicy::Unchanged => None,
            },
            computed: None,
            mask: None,
            caching,
            smooth_fwhm: 0.0,
            is_data_smooth: false,
            is_data_masked: false,
            header,
        })
    }

    /// Wrap an already-decoded volume.
    ///
    /// This is the seam for data coming from any other provider of decoded
    /// data plus an affine. The volume stays resident for the image's
    /// lifetime since there is no backing file to reload from.
    pub fn from_volume(volume: ArrayD<f64>, affine: [[f64; 4]; 4], elem: ElementType) -> Self {
        let mut header = MetaHeader::new();
        header.set("ObjectType", "Image");
        header.set("NDims", volume.ndim().to_string());
        header.set("ElementType", elem.tag());
        Self {
            source: None,
            header,
            affine,
            elem,
            shape: volume.shape().to_vec(),
            base: Some(volume.into_shared()),
            computed: None,
            mask: None,
            caching: CachePolicy::Fill,
            smooth_fwhm: 0.0,
            is_data_smooth: false,
            is_data_masked: false,
        }
    }

    /// Number of dimensions of the volume.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// In-memory shape of the volume.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// On-disk sample format of the volume.
    pub fn dtype(&self) -> ElementType {
        self.elem
    }

    /// Physical voxel sizes from the header, unit spacing when absent.
    pub fn pixdim(&self) -> Vec<f64> {
        self.header
            .element_spacing()
            .unwrap_or_else(|| vec![1.0; self.shape.len().min(3)])
    }

    /// Backing file path, when the image was opened from one.
    pub fn filename(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Index-to-physical affine.
    pub fn affine(&self) -> &[[f64; 4]; 4] {
        &self.affine
    }

    /// The header as loaded (or built for in-memory volumes).
    pub fn header(&self) -> &MetaHeader {
        &self.header
    }

    /// Whether a mask is set.
    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// Whether the resident data reflects the current smoothing width.
    pub fn is_smoothed(&self) -> bool {
        self.is_data_smooth
    }

    /// Whether the pristine decoded volume is resident.
    pub fn has_data_loaded(&self) -> bool {
        self.base.is_some()
    }

    /// Current smoothing kernel width (FWHM in mm, 0 = disabled).
    pub fn smooth_fwhm(&self) -> f64 {
        self.smooth_fwhm
    }

    /// Set the smoothing kernel width.
    ///
    /// Invalidates the smoothed-cache flag only when the width actually
    /// changes.
    pub fn set_smooth_fwhm(&mut self, fwhm: f64) {
        if (fwhm - self.smooth_fwhm).abs() > f64::EPSILON {
            self.is_data_smooth = false;
        }
        self.smooth_fwhm = fwhm;
    }

    /// Disable smoothing and drop the computed cache.
    pub fn remove_smoothing(&mut self) {
        self.smooth_fwhm = 0.0;
        self.is_data_smooth = false;
        self.computed = None;
    }

    /// Drop the mask entirely.
    pub fn remove_masking(&mut self) {
        self.mask = None;
        self.is_data_masked = false;
        self.computed = None;
    }

    /// Set a mask loaded from a MetaImage file.
    ///
    /// Shape compatibility is checked before any state changes; on failure
    /// the prior mask is left untouched.
    pub fn set_mask_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.set_mask(Mask::from_file(path)?)
    }

    /// Set a mask.
    ///
    /// The mask's shape must equal the volume's spatial shape (the first
    /// three axes of a 4-D volume). Fails with [`Error::IncompatibleShape`]
    /// without mutating anything.
    pub fn set_mask(&mut self, mask: Mask) -> Result<()> {
        let spatial = &self.shape[..self.shape.len().min(3)];
        if mask.shape() != spatial {
            return Err(Error::IncompatibleShape {
                volume: spatial.to_vec(),
                mask: mask.shape().to_vec(),
            });
        }
        self.mask = Some(mask);
        Ok(())
    }

    /// Set a mask and return the masked (and smoothed) data as an
    /// independent snapshot.
    pub fn apply_mask(&mut self, mask: Mask) -> Result<Volume> {
        self.set_mask(mask)?;
        self.get_data(true, true, true)
    }

    /// Get the image data.
    ///
    /// When the requested `(smoothed, masked)` combination matches the
    /// cache-validity flags and the computed data is resident, the resident
    /// buffer is returned without recomputation or copy. Otherwise the
    /// underlying data is (re)decoded, smoothing is applied when requested
    /// and the width is positive, then masking when requested and a mask is
    /// set.
    ///
    /// `safe_copy` always produces an independently allocated snapshot and
    /// never updates the cache flags or the resident data.
    pub fn get_data(&mut self, smoothed: bool, masked: bool, safe_copy: bool) -> Result<Volume> {
        if !safe_copy
            && smoothed == self.is_data_smooth
            && masked == self.is_data_masked
            && self.caching == CachePolicy::Fill
        {
            if let Some(cached) = &self.computed {
                return Ok(cached.clone());
            }
        }

        let base = self.base_data()?;
        let mut data = if safe_copy {
            base.to_owned().into_shared()
        } else {
            base
        };

        let mut is_smooth = false;
        if smoothed && self.smooth_fwhm > 0.0 {
            data = smooth::smooth_data_array(&data.to_owned(), &self.affine, self.smooth_fwhm)?
                .into_shared();
            is_smooth = true;
        }

        let mut is_masked = false;
        if masked && self.mask.is_some() {
            data = self.masked_data(data)?;
            is_masked = true;
        }

        if !safe_copy {
            self.is_data_smooth = is_smooth;
            self.is_data_masked = is_masked;
            if self.caching == CachePolicy::Fill {
                self.computed = Some(data.clone());
            }
        }
        Ok(data)
    }

    /// Set the smoothing width and recompute smoothed+masked data as a
    /// snapshot.
    ///
    /// A non-positive width is a no-op returning `Ok(None)`. On any failure
    /// the previous width is restored before the error propagates.
    pub fn apply_smoothing(&mut self, fwhm: f64) -> Result<Option<Volume>> {
        if fwhm <= 0.0 {
            return Ok(None);
        }
        let previous = self.smooth_fwhm;
        self.set_smooth_fwhm(fwhm);
        match self.get_data(true, true, true) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                tracing::error!(fwhm, "smoothing failed, restoring previous kernel width");
                self.smooth_fwhm = previous;
                Err(e)
            }
        }
    }

    /// Flat selection indices of the mask's true voxels.
    ///
    /// `Ok(None)` when no mask is set; this is the documented
    /// not-applicable outcome, not an error.
    pub fn get_mask_indices(&mut self) -> Result<Option<Vec<usize>>> {
        match self.mask.as_mut() {
            Some(mask) => Ok(Some(mask::mask_indices(mask.load()?))),
            None => {
                tracing::error!("no mask set, cannot compute mask indices");
                Ok(None)
            }
        }
    }

    /// Masked-and-smoothed values at the mask's true positions, with the
    /// selection indices and the mask's shape.
    ///
    /// 3-D data yields a flat value vector; 4-D data a
    /// `(n_voxels, n_volumes)` matrix. `Ok(None)` when no mask is set.
    pub fn mask_and_flatten(&mut self) -> Result<Option<(ArrayD<f64>, Vec<usize>, Vec<usize>)>> {
        let mask_shape = match &self.mask {
            Some(mask) => mask.shape().to_vec(),
            None => {
                tracing::error!("no mask set, cannot flatten image data");
                return Ok(None);
            }
        };

        let data = self.get_data(true, true, false)?;
        let indices = match self.get_mask_indices()? {
            Some(indices) => indices,
            None => return Ok(None),
        };

        let values = match data.ndim() {
            3 => {
                let flat: Vec<f64> = data.iter().copied().collect();
                let selected: Vec<f64> = indices.iter().map(|&i| flat[i]).collect();
                ArrayD::from_shape_vec(IxDyn(&[selected.len()]), selected)
                    .map_err(|e| Error::InvalidDimensions(e.to_string()))?
            }
            4 => {
                let n_volumes = data.shape()[3];
                let flat: Vec<f64> = data.iter().copied().collect();
                let mut matrix = Array2::<f64>::zeros((indices.len(), n_volumes));
                for (row, &voxel) in indices.iter().enumerate() {
                    for t in 0..n_volumes {
                        matrix[[row, t]] = flat[voxel * n_volumes + t];
                    }
                }
                matrix.into_dyn()
            }
            n => return Err(Error::UnsupportedDimensionality(n)),
        };
        Ok(Some((values, indices, mask_shape)))
    }

    /// Rebuild a full volume from masked values.
    ///
    /// Rank 1 input reconstructs a single volume, rank 2 a stack of volumes
    /// across a trailing axis; other ranks fail with [`Error::InvalidRank`].
    /// With no mask set the input is returned unchanged (documented
    /// permissive fallback).
    pub fn unmask(&mut self, arr: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let Some(mask) = self.mask.as_mut() else {
            tracing::error!("no mask set, returning the input array unchanged");
            return Ok(arr.clone());
        };
        let mask_data = mask.load()?;
        match arr.ndim() {
            1 => mask::vector_to_volume(arr, mask_data),
            2 => mask::matrix_to_volume4d(arr, mask_data),
            n => Err(Error::InvalidRank(n)),
        }
    }

    /// Save the image.
    ///
    /// With no mask and no smoothing applied, the original decoded data is
    /// written with the original header unchanged. Otherwise the current
    /// smoothed+masked data is written, still with the original header,
    /// affine tags, and element type.
    pub fn to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = if !self.has_mask() && !self.is_smoothed() {
            self.base_data()?
        } else {
            self.get_data(true, true, false)?
        };
        let shape = mhd::file_order_shape(data.shape());
        mhd::save_with_header(path, &data.to_owned(), &shape, self.elem, &self.header)
    }

    /// Release resident buffers and reset the cache-validity flags.
    ///
    /// File-backed data is evicted and will be re-read on the next access;
    /// in-memory volumes stay resident since there is nowhere to reload
    /// them from. The mask's booleans are released the same way.
    pub fn clear_data(&mut self) {
        self.computed = None;
        if self.source.is_some() {
            self.base = None;
        }
        if let Some(mask) = self.mask.as_mut() {
            mask.uncache();
        }
        self.is_data_smooth = false;
        self.is_data_masked = false;
    }

    /// Release everything: buffers, mask, and smoothing width.
    pub fn clear(&mut self) {
        self.clear_data();
        self.base = None;
        self.mask = None;
        self.smooth_fwhm = 0.0;
    }

    fn base_data(&mut self) -> Result<Volume> {
        if let Some(base) = &self.base {
            return Ok(base.clone());
        }
        let source = self.source.clone().ok_or_else(|| {
            Error::MissingData("image data was released and has no backing file".to_string())
        })?;
        let (volume, _) = mhd::load(&source)?;
        let volume = volume.into_shared();
        if self.caching == CachePolicy::Fill {
            self.base = Some(volume.clone());
        }
        Ok(volume)
    }

    /// Project data through the current mask, keeping the full volume shape
    /// with zeros outside the mask.
    fn masked_data(&mut self, data: Volume) -> Result<Volume> {
        let mask = self
            .mask
            .as_mut()
            .ok_or_else(|| Error::MissingData("no mask set".to_string()))?;
        let mask_data = mask.load()?;
        match data.ndim() {
            3 => {
                if data.shape() != mask_data.shape() {
                    return Err(Error::IncompatibleShape {
                        volume: data.shape().to_vec(),
                        mask: mask_data.shape().to_vec(),
                    });
                }
                let mut out = data.to_owned();
                Zip::from(&mut out).and(mask_data).for_each(|v, &m| {
                    if !m {
                        *v = 0.0;
                    }
                });
                Ok(out.into_shared())
            }
            4 => {
                let (matrix, _) = mask::apply_mask_to_4d(&data.to_owned(), mask_data)?;
                Ok(mask::matrix_to_volume4d(&matrix, mask_data)?.into_shared())
            }
            n => Err(Error::UnsupportedDimensionality(n)),
        }
    }
}
