//! MetaImage file I/O.
//!
//! A MetaImage is a pair of files: a plain-text `.mhd` header and a sibling
//! flat binary data file referenced by name from the header and resolved
//! relative to the header's directory. Every handle is opened, fully
//! consumed, and closed before the call returns, including on failure.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use ndarray::ArrayD;

use super::header::{ElementType, MetaHeader};
use super::raw;
use crate::error::{Error, Result};

/// Load a MetaImage volume and its full header.
///
/// The header is returned alongside the volume because callers need fields
/// beyond the shape, e.g. `ElementSpacing`.
///
/// # Example
/// ```ignore
/// let (volume, header) = mhdrs::mhd::load("brain.mhd")?;
/// let spacing = header.element_spacing();
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<(ArrayD<f64>, MetaHeader)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let header = MetaHeader::parse(&std::fs::read_to_string(path)?);
    let ndims = header.ndims()?;
    let dim_size = header.dim_size()?;
    if dim_size.len() != ndims {
        return Err(Error::MalformedHeader(format!(
            "NDims is {ndims} but DimSize has {} entries",
            dim_size.len()
        )));
    }
    let elem = header.element_type()?;

    let data_path = path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(header.element_data_file()?);
    if !data_path.exists() {
        return Err(Error::FileNotFound(data_path));
    }

    // Checked math: an adversarial DimSize must fail as a header error, not
    // overflow before the length check.
    let count = dim_size
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            Error::MalformedHeader(format!("DimSize {dim_size:?} overflows the sample count"))
        })?;
    let expected = count.checked_mul(elem.byte_width()).ok_or_else(|| {
        Error::MalformedHeader(format!("DimSize {dim_size:?} overflows the payload size"))
    })?;
    let file = File::open(&data_path)?;
    let file_len = file.metadata()?.len() as usize;
    if file_len < expected {
        return Err(Error::TruncatedData {
            expected,
            found: file_len,
        });
    }
    // DimSize entries are positive, so expected >= 1 and the file is
    // non-empty here.
    let mmap = unsafe { Mmap::map(&file)? };
    let samples = raw::decode(&mmap, elem, count, header.byte_order_msb())?;

    let volume = raw::reshape_file_order(samples, &dim_size)?;
    tracing::debug!(
        path = %path.display(),
        shape = ?volume.shape(),
        element_type = %elem,
        "loaded MetaImage volume"
    );
    Ok((volume, header))
}

/// Load only the header of a MetaImage file.
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<MetaHeader> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    Ok(MetaHeader::parse(&std::fs::read_to_string(path)?))
}

/// Save a volume as a MetaImage pair with a minimal header.
///
/// `shape` is written verbatim as `DimSize`, so callers pass file-order
/// dimensions; [`file_order_shape`] converts an in-memory shape. The data
/// file takes the header's name with a `.raw` extension and is written next
/// to it.
pub fn save<P: AsRef<Path>>(
    path: P,
    volume: &ArrayD<f64>,
    shape: &[usize],
    elem: ElementType,
) -> Result<()> {
    save_with_header(path, volume, shape, elem, &MetaHeader::new())
}

/// Save a volume, carrying spatial and free-text tags over from `base`.
///
/// Structural tags (ObjectType, NDims, BinaryData, byte order, DimSize,
/// ElementType, ElementDataFile) are always rebuilt from the arguments;
/// everything else present in `base` passes through unchanged.
pub fn save_with_header<P: AsRef<Path>>(
    path: P,
    volume: &ArrayD<f64>,
    shape: &[usize],
    elem: ElementType,
    base: &MetaHeader,
) -> Result<()> {
    let path = path.as_ref();
    if !path.extension().is_some_and(|e| e == "mhd") {
        return Err(Error::InvalidPath(format!(
            "{} does not use the required .mhd extension",
            path.display()
        )));
    }
    let total: usize = shape.iter().product();
    if total != volume.len() {
        return Err(Error::InvalidDimensions(format!(
            "shape {shape:?} declares {total} samples but the volume holds {}",
            volume.len()
        )));
    }

    let mut header = base.clone();
    header.set("ObjectType", "Image");
    header.set("NDims", shape.len().to_string());
    header.set("BinaryData", "True");
    header.set("BinaryDataByteOrderMSB", "False");
    header.set(
        "DimSize",
        shape
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" "),
    );
    header.set("ElementType", elem.tag());

    let data_name = path
        .with_extension("raw")
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))?;
    header.set("ElementDataFile", data_name.clone());

    std::fs::write(path, header.serialize())?;
    let data_path = path.parent().unwrap_or_else(|| Path::new("")).join(data_name);
    std::fs::write(&data_path, raw::encode(volume, elem))?;
    tracing::debug!(
        path = %path.display(),
        shape = ?shape,
        element_type = %elem,
        "saved MetaImage volume"
    );
    Ok(())
}

/// Convert an in-memory shape to the file-order `DimSize` for saving.
///
/// Inverse of the 3-D axis reversal applied at load time; other ranks are
/// passed through unchanged, matching the read-side special case.
pub fn file_order_shape(shape: &[usize]) -> Vec<usize> {
    let mut shape = shape.to_vec();
    if shape.len() == 3 {
        shape.reverse();
    }
    shape
}
