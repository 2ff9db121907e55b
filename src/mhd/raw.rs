//! Raw binary payload codec for MetaImage volumes.
//!
//! The data file is a flat array of fixed-width samples with no framing.
//! Samples decode to `f64` for processing regardless of the on-disk element
//! type; the originating [`ElementType`] travels with the volume so writes
//! can restore the original width.
//!
//! Byte order: reads honor the header's `BinaryDataByteOrderMSB` flag;
//! writes are always little-endian and the writer declares
//! `BinaryDataByteOrderMSB = False` to match.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::{ArrayD, IxDyn};

use super::header::ElementType;
use crate::error::{Error, Result};

/// Decode `count` samples of `elem` from `bytes`.
///
/// Exactly `count * byte_width` bytes are consumed; shorter input fails with
/// [`Error::TruncatedData`]. Trailing bytes are ignored.
pub fn decode(bytes: &[u8], elem: ElementType, count: usize, big_endian: bool) -> Result<Vec<f64>> {
    let expected = count.checked_mul(elem.byte_width()).ok_or_else(|| {
        Error::InvalidDimensions(format!("{count} samples overflow the payload size"))
    })?;
    if bytes.len() < expected {
        return Err(Error::TruncatedData {
            expected,
            found: bytes.len(),
        });
    }
    let bytes = &bytes[..expected];
    if big_endian {
        Ok(decode_with::<BigEndian>(bytes, elem, count))
    } else {
        Ok(decode_with::<LittleEndian>(bytes, elem, count))
    }
}

fn decode_with<E: ByteOrder>(bytes: &[u8], elem: ElementType, count: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(count);
    let width = elem.byte_width();
    match elem {
        ElementType::UInt8 => out.extend(bytes.iter().map(|&b| f64::from(b))),
        ElementType::Int8 => out.extend(bytes.iter().map(|&b| f64::from(b as i8))),
        ElementType::UInt16 => {
            out.extend(bytes.chunks_exact(width).map(|c| f64::from(E::read_u16(c))));
        }
        ElementType::Int16 => {
            out.extend(bytes.chunks_exact(width).map(|c| f64::from(E::read_i16(c))));
        }
        ElementType::UInt32 => {
            out.extend(bytes.chunks_exact(width).map(|c| f64::from(E::read_u32(c))));
        }
        ElementType::Int32 => {
            out.extend(bytes.chunks_exact(width).map(|c| f64::from(E::read_i32(c))));
        }
        ElementType::UInt64 => {
            out.extend(bytes.chunks_exact(width).map(|c| E::read_u64(c) as f64));
        }
        ElementType::Int64 => {
            out.extend(bytes.chunks_exact(width).map(|c| E::read_i64(c) as f64));
        }
        ElementType::Float32 => {
            out.extend(bytes.chunks_exact(width).map(|c| f64::from(E::read_f32(c))));
        }
        ElementType::Float64 => {
            out.extend(bytes.chunks_exact(width).map(|c| E::read_f64(c)));
        }
    }
    out
}

/// Build the in-memory volume from flat samples and the declared `DimSize`.
///
/// For 3-D data the file stores the fastest-varying dimension first while
/// the in-memory convention is slowest-first, so the dimensions are reversed
/// before reshaping. Every other rank reshapes to
/// `(last_dim, product_of_other_dims)` with no reversal. The asymmetry is a
/// property of the on-disk convention that existing files rely on at
/// read-back; it is intentional.
pub fn reshape_file_order(samples: Vec<f64>, dim_size: &[usize]) -> Result<ArrayD<f64>> {
    let total: usize = dim_size.iter().product();
    if samples.len() != total {
        return Err(Error::InvalidDimensions(format!(
            "DimSize {dim_size:?} declares {total} samples but {} were decoded",
            samples.len()
        )));
    }

    let shape: Vec<usize> = if dim_size.len() == 3 {
        let mut dims = dim_size.to_vec();
        dims.reverse();
        dims
    } else {
        let last = *dim_size.last().ok_or_else(|| {
            Error::InvalidDimensions("DimSize must declare at least one dimension".to_string())
        })?;
        vec![last, total / last]
    };

    ArrayD::from_shape_vec(IxDyn(&shape), samples)
        .map_err(|e| Error::InvalidDimensions(format!("cannot reshape to {shape:?}: {e}")))
}

/// Encode a volume's samples at the element's fixed width, little-endian.
///
/// Samples are written in logical (row-major) order. For 3-D volumes this is
/// byte-identical to flattening the two trailing axes first, so the write
/// path matches what [`reshape_file_order`] expects at read-back. Values are
/// cast from `f64` with saturating semantics.
pub fn encode(volume: &ArrayD<f64>, elem: ElementType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(volume.len() * elem.byte_width());
    let mut scratch = [0u8; 8];
    for &value in volume.iter() {
        match elem {
            ElementType::UInt8 => buf.push(value as u8),
            ElementType::Int8 => buf.push(value as i8 as u8),
            ElementType::UInt16 => {
                LittleEndian::write_u16(&mut scratch[..2], value as u16);
                buf.extend_from_slice(&scratch[..2]);
            }
            ElementType::Int16 => {
                LittleEndian::write_i16(&mut scratch[..2], value as i16);
                buf.extend_from_slice(&scratch[..2]);
            }
            ElementType::UInt32 => {
                LittleEndian::write_u32(&mut scratch[..4], value as u32);
                buf.extend_from_slice(&scratch[..4]);
            }
            ElementType::Int32 => {
                LittleEndian::write_i32(&mut scratch[..4], value as i32);
                buf.extend_from_slice(&scratch[..4]);
            }
            ElementType::UInt64 => {
                LittleEndian::write_u64(&mut scratch[..8], value as u64);
                buf.extend_from_slice(&scratch[..8]);
            }
            ElementType::Int64 => {
                LittleEndian::write_i64(&mut scratch[..8], value as i64);
                buf.extend_from_slice(&scratch[..8]);
            }
            ElementType::Float32 => {
                LittleEndian::write_f32(&mut scratch[..4], value as f32);
                buf.extend_from_slice(&scratch[..4]);
            }
            ElementType::Float64 => {
                LittleEndian::write_f64(&mut scratch[..8], value);
                buf.extend_from_slice(&scratch[..8]);
            }
        }
    }
    buf
}
