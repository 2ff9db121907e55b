//! mhdrs: MetaImage (`.mhd`/`.raw`) volume I/O and a stateful image pipeline.
//!
//! This crate reads and writes volumetric images stored as a tagged text
//! header plus a sibling flat binary data file, and wraps a decoded volume
//! in a stateful object with lazy masking, lazy Gaussian smoothing, and
//! explicit data caching.
//!
//! # Modules
//! - `mhd`: header and raw-data codecs plus single-call load/save
//! - `image`: the stateful [`MedicalImage`] cache/transform pipeline
//! - `mask`: binary masks and the mask/unmask reshaping helpers
//! - `smooth`: Gaussian smoothing as a pure function
//!
//! # Example
//! ```ignore
//! let mut img = mhdrs::MedicalImage::from_file("brain.mhd", true)?;
//! img.set_mask_from_file("brain_mask.mhd")?;
//! img.set_smooth_fwhm(6.0);
//! let data = img.get_data(true, true, false)?;
//! ```

pub mod error;
pub mod image;
pub mod mask;
pub mod mhd;
pub mod smooth;

pub use error::{Error, Result};
pub use image::{CachePolicy, MedicalImage, Volume};
pub use mask::Mask;
pub use mhd::{ElementType, MetaHeader};
