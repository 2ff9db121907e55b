//! Error types for MHD image I/O and the image pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or data file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A required header tag is absent or unparsable.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Element-type tag not in the registered table.
    #[error("unsupported element type: {0}")]
    UnsupportedType(String),

    /// Data file holds fewer bytes than the declared shape requires.
    #[error("truncated data: expected {expected} bytes, found {found}")]
    TruncatedData { expected: usize, found: usize },

    /// Mask and volume spatial shapes do not match.
    #[error("incompatible shape: volume is {volume:?}, mask is {mask:?}")]
    IncompatibleShape { volume: Vec<usize>, mask: Vec<usize> },

    /// Masking requested on data of a rank the pipeline cannot handle.
    #[error("cannot mask {0}-dimensional data; only 3D and 4D volumes are supported")]
    UnsupportedDimensionality(usize),

    /// Unmasking input must be a 1D vector or a 2D matrix.
    #[error("invalid rank {0}: masked data must be a 1D vector or a 2D matrix")]
    InvalidRank(usize),

    /// Output path does not use the required extension.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Declared dimensions do not match the available samples.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Data was released and cannot be recovered from a backing file.
    #[error("no image data: {0}")]
    MissingData(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
