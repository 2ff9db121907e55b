//! MetaImage (`.mhd`/`.raw`) format support.
//!
//! MetaImage stores a volumetric image as a tagged plain-text header plus a
//! sibling flat binary data file. This module provides the header codec, the
//! raw sample codec, and single-call load/save of a full volume.

pub(crate) mod header;
pub(crate) mod raw;
pub mod io;

pub use header::{ElementType, MetaHeader, MHD_TAGS};
pub use io::{file_order_shape, load, load_header, save, save_with_header};
pub use raw::{decode, encode, reshape_file_order};
