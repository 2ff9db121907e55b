//! MetaImage (`.mhd`) header parsing and representation.
//!
//! The header is a plain-text file of `tag = value` lines. Tags come from a
//! fixed schema and their emission order matters: readers exist that index
//! the file positionally, so serialization always walks [`MHD_TAGS`] in
//! order, skipping absent tags.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The header tag schema, in authoritative serialization order.
pub const MHD_TAGS: [&str; 20] = [
    "ObjectType",
    "NDims",
    "BinaryData",
    "BinaryDataByteOrderMSB",
    "CompressedData",
    "CompressedDataSize",
    "TransformMatrix",
    "Offset",
    "CenterOfRotation",
    "AnatomicalOrientation",
    "ElementSpacing",
    "DimSize",
    "ElementType",
    "ElementDataFile",
    "Comment",
    "SeriesDescription",
    "AcquisitionDate",
    "AcquisitionTime",
    "StudyDate",
    "StudyTime",
];

/// On-disk sample format of a MetaImage volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 32-bit floating point (`MET_FLOAT`)
    Float32,
    /// 64-bit floating point (`MET_DOUBLE`)
    Float64,
    /// Unsigned 8-bit integer (`MET_UCHAR`)
    UInt8,
    /// Signed 8-bit integer (`MET_CHAR`)
    Int8,
    /// Unsigned 16-bit integer (`MET_USHORT`)
    UInt16,
    /// Signed 16-bit integer (`MET_SHORT`)
    Int16,
    /// Unsigned 32-bit integer (`MET_UINT`)
    UInt32,
    /// Signed 32-bit integer (`MET_INT`)
    Int32,
    /// Unsigned 64-bit integer (`MET_ULONG`)
    UInt64,
    /// Signed 64-bit integer (`MET_LONG`)
    Int64,
}

impl ElementType {
    /// Every variant, for exhaustive table checks.
    pub const ALL: [ElementType; 10] = [
        Self::Float32,
        Self::Float64,
        Self::UInt8,
        Self::Int8,
        Self::UInt16,
        Self::Int16,
        Self::UInt32,
        Self::Int32,
        Self::UInt64,
        Self::Int64,
    ];

    /// Parse from a `MET_*` format tag.
    ///
    /// The tag/type mapping is a bijection: each tag resolves to exactly one
    /// element type and [`tag`](Self::tag) inverts it.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "MET_FLOAT" => Ok(Self::Float32),
            "MET_DOUBLE" => Ok(Self::Float64),
            "MET_UCHAR" => Ok(Self::UInt8),
            "MET_CHAR" => Ok(Self::Int8),
            "MET_USHORT" => Ok(Self::UInt16),
            "MET_SHORT" => Ok(Self::Int16),
            "MET_UINT" => Ok(Self::UInt32),
            "MET_INT" => Ok(Self::Int32),
            "MET_ULONG" => Ok(Self::UInt64),
            "MET_LONG" => Ok(Self::Int64),
            _ => Err(Error::UnsupportedType(tag.to_string())),
        }
    }

    /// The `MET_*` format tag for this element type.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Float32 => "MET_FLOAT",
            Self::Float64 => "MET_DOUBLE",
            Self::UInt8 => "MET_UCHAR",
            Self::Int8 => "MET_CHAR",
            Self::UInt16 => "MET_USHORT",
            Self::Int16 => "MET_SHORT",
            Self::UInt32 => "MET_UINT",
            Self::Int32 => "MET_INT",
            Self::UInt64 => "MET_ULONG",
            Self::Int64 => "MET_LONG",
        }
    }

    /// Size of each sample in bytes.
    pub const fn byte_width(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::Float32 | Self::UInt32 | Self::Int32 => 4,
            Self::Float64 | Self::UInt64 | Self::Int64 => 8,
        }
    }

    /// Whether the sample format is signed.
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Float32 | Self::Float64 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    /// Whether the sample format is floating point.
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Parsed MetaImage header.
///
/// Values are kept as strings, exactly as they appear on disk; typed
/// accessors interpret the tags the loader needs. Serialization order is
/// taken from [`MHD_TAGS`], never from insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaHeader {
    values: HashMap<String, String>,
}

impl MetaHeader {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse header text into a tag/value map.
    ///
    /// Each non-empty line is split on the first `=` and both sides are
    /// trimmed. Only schema tags are recorded; the first occurrence of a tag
    /// wins and later duplicates are ignored. Unknown keys are skipped
    /// silently.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if MHD_TAGS.contains(&key) && !values.contains_key(key) {
                values.insert(key.to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    /// Serialize to header text, emitting present tags in schema order.
    ///
    /// An empty header produces an empty string.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for tag in MHD_TAGS {
            if let Some(value) = self.values.get(tag) {
                out.push_str(tag);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// Get a raw tag value.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.values.get(tag).map(String::as_str)
    }

    /// Set a tag value, replacing any existing value.
    pub fn set(&mut self, tag: &str, value: impl Into<String>) {
        self.values.insert(tag.to_string(), value.into());
    }

    /// Whether the header carries the given tag.
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// Whether the header carries no tags at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn required(&self, tag: &str) -> Result<&str> {
        self.get(tag)
            .ok_or_else(|| Error::MalformedHeader(format!("missing required tag {tag}")))
    }

    /// Declared dimensionality (`NDims`).
    pub fn ndims(&self) -> Result<usize> {
        let raw = self.required("NDims")?;
        raw.parse()
            .map_err(|_| Error::MalformedHeader(format!("NDims is not an integer: {raw:?}")))
    }

    /// Declared dimension sizes (`DimSize`), in file order.
    pub fn dim_size(&self) -> Result<Vec<usize>> {
        let raw = self.required("DimSize")?;
        let mut dims = Vec::new();
        for token in raw.split_whitespace() {
            let dim: usize = token.parse().map_err(|_| {
                Error::MalformedHeader(format!("DimSize entry is not an integer: {token:?}"))
            })?;
            if dim == 0 {
                return Err(Error::MalformedHeader(format!(
                    "DimSize entries must be positive: {raw:?}"
                )));
            }
            dims.push(dim);
        }
        if dims.is_empty() {
            return Err(Error::MalformedHeader("DimSize is empty".to_string()));
        }
        Ok(dims)
    }

    /// Declared element type (`ElementType`).
    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_tag(self.required("ElementType")?)
    }

    /// Name of the sibling data file (`ElementDataFile`).
    pub fn element_data_file(&self) -> Result<&str> {
        self.required("ElementDataFile")
    }

    /// Physical voxel sizes (`ElementSpacing`), when present and parsable.
    pub fn element_spacing(&self) -> Option<Vec<f64>> {
        self.float_list("ElementSpacing")
    }

    /// Physical origin (`Offset`), when present and parsable.
    pub fn offset(&self) -> Option<Vec<f64>> {
        self.float_list("Offset")
    }

    /// Direction cosines (`TransformMatrix`, nine values row-major),
    /// when present and parsable.
    pub fn transform_matrix(&self) -> Option<Vec<f64>> {
        self.float_list("TransformMatrix").filter(|m| m.len() == 9)
    }

    /// Whether the data file is declared big-endian
    /// (`BinaryDataByteOrderMSB`). Defaults to false when absent.
    pub fn byte_order_msb(&self) -> bool {
        self.get("BinaryDataByteOrderMSB")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn float_list(&self, tag: &str) -> Option<Vec<f64>> {
        let raw = self.get(tag)?;
        let values: std::result::Result<Vec<f64>, _> =
            raw.split_whitespace().map(str::parse).collect();
        values.ok().filter(|v| !v.is_empty())
    }

    /// Index-to-physical affine built from the spatial tags.
    ///
    /// TransformMatrix columns are scaled by ElementSpacing; with no
    /// transform the affine is identity-with-spacing, and with no offset
    /// the translation is zero. Columns follow the file axis order.
    pub fn affine(&self) -> [[f64; 4]; 4] {
        let spacing = self.element_spacing().unwrap_or_default();
        let offset = self.offset().unwrap_or_default();
        let spacing_at = |j: usize| spacing.get(j).copied().unwrap_or(1.0);

        let mut affine = [[0.0; 4]; 4];
        affine[3][3] = 1.0;
        if let Some(matrix) = self.transform_matrix() {
            for i in 0..3 {
                for j in 0..3 {
                    affine[i][j] = matrix[i * 3 + j] * spacing_at(j);
                }
            }
        } else {
            for j in 0..3 {
                affine[j][j] = spacing_at(j);
            }
        }
        for (i, row) in affine.iter_mut().take(3).enumerate() {
            row[3] = offset.get(i).copied().unwrap_or(0.0);
        }
        affine
    }
}
