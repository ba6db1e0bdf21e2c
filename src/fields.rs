//! Logical field mapping and encoding resolution.
//!
//! Each logical field is bound to a `(source, source_field)` pair and carries a
//! declared dimension. Encoding and dtype are chosen by a fixed rule cascade,
//! evaluated top to bottom, first match wins:
//! 1. explicit per-field override;
//! 2. derived from the other kind of override (integer dtype means compact
//!    categorical, compact categorical means `int32`);
//! 3. the primary field is dense `float32`;
//! 4. every other field is compact categorical `int32`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::constants::fields::{
    DEFAULT_CATEGORICAL_DTYPE, DEFAULT_DENSE_DTYPE, PRIMARY_FIELD,
};
use crate::errors::DatasetError;
use crate::types::{FieldName, SourceId};

/// Element type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// `int8`
    Int8,
    /// `int16`
    Int16,
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `uint8`
    UInt8,
    /// `uint16`
    UInt16,
    /// `uint32`
    UInt32,
    /// `uint64`
    UInt64,
    /// `float16`
    Float16,
    /// `float32`
    Float32,
    /// `float64`
    Float64,
}

impl Dtype {
    /// Lowercase name as used in configs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::UInt8 => "uint8",
            Dtype::UInt16 => "uint16",
            Dtype::UInt32 => "uint32",
            Dtype::UInt64 => "uint64",
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }

    /// True for the signed and unsigned integer families.
    pub fn is_integer(&self) -> bool {
        !matches!(self, Dtype::Float16 | Dtype::Float32 | Dtype::Float64)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = DatasetError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let dtype = match raw.trim() {
            "int8" => Dtype::Int8,
            "int16" => Dtype::Int16,
            "int32" => Dtype::Int32,
            "int64" => Dtype::Int64,
            "uint8" => Dtype::UInt8,
            "uint16" => Dtype::UInt16,
            "uint32" => Dtype::UInt32,
            "uint64" => Dtype::UInt64,
            "float16" => Dtype::Float16,
            "float32" => Dtype::Float32,
            "float64" => Dtype::Float64,
            other => {
                return Err(DatasetError::Configuration(format!(
                    "unknown dtype '{other}'"
                )));
            }
        };
        Ok(dtype)
    }
}

/// How a field's values are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Values are used as-is, one vector of the declared dimension per frame.
    Dense,
    /// One scalar class id per frame; consumers expand it themselves.
    CompactCategorical,
}

/// Resolved encoding descriptor for one logical field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldEncoding {
    /// Dimension as declared in the config.
    pub declared_dimension: usize,
    /// Resolved element type.
    pub dtype: Dtype,
    /// Resolved encoding.
    pub encoding: Encoding,
}

impl FieldEncoding {
    /// 1 for compact categorical fields, the declared dimension otherwise.
    pub fn dimension(&self) -> usize {
        match self.encoding {
            Encoding::CompactCategorical => 1,
            Encoding::Dense => self.declared_dimension,
        }
    }
}

/// Where a logical field lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Source that holds the field.
    pub source_id: SourceId,
    /// Field name inside that source.
    pub source_field: FieldName,
}

impl FieldBinding {
    /// Bind to `source_field` of `source_id`.
    pub fn new(source_id: impl Into<SourceId>, source_field: impl Into<FieldName>) -> Self {
        Self {
            source_id: source_id.into(),
            source_field: source_field.into(),
        }
    }
}

/// Optional per-field encoding and dtype overrides.
#[derive(Clone, Debug, Default)]
pub struct EncodingOverrides {
    /// `true` marks a field compact categorical, `false` marks it dense.
    pub compact: BTreeMap<FieldName, bool>,
    /// Explicit dtype per field.
    pub dtypes: BTreeMap<FieldName, Dtype>,
}

impl EncodingOverrides {
    /// Force `field` compact categorical or dense.
    pub fn with_compact(mut self, field: impl Into<FieldName>, compact: bool) -> Self {
        self.compact.insert(field.into(), compact);
        self
    }

    /// Force the dtype of `field`.
    pub fn with_dtype(mut self, field: impl Into<FieldName>, dtype: Dtype) -> Self {
        self.dtypes.insert(field.into(), dtype);
        self
    }
}

type Rule<T> = fn(&str, &EncodingOverrides) -> Option<T>;

const ENCODING_RULES: &[Rule<Encoding>] = &[
    explicit_encoding,
    encoding_from_dtype_override,
    primary_encoding,
];
const DTYPE_RULES: &[Rule<Dtype>] = &[
    explicit_dtype,
    dtype_from_encoding_override,
    primary_dtype,
];

fn explicit_encoding(field: &str, overrides: &EncodingOverrides) -> Option<Encoding> {
    overrides.compact.get(field).map(|compact| encoding_for(*compact))
}

fn encoding_from_dtype_override(field: &str, overrides: &EncodingOverrides) -> Option<Encoding> {
    overrides
        .dtypes
        .get(field)
        .map(|dtype| encoding_for(dtype.is_integer()))
}

fn primary_encoding(field: &str, _: &EncodingOverrides) -> Option<Encoding> {
    (field == PRIMARY_FIELD).then_some(Encoding::Dense)
}

fn explicit_dtype(field: &str, overrides: &EncodingOverrides) -> Option<Dtype> {
    overrides.dtypes.get(field).copied()
}

fn dtype_from_encoding_override(field: &str, overrides: &EncodingOverrides) -> Option<Dtype> {
    overrides.compact.get(field).map(|compact| dtype_for(*compact))
}

fn primary_dtype(field: &str, _: &EncodingOverrides) -> Option<Dtype> {
    (field == PRIMARY_FIELD).then(|| dtype_for(false))
}

fn encoding_for(compact: bool) -> Encoding {
    if compact {
        Encoding::CompactCategorical
    } else {
        Encoding::Dense
    }
}

fn dtype_for(compact: bool) -> Dtype {
    if compact {
        DEFAULT_CATEGORICAL_DTYPE
    } else {
        DEFAULT_DENSE_DTYPE
    }
}

/// Run the encoding cascade for `field`.
pub fn select_encoding(field: &str, overrides: &EncodingOverrides) -> Encoding {
    ENCODING_RULES
        .iter()
        .find_map(|rule| rule(field, overrides))
        .unwrap_or(Encoding::CompactCategorical)
}

/// Run the dtype cascade for `field`.
pub fn select_dtype(field: &str, overrides: &EncodingOverrides) -> Dtype {
    DTYPE_RULES
        .iter()
        .find_map(|rule| rule(field, overrides))
        .unwrap_or_else(|| dtype_for(true))
}

/// Field-mapping resolver: logical field to source binding plus encoding.
#[derive(Clone, Debug)]
pub struct FieldLayout {
    bindings: BTreeMap<FieldName, FieldBinding>,
    encodings: BTreeMap<FieldName, FieldEncoding>,
    targets: Vec<FieldName>,
}

impl FieldLayout {
    /// Build a layout. The primary field must be mapped and every mapped field
    /// needs a positive declared dimension.
    pub fn new(
        bindings: BTreeMap<FieldName, FieldBinding>,
        dims: &BTreeMap<FieldName, usize>,
        overrides: &EncodingOverrides,
    ) -> Result<Self, DatasetError> {
        if !bindings.contains_key(PRIMARY_FIELD) {
            return Err(DatasetError::Configuration(format!(
                "field mapping must contain the primary field '{PRIMARY_FIELD}'"
            )));
        }
        if !dims.contains_key(PRIMARY_FIELD) {
            return Err(DatasetError::Configuration(format!(
                "dimension table must contain the primary field '{PRIMARY_FIELD}'"
            )));
        }
        let mut encodings = BTreeMap::new();
        for field in bindings.keys() {
            let declared_dimension = *dims.get(field).ok_or_else(|| {
                DatasetError::Configuration(format!("no dimension declared for field '{field}'"))
            })?;
            if declared_dimension == 0 {
                return Err(DatasetError::Configuration(format!(
                    "dimension of field '{field}' must be positive"
                )));
            }
            encodings.insert(
                field.clone(),
                FieldEncoding {
                    declared_dimension,
                    dtype: select_dtype(field, overrides),
                    encoding: select_encoding(field, overrides),
                },
            );
        }
        let targets = bindings
            .keys()
            .filter(|field| field.as_str() != PRIMARY_FIELD)
            .cloned()
            .collect();
        Ok(Self {
            bindings,
            encodings,
            targets,
        })
    }

    /// Source and source-local field name for a logical field.
    pub fn resolve(&self, field: &str) -> Result<&FieldBinding, DatasetError> {
        self.bindings
            .get(field)
            .ok_or_else(|| unknown_field(field))
    }

    /// Full resolved descriptor of `field`.
    pub fn encoding_of(&self, field: &str) -> Result<&FieldEncoding, DatasetError> {
        self.encodings
            .get(field)
            .ok_or_else(|| unknown_field(field))
    }

    /// Reported dimension: 1 for compact categorical fields.
    pub fn dimension(&self, field: &str) -> Result<usize, DatasetError> {
        Ok(self.encoding_of(field)?.dimension())
    }

    /// Resolved dtype of `field`.
    pub fn dtype(&self, field: &str) -> Result<Dtype, DatasetError> {
        Ok(self.encoding_of(field)?.dtype)
    }

    /// Resolved encoding of `field`.
    pub fn encoding(&self, field: &str) -> Result<Encoding, DatasetError> {
        Ok(self.encoding_of(field)?.encoding)
    }

    /// Declared dimension regardless of encoding.
    pub fn declared_dimension(&self, field: &str) -> Result<usize, DatasetError> {
        Ok(self.encoding_of(field)?.declared_dimension)
    }

    /// All mapped fields except the primary one, sorted.
    pub fn target_list(&self) -> &[FieldName] {
        &self.targets
    }

    /// Binding of the primary field.
    pub fn primary(&self) -> Result<&FieldBinding, DatasetError> {
        self.resolve(PRIMARY_FIELD)
    }

    /// Distinct sources referenced by the mapping.
    pub fn source_ids(&self) -> BTreeSet<&SourceId> {
        self.bindings
            .values()
            .map(|binding| &binding.source_id)
            .collect()
    }
}

fn unknown_field(field: &str) -> DatasetError {
    DatasetError::Configuration(format!("field '{field}' is not in the field mapping"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(overrides: &EncodingOverrides) -> FieldLayout {
        let mut bindings = BTreeMap::new();
        bindings.insert("data".to_string(), FieldBinding::new("audio", "features"));
        bindings.insert("classes".to_string(), FieldBinding::new("align", "classes"));
        bindings.insert("orth".to_string(), FieldBinding::new("text", "orth"));
        let mut dims = BTreeMap::new();
        dims.insert("data".to_string(), 40);
        dims.insert("classes".to_string(), 50);
        dims.insert("orth".to_string(), 30);
        FieldLayout::new(bindings, &dims, overrides).unwrap()
    }

    #[test]
    fn name_based_defaults_apply_without_overrides() {
        let layout = layout(&EncodingOverrides::default());
        assert_eq!(layout.encoding("data").unwrap(), Encoding::Dense);
        assert_eq!(layout.dtype("data").unwrap(), Dtype::Float32);
        assert_eq!(layout.dimension("data").unwrap(), 40);
        assert_eq!(
            layout.encoding("classes").unwrap(),
            Encoding::CompactCategorical
        );
        assert_eq!(layout.dtype("classes").unwrap(), Dtype::Int32);
        assert_eq!(layout.target_list(), ["classes", "orth"]);
    }

    #[test]
    fn compact_fields_report_dimension_one() {
        let compact = layout(&EncodingOverrides::default().with_compact("classes", true));
        assert_eq!(compact.dimension("classes").unwrap(), 1);
        assert_eq!(compact.declared_dimension("classes").unwrap(), 50);

        let dense = layout(&EncodingOverrides::default().with_compact("classes", false));
        assert_eq!(dense.dimension("classes").unwrap(), 50);
        assert_eq!(dense.dtype("classes").unwrap(), Dtype::Float32);
    }

    #[test]
    fn dtype_precedence_follows_cascade() {
        // Explicit dtype beats the encoding-derived default.
        let overrides = EncodingOverrides::default()
            .with_compact("classes", true)
            .with_dtype("classes", Dtype::Float64);
        let explicit = layout(&overrides);
        assert_eq!(explicit.dtype("classes").unwrap(), Dtype::Float64);
        assert_eq!(
            explicit.encoding("classes").unwrap(),
            Encoding::CompactCategorical
        );

        // Encoding-derived default beats the name-based default.
        let derived = layout(&EncodingOverrides::default().with_compact("data", true));
        assert_eq!(derived.dtype("data").unwrap(), Dtype::Int32);
        assert_eq!(derived.dimension("data").unwrap(), 1);
    }

    #[test]
    fn dtype_override_derives_encoding() {
        let overrides = EncodingOverrides::default()
            .with_dtype("data", Dtype::Int64)
            .with_dtype("orth", Dtype::Float32)
            .with_dtype("classes", Dtype::UInt8);
        let layout = layout(&overrides);
        assert_eq!(
            layout.encoding("data").unwrap(),
            Encoding::CompactCategorical
        );
        assert_eq!(layout.encoding("orth").unwrap(), Encoding::Dense);
        assert_eq!(layout.dimension("orth").unwrap(), 30);
        assert_eq!(
            layout.encoding("classes").unwrap(),
            Encoding::CompactCategorical
        );
    }

    #[test]
    fn missing_primary_field_is_rejected() {
        let mut bindings = BTreeMap::new();
        bindings.insert("classes".to_string(), FieldBinding::new("align", "classes"));
        let mut dims = BTreeMap::new();
        dims.insert("classes".to_string(), 5);
        let err = FieldLayout::new(bindings, &dims, &EncodingOverrides::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Configuration(_)));

        let mut bindings = BTreeMap::new();
        bindings.insert("data".to_string(), FieldBinding::new("audio", "features"));
        let err =
            FieldLayout::new(bindings, &BTreeMap::new(), &EncodingOverrides::default())
                .unwrap_err();
        assert!(matches!(err, DatasetError::Configuration(_)));
    }

    #[test]
    fn unknown_fields_and_dtypes_are_errors() {
        let layout = layout(&EncodingOverrides::default());
        assert!(layout.resolve("nope").is_err());
        assert!("complex64".parse::<Dtype>().is_err());
        assert_eq!("uint16".parse::<Dtype>().unwrap(), Dtype::UInt16);
        assert_eq!(Dtype::Float16.to_string(), "float16");
        assert_eq!(layout.source_ids().len(), 3);
    }
}
