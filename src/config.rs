use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::epoch::SUPPORTED_WINDOW;
use crate::constants::fields::PRIMARY_FIELD;
use crate::epoch::SeqOrdering;
use crate::errors::DatasetError;
use crate::fields::{Dtype, EncodingOverrides, FieldBinding, FieldLayout};
use crate::lengths::LengthTable;
use crate::source::SourceSpec;
use crate::tags::CanonicalTags;
use crate::types::{FieldName, SequenceTag, SourceId};

fn default_window() -> usize {
    SUPPORTED_WINDOW
}

/// Declarative configuration of a multi-source dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaDatasetConfig {
    /// Newline-separated canonical tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_list_file: Option<PathBuf>,
    /// Inline canonical tag list, used instead of `seq_list_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_list: Option<Vec<SequenceTag>>,
    /// Optional JSON length table (`tag -> {field -> len}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_lens_file: Option<PathBuf>,
    /// Source id to source spec, in declaration order.
    pub datasets: IndexMap<SourceId, SourceSpec>,
    /// Logical field to `[source id, source field]`.
    pub data_map: BTreeMap<FieldName, (SourceId, FieldName)>,
    /// Logical field to declared dimension.
    pub data_dims: BTreeMap<FieldName, serde_json::Value>,
    /// Logical field to compact-categorical flag (`true`/`false` or `1`/`0`).
    #[serde(default)]
    pub data_1_of_k: BTreeMap<FieldName, serde_json::Value>,
    /// Logical field to dtype name.
    #[serde(default)]
    pub data_dtypes: BTreeMap<FieldName, String>,
    /// Ordering used when an epoch gets no explicit tag list.
    #[serde(default)]
    pub seq_ordering: SeqOrdering,
    /// Sequence window size. Only 1 is supported.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl MetaDatasetConfig {
    /// Load a JSON config. Relative file paths inside it are resolved against
    /// the config file's directory.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse a config without validating it. Paths stay as written.
    pub fn from_json_str(raw: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.seq_list_file, &mut self.seq_lens_file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Check everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.window != SUPPORTED_WINDOW {
            return Err(DatasetError::Configuration(format!(
                "window {} is not supported, only {SUPPORTED_WINDOW}",
                self.window
            )));
        }
        match (&self.seq_list_file, &self.seq_list) {
            (Some(_), Some(_)) => {
                return Err(DatasetError::Configuration(
                    "give either seq_list_file or seq_list, not both".into(),
                ));
            }
            (None, None) => {
                return Err(DatasetError::Configuration(
                    "a canonical tag list (seq_list_file or seq_list) is required".into(),
                ));
            }
            _ => {}
        }
        for (field, (source_id, _)) in &self.data_map {
            if !self.datasets.contains_key(source_id) {
                return Err(DatasetError::Configuration(format!(
                    "field '{field}' maps to unconfigured source '{source_id}'"
                )));
            }
        }
        self.field_layout().map(|_| ())
    }

    /// Canonical tags from the inline list or the tag file.
    pub fn canonical_tags(&self) -> Result<CanonicalTags, DatasetError> {
        match (&self.seq_list_file, &self.seq_list) {
            (Some(path), _) => CanonicalTags::load(path),
            (None, Some(tags)) => CanonicalTags::new(tags.iter().cloned()),
            (None, None) => Err(DatasetError::Configuration(
                "a canonical tag list (seq_list_file or seq_list) is required".into(),
            )),
        }
    }

    /// Length table, when `seq_lens_file` is set.
    pub fn length_table(&self) -> Result<Option<LengthTable>, DatasetError> {
        self.seq_lens_file
            .as_ref()
            .map(LengthTable::load_json)
            .transpose()
    }

    /// Logical field to `(source, source field)` bindings.
    pub fn field_bindings(&self) -> BTreeMap<FieldName, FieldBinding> {
        self.data_map
            .iter()
            .map(|(field, (source_id, source_field))| {
                (field.clone(), FieldBinding::new(source_id, source_field))
            })
            .collect()
    }

    /// Declared dimensions. Values must be positive integers.
    pub fn dims(&self) -> Result<BTreeMap<FieldName, usize>, DatasetError> {
        if !self.data_dims.contains_key(PRIMARY_FIELD) {
            return Err(DatasetError::Configuration(format!(
                "data_dims must contain the primary field '{PRIMARY_FIELD}'"
            )));
        }
        self.data_dims
            .iter()
            .map(|(field, value)| {
                value
                    .as_u64()
                    .filter(|dim| *dim > 0)
                    .and_then(|dim| usize::try_from(dim).ok())
                    .map(|dim| (field.clone(), dim))
                    .ok_or_else(|| {
                        DatasetError::Configuration(format!(
                            "dimension of field '{field}' must be a positive integer, got {value}"
                        ))
                    })
            })
            .collect()
    }

    /// Compact flags and dtypes parsed from `data_1_of_k` and `data_dtypes`.
    pub fn encoding_overrides(&self) -> Result<EncodingOverrides, DatasetError> {
        let mut overrides = EncodingOverrides::default();
        for (field, value) in &self.data_1_of_k {
            let compact = match value {
                serde_json::Value::Bool(flag) => *flag,
                serde_json::Value::Number(n) if n.as_u64() == Some(0) => false,
                serde_json::Value::Number(n) if n.as_u64() == Some(1) => true,
                other => {
                    return Err(DatasetError::Configuration(format!(
                        "data_1_of_k for field '{field}' must be a boolean or 0/1, got {other}"
                    )));
                }
            };
            overrides = overrides.with_compact(field.clone(), compact);
        }
        for (field, name) in &self.data_dtypes {
            overrides = overrides.with_dtype(field.clone(), name.parse::<Dtype>()?);
        }
        Ok(overrides)
    }

    /// Resolved field layout with dims and overrides applied.
    pub fn field_layout(&self) -> Result<FieldLayout, DatasetError> {
        FieldLayout::new(
            self.field_bindings(),
            &self.dims()?,
            &self.encoding_overrides()?,
        )
    }
}

/// Declarative configuration of a concatenated dataset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConcatDatasetConfig {
    /// Child sources in concatenation order. Ids are `part_<n>`.
    pub datasets: Vec<SourceSpec>,
    /// Ordering used when an epoch gets no explicit tag list.
    #[serde(default)]
    pub seq_ordering: SeqOrdering,
    /// Optional canonical tag list used to validate explicit tag lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_list_file: Option<PathBuf>,
}

impl ConcatDatasetConfig {
    /// Load from a JSON file, resolving a relative tag file against its directory.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        if let (Some(base), Some(list)) = (path.parent(), config.seq_list_file.as_mut())
            && list.is_relative()
        {
            *list = base.join(&*list);
        }
        Ok(config)
    }

    /// Canonical tags, when `seq_list_file` is set.
    pub fn canonical_tags(&self) -> Result<Option<CanonicalTags>, DatasetError> {
        self.seq_list_file
            .as_ref()
            .map(CanonicalTags::load)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Encoding;

    const CONFIG: &str = r#"{
        "seq_list": ["a", "b"],
        "datasets": {
            "audio": {"class": "memory"},
            "align": {"class": "memory"}
        },
        "data_map": {
            "data": ["audio", "features"],
            "classes": ["align", "classes"]
        },
        "data_dims": {"data": 40, "classes": 50},
        "data_1_of_k": {"classes": 0},
        "data_dtypes": {"data": "float16"}
    }"#;

    #[test]
    fn parses_dimensions_and_overrides() {
        let config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config.validate().unwrap();
        let layout = config.field_layout().unwrap();
        assert_eq!(layout.dimension("classes").unwrap(), 50);
        assert_eq!(layout.encoding("classes").unwrap(), Encoding::Dense);
        assert_eq!(layout.dtype("classes").unwrap(), Dtype::Float32);
        assert_eq!(layout.dtype("data").unwrap(), Dtype::Float16);
        assert_eq!(config.window, 1);
        assert_eq!(config.seq_ordering, SeqOrdering::Default);
    }

    #[test]
    fn non_integer_dimension_is_rejected() {
        let mut config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config
            .data_dims
            .insert("classes".into(), serde_json::json!(2.5));
        assert!(matches!(
            config.validate(),
            Err(DatasetError::Configuration(msg)) if msg.contains("classes")
        ));
        config.data_dims.insert("classes".into(), serde_json::json!("50"));
        assert!(config.dims().is_err());
    }

    #[test]
    fn missing_primary_and_bad_window_are_rejected() {
        let mut config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config.data_dims.remove("data");
        assert!(matches!(
            config.validate(),
            Err(DatasetError::Configuration(_))
        ));

        let mut config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config.data_map.remove("data");
        assert!(config.validate().is_err());

        let mut config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config.window = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mapping_to_unknown_source_is_rejected() {
        let mut config = MetaDatasetConfig::from_json_str(CONFIG).unwrap();
        config
            .data_map
            .insert("orth".into(), ("text".into(), "orth".into()));
        config.data_dims.insert("orth".into(), serde_json::json!(10));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(CONFIG).unwrap();
        value.as_object_mut().unwrap().remove("seq_list");
        value["seq_list_file"] = serde_json::json!("tags.txt");
        std::fs::write(dir.path().join("tags.txt"), "x\ny\n\n").unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, value.to_string()).unwrap();

        let config = MetaDatasetConfig::load_json(&path).unwrap();
        assert_eq!(
            config.seq_list_file.as_deref(),
            Some(dir.path().join("tags.txt").as_path())
        );
        assert_eq!(config.canonical_tags().unwrap().len(), 2);
        assert!(config.length_table().unwrap().is_none());
    }
}
