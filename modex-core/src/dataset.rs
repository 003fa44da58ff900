use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;

/// Class metadata from a dataset-description YAML file.
///
/// The exporter consumes the file itself, unmodified, for quantization
/// calibration and label embedding; this representation exists so the CLI can
/// display what a file declares. It never feeds back into an export call.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub nc: Option<usize>,
    #[serde(default)]
    pub names: ClassNames,
}

/// `names` appears in the wild either as a plain list or as an index-keyed
/// map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClassNames {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

impl Default for ClassNames {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ClassNames {
    pub fn len(&self) -> usize {
        match self {
            Self::List(names) => names.len(),
            Self::Map(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels paired with their class index, in index order.
    pub fn labels(&self) -> Vec<(usize, &str)> {
        match self {
            Self::List(names) => names
                .iter()
                .enumerate()
                .map(|(index, name)| (index, name.as_str()))
                .collect(),
            Self::Map(names) => names
                .iter()
                .map(|(index, name)| (*index, name.as_str()))
                .collect(),
        }
    }
}

impl DatasetConfig {
    /// Declared class count, falling back to the number of names.
    pub fn class_count(&self) -> usize {
        self.nc.unwrap_or_else(|| self.names.len())
    }
}

/// Read and parse a dataset-description YAML file.
pub fn load_dataset_config(path: &Path) -> Result<DatasetConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset config '{}'", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse dataset config '{}'", path.display()))
}
