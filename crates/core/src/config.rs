use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collection::{IndexConfiguration, RangeIndexSpec};
use crate::error::StoreResult;

/// Policy for collections that lack an index other collections define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforceIndexUse {
    /// Any collection without the index, or with a different index type,
    /// disables index use.
    #[default]
    Never,
    /// Resolves indexes like `never`.
    Strict,
    /// Use the first index found even if other collections lack it.
    Always,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub uri: String,
    #[serde(default)]
    pub range_indexes: Vec<RangeIndexSpec>,
}

impl CollectionConfig {
    pub fn index_configuration(&self) -> IndexConfiguration {
        IndexConfiguration { range_indexes: self.range_indexes.clone() }
    }
}

/// Database level settings, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub enforce_index_use: EnforceIndexUse,
    /// Default state of optimize pragmas inserted by the compiler.
    pub optimizations_enabled: bool,
    /// Wrap index-capable predicates in implicit optimize pragmas.
    pub auto_optimize: bool,
    pub collections: Vec<CollectionConfig>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enforce_index_use: EnforceIndexUse::Never,
            optimizations_enabled: true,
            auto_optimize: false,
            collections: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            collections = config.collections.len(),
            policy = ?config.enforce_index_use,
            "configuration loaded"
        );
        Ok(config)
    }
}
