//! Pipeline configuration as read from TOML files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{err::Error, parallel::ParallelConfig, reference::Partitioner};

/// Configuration of the algorithms.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct AlgorithmConf {
    /// Contigs longer than this are merged in chunks of at most this size.
    #[serde(default)]
    pub max_region_size: Option<u64>,
}

/// Top-level pipeline configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    /// The execution backend.
    #[serde(default)]
    pub distributed: ParallelConfig,
    /// Algorithm settings.
    #[serde(default)]
    pub algorithm: AlgorithmConf,
}

impl PipelineConfig {
    /// Load configuration from the TOML file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let toml_str = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("could not read config {:?}: {}", path, e))
        })?;
        toml::from_str(&toml_str)
            .map_err(|e| Error::Configuration(format!("invalid config {:?}: {}", path, e)))
    }

    /// The region partitioner for this configuration.
    pub fn partitioner(&self) -> Partitioner {
        Partitioner::new(self.algorithm.max_region_size)
    }
}
