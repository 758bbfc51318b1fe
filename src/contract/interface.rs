//! Contract interface (ABI) loading from compiled artifacts

use crate::config::ArtifactsConfig;
use crate::error::{PipelineError, PipelineResult};

use dashmap::DashMap;
use ethers::abi::Abi;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Artifact file layouts we accept
#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactFile {
    /// Hardhat `artifacts/.../<Name>.json`
    Compiled { abi: Abi },
    /// A bare ABI array
    Bare(Abi),
}

impl ArtifactFile {
    fn into_abi(self) -> Abi {
        match self {
            ArtifactFile::Compiled { abi } | ArtifactFile::Bare(abi) => abi,
        }
    }
}

/// Loads and caches interfaces keyed by contract type name
pub struct InterfaceLoader {
    dir: PathBuf,
    overrides: HashMap<String, PathBuf>,
    cache: DashMap<String, Arc<Abi>>,
}

impl InterfaceLoader {
    pub fn new(config: &ArtifactsConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            overrides: config.contracts.clone(),
            cache: DashMap::new(),
        }
    }

    /// Load the interface for a contract type
    pub fn load(&self, contract_type: &str) -> PipelineResult<Arc<Abi>> {
        if let Some(abi) = self.cache.get(contract_type) {
            return Ok(abi.clone());
        }

        let path = self.artifact_path(contract_type);
        let missing = |message: String| PipelineError::MissingInterface {
            contract_type: contract_type.to_string(),
            message,
        };

        let bytes = std::fs::read(&path)
            .map_err(|e| missing(format!("cannot read {}: {}", path.display(), e)))?;
        let artifact: ArtifactFile = serde_json::from_slice(&bytes)
            .map_err(|e| missing(format!("invalid artifact {}: {}", path.display(), e)))?;

        let abi = Arc::new(artifact.into_abi());
        debug!(
            "Loaded interface {} from {} ({} functions)",
            contract_type,
            path.display(),
            abi.functions.len()
        );
        self.cache.insert(contract_type.to_string(), abi.clone());
        Ok(abi)
    }

    fn artifact_path(&self, contract_type: &str) -> PathBuf {
        match self.overrides.get(contract_type) {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.dir.join(path),
            None => self.dir.join(format!("{}.json", contract_type)),
        }
    }
}
