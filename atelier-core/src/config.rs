//! The persisted install manifest, `model_config.json`.
//!
//! Written once by the installer; read-only afterwards. It records the
//! capability detected at install time and the full descriptor table, but it
//! is never trusted for on-disk presence; callers re-scan the models
//! directory before selecting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capability::SystemCapability;
use crate::error::{Error, Result};
use crate::registry::{ModelDescriptor, KNOWN_MODELS};

pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const DEFAULT_OUTPUT_DIR: &str = "generated_outfits";

/// Default location for installed weights.
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("atelier").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub system: SystemCapability,
    pub models: BTreeMap<String, ModelDescriptor>,
    pub recommended_model: String,
}

impl ModelConfig {
    /// Manifest covering every known model, whether or not its download
    /// succeeded; presence is established by scanning, not by this file.
    pub fn new(system: SystemCapability, models_dir: &Path) -> Self {
        let models = KNOWN_MODELS
            .iter()
            .map(|m| (m.id.to_string(), m.materialize(models_dir)))
            .collect();
        ModelConfig {
            system,
            models,
            recommended_model: "auto".to_string(),
        }
    }

    pub fn save(&self, models_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(models_dir)?;
        let path = models_dir.join(MODEL_CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidRequest(format!("could not serialize model config: {e}")))?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(models_dir: &Path) -> Result<Self> {
        let path = models_dir.join(MODEL_CONFIG_FILE);
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::InvalidRequest(format!("malformed {}: {e}", path.display()))
        })
    }
}
