//! Static registry of supported diffusion models.
//!
//! The table records where each model's weights come from, which pipeline
//! family loads them, and how much accelerator memory they want. Descriptors
//! are materialized against a models directory at startup; only models whose
//! directory actually exists are considered installed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Pipeline family a model belongs to. Each family has exactly one
/// construction strategy in the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Sd15,
    Sdxl,
    Flux,
}

serde_plain::derive_display_from_serialize!(ModelFamily);
serde_plain::derive_fromstr_from_deserialize!(ModelFamily);

/// Static row in the registry table.
#[derive(Debug, Clone, Copy)]
pub struct KnownModel {
    pub id: &'static str,
    pub repo: &'static str,
    pub family: ModelFamily,
    pub vram_required_gb: f64,
    /// Informational only; the selection policy works off explicit priority
    /// lists and never consults the scores.
    pub quality_score: u8,
    pub speed_score: u8,
}

/// All models the engine knows how to install and run.
pub static KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        id: "juggernaut-xl",
        repo: "RunDiffusion/Juggernaut-XL-v9",
        family: ModelFamily::Sdxl,
        vram_required_gb: 8.0,
        quality_score: 95,
        speed_score: 70,
    },
    KnownModel {
        id: "realvis-xl",
        repo: "SG161222/RealVisXL_V4.0",
        family: ModelFamily::Sdxl,
        vram_required_gb: 10.0,
        quality_score: 98,
        speed_score: 65,
    },
    KnownModel {
        id: "sdxl-lightning",
        repo: "ByteDance/SDXL-Lightning",
        family: ModelFamily::Sdxl,
        vram_required_gb: 6.0,
        quality_score: 85,
        speed_score: 95,
    },
    KnownModel {
        id: "sd15",
        repo: "runwayml/stable-diffusion-v1-5",
        family: ModelFamily::Sd15,
        // Runs on anything, including cpu-only hosts; this is the fallback.
        vram_required_gb: 0.0,
        quality_score: 70,
        speed_score: 80,
    },
    KnownModel {
        id: "flux-schnell",
        repo: "black-forest-labs/FLUX.1-schnell",
        family: ModelFamily::Flux,
        vram_required_gb: 12.0,
        quality_score: 92,
        speed_score: 90,
    },
    KnownModel {
        id: "flux-dev",
        repo: "black-forest-labs/FLUX.1-dev",
        family: ModelFamily::Flux,
        vram_required_gb: 24.0,
        quality_score: 99,
        speed_score: 40,
    },
];

/// A registry row bound to an on-disk location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub path: PathBuf,
    pub family: ModelFamily,
    pub repo: String,
    pub vram_required_gb: f64,
    pub quality_score: u8,
    pub speed_score: u8,
}

impl KnownModel {
    pub fn materialize(&self, models_dir: &Path) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id.to_string(),
            path: models_dir.join(self.id),
            family: self.family,
            repo: self.repo.to_string(),
            vram_required_gb: self.vram_required_gb,
            quality_score: self.quality_score,
            speed_score: self.speed_score,
        }
    }
}

impl ModelDescriptor {
    pub fn is_installed(&self) -> bool {
        self.path.exists()
    }
}

/// Look up a registry row by id.
pub fn known_model(id: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS.iter().find(|m| m.id == id)
}

/// Descriptors for every known model whose weights directory is present
/// under `models_dir`. The persisted install config is never trusted for
/// presence; this re-scans the filesystem each time.
pub fn available_models(models_dir: &Path) -> Vec<ModelDescriptor> {
    KNOWN_MODELS
        .iter()
        .map(|m| m.materialize(models_dir))
        .filter(ModelDescriptor::is_installed)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_families() {
        for family in [ModelFamily::Sd15, ModelFamily::Sdxl, ModelFamily::Flux] {
            assert!(KNOWN_MODELS.iter().any(|m| m.family == family));
        }
    }

    #[test]
    fn known_model_lookup() {
        assert_eq!(known_model("juggernaut-xl").unwrap().vram_required_gb, 8.0);
        assert_eq!(known_model("sd15").unwrap().family, ModelFamily::Sd15);
        assert!(known_model("dall-e").is_none());
    }

    #[test]
    fn family_strings_round_trip() {
        for family in [ModelFamily::Sd15, ModelFamily::Sdxl, ModelFamily::Flux] {
            let parsed: ModelFamily = family.to_string().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert_eq!("sdxl".parse::<ModelFamily>().unwrap(), ModelFamily::Sdxl);
    }

    #[test]
    fn available_models_scans_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_models(dir.path()).is_empty());

        std::fs::create_dir_all(dir.path().join("juggernaut-xl")).unwrap();
        std::fs::create_dir_all(dir.path().join("sd15")).unwrap();
        // A directory the registry does not know about is ignored.
        std::fs::create_dir_all(dir.path().join("some-other-model")).unwrap();

        let available = available_models(dir.path());
        let ids: Vec<&str> = available.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["juggernaut-xl", "sd15"]);
        assert_eq!(available[0].path, dir.path().join("juggernaut-xl"));
    }
}
