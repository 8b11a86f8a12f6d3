//! Generation invoker: resolves a request to a model, drives the cached
//! pipeline, and writes exactly one image. Either the image is produced and
//! reported, or the whole request fails; there are no partial results.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capability::SystemCapability;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineCache, SamplingRequest};
use crate::presets::{PresetParams, QualityPreset};
use crate::registry::{self, ModelDescriptor, ModelFamily};
use crate::select::select;
use crate::util::{device_name, select_best_device};

/// A preset-driven generation request, one per process invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub preset: QualityPreset,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Everything a caller needs to know about a finished generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub output_path: PathBuf,
    pub generation_time: f64,
    pub resolution: String,
    pub model_id: String,
    pub model_family: ModelFamily,
    pub model_path: PathBuf,
    pub device: String,
    pub quality_preset: QualityPreset,
    pub parameters: PresetParams,
    pub prompt: String,
    pub negative_prompt: String,
}

/// The legacy raw-parameter request accepted at the process boundary.
/// Field defaults mirror what the orchestrating application has always
/// sent implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_dim")]
    pub height: usize,
    #[serde(default = "default_dim")]
    pub width: usize,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub filename: Option<String>,
}

fn default_model_id() -> String {
    "sd15".to_string()
}

fn default_dim() -> usize {
    512
}

fn default_steps() -> usize {
    20
}

fn default_guidance() -> f64 {
    7.5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(crate::config::DEFAULT_OUTPUT_DIR)
}

#[derive(Debug, Clone, Serialize)]
pub struct SimpleResult {
    pub image_path: PathBuf,
    pub generation_time: f64,
    pub device: String,
    pub model_id: String,
}

/// Owns the per-process generation state: detected capability, the device,
/// and the single-slot pipeline cache.
pub struct Generator {
    models_dir: PathBuf,
    output_dir: PathBuf,
    capability: SystemCapability,
    cache: PipelineCache,
}

impl Generator {
    pub fn new(
        models_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        force_cpu: bool,
    ) -> Result<Self> {
        let capability = if force_cpu {
            SystemCapability::cpu_only()
        } else {
            SystemCapability::detect()
        };
        let device =
            select_best_device(force_cpu).map_err(|e| Error::DependencyMissing(e.to_string()))?;
        Ok(Generator {
            models_dir: models_dir.into(),
            output_dir: output_dir.into(),
            capability,
            cache: PipelineCache::new(device),
        })
    }

    pub fn capability(&self) -> &SystemCapability {
        &self.capability
    }

    /// Select a model for the request's preset and generate one image.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let available = registry::available_models(&self.models_dir);
        let descriptor = select(request.preset, &available, &self.capability)?.clone();
        self.generate_with(&descriptor, request)
    }

    /// Generate with an explicitly chosen model, bypassing selection.
    pub fn generate_with(
        &mut self,
        descriptor: &ModelDescriptor,
        request: &GenerationRequest,
    ) -> Result<GenerationResult> {
        let params = request.preset.params();
        let started = Instant::now();

        let pipeline = self.cache.get_or_load(descriptor, &self.capability)?;
        info!(
            model = %descriptor.id,
            preset = %request.preset,
            steps = params.num_inference_steps,
            "starting generation"
        );
        let sampling = SamplingRequest {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            steps: params.num_inference_steps,
            guidance_scale: params.guidance_scale,
            width: params.width,
            height: params.height,
            seed: request.seed,
        };
        let image = pipeline
            .run(&sampling)
            .map_err(|source| Error::Generation { source })?;

        let output_path = resolve_output_path(request.output_path.as_deref(), &self.output_dir);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image
            .save(&output_path)
            .map_err(|e| Error::Generation { source: e.into() })?;

        let generation_time = round_seconds(started.elapsed().as_secs_f64());
        info!(
            path = %output_path.display(),
            seconds = generation_time,
            "generation finished"
        );

        Ok(GenerationResult {
            output_path,
            generation_time,
            resolution: format!("{}x{}", params.width, params.height),
            model_id: descriptor.id.clone(),
            model_family: descriptor.family,
            model_path: descriptor.path.clone(),
            device: device_name(self.cache.device()).to_string(),
            quality_preset: request.preset,
            parameters: params,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
        })
    }

    /// Run the legacy raw-parameter form: the caller names the model and the
    /// sampling parameters directly instead of going through a preset.
    pub fn generate_simple(&mut self, request: &SimpleRequest) -> Result<SimpleResult> {
        let descriptor = registry::known_model(&request.model_id)
            .ok_or_else(|| {
                Error::InvalidRequest(format!("unknown model id `{}`", request.model_id))
            })?
            .materialize(&self.models_dir);

        let started = Instant::now();
        let pipeline = self.cache.get_or_load(&descriptor, &self.capability)?;
        let sampling = SamplingRequest {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
            width: request.width,
            height: request.height,
            seed: request.seed,
        };
        let image = pipeline
            .run(&sampling)
            .map_err(|source| Error::Generation { source })?;

        let image_path = request.output_dir.join(resolve_filename(
            request.filename.as_deref(),
        ));
        std::fs::create_dir_all(&request.output_dir)?;
        image
            .save(&image_path)
            .map_err(|e| Error::Generation { source: e.into() })?;

        Ok(SimpleResult {
            image_path,
            generation_time: round_seconds(started.elapsed().as_secs_f64()),
            device: device_name(self.cache.device()).to_string(),
            model_id: descriptor.id,
        })
    }
}

/// An explicit output path is used verbatim. Otherwise the file gets a
/// millisecond-timestamped name under the output directory; two calls within
/// the same clock tick would collide, which is accepted for this naming
/// scheme.
pub fn resolve_output_path(explicit: Option<&Path>, output_dir: &Path) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => output_dir.join(format!("outfit_{}.png", now_millis())),
    }
}

fn resolve_filename(explicit: Option<&str>) -> String {
    let name = match explicit {
        Some(name) => name.to_string(),
        None => format!("outfit_{}", now_millis() / 1000),
    };
    if name.ends_with(".png") {
        name
    } else {
        format!("{name}.png")
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn round_seconds(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
