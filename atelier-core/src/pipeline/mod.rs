//! Pipeline adapter: turns a model descriptor into a ready-to-invoke
//! inference handle on the detected device.
//!
//! The family set is closed: `sd15` and `sdxl` share the stable-diffusion
//! construction strategy (parameterized by version) and `flux` has its own.
//! At most one pipeline is resident at a time; see [`PipelineCache`].

mod flux;
mod sd;

pub use flux::FluxPipeline;
pub use sd::SdPipeline;

use anyhow::anyhow;
use candle_core::Device;
use image::DynamicImage;

use crate::capability::SystemCapability;
use crate::error::Error;
use crate::registry::{ModelDescriptor, ModelFamily};

/// Family-agnostic sampling parameters for one inference call.
#[derive(Debug, Clone)]
pub struct SamplingRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub steps: usize,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub seed: Option<u64>,
}

/// A loaded inference handle, tagged by model family.
pub enum LoadedPipeline {
    StableDiffusion(SdPipeline),
    Flux(FluxPipeline),
}

impl LoadedPipeline {
    /// Materialize the pipeline for `descriptor` on `device`, choosing the
    /// construction strategy from the descriptor's family.
    pub fn load(
        descriptor: &ModelDescriptor,
        device: &Device,
        capability: &SystemCapability,
    ) -> Result<Self, Error> {
        if !descriptor.path.exists() {
            return Err(Error::ModelLoad {
                id: descriptor.id.clone(),
                source: anyhow!(
                    "model directory {} does not exist; run the installer first",
                    descriptor.path.display()
                ),
            });
        }
        let loaded = match descriptor.family {
            ModelFamily::Sd15 | ModelFamily::Sdxl => {
                SdPipeline::load(descriptor, device, capability).map(Self::StableDiffusion)
            }
            ModelFamily::Flux => FluxPipeline::load(descriptor, device).map(Self::Flux),
        };
        loaded.map_err(|source| Error::ModelLoad {
            id: descriptor.id.clone(),
            source,
        })
    }

    pub fn run(&mut self, request: &SamplingRequest) -> anyhow::Result<DynamicImage> {
        match self {
            Self::StableDiffusion(pipeline) => pipeline.run(request),
            Self::Flux(pipeline) => pipeline.run(request),
        }
    }
}

/// Single-slot pipeline cache keyed by model id. Requesting a different
/// model drops the resident pipeline before the replacement is loaded, so
/// two sets of weights are never held at once.
pub struct PipelineCache {
    device: Device,
    slot: Option<(String, LoadedPipeline)>,
}

impl PipelineCache {
    pub fn new(device: Device) -> Self {
        PipelineCache { device, slot: None }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn cached_model(&self) -> Option<&str> {
        self.slot.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn get_or_load(
        &mut self,
        descriptor: &ModelDescriptor,
        capability: &SystemCapability,
    ) -> Result<&mut LoadedPipeline, Error> {
        let hit = matches!(&self.slot, Some((id, _)) if *id == descriptor.id);
        if !hit {
            // Drop the resident pipeline before loading its replacement.
            self.slot = None;
            let pipeline = LoadedPipeline::load(descriptor, &self.device, capability)?;
            self.slot = Some((descriptor.id.clone(), pipeline));
        }
        match self.slot.as_mut() {
            Some((_, pipeline)) => Ok(pipeline),
            None => Err(Error::ModelLoad {
                id: descriptor.id.clone(),
                source: anyhow!("pipeline cache slot empty after load"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SystemCapability;
    use crate::registry::known_model;

    #[test]
    fn cache_starts_empty() {
        let cache = PipelineCache::new(Device::Cpu);
        assert!(cache.cached_model().is_none());
    }

    #[test]
    fn loading_a_missing_model_reports_model_load_error() {
        let mut cache = PipelineCache::new(Device::Cpu);
        let descriptor = known_model("sd15")
            .unwrap()
            .materialize(std::path::Path::new("/nonexistent/models"));
        let err = cache
            .get_or_load(&descriptor, &SystemCapability::cpu_only())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoad { ref id, .. } if id == "sd15"));
        // A failed load leaves the slot empty rather than caching a corpse.
        assert!(cache.cached_model().is_none());
    }
}
