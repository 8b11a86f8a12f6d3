//! Stable Diffusion construction strategy, covering the `sd15` and `sdxl`
//! families. All solver and attention math lives in
//! `candle_transformers::models::stable_diffusion`; this module wires local
//! weight files into that API and drives the documented denoising loop.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor, D};
use candle_transformers::models::stable_diffusion::{
    self,
    clip::{Config as ClipConfig, ClipTextTransformer},
    ddim::DDIMSchedulerConfig,
    schedulers::{Scheduler, SchedulerConfig},
    unet_2d::UNet2DConditionModel,
    uni_pc::UniPCSchedulerConfig,
    vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::capability::SystemCapability;
use crate::pipeline::SamplingRequest;
use crate::registry::{ModelDescriptor, ModelFamily};
use crate::util::tensor_to_image;

/// Below this much usable accelerator memory, attention is computed in
/// slices (the library's automatic slice size) to cap peak usage.
const SLICED_ATTENTION_THRESHOLD_GB: f64 = 16.0;

const SD15_VAE_SCALE: f64 = 0.18215;
const SDXL_VAE_SCALE: f64 = 0.13025;

pub struct SdPipeline {
    family: ModelFamily,
    device: Device,
    dtype: DType,
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    tokenizer_2: Option<Tokenizer>,
    text_encoder: ClipTextTransformer,
    text_encoder_2: Option<ClipTextTransformer>,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl SdPipeline {
    pub fn load(
        descriptor: &ModelDescriptor,
        device: &Device,
        capability: &SystemCapability,
    ) -> Result<Self> {
        let dtype = if device.is_cpu() {
            DType::F32
        } else {
            DType::F16
        };
        // Some(0) asks the library for its automatic slice size.
        let sliced_attention = if capability.usable_memory_gb < SLICED_ATTENTION_THRESHOLD_GB {
            Some(0)
        } else {
            None
        };

        let config = match descriptor.family {
            ModelFamily::Sd15 => StableDiffusionConfig::v1_5(sliced_attention, None, None),
            ModelFamily::Sdxl => StableDiffusionConfig::sdxl(sliced_attention, None, None),
            ModelFamily::Flux => anyhow::bail!("flux models are loaded by the flux pipeline"),
        };

        let root = &descriptor.path;
        info!(
            model = %descriptor.id,
            family = %descriptor.family,
            path = %root.display(),
            "loading stable-diffusion pipeline"
        );

        let tokenizer = load_tokenizer(&root.join("tokenizer"))?;
        let text_encoder = stable_diffusion::build_clip_transformer(
            &config.clip,
            weights_file(&root.join("text_encoder"))?,
            device,
            DType::F32,
        )
        .context("failed to build text encoder")?;

        let (tokenizer_2, text_encoder_2) = if descriptor.family == ModelFamily::Sdxl {
            let clip2 = config
                .clip2
                .as_ref()
                .ok_or_else(|| anyhow!("sdxl config is missing its second text encoder"))?;
            let tokenizer_2 = load_tokenizer(&root.join("tokenizer_2"))?;
            let text_encoder_2 = stable_diffusion::build_clip_transformer(
                clip2,
                weights_file(&root.join("text_encoder_2"))?,
                device,
                DType::F32,
            )
            .context("failed to build second text encoder")?;
            (Some(tokenizer_2), Some(text_encoder_2))
        } else {
            (None, None)
        };

        let vae = config
            .build_vae(weights_file(&root.join("vae"))?, device, dtype)
            .context("failed to build vae")?;
        let unet = config
            .build_unet(weights_file(&root.join("unet"))?, device, 4, false, dtype)
            .context("failed to build unet")?;

        Ok(SdPipeline {
            family: descriptor.family,
            device: device.clone(),
            dtype,
            config,
            tokenizer,
            tokenizer_2,
            text_encoder,
            text_encoder_2,
            unet,
            vae,
        })
    }

    pub fn run(&mut self, request: &SamplingRequest) -> Result<DynamicImage> {
        if request.width % 8 != 0 || request.height % 8 != 0 {
            anyhow::bail!(
                "output resolution must be a multiple of 8, got {}x{}",
                request.width,
                request.height
            );
        }
        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let mut scheduler = self.build_scheduler(request.steps)?;
        let use_guidance = request.guidance_scale > 1.0;
        let text_embeddings = self.encode_prompts(request, use_guidance)?;

        let latent_height = request.height / 8;
        let latent_width = request.width / 8;
        let latents = Tensor::randn(0f32, 1f32, (1, 4, latent_height, latent_width), &self.device)?;
        let latents = (latents * scheduler.init_noise_sigma())?;
        let mut latents = latents.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let latent_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_input = scheduler.scale_model_input(latent_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&latent_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * request.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(step = index + 1, total = timesteps.len(), "denoised");
        }

        let scale = match self.family {
            ModelFamily::Sdxl => SDXL_VAE_SCALE,
            _ => SD15_VAE_SCALE,
        };
        let image = self.vae.decode(&(&latents / scale)?)?;
        let image = ((image.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&image.i(0)?)
    }

    /// A multi-step solver for the SDXL family; plain deterministic DDIM for
    /// SD1.5.
    fn build_scheduler(&self, steps: usize) -> Result<Box<dyn Scheduler>> {
        let scheduler = match self.family {
            ModelFamily::Sdxl => UniPCSchedulerConfig::default().build(steps)?,
            _ => DDIMSchedulerConfig::default().build(steps)?,
        };
        Ok(scheduler)
    }

    fn encode_prompts(&self, request: &SamplingRequest, use_guidance: bool) -> Result<Tensor> {
        let mut per_encoder = vec![self.encode_with(
            &self.tokenizer,
            &self.text_encoder,
            &self.config.clip,
            request,
            use_guidance,
        )?];
        if let (Some(tokenizer_2), Some(text_encoder_2), Some(clip2)) = (
            &self.tokenizer_2,
            &self.text_encoder_2,
            self.config.clip2.as_ref(),
        ) {
            per_encoder.push(self.encode_with(
                tokenizer_2,
                text_encoder_2,
                clip2,
                request,
                use_guidance,
            )?);
        }
        let embeddings = if per_encoder.len() > 1 {
            Tensor::cat(&per_encoder, D::Minus1)?
        } else {
            per_encoder.remove(0)
        };
        Ok(embeddings.to_dtype(self.dtype)?)
    }

    fn encode_with(
        &self,
        tokenizer: &Tokenizer,
        encoder: &ClipTextTransformer,
        clip_config: &ClipConfig,
        request: &SamplingRequest,
        use_guidance: bool,
    ) -> Result<Tensor> {
        let cond = self.embed_text(request.prompt, tokenizer, encoder, clip_config)?;
        if use_guidance {
            let uncond = self.embed_text(request.negative_prompt, tokenizer, encoder, clip_config)?;
            Ok(Tensor::cat(&[uncond, cond], 0)?)
        } else {
            Ok(cond)
        }
    }

    fn embed_text(
        &self,
        text: &str,
        tokenizer: &Tokenizer,
        encoder: &ClipTextTransformer,
        clip_config: &ClipConfig,
    ) -> Result<Tensor> {
        let pad_token = clip_config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .ok_or_else(|| anyhow!("padding token `{pad_token}` missing from tokenizer vocab"))?;
        let mut tokens = tokenizer
            .encode(text, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > clip_config.max_position_embeddings {
            anyhow::bail!(
                "prompt is too long: {} tokens, the encoder takes at most {}",
                tokens.len(),
                clip_config.max_position_embeddings
            );
        }
        tokens.resize(clip_config.max_position_embeddings, pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(encoder.forward(&tokens)?)
    }
}

fn load_tokenizer(dir: &Path) -> Result<Tokenizer> {
    let file = dir.join("tokenizer.json");
    Tokenizer::from_file(&file)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("failed to load tokenizer from {}", file.display()))
}

/// Weight files keep their upstream names; prefer the half-precision
/// variants when both are installed.
fn weights_file(dir: &Path) -> Result<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "model.fp16.safetensors",
        "model.safetensors",
        "diffusion_pytorch_model.fp16.safetensors",
        "diffusion_pytorch_model.safetensors",
    ];
    for name in CANDIDATES {
        let path = dir.join(name);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(anyhow!(
        "no safetensors weights found in {}",
        dir.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_file_prefers_fp16() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("diffusion_pytorch_model.safetensors"), b"x").unwrap();
        assert_eq!(
            weights_file(dir.path()).unwrap(),
            dir.path().join("diffusion_pytorch_model.safetensors")
        );
        std::fs::write(
            dir.path().join("diffusion_pytorch_model.fp16.safetensors"),
            b"x",
        )
        .unwrap();
        assert_eq!(
            weights_file(dir.path()).unwrap(),
            dir.path().join("diffusion_pytorch_model.fp16.safetensors")
        );
    }

    #[test]
    fn weights_file_reports_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(weights_file(dir.path()).is_err());
    }
}
