//! FLUX construction strategy. The rectified-flow transformer, its
//! autoencoder and the sampling schedule all come from
//! `candle_transformers::models::flux`; this module loads the weights from a
//! local model directory and runs the documented denoise call.

use std::path::Path;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp};
use candle_nn::Module;
use candle_transformers::models::clip::text_model::{
    Activation, ClipTextConfig, ClipTextTransformer,
};
use candle_transformers::models::flux::{self, autoencoder::AutoEncoder, model::Flux};
use candle_transformers::models::t5::{self, T5EncoderModel};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::pipeline::SamplingRequest;
use crate::registry::ModelDescriptor;
use crate::util::tensor_to_image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxVariant {
    Schnell,
    Dev,
}

impl FluxVariant {
    fn from_id(id: &str) -> Self {
        if id.to_uppercase().contains("DEV") {
            FluxVariant::Dev
        } else {
            FluxVariant::Schnell
        }
    }

    fn weights_name(self) -> &'static str {
        match self {
            FluxVariant::Schnell => "flux1-schnell.safetensors",
            FluxVariant::Dev => "flux1-dev.safetensors",
        }
    }

    fn t5_sequence_len(self) -> usize {
        match self {
            FluxVariant::Schnell => 256,
            FluxVariant::Dev => 512,
        }
    }
}

pub struct FluxPipeline {
    variant: FluxVariant,
    device: Device,
    dtype: DType,
    t5_model: T5EncoderModel,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

impl FluxPipeline {
    /// Expected directory layout:
    ///
    /// ```text
    /// <model>/
    /// ├── flux1-{schnell,dev}.safetensors
    /// ├── ae.safetensors
    /// ├── t5/{model.safetensors, config.json, tokenizer.json}
    /// └── clip/{model.safetensors, tokenizer.json}
    /// ```
    pub fn load(descriptor: &ModelDescriptor, device: &Device) -> Result<Self> {
        let variant = FluxVariant::from_id(&descriptor.id);
        let dtype = device.bf16_default_to_f32();
        let root = &descriptor.path;
        info!(
            model = %descriptor.id,
            variant = ?variant,
            path = %root.display(),
            "loading flux pipeline"
        );

        // --- T5 encoder and tokenizer ---
        let t5_dir = root.join("t5");
        let t5_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[t5_dir.join("model.safetensors")],
                dtype,
                device,
            )
            .context("failed to build T5 var builder")?
        };
        let config_str = std::fs::read_to_string(t5_dir.join("config.json"))
            .context("failed to read T5 config")?;
        let t5_config: t5::Config =
            serde_json::from_str(&config_str).context("failed to parse T5 config")?;
        let t5_model =
            T5EncoderModel::load(t5_vb, &t5_config).context("failed to load T5 model")?;
        let t5_tokenizer = Tokenizer::from_file(t5_dir.join("tokenizer.json"))
            .map_err(Error::msg)
            .context("failed to load T5 tokenizer")?;

        // --- CLIP encoder and tokenizer ---
        let clip_dir = root.join("clip");
        let clip_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[clip_dir.join("model.safetensors")],
                dtype,
                device,
            )
            .context("failed to build CLIP var builder")?
        };
        let clip_config = ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: 77,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load CLIP model")?;
        let clip_tokenizer = Tokenizer::from_file(clip_dir.join("tokenizer.json"))
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        // --- Autoencoder ---
        let ae_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[root.join("ae.safetensors")],
                dtype,
                device,
            )
            .context("failed to build autoencoder var builder")?
        };
        let ae_config = match variant {
            FluxVariant::Schnell => flux::autoencoder::Config::schnell(),
            FluxVariant::Dev => flux::autoencoder::Config::dev(),
        };
        let autoencoder =
            AutoEncoder::new(&ae_config, ae_vb).context("failed to load autoencoder")?;

        // --- Flux transformer ---
        let flux_file = find_flux_weights(root, variant)?;
        let flux_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[flux_file], dtype, device)
                .context("failed to build flux var builder")?
        };
        let flux_config = match variant {
            FluxVariant::Schnell => flux::model::Config::schnell(),
            FluxVariant::Dev => flux::model::Config::dev(),
        };
        let flux_model =
            Flux::new(&flux_config, flux_vb).context("failed to load flux model")?;

        Ok(FluxPipeline {
            variant,
            device: device.clone(),
            dtype,
            t5_model,
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux_model,
        })
    }

    pub fn run(&mut self, request: &SamplingRequest) -> Result<DynamicImage> {
        // Latents are packed 2x2, so the resolution constraint is tighter
        // than for the stable-diffusion families.
        if request.width % 16 != 0 || request.height % 16 != 0 {
            anyhow::bail!(
                "output resolution must be a multiple of 16, got {}x{}",
                request.width,
                request.height
            );
        }
        if !request.negative_prompt.is_empty() {
            debug!("flux has no negative-prompt conditioning, ignoring it");
        }
        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let width = request.width;
        let height = request.height;

        let noise_img =
            flux::sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;

        // --- T5 embedding ---
        let mut t5_tokens = self
            .t5_tokenizer
            .encode(request.prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        t5_tokens.resize(self.variant.t5_sequence_len(), 0);
        let t5_ids = candle_core::Tensor::new(&*t5_tokens, &self.device)?.unsqueeze(0)?;
        let t5_emb = self.t5_model.forward(&t5_ids)?;

        // --- CLIP embedding ---
        let clip_tokens = self
            .clip_tokenizer
            .encode(request.prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let clip_ids = candle_core::Tensor::new(&*clip_tokens, &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&clip_ids)?;

        // --- Sampling state and schedule ---
        let state = flux::sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let timesteps = match self.variant {
            FluxVariant::Dev => {
                flux::sampling::get_schedule(request.steps, Some((state.img.dim(1)?, 0.5, 1.15)))
            }
            FluxVariant::Schnell => flux::sampling::get_schedule(request.steps, None),
        };

        let latent_img = flux::sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            request.guidance_scale,
        )?;
        let unpacked = flux::sampling::unpack(&latent_img, height, width)?;
        debug!("generated latent image");

        let decoded = self.autoencoder.decode(&unpacked)?;
        let image = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&image.i(0)?)
    }
}

fn find_flux_weights(root: &Path, variant: FluxVariant) -> Result<std::path::PathBuf> {
    let path = root.join(variant.weights_name());
    if path.exists() {
        Ok(path)
    } else {
        Err(anyhow!(
            "flux weights {} not found in {}",
            variant.weights_name(),
            root.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_is_detected_from_model_id() {
        assert_eq!(FluxVariant::from_id("flux-dev"), FluxVariant::Dev);
        assert_eq!(FluxVariant::from_id("flux-schnell"), FluxVariant::Schnell);
        // Unrecognized ids default to the fast variant.
        assert_eq!(FluxVariant::from_id("flux"), FluxVariant::Schnell);
    }

    #[test]
    fn variant_sequence_lengths() {
        assert_eq!(FluxVariant::Schnell.t5_sequence_len(), 256);
        assert_eq!(FluxVariant::Dev.t5_sequence_len(), 512);
    }
}
