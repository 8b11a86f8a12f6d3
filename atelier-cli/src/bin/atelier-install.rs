//! Downloads model weights from the Hugging Face hub and writes the
//! `model_config.json` install manifest. Which FLUX tier gets installed
//! depends on the detected accelerator memory; the SDXL workhorses are
//! always included so generation works everywhere.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use atelier_cli::init_tracing;
use atelier_core::config::{self, ModelConfig};
use atelier_core::registry::{known_model, KnownModel, ModelFamily};
use atelier_core::SystemCapability;
use clap::Parser;
use hf_hub::api::tokio::{Api, ApiBuilder};
use tracing::{debug, error, info, warn};

/// Accelerator memory needed before a FLUX tier is worth installing.
const FLUX_DEV_MIN_GB: f64 = 24.0;
const FLUX_SCHNELL_MIN_GB: f64 = 12.0;

const SD15_TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
const SDXL_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
const SDXL_TOKENIZER_2_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";
const T5_REPO: &str = "google/t5-v1_1-xxl";
const T5_REVISION: &str = "refs/pr/2";
const T5_TOKENIZER_REPO: &str = "lmz/mt5-tokenizers";

#[derive(Parser, Debug)]
#[command(
    name = "atelier-install",
    author,
    version,
    about = "Download diffusion model weights for the outfit generation engine"
)]
struct Args {
    /// Directory to install model weights into
    #[arg(long, default_value_os_t = config::default_models_dir())]
    models_dir: PathBuf,

    /// Skip the FLUX tier even if memory would allow it
    #[arg(long)]
    skip_flux: bool,

    /// Additional registry models to install (e.g. realvis-xl, sd15)
    #[arg(long = "model")]
    models: Vec<String>,

    /// Hugging Face token for gated repositories; defaults to the cached
    /// token
    #[arg(long)]
    token: Option<String>,
}

/// One file to fetch: where it lives on the hub and where it lands inside
/// the model directory.
struct Fetch {
    repo: String,
    revision: Option<String>,
    remote: String,
    dest: String,
}

impl Fetch {
    fn new(repo: &str, remote: &str, dest: &str) -> Self {
        Fetch {
            repo: repo.to_string(),
            revision: None,
            remote: remote.to_string(),
            dest: dest.to_string(),
        }
    }

    fn with_revision(repo: &str, revision: &str, remote: &str, dest: &str) -> Self {
        Fetch {
            revision: Some(revision.to_string()),
            ..Fetch::new(repo, remote, dest)
        }
    }
}

fn fetch_plan(model: &KnownModel) -> Vec<Fetch> {
    match model.family {
        ModelFamily::Sd15 => vec![
            Fetch::new(SD15_TOKENIZER_REPO, "tokenizer.json", "tokenizer/tokenizer.json"),
            Fetch::new(
                model.repo,
                "text_encoder/model.safetensors",
                "text_encoder/model.safetensors",
            ),
            Fetch::new(
                model.repo,
                "unet/diffusion_pytorch_model.safetensors",
                "unet/diffusion_pytorch_model.safetensors",
            ),
            Fetch::new(
                model.repo,
                "vae/diffusion_pytorch_model.safetensors",
                "vae/diffusion_pytorch_model.safetensors",
            ),
        ],
        ModelFamily::Sdxl => vec![
            Fetch::new(SDXL_TOKENIZER_REPO, "tokenizer.json", "tokenizer/tokenizer.json"),
            Fetch::new(
                SDXL_TOKENIZER_2_REPO,
                "tokenizer.json",
                "tokenizer_2/tokenizer.json",
            ),
            Fetch::new(
                model.repo,
                "text_encoder/model.fp16.safetensors",
                "text_encoder/model.fp16.safetensors",
            ),
            Fetch::new(
                model.repo,
                "text_encoder_2/model.fp16.safetensors",
                "text_encoder_2/model.fp16.safetensors",
            ),
            Fetch::new(
                model.repo,
                "unet/diffusion_pytorch_model.fp16.safetensors",
                "unet/diffusion_pytorch_model.fp16.safetensors",
            ),
            Fetch::new(
                model.repo,
                "vae/diffusion_pytorch_model.fp16.safetensors",
                "vae/diffusion_pytorch_model.fp16.safetensors",
            ),
        ],
        ModelFamily::Flux => {
            let weights = if model.id.contains("dev") {
                "flux1-dev.safetensors"
            } else {
                "flux1-schnell.safetensors"
            };
            vec![
                Fetch::new(model.repo, weights, weights),
                Fetch::new(model.repo, "ae.safetensors", "ae.safetensors"),
                Fetch::with_revision(T5_REPO, T5_REVISION, "model.safetensors", "t5/model.safetensors"),
                Fetch::with_revision(T5_REPO, T5_REVISION, "config.json", "t5/config.json"),
                Fetch::new(
                    T5_TOKENIZER_REPO,
                    "t5-v1_1-xxl.tokenizer.json",
                    "t5/tokenizer.json",
                ),
                Fetch::new(SDXL_TOKENIZER_REPO, "model.safetensors", "clip/model.safetensors"),
                Fetch::new(SDXL_TOKENIZER_REPO, "tokenizer.json", "clip/tokenizer.json"),
            ]
        }
    }
}

async fn install_model(api: &Api, models_dir: &Path, model: &KnownModel) -> Result<()> {
    let target = models_dir.join(model.id);
    for fetch in fetch_plan(model) {
        let dest = target.join(&fetch.dest);
        if dest.exists() {
            debug!(file = %dest.display(), "already present, skipping");
            continue;
        }
        info!(repo = %fetch.repo, file = %fetch.remote, "downloading");
        let repo = match &fetch.revision {
            Some(revision) => api.repo(hf_hub::Repo::with_revision(
                fetch.repo.clone(),
                hf_hub::RepoType::Model,
                revision.clone(),
            )),
            None => api.model(fetch.repo.clone()),
        };
        let cached = repo
            .get(&fetch.remote)
            .await
            .with_context(|| format!("failed to download {}/{}", fetch.repo, fetch.remote))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&cached, &dest)
            .with_context(|| format!("failed to place {}", dest.display()))?;
    }
    Ok(())
}

fn require(id: &str) -> Result<&'static KnownModel> {
    known_model(id).ok_or_else(|| anyhow!("`{id}` is not a known model"))
}

fn push_unique(plan: &mut Vec<&'static KnownModel>, model: &'static KnownModel) {
    if !plan.iter().any(|m| m.id == model.id) {
        plan.push(model);
    }
}

fn plan_models(args: &Args, capability: &SystemCapability) -> Result<Vec<&'static KnownModel>> {
    let mut plan: Vec<&'static KnownModel> = Vec::new();

    if !args.skip_flux {
        let usable = capability.usable_memory_gb;
        if usable >= FLUX_DEV_MIN_GB {
            info!("high accelerator memory detected, including flux-dev");
            push_unique(&mut plan, require("flux-dev")?);
        } else if usable >= FLUX_SCHNELL_MIN_GB {
            info!("including flux-schnell for fast high-quality generation");
            push_unique(&mut plan, require("flux-schnell")?);
        } else {
            info!("not enough accelerator memory for the flux tier, installing sdxl models only");
        }
    }

    // The SDXL workhorse and the fast preview model are always installed.
    push_unique(&mut plan, require("juggernaut-xl")?);
    push_unique(&mut plan, require("sdxl-lightning")?);

    for extra in &args.models {
        push_unique(&mut plan, require(extra)?);
    }
    Ok(plan)
}

fn build_api(token: Option<String>) -> Result<Api> {
    let mut builder = ApiBuilder::new();
    if let Some(token) = token {
        builder = builder.with_token(Some(token));
    }
    builder.build().context("failed to initialize hub client")
}

async fn run(args: Args) -> Result<()> {
    let capability = SystemCapability::detect();
    info!(
        kind = %capability.kind,
        total_gb = capability.total_memory_gb,
        usable_gb = capability.usable_memory_gb,
        "detected system capability"
    );

    let plan = plan_models(&args, &capability)?;
    let api = build_api(args.token)?;

    let mut installed = 0usize;
    for model in &plan {
        match install_model(&api, &args.models_dir, model).await {
            Ok(()) => {
                installed += 1;
                info!(model = %model.id, "installed");
            }
            Err(err) => warn!(model = %model.id, "install failed: {err:#}"),
        }
    }
    if installed == 0 {
        anyhow::bail!("no models were installed");
    }

    ModelConfig::new(capability, &args.models_dir).save(&args.models_dir)?;
    info!(
        installed,
        planned = plan.len(),
        dir = %args.models_dir.display(),
        "installation complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
