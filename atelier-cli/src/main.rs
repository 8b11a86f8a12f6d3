use std::path::PathBuf;
use std::process::ExitCode;

use atelier_cli::init_tracing;
use atelier_core::{
    config, report, FailureReport, GenerationRequest, Generator, QualityPreset, SuccessReport,
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "atelier",
    author,
    version,
    about = "Generate outfit photographs with locally installed diffusion models"
)]
struct Args {
    /// Generation prompt
    #[arg(long)]
    prompt: String,

    /// Negative prompt
    #[arg(long, default_value = "")]
    negative_prompt: String,

    /// Quality preset: preview, standard, high_quality or commercial
    #[arg(long, default_value = "high_quality")]
    quality: QualityPreset,

    /// Output file path; defaults to a timestamped file under --output-dir
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory holding installed model weights
    #[arg(long, default_value_os_t = config::default_models_dir())]
    models_dir: PathBuf,

    /// Directory for generated images when --output is not given
    #[arg(long, default_value = config::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Seed for reproducible generations
    #[arg(long)]
    seed: Option<u64>,

    /// Force CPU execution even if an accelerator is present
    #[arg(long)]
    cpu: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(success) => {
            report::emit(&success);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report::emit(&FailureReport::new(&err, "unknown"));
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> atelier_core::Result<SuccessReport> {
    let mut generator = Generator::new(args.models_dir, args.output_dir, args.cpu)?;
    let request = GenerationRequest {
        prompt: args.prompt,
        negative_prompt: args.negative_prompt,
        preset: args.quality,
        output_path: args.output,
        seed: args.seed,
    };
    let result = generator.generate(&request)?;
    Ok(SuccessReport::from(result))
}
