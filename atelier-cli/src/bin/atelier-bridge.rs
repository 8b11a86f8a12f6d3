//! Process bridge for the orchestrating desktop application. Every reply is
//! a single JSON document on stdout; logs stay on stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use atelier_cli::init_tracing;
use atelier_core::{
    config, device_name, report, select_best_device, AvailabilityReport, FailureReport, Generator,
    SimpleReport, SimpleRequest,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "atelier-bridge",
    author,
    version,
    about = "JSON bridge to the outfit generation engine"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe whether the engine and an accelerator are usable
    TestAvailability,
    /// Generate one image from a raw JSON parameter document
    Generate {
        /// JSON document with `prompt` and optional `negative_prompt`,
        /// `model_id`, `height`, `width`, `steps`, `guidance_scale`, `seed`,
        /// `output_dir` and `filename` keys
        params: String,

        /// Directory holding installed model weights
        #[arg(long, default_value_os_t = config::default_models_dir())]
        models_dir: PathBuf,

        /// Force CPU execution even if an accelerator is present
        #[arg(long)]
        cpu: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match args.command {
        Command::TestAvailability => {
            let probe = test_availability();
            let ok = probe.success;
            report::emit(&probe);
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Generate {
            params,
            models_dir,
            cpu,
        } => match generate(&params, models_dir, cpu) {
            Ok(reply) => {
                report::emit(&reply);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report::emit(&FailureReport::new(&err, "unknown"));
                ExitCode::FAILURE
            }
        },
    }
}

fn test_availability() -> AvailabilityReport {
    match select_best_device(false) {
        Ok(device) => AvailabilityReport {
            success: true,
            available: true,
            device: device_name(&device).to_string(),
            library_version: atelier_core::VERSION.to_string(),
            error: None,
        },
        Err(err) => AvailabilityReport {
            success: false,
            available: false,
            device: "unknown".to_string(),
            library_version: atelier_core::VERSION.to_string(),
            error: Some(format!("{err:#}")),
        },
    }
}

fn generate(params: &str, models_dir: PathBuf, cpu: bool) -> atelier_core::Result<SimpleReport> {
    let request: SimpleRequest = serde_json::from_str(params)
        .map_err(|e| atelier_core::Error::InvalidRequest(format!("invalid JSON parameters: {e}")))?;
    let mut generator = Generator::new(models_dir, request.output_dir.clone(), cpu)?;
    let result = generator.generate_simple(&request)?;
    Ok(SimpleReport::from(result))
}
