//! The stdout JSON contract consumed by the orchestrating application.
//!
//! Exactly one envelope is printed per invocation: a success report with the
//! output path and full metadata, or a failure report with the error message
//! and whatever partial metadata exists. Human-readable logging never goes
//! to stdout.

use std::path::PathBuf;

use serde::Serialize;

use crate::generate::{GenerationResult, SimpleResult};
use crate::presets::{PresetParams, QualityPreset};
use crate::registry::ModelFamily;

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub model_type: ModelFamily,
    pub model_path: PathBuf,
    pub quality_preset: QualityPreset,
    pub generation_time: f64,
    pub resolution: String,
    pub device: String,
    pub parameters: PresetParams,
    pub prompt: String,
    pub negative_prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessReport {
    pub success: bool,
    pub output_path: PathBuf,
    pub metadata: Metadata,
}

impl From<GenerationResult> for SuccessReport {
    fn from(result: GenerationResult) -> Self {
        SuccessReport {
            success: true,
            output_path: result.output_path,
            metadata: Metadata {
                model_type: result.model_family,
                model_path: result.model_path,
                quality_preset: result.quality_preset,
                generation_time: result.generation_time,
                resolution: result.resolution,
                device: result.device,
                parameters: result.parameters,
                prompt: result.prompt,
                negative_prompt: result.negative_prompt,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureMetadata {
    pub device: String,
    pub generation_time: f64,
}

#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub success: bool,
    pub error: String,
    pub metadata: FailureMetadata,
}

impl FailureReport {
    pub fn new(error: impl std::fmt::Display, device: impl Into<String>) -> Self {
        FailureReport {
            success: false,
            error: error.to_string(),
            metadata: FailureMetadata {
                device: device.into(),
                generation_time: 0.0,
            },
        }
    }
}

/// Reply to the availability probe.
#[derive(Debug, Serialize)]
pub struct AvailabilityReport {
    pub success: bool,
    pub available: bool,
    pub device: String,
    pub library_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to the legacy raw-parameter generate form.
#[derive(Debug, Serialize)]
pub struct SimpleReport {
    pub success: bool,
    pub image_path: PathBuf,
    pub generation_time: f64,
    pub device: String,
    pub model_id: String,
}

impl From<SimpleResult> for SimpleReport {
    fn from(result: SimpleResult) -> Self {
        SimpleReport {
            success: true,
            image_path: result.image_path,
            generation_time: result.generation_time,
            device: result.device,
            model_id: result.model_id,
        }
    }
}

/// Print an envelope to stdout. This is the process's sole output contract.
pub fn emit<T: Serialize>(report: &T) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            // Last-resort envelope; still valid JSON.
            let fallback = serde_json::json!({
                "success": false,
                "error": format!("could not serialize result: {err}"),
            });
            println!("{fallback}");
        }
    }
}
