pub mod capability;
pub mod config;
pub mod error;
pub mod generate;
pub mod pipeline;
pub mod presets;
pub mod registry;
pub mod report;
pub mod select;
mod util;

pub use capability::{AcceleratorKind, SystemCapability};
pub use error::{Error, Result};
pub use generate::{
    GenerationRequest, GenerationResult, Generator, SimpleRequest, SimpleResult,
};
pub use pipeline::{LoadedPipeline, PipelineCache, SamplingRequest};
pub use presets::{PresetParams, QualityPreset};
pub use registry::{available_models, known_model, ModelDescriptor, ModelFamily, KNOWN_MODELS};
pub use report::{AvailabilityReport, FailureReport, SimpleReport, SuccessReport};
pub use select::select;
pub use util::{device_name, select_best_device};

/// Engine version reported by the availability probe.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
