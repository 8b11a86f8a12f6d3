use thiserror::Error;

use crate::presets::QualityPreset;

/// Errors surfaced across the process boundary. Every variant is fatal for
/// the current request; nothing in the engine retries.
#[derive(Debug, Error)]
pub enum Error {
    /// The compute backend this build was compiled with cannot be brought up.
    #[error("required backend is unavailable: {0}")]
    DependencyMissing(String),

    /// No installed model satisfies the selection policy.
    #[error("no compatible model found for preset `{preset}` ({usable_memory_gb:.1}GB usable accelerator memory)")]
    NoCompatibleModel {
        preset: QualityPreset,
        usable_memory_gb: f64,
    },

    /// The diffusion library failed to materialize a pipeline.
    #[error("failed to load model `{id}`: {source:#}")]
    ModelLoad {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The inference call itself failed; the underlying message is kept
    /// verbatim for the caller's diagnostics.
    #[error("generation failed: {source:#}")]
    Generation {
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
