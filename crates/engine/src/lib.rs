//! Inference engine implementations for ragline.
//!
//! All engines implement the `ragline_core::InferenceEngine` trait.
//! [`build_engine`] selects one based on configuration.

pub mod echo;
#[cfg(feature = "local")]
pub mod local;

pub use echo::EchoEngine;
#[cfg(feature = "local")]
pub use local::LocalEngine;

use ragline_config::EngineConfig;
use ragline_core::{EngineError, InferenceEngine};
use tracing::info;

/// Construct the configured engine.
///
/// Loading is eager: a `local` engine downloads (if needed) and loads its
/// weights here, on the calling thread.
pub fn build_engine(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>, EngineError> {
    match config.kind.as_str() {
        "echo" => {
            info!("Using echo development engine");
            Ok(Box::new(EchoEngine::new()))
        }
        "local" => build_local(config),
        other => Err(EngineError::ModelNotFound(format!(
            "Unknown engine kind '{other}'. Expected \"echo\" or \"local\"."
        ))),
    }
}

#[cfg(feature = "local")]
fn build_local(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>, EngineError> {
    let engine = LocalEngine::load(&config.model, config.temperature, config.seed)?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "local"))]
fn build_local(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>, EngineError> {
    Err(EngineError::LoadFailed(format!(
        "cannot load '{}': ragline was built without the `local` feature \
         (rebuild with `--features local`)",
        config.model
    )))
}

/// Model presets accepted by the `local` engine.
pub fn local_presets() -> &'static [&'static str] {
    &[
        "tinyllama",
        "smollm",
        "smollm:135m",
        "smollm:360m",
        "smollm:1.7b",
        "phi2",
        "qwen:0.5b",
        "qwen:1.5b",
    ]
}
