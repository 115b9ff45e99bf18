pub mod providers;
pub mod secondary;

use std::sync::Arc;

use redline_core::config::ModelConfig;
use redline_core::error::{RedlineError, Result};
use redline_core::traits::ModelClient;

pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use secondary::LlmSecondaryReasoner;

/// Create a model client based on the provider name.
///
/// Known OpenAI-compatible presets, `openai-compatible`, and any provider
/// with an explicit `base_url` use the OpenAI client.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    let provider = config.provider.to_ascii_lowercase();
    match provider.as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiClient::new(config.clone())?)),
        "openai-compatible" | "vllm" => Ok(Arc::new(OpenAiClient::new(config.clone())?)),
        name if providers::presets::get_preset(name).is_some() || config.base_url.is_some() => {
            Ok(Arc::new(OpenAiClient::new(config.clone())?))
        }
        other => Err(RedlineError::UnsupportedProvider(other.to_string())),
    }
}
