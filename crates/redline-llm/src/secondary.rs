use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use redline_core::error::{RedlineError, Result};
use redline_core::traits::{ModelClient, SecondaryReasoner};
use redline_core::types::ChatMessage;

/// Second opinion from an independent model prompted over the document text.
pub struct LlmSecondaryReasoner {
    client: Arc<dyn ModelClient>,
    system_prompt: String,
}

impl LlmSecondaryReasoner {
    pub fn new(client: Arc<dyn ModelClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }
}

impl SecondaryReasoner for LlmSecondaryReasoner {
    fn reason<'a>(&'a self, document_text: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(self.system_prompt.trim()),
                ChatMessage::user(document_text),
            ];
            let mut reply = self
                .client
                .invoke(messages)
                .await
                .map_err(|e| RedlineError::Secondary(e.to_string()))?;

            if let Value::Object(map) = &mut reply {
                map.entry("model")
                    .or_insert_with(|| Value::String(self.client.model_name().to_string()));
            }
            debug!(model = %self.client.model_name(), "Secondary reasoning complete");
            Ok(reply)
        })
    }

    fn model_name(&self) -> &str {
        self.client.model_name()
    }
}
