use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use redline_core::config::ModelConfig;
use redline_core::error::{RedlineError, Result};
use redline_core::traits::ModelClient;
use redline_core::types::{ChatMessage, PageImage, Role};

use super::{image_mime, reply_to_value};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
    config: ModelConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RedlineError::Config("Gemini: api_key is required".into()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RedlineError::Config(e.to_string()))?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// `generateContent` URL without the key.
    pub fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/');
        let model = self.config.model_id.trim_start_matches("models/");
        format!("{}/{}:generateContent", base, model)
    }

    async fn send(&self, body: GeminiRequest) -> Result<Value> {
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| RedlineError::ModelRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(RedlineError::ModelRequest(format!("HTTP {}: {}", status, body)));
        }

        let reply: GeminiResponse = response
            .json()
            .await
            .map_err(|e| RedlineError::ModelParse(e.to_string()))?;
        debug!(model = %self.config.model_id, "Gemini reply received");
        parse_response(reply)
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_output_tokens: Some(self.config.max_tokens),
            temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            response_mime_type: Some("application/json".to_string()),
        }
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize, Debug)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<GeminiContent>,
}

/// Split system messages into the system instruction; everything else becomes contents.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(GeminiPart::Text { text: msg.content }),
            Role::User => contents.push(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart::Text { text: msg.content }],
            }),
            Role::Assistant => contents.push(GeminiContent {
                role: Some("model".to_string()),
                parts: vec![GeminiPart::Text { text: msg.content }],
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| GeminiContent {
        role: None,
        parts: system_parts,
    });
    (system, contents)
}

fn image_content(prompt: &str, images: &[PageImage]) -> GeminiContent {
    let mut parts = vec![GeminiPart::Text {
        text: prompt.to_string(),
    }];
    parts.extend(images.iter().map(|image| GeminiPart::InlineData {
        inline_data: InlineData {
            mime_type: image_mime(&image.ext),
            data: image.data.clone(),
        },
    }));
    GeminiContent {
        role: Some("user".to_string()),
        parts,
    }
}

fn parse_response(reply: GeminiResponse) -> Result<Value> {
    let text: String = reply
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| match p {
                    GeminiPart::Text { text } => Some(text),
                    GeminiPart::InlineData { .. } => None,
                })
                .collect()
        })
        .unwrap_or_default();
    reply_to_value(&text)
}

impl ModelClient for GeminiClient {
    fn invoke(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let (system_instruction, contents) = convert_messages(messages);
            let body = GeminiRequest {
                contents,
                system_instruction,
                generation_config: Some(self.generation_config()),
            };
            self.send(body).await
        })
    }

    fn invoke_with_images<'a>(
        &'a self,
        prompt: &'a str,
        images: &'a [PageImage],
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let body = GeminiRequest {
                contents: vec![image_content(prompt, images)],
                system_instruction: None,
                generation_config: Some(self.generation_config()),
            };
            self.send(body).await
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}
