use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use redline_core::config::ModelConfig;
use redline_core::error::{RedlineError, Result};
use redline_core::traits::ModelClient;
use redline_core::types::{ChatMessage, PageImage, Role};

use super::presets::{build_extra_headers, get_preset};
use super::{image_mime, reply_to_value};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat completions client. Works with OpenAI, Ollama,
/// Groq, OpenRouter, vLLM, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
    url: String,
    headers: Vec<(String, String)>,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let preset = get_preset(&config.provider);
        let url = config
            .base_url
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.default_base_url.to_string()))
            .unwrap_or_else(|| OPENAI_API_URL.to_string());

        if preset.as_ref().is_some_and(|p| p.needs_api_key) && config.api_key.is_none() {
            return Err(RedlineError::Config(format!(
                "{}: api_key is required",
                config.provider
            )));
        }

        let headers = build_extra_headers(preset.as_ref(), &config.extra_headers);
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RedlineError::Config(e.to_string()))?;

        Ok(Self {
            http,
            config,
            url,
            headers,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    async fn send(&self, messages: Vec<OaiMessage>) -> Result<Value> {
        let body = ChatRequest {
            model: self.config.model_id.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            stream: false,
        };

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
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

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| RedlineError::ModelParse(e.to_string()))?;
        debug!(model = %self.config.model_id, "OpenAI reply received");
        parse_response(reply)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    content: Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| OaiMessage {
            role: role_name(m.role).to_string(),
            content: Value::String(m.content),
        })
        .collect()
}

/// One user message carrying the prompt followed by every image as a data URL.
fn image_message(prompt: &str, images: &[PageImage]) -> OaiMessage {
    let mut parts = vec![json!({"type": "text", "text": prompt})];
    for image in images {
        parts.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image_mime(&image.ext), image.data)
            }
        }));
    }
    OaiMessage {
        role: "user".to_string(),
        content: Value::Array(parts),
    }
}

fn parse_response(reply: ChatResponse) -> Result<Value> {
    let content = reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RedlineError::ModelParse("reply has no message content".into()))?;
    reply_to_value(&content)
}

impl ModelClient for OpenAiClient {
    fn invoke(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { self.send(convert_messages(messages)).await })
    }

    fn invoke_with_images<'a>(
        &'a self,
        prompt: &'a str,
        images: &'a [PageImage],
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { self.send(vec![image_message(prompt, images)]).await })
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}
