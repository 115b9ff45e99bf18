use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use redline_core::error::{RedlineError, Result};
use redline_core::traits::ModelClient;
use redline_core::types::{ChatMessage, PageImage};

/// One recorded model invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Node id taken from the request payload. `None` for image calls.
    pub node_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Parsed JSON of the user message, `Null` for image calls.
    pub payload: Value,
    pub image_count: usize,
}

#[derive(Debug, Clone)]
enum Reply {
    Ok(Value),
    Err(String),
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::Err(e) => Err(RedlineError::ModelRequest(e)),
        }
    }
}

/// Model client that answers from a per-node script.
///
/// Nodes are identified by `extra.node_id` in the request payload. Any node
/// without a scripted reply fails, so an empty script fails every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModelClient {
    replies: HashMap<String, Reply>,
    image_reply: Option<Reply>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, node_id: &str, value: Value) -> Self {
        self.replies.insert(node_id.to_string(), Reply::Ok(value));
        self
    }

    pub fn fail(mut self, node_id: &str, error: &str) -> Self {
        self.replies
            .insert(node_id.to_string(), Reply::Err(error.to_string()));
        self
    }

    pub fn image_reply(mut self, value: Value) -> Self {
        self.image_reply = Some(Reply::Ok(value));
        self
    }

    pub fn image_failure(mut self, error: &str) -> Self {
        self.image_reply = Some(Reply::Err(error.to_string()));
        self
    }

    /// Same script, fresh call log.
    pub fn clone_script(&self) -> Self {
        Self {
            replies: self.replies.clone(),
            image_reply: self.image_reply.clone(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Node ids of text calls, in call order.
    pub fn called_nodes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.node_id)
            .collect()
    }

    pub fn image_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.image_count > 0).count()
    }
}

impl ModelClient for ScriptedModelClient {
    fn invoke(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let payload = messages
                .iter()
                .rev()
                .find_map(|m| serde_json::from_str::<Value>(&m.content).ok())
                .unwrap_or(Value::Null);
            let node_id = payload["extra"]["node_id"].as_str().map(str::to_string);

            self.calls.lock().unwrap().push(RecordedCall {
                node_id: node_id.clone(),
                messages,
                payload,
                image_count: 0,
            });

            let key = node_id.unwrap_or_default();
            self.replies
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Reply::Err(format!("no scripted reply for node '{}'", key)))
                .into_result()
        })
    }

    fn invoke_with_images<'a>(
        &'a self,
        prompt: &'a str,
        images: &'a [PageImage],
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                node_id: None,
                messages: vec![ChatMessage::user(prompt)],
                payload: Value::Null,
                image_count: images.len(),
            });
            self.image_reply
                .clone()
                .unwrap_or_else(|| Reply::Err("no scripted image reply".to_string()))
                .into_result()
        })
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}
