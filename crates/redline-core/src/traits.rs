use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Model client used by prompt nodes.
pub trait ModelClient: Send + Sync + 'static {
    /// Send a text conversation and receive the parsed reply.
    fn invoke(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Send a prompt together with document images.
    fn invoke_with_images<'a>(
        &'a self,
        prompt: &'a str,
        images: &'a [PageImage],
    ) -> BoxFuture<'a, Result<serde_json::Value>>;

    /// Model name recorded in the primary analysis.
    fn model_name(&self) -> &str;
}

/// Independent second opinion over the full document text.
pub trait SecondaryReasoner: Send + Sync + 'static {
    /// Returns the raw reply map, which may itself carry an `error` key.
    fn reason<'a>(&'a self, document_text: &'a str) -> BoxFuture<'a, Result<serde_json::Value>>;

    /// Model name used when the reply does not name one.
    fn model_name(&self) -> &str;
}

/// Produces detector signals for a document before classification.
pub trait SignalDetector: Send + Sync + 'static {
    fn detect(&self, pages: &PageMap) -> DetectorSignals;
}

/// Durable sink for completed classifications. Best effort only.
pub trait RecordStore: Send + Sync + 'static {
    fn save_classification<'a>(
        &'a self,
        result: &'a ClassificationResult,
    ) -> BoxFuture<'a, Result<()>>;
}
