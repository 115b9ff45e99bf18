use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use redline_core::error::{RedlineError, Result};
use redline_core::traits::SecondaryReasoner;

/// Secondary reasoner that always returns the same reply.
#[derive(Debug)]
pub struct StaticReasoner {
    reply: Value,
    last_text: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticReasoner {
    pub fn new(reply: Value) -> Self {
        Self {
            reply,
            last_text: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Document text passed to the most recent call.
    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecondaryReasoner for StaticReasoner {
    fn reason<'a>(&'a self, document_text: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_text.lock().unwrap() = Some(document_text.to_string());
            Ok(self.reply.clone())
        })
    }

    fn model_name(&self) -> &str {
        "static-reasoner"
    }
}

/// Secondary reasoner whose every call errors.
#[derive(Debug)]
pub struct FailingReasoner {
    error: String,
}

impl FailingReasoner {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

impl SecondaryReasoner for FailingReasoner {
    fn reason<'a>(&'a self, _document_text: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Err(RedlineError::Secondary(self.error.clone())) })
    }

    fn model_name(&self) -> &str {
        "failing-reasoner"
    }
}
