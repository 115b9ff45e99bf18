use std::sync::Mutex;

use futures::future::BoxFuture;

use redline_core::error::{RedlineError, Result};
use redline_core::traits::RecordStore;
use redline_core::types::ClassificationResult;

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<ClassificationResult>>,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every save fails.
    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn saved(&self) -> Vec<ClassificationResult> {
        self.saved.lock().unwrap().clone()
    }
}

impl RecordStore for MemoryStore {
    fn save_classification<'a>(
        &'a self,
        result: &'a ClassificationResult,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail {
                return Err(RedlineError::Database("store unavailable".into()));
            }
            self.saved.lock().unwrap().push(result.clone());
            Ok(())
        })
    }
}
