//! Mocks and fixtures shared by the Redline test suites.

pub mod client;
pub mod fixtures;
pub mod reasoner;
pub mod store;

pub use client::{RecordedCall, ScriptedModelClient};
pub use fixtures::*;
pub use reasoner::{FailingReasoner, StaticReasoner};
pub use store::MemoryStore;
