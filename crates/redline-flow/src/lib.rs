pub mod builder;
pub mod citations;
pub mod classifier;
pub mod consensus;
pub mod engine;
pub mod library;
pub mod node;
pub mod pages;
pub mod path;
pub mod review;
pub mod secondary;
pub mod summary;

pub use builder::{build_primary, PrimaryDecision};
pub use citations::{dedupe, CitationExtractor, CitationRegistry};
pub use classifier::{ClassificationRequest, Classifier, ClassifierOptions};
pub use consensus::{compute_agreement, reconcile, resolve, Agreement, Resolution};
pub use engine::{FlowEngine, FlowInput, FlowRun, NodeErrorKind, NodeFailure, NodeOutcome};
pub use library::{FlowDefinition, FlowLibrary, PromptTemplate};
pub use node::{NodeConditions, PromptNode, RunnerKind, StopRule};
pub use review::review_triggers;
pub use secondary::structure_secondary;
pub use summary::build_summary;
