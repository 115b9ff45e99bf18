pub mod config;
pub mod detect;
pub mod error;
pub mod json;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use detect::PatternDetector;
pub use error::{RedlineError, Result};
pub use types::*;
