pub mod gemini;
pub mod openai;
pub mod presets;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use serde_json::Value;

use redline_core::error::{RedlineError, Result};
use redline_core::json::parse_reply;

/// MIME type for an image file extension.
pub(crate) fn image_mime(ext: &str) -> String {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "" => "image/png".to_string(),
        other => format!("image/{}", other),
    }
}

/// Parse reply text into JSON, keeping non-JSON text as a string value.
pub(crate) fn reply_to_value(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(RedlineError::ModelParse("empty reply".into()));
    }
    Ok(parse_reply(text).unwrap_or_else(|| Value::String(text.trim().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime("jpg"), "image/jpeg");
        assert_eq!(image_mime(".PNG"), "image/png");
        assert_eq!(image_mime(""), "image/png");
        assert_eq!(image_mime("webp"), "image/webp");
    }

    #[test]
    fn test_reply_to_value() {
        assert_eq!(reply_to_value("[1]").unwrap(), json!([1]));
        assert_eq!(reply_to_value(" plain ").unwrap(), json!("plain"));
        assert!(reply_to_value("  ").is_err());
    }
}
