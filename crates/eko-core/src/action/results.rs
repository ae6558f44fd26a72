//! Conversion of tool return values into `tool_result` content.
//!
//! A tool signals an image by returning an object with an `image` field
//! `{ "media_type": ..., "data": <base64> }`.  Images go to the model as
//! image blocks; everywhere else (logs, summaries, node outputs) they are
//! replaced by a placeholder.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use crate::error::{EkoError, Result};
use crate::llm::ContentBlock;
use crate::llm::types::image_placeholder;

/// An image carried in a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolImage {
    pub media_type: String,
    pub data: String,
}

/// Find an image in a tool return value.
pub fn detect_image(value: &Value) -> Option<ToolImage> {
    let image = value.get("image")?;
    let data = image["data"].as_str()?;
    let media_type = image["media_type"]
        .as_str()
        .or_else(|| image["mimeType"].as_str())
        .unwrap_or("image/png");
    Some(ToolImage {
        media_type: media_type.to_owned(),
        data: data.to_owned(),
    })
}

/// Render a value as text for the model.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}

/// Content blocks for a successful tool result.
pub fn result_blocks(value: &Value) -> Vec<ContentBlock> {
    let Some(image) = detect_image(value) else {
        return vec![ContentBlock::text(value_text(value))];
    };

    let mut blocks = vec![ContentBlock::Image {
        media_type: image.media_type,
        data: image.data,
    }];
    if let Value::Object(map) = value {
        let rest: serde_json::Map<String, Value> = map
            .iter()
            .filter(|(k, _)| k.as_str() != "image")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !rest.is_empty() {
            blocks.push(ContentBlock::text(Value::Object(rest).to_string()));
        }
    }
    blocks
}

/// Content blocks for a failed tool call.
pub fn error_blocks(error: &EkoError) -> Vec<ContentBlock> {
    vec![ContentBlock::text(format!("Error: {error}"))]
}

/// Copy of `value` with inline image data replaced by a placeholder.
pub fn strip_images(value: &Value) -> Value {
    match detect_image(value) {
        Some(image) => {
            let mut stripped = value.clone();
            stripped["image"] = Value::String(image_placeholder(&image.media_type, &image.data));
            stripped
        }
        None => value.clone(),
    }
}

/// Write an image to `dir` for debugging.  Returns the file path.
pub async fn persist_image(dir: &Path, node_id: &str, image: &ToolImage) -> Result<PathBuf> {
    let bytes = BASE64
        .decode(image.data.as_bytes())
        .map_err(|e| EkoError::Internal(format!("tool image is not valid base64: {e}")))?;

    let extension = image
        .media_type
        .rsplit('/')
        .next()
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let safe_node: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{safe_node}-{stamp}.{extension}"));

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
