use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// What was sent for one prediction and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub operation: String,
    pub model: String,
    pub version: Option<String>,
    pub prediction_id: Option<String>,
    pub status: String,
    pub output_url: Option<String>,
    pub attempts: u32,
    pub elapsed_s: f64,
    #[serde(default)]
    pub input: Map<String, Value>,
    pub error: Option<String>,
}

pub fn build_receipt(record: &PredictionRecord, receipt_path: &Path) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "prediction".to_string(),
        sanitize_payload(&serde_json::to_value(record).unwrap_or(Value::Null)),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    if let Some(url) = &record.output_url {
        artifacts.insert("image_url".to_string(), Value::String(url.clone()));
    }
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replaces credential values and inline image data before anything touches
/// disk.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if is_secret_key(&lowered) {
                    out.insert(key.clone(), Value::String("<redacted>".to_string()));
                    continue;
                }
                if matches!(lowered.as_str(), "b64_json" | "image_bytes" | "data") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn is_secret_key(lowered: &str) -> bool {
    lowered.contains("api_key")
        || lowered.contains("secret")
        || lowered == "token"
        || lowered.ends_with("_token")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn map_object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("receipts").join("receipt-generate-1.json");
        let record = PredictionRecord {
            operation: "generate".to_string(),
            model: "openai/gpt-image-1".to_string(),
            version: Some("919e1bf0".to_string()),
            prediction_id: Some("pred-1".to_string()),
            status: "succeeded".to_string(),
            output_url: Some("https://replicate.delivery/out.png".to_string()),
            attempts: 4,
            elapsed_s: 12.5,
            input: map_object(json!({
                "prompt": "hello",
                "openai_api_key": "sk-secret",
                "input_images": ["https://replicate.delivery/in.jpg"],
            })),
            error: None,
        };

        let payload = build_receipt(&record, &receipt_path);
        write_receipt(&receipt_path, &payload)?;

        let raw = std::fs::read_to_string(&receipt_path)?;
        assert!(!raw.contains("sk-secret"));
        let parsed: Value = serde_json::from_str(&raw)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["prediction"]["prediction_id"], json!("pred-1"));
        assert_eq!(
            parsed["prediction"]["input"]["openai_api_key"],
            json!("<redacted>")
        );
        assert_eq!(parsed["prediction"]["input"]["prompt"], json!("hello"));
        assert_eq!(
            parsed["artifacts"]["image_url"],
            json!("https://replicate.delivery/out.png")
        );
        Ok(())
    }

    #[test]
    fn sanitize_handles_nested_secrets() {
        let sanitized = sanitize_payload(&json!({
            "headers": {"Authorization_Token": "abc"},
            "rows": [{"client_secret": "x", "keep": 1}],
            "data": "aGVsbG8=",
            "max_completion_tokens": 1024,
        }));
        assert_eq!(sanitized["headers"]["Authorization_Token"], json!("<redacted>"));
        assert_eq!(sanitized["rows"][0]["client_secret"], json!("<redacted>"));
        assert_eq!(sanitized["rows"][0]["keep"], json!(1));
        assert_eq!(sanitized["data"], json!("<omitted>"));
        assert_eq!(sanitized["max_completion_tokens"], json!(1024));
    }
}
