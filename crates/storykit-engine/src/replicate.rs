use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::StudioConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    #[default]
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

/// A prediction status object as returned by `POST /predictions` and
/// `GET /predictions/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Value,
}

impl Prediction {
    pub fn error_text(&self) -> Option<String> {
        match &self.error {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionTarget {
    /// `POST /predictions` against a version hash.
    Version(String),
    /// `POST /models/{owner}/{name}/predictions`.
    Model(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl UploadFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self {
            bytes,
            filename,
            mime_type: mime_for_path(path).unwrap_or("application/octet-stream").to_string(),
        })
    }
}

/// The slice of the Replicate HTTP API the studio needs.
pub trait PredictionApi {
    /// Stores a file and returns a URL predictions can read.
    fn upload_file(&self, file: UploadFile) -> Result<String>;
    fn latest_version(&self, model: &str) -> Result<String>;
    fn create_prediction(
        &self,
        target: &PredictionTarget,
        input: &Map<String, Value>,
    ) -> Result<Prediction>;
    fn get_prediction(&self, id: &str) -> Result<Prediction>;
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ReplicateClient {
    api_base: String,
    api_token: Option<String>,
    http: HttpClient,
}

impl ReplicateClient {
    /// Builds the client. A missing token is not an error here: the studio
    /// checks credentials per operation, and downloads need none.
    pub fn new(config: &StudioConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: config.api_base.clone(),
            api_token: config.replicate_token.clone(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get_json(&self, label: &str, url: &str) -> Result<Value> {
        log::debug!("GET {url}");
        let response = self
            .authorized(self.http.get(url))
            .send()
            .with_context(|| format!("{label} request failed ({url})"))?;
        response_json_or_error(label, response)
    }

    fn post_json(&self, label: &str, url: &str, payload: &Value) -> Result<Value> {
        log::debug!("POST {url}");
        let response = self
            .authorized(self.http.post(url).json(payload))
            .send()
            .with_context(|| format!("{label} request failed ({url})"))?;
        response_json_or_error(label, response)
    }
}

impl PredictionApi for ReplicateClient {
    fn upload_file(&self, file: UploadFile) -> Result<String> {
        let url = self.endpoint("files");
        let size = file.bytes.len();
        let part = MultipartPart::bytes(file.bytes)
            .file_name(file.filename.clone())
            .mime_str(&file.mime_type)
            .with_context(|| format!("invalid upload mime type {}", file.mime_type))?;
        let form = MultipartForm::new().part("content", part);
        log::debug!("POST {url} ({}, {size} bytes)", file.filename);
        let response = self
            .authorized(self.http.post(&url).multipart(form))
            .send()
            .with_context(|| format!("Replicate file upload failed ({url})"))?;
        let payload = response_json_or_error("Replicate file upload", response)?;
        payload
            .pointer("/urls/get")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Replicate file upload returned no URL"))
    }

    fn latest_version(&self, model: &str) -> Result<String> {
        let url = self.endpoint(&format!("models/{model}"));
        let payload = self.get_json("Replicate model lookup", &url)?;
        payload
            .pointer("/latest_version/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Replicate model {model} has no latest version"))
    }

    fn create_prediction(
        &self,
        target: &PredictionTarget,
        input: &Map<String, Value>,
    ) -> Result<Prediction> {
        let (url, payload) = match target {
            PredictionTarget::Version(version) => (
                self.endpoint("predictions"),
                json!({"version": version, "input": input}),
            ),
            PredictionTarget::Model(model) => (
                self.endpoint(&format!("models/{model}/predictions")),
                json!({"input": input}),
            ),
        };
        let payload = self.post_json("Replicate", &url, &payload)?;
        serde_json::from_value(payload).context("Replicate returned an unreadable prediction")
    }

    fn get_prediction(&self, id: &str) -> Result<Prediction> {
        let url = self.endpoint(&format!("predictions/{id}"));
        let payload = self.get_json("Replicate poll", &url)?;
        serde_json::from_value(payload).context("Replicate returned an unreadable prediction")
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        let code = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            ensure_success("image download", code, &body)?;
            unreachable!("ensure_success rejects non-2xx statuses");
        }
        Ok(response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec())
    }
}

/// First image URL in a prediction output: the string itself, or the first
/// element of an array.
pub fn first_output_url(output: &Value) -> Option<String> {
    let candidate = match output {
        Value::String(url) => url.as_str(),
        Value::Array(rows) => rows.first()?.as_str()?,
        _ => return None,
    };
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let code = response.status().as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    json_body_or_error(label, code, &body)
}

fn json_body_or_error(label: &str, code: u16, body: &str) -> Result<Value> {
    ensure_success(label, code, body)?;
    let parsed: Value = serde_json::from_str(body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Non-2xx statuses become errors carrying the code and the start of the body.
fn ensure_success(label: &str, code: u16, body: &str) -> Result<()> {
    if !(200..300).contains(&code) {
        bail!(
            "{label} request failed ({code}): {}",
            truncate_text(body, ERROR_BODY_CHARS)
        );
    }
    Ok(())
}

const ERROR_BODY_CHARS: usize = 512;

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
