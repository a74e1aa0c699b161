use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use storykit_contracts::events::{EventKind, EventPayload, EventWriter};
use storykit_contracts::models::{
    ModelSelection, ModelSelector, ModelSpec, CAPABILITY_EDIT, CAPABILITY_GENERATE,
    CAPABILITY_VISION,
};
use storykit_contracts::runs::receipts::{build_receipt, write_receipt, PredictionRecord};
use storykit_contracts::story::analysis::{
    flatten_model_output, parse_story_analysis, StoryAnalysis,
};
use storykit_contracts::story::prompts::{
    edit_prompt_from_analysis, ANALYSIS_PROMPT, ANALYSIS_SYSTEM_PROMPT,
};

use crate::config::StudioConfig;
use crate::error::StudioError;
use crate::poll::{wait_for_prediction, PollOutcome};
use crate::replicate::{first_output_url, PredictionApi, PredictionTarget, UploadFile};

pub const STITCHED_UPLOAD_NAME: &str = "stitched-image.jpg";
pub const SAVED_STORY_NAME: &str = "instagram-story.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generate,
    Analyze,
    Apply,
}

impl Operation {
    pub fn key(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Analyze => "analyze",
            Self::Apply => "apply",
        }
    }

    /// Word used in user-facing failures ("Generation failed: ...").
    pub fn label(self) -> &'static str {
        match self {
            Self::Generate => "Generation",
            Self::Analyze => "Analysis",
            Self::Apply => "Edit",
        }
    }

    fn capability(self) -> &'static str {
        match self {
            Self::Generate => CAPABILITY_GENERATE,
            Self::Analyze => CAPABILITY_VISION,
            Self::Apply => CAPABILITY_EDIT,
        }
    }

    fn produces_image(self) -> bool {
        !matches!(self, Self::Analyze)
    }
}

/// Per-capability model overrides; `None` keeps the registry default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChoice {
    pub vision: Option<String>,
    pub generate: Option<String>,
    pub edit: Option<String>,
}

impl ModelChoice {
    fn requested(&self, operation: Operation) -> Option<&str> {
        match operation {
            Operation::Generate => self.generate.as_deref(),
            Operation::Analyze => self.vision.as_deref(),
            Operation::Apply => self.edit.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryImage {
    pub image_url: String,
    pub model: String,
    pub prediction_id: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditSource {
    /// An image already hosted by Replicate, usually the last generated one.
    Url(String),
    /// A local file; uploaded before the edit.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest<'a> {
    pub source: EditSource,
    pub analysis: Option<&'a StoryAnalysis>,
    pub custom_prompt: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEdit {
    pub image: StoryImage,
    pub prompt: String,
}

pub struct StoryStudio<A: PredictionApi> {
    api: A,
    config: StudioConfig,
    selector: ModelSelector,
    models: ModelChoice,
    events: Option<EventWriter>,
    receipts_dir: Option<PathBuf>,
}

impl<A: PredictionApi> StoryStudio<A> {
    pub fn new(api: A, config: StudioConfig) -> Self {
        Self {
            api,
            config,
            selector: ModelSelector::new(None),
            models: ModelChoice::default(),
            events: None,
            receipts_dir: None,
        }
    }

    pub fn with_models(mut self, models: ModelChoice) -> Self {
        self.models = models;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_receipts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receipts_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Uploads the stitched composite and asks the generation model for a
    /// story built from it.
    pub fn generate_story(&self, composite: &Path, prompt: &str) -> Result<StoryImage> {
        self.config.require_replicate_token()?;
        let openai_key = self.config.require_openai_key()?.to_string();
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(StudioError::MissingInput("No prompt provided").into());
        }
        if !composite.is_file() {
            return Err(StudioError::MissingInput("No image uploaded").into());
        }

        let mut upload = UploadFile::from_path(composite)?;
        upload.filename = STITCHED_UPLOAD_NAME.to_string();
        upload.mime_type = "image/jpeg".to_string();
        let image_url = self
            .api
            .upload_file(upload)
            .context("Failed to upload image")?;

        let mut input = Map::new();
        input.insert("prompt".to_string(), json!(prompt));
        input.insert("openai_api_key".to_string(), json!(openai_key));
        input.insert("input_images".to_string(), json!([image_url]));
        input.insert("quality".to_string(), json!("auto"));
        input.insert("background".to_string(), json!("auto"));
        input.insert("moderation".to_string(), json!("auto"));
        input.insert("aspect_ratio".to_string(), json!("2:3"));

        let model = self.select_model(Operation::Generate)?;
        let target = self.target_for(&model, false)?;
        let outcome = self.run_prediction(Operation::Generate, &model, target, input)?;
        self.story_image(Operation::Generate, &model, &outcome)
    }

    /// Asks the vision model to describe the text blocks of `image_url`.
    pub fn analyze_story_text(&self, image_url: &str) -> Result<StoryAnalysis> {
        self.config.require_replicate_token()?;
        let openai_key = self.config.require_openai_key()?.to_string();
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(StudioError::MissingInput("No image URL provided").into());
        }

        let mut input = Map::new();
        input.insert("prompt".to_string(), json!(ANALYSIS_PROMPT));
        input.insert("image_input".to_string(), json!([image_url]));
        input.insert("temperature".to_string(), json!(0.1));
        input.insert("system_prompt".to_string(), json!(ANALYSIS_SYSTEM_PROMPT));
        input.insert("max_completion_tokens".to_string(), json!(1024));
        input.insert("top_p".to_string(), json!(1));
        input.insert("presence_penalty".to_string(), json!(0));
        input.insert("frequency_penalty".to_string(), json!(0));
        input.insert("openai_api_key".to_string(), json!(openai_key));

        let model = self.select_model(Operation::Analyze)?;
        let target = self.target_for(&model, false)?;
        let outcome = self.run_prediction(Operation::Analyze, &model, target, input)?;
        let text = flatten_model_output(&outcome.prediction.output);
        let analysis = parse_story_analysis(&text);
        if analysis.text_blocks().is_none() {
            log::warn!("vision output had no textBlocks; keeping the raw response");
        }
        Ok(analysis)
    }

    /// Edits the text of a story image with the edit model.
    pub fn apply_changes(&self, request: ApplyRequest<'_>) -> Result<AppliedEdit> {
        self.config.require_replicate_token()?;
        let prompt = resolve_edit_prompt(request.analysis, request.custom_prompt)?;

        let image_url = match &request.source {
            EditSource::Url(url) if url.trim().is_empty() => {
                return Err(StudioError::MissingInput("No image provided").into());
            }
            EditSource::Url(url) => url.trim().to_string(),
            EditSource::File(path) => {
                let upload = UploadFile::from_path(path)
                    .with_context(|| format!("No custom image provided ({})", path.display()))?;
                let url = self
                    .api
                    .upload_file(upload)
                    .context("Failed to upload custom image")?;
                log::info!("uploaded custom edit image {} -> {url}", path.display());
                url
            }
        };

        let mut input = Map::new();
        input.insert("input_image".to_string(), json!(image_url));
        input.insert("prompt".to_string(), json!(prompt));
        input.insert("aspect_ratio".to_string(), json!("9:16"));
        input.insert("output_format".to_string(), json!("jpg"));
        input.insert("output_quality".to_string(), json!(90));
        input.insert("safety_tolerance".to_string(), json!(2));
        input.insert("prompt_upsampling".to_string(), json!(true));

        let model = self.select_model(Operation::Apply)?;
        let target = self.target_for(&model, true)?;
        let outcome = self.run_prediction(Operation::Apply, &model, target, input)?;
        let image = self.story_image(Operation::Apply, &model, &outcome)?;
        Ok(AppliedEdit { image, prompt })
    }

    /// Downloads `image_url` into `dest`. A directory destination gets the
    /// default file name.
    pub fn save_story(&self, image_url: &str, dest: &Path) -> Result<PathBuf> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(StudioError::MissingInput("No story image to save").into());
        }
        let path = if dest.is_dir() {
            dest.join(SAVED_STORY_NAME)
        } else {
            dest.to_path_buf()
        };
        let bytes = self.api.download(image_url)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let mut payload = EventPayload::new();
        payload.insert("image_url".to_string(), json!(image_url));
        payload.insert("path".to_string(), json!(path.to_string_lossy()));
        payload.insert("bytes".to_string(), json!(bytes.len()));
        self.emit(EventKind::StorySaved, payload);
        Ok(path)
    }

    fn select_model(&self, operation: Operation) -> Result<ModelSpec> {
        let ModelSelection {
            model,
            fallback_reason,
            ..
        } = self
            .selector
            .select(self.models.requested(operation), operation.capability())
            .map_err(anyhow::Error::msg)?;
        if let Some(reason) = fallback_reason {
            log::warn!("{reason}");
        }
        Ok(model)
    }

    /// Pinned versions win. Otherwise either the latest published version is
    /// resolved, or the model endpoint is used directly.
    fn target_for(&self, model: &ModelSpec, resolve_latest: bool) -> Result<PredictionTarget> {
        if let Some(version) = &model.pinned_version {
            return Ok(PredictionTarget::Version(version.clone()));
        }
        if resolve_latest {
            let version = self
                .api
                .latest_version(&model.name)
                .context("Failed to get model info")?;
            log::info!("using {} version {version}", model.name);
            return Ok(PredictionTarget::Version(version));
        }
        Ok(PredictionTarget::Model(model.name.clone()))
    }

    fn run_prediction(
        &self,
        operation: Operation,
        model: &ModelSpec,
        target: PredictionTarget,
        input: Map<String, Value>,
    ) -> Result<PollOutcome> {
        let started = Instant::now();
        let version = match &target {
            PredictionTarget::Version(version) => Some(version.clone()),
            PredictionTarget::Model(_) => None,
        };
        let created = self
            .api
            .create_prediction(&target, &input)
            .with_context(|| format!("{} request failed", operation.label()))?;
        log::info!(
            "{}: created prediction {} on {}",
            operation.key(),
            created.id,
            model.name
        );

        let mut payload = EventPayload::new();
        payload.insert("operation".to_string(), json!(operation.key()));
        payload.insert("model".to_string(), json!(model.name));
        payload.insert("prediction_id".to_string(), json!(created.id));
        self.emit(EventKind::PredictionCreated, payload);

        let prediction_id = created.id.clone();
        let mut last_attempt = 0;
        let mut last_status = created.status;
        let result = wait_for_prediction(
            &self.api,
            created,
            &self.config.poll,
            operation.label(),
            |attempt, row| {
                last_attempt = attempt;
                last_status = row.status;
            },
        );

        let mut record = PredictionRecord {
            operation: operation.key().to_string(),
            model: model.name.clone(),
            version,
            prediction_id: Some(prediction_id.clone()),
            status: last_status.as_str().to_string(),
            output_url: None,
            attempts: last_attempt,
            elapsed_s: started.elapsed().as_secs_f64(),
            input,
            error: None,
        };
        match &result {
            Ok(outcome) => {
                if operation.produces_image() {
                    record.output_url = first_output_url(&outcome.prediction.output);
                }
            }
            Err(err) => record.error = Some(format!("{err:#}")),
        }
        self.write_receipt(&record);

        let mut payload = EventPayload::new();
        payload.insert("operation".to_string(), json!(operation.key()));
        payload.insert("prediction_id".to_string(), json!(prediction_id));
        payload.insert("status".to_string(), json!(record.status));
        payload.insert("attempts".to_string(), json!(record.attempts));
        payload.insert("elapsed_s".to_string(), json!(record.elapsed_s));
        if let Some(url) = &record.output_url {
            payload.insert("image_url".to_string(), json!(url));
        }
        if let Some(error) = &record.error {
            payload.insert("error".to_string(), json!(error));
        }
        let kind = if result.is_ok() {
            EventKind::PredictionSucceeded
        } else {
            EventKind::PredictionFailed
        };
        self.emit(kind, payload);
        result
    }

    fn story_image(
        &self,
        operation: Operation,
        model: &ModelSpec,
        outcome: &PollOutcome,
    ) -> Result<StoryImage> {
        let Some(image_url) = first_output_url(&outcome.prediction.output) else {
            log::error!(
                "{}: unexpected output {}",
                operation.key(),
                outcome.prediction.output
            );
            return Err(StudioError::UnexpectedOutput {
                model: model.name.clone(),
            }
            .into());
        };
        Ok(StoryImage {
            image_url,
            model: model.name.clone(),
            prediction_id: outcome.prediction.id.clone(),
            attempts: outcome.attempts,
        })
    }

    fn write_receipt(&self, record: &PredictionRecord) {
        let Some(dir) = &self.receipts_dir else {
            return;
        };
        let id = record.prediction_id.as_deref().unwrap_or("unknown");
        let path = dir.join(format!("receipt-{}-{id}.json", record.operation));
        let payload = build_receipt(record, &path);
        if let Err(err) = write_receipt(&path, &payload) {
            log::warn!("failed to write receipt {}: {err:#}", path.display());
        }
    }

    fn emit(&self, kind: EventKind, payload: EventPayload) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, payload) {
            log::warn!("failed to record {} event: {err:#}", kind.as_str());
        }
    }
}

/// The custom prompt when one is given, otherwise the instruction derived
/// from the edited analysis.
pub fn resolve_edit_prompt(
    analysis: Option<&StoryAnalysis>,
    custom_prompt: Option<&str>,
) -> Result<String, StudioError> {
    if let Some(custom) = custom_prompt.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(custom.to_string());
    }
    let Some(analysis) = analysis.filter(|analysis| analysis.text_blocks().is_some()) else {
        return Err(StudioError::MissingInput("No prompt provided"));
    };
    edit_prompt_from_analysis(analysis).ok_or(StudioError::NoChanges)
}
