use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use uuid::Uuid;

use crate::story::analysis::StoryAnalysis;
use crate::story::catalog::CatalogImage;
use crate::story::prompts::{edit_prompt_from_analysis, story_prompt, NO_CHANGES_MESSAGE};

pub const SESSION_SCHEMA_VERSION: u64 = 1;
pub const UPLOADED_PRODUCT_CAPTION: &str = "the product";

/// Where a story or product image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ImageSource {
    Catalog(PathBuf),
    Upload(PathBuf),
}

impl ImageSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Catalog(path) | Self::Upload(path) => path,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "Selected from suggestions",
            Self::Upload(_) => "Uploaded image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryVersion {
    pub version_id: String,
    pub parent_version_id: Option<String>,
    pub operation: String,
    pub image_url: String,
    pub prompt: String,
    pub prompt_diff: Option<Vec<String>>,
    pub created_at: String,
}

/// Persisted studio state: the selections, the prompts and the version
/// history of one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip)]
    pub path: PathBuf,
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub story: Option<ImageSource>,
    pub product: Option<ImageSource>,
    pub product_caption: Option<String>,
    pub prompt: String,
    pub stitched_path: Option<PathBuf>,
    pub generated_url: Option<String>,
    #[serde(default)]
    pub versions: Vec<StoryVersion>,
    #[serde(default)]
    pub current_version: usize,
    pub analysis: Option<StoryAnalysis>,
    /// Image the current analysis was read from.
    #[serde(default)]
    pub analyzed_url: Option<String>,
    #[serde(default)]
    pub edit_prompt: String,
    /// Set when `edit_prompt` was typed rather than derived from the analysis.
    #[serde(default)]
    pub edit_prompt_is_custom: bool,
    pub custom_edit_image: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl Session {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            story: None,
            product: None,
            product_caption: None,
            prompt: story_prompt(None),
            stitched_path: None,
            generated_url: None,
            versions: Vec::new(),
            current_version: 0,
            analysis: None,
            analyzed_url: None,
            edit_prompt: String::new(),
            edit_prompt_is_custom: false,
            custom_edit_image: None,
            last_error: None,
        }
    }

    /// Loads `path`, starting a fresh session when it is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parsed = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Session>(&raw).ok());
        match parsed {
            Some(mut session) => {
                session.path = path;
                session
            }
            None => Self::new(path),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn select_story_model(&mut self, path: impl Into<PathBuf>) {
        self.story = Some(ImageSource::Catalog(path.into()));
        self.reset_results();
    }

    pub fn upload_story(&mut self, path: impl Into<PathBuf>) {
        self.story = Some(ImageSource::Upload(path.into()));
        self.reset_results();
    }

    pub fn clear_story(&mut self) {
        self.story = None;
        self.reset_results();
    }

    pub fn select_product(&mut self, item: &CatalogImage) {
        self.product = Some(ImageSource::Catalog(item.path.clone()));
        let caption = if item.caption.trim().is_empty() {
            UPLOADED_PRODUCT_CAPTION.to_string()
        } else {
            item.caption.clone()
        };
        self.set_product_caption(Some(caption));
        self.reset_results();
    }

    pub fn upload_product(&mut self, path: impl Into<PathBuf>) {
        self.product = Some(ImageSource::Upload(path.into()));
        self.set_product_caption(Some(UPLOADED_PRODUCT_CAPTION.to_string()));
        self.reset_results();
    }

    pub fn clear_product(&mut self) {
        self.product = None;
        self.set_product_caption(None);
        self.reset_results();
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn set_stitched(&mut self, path: impl Into<PathBuf>) {
        self.stitched_path = Some(path.into());
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Forgets everything derived from the current selections.
    pub fn reset_results(&mut self) {
        self.stitched_path = None;
        self.generated_url = None;
        self.last_error = None;
        self.analysis = None;
        self.analyzed_url = None;
        self.versions.clear();
        self.current_version = 0;
        self.edit_prompt.clear();
        self.edit_prompt_is_custom = false;
        self.custom_edit_image = None;
    }

    pub fn can_stitch(&self) -> bool {
        self.story.is_some() && self.product.is_some()
    }

    pub fn can_generate(&self) -> bool {
        self.stitched_path.is_some()
    }

    pub fn can_analyze(&self) -> bool {
        self.generated_url.is_some()
    }

    /// Prompt to send to the edit model, if one is ready.
    pub fn apply_prompt(&self) -> Option<&str> {
        let prompt = self.edit_prompt.trim();
        if prompt.is_empty() || prompt == NO_CHANGES_MESSAGE {
            return None;
        }
        Some(prompt)
    }

    /// URL an edit should target: the image the analysis describes, else the
    /// current version.
    pub fn edit_image_url(&self) -> Option<&str> {
        match (&self.analysis, &self.analyzed_url) {
            (Some(_), Some(url)) => Some(url.as_str()),
            _ => self.generated_url.as_deref(),
        }
    }

    pub fn can_apply(&self) -> bool {
        (self.edit_image_url().is_some() || self.custom_edit_image.is_some())
            && self.apply_prompt().is_some()
    }

    pub fn record_generation(&mut self, image_url: impl Into<String>, prompt: &str) {
        let image_url = image_url.into();
        self.versions.clear();
        self.versions.push(StoryVersion {
            version_id: "v1".to_string(),
            parent_version_id: None,
            operation: "generate".to_string(),
            image_url: image_url.clone(),
            prompt: prompt.to_string(),
            prompt_diff: None,
            created_at: now_utc_iso(),
        });
        self.current_version = 0;
        self.generated_url = Some(image_url);
        self.last_error = None;
    }

    /// Appends an edited version, makes it current and drops the analysis
    /// that described the previous image, along with any edit prompt derived
    /// from it. A typed edit prompt is kept.
    pub fn record_edit(&mut self, image_url: impl Into<String>, prompt: &str) -> &StoryVersion {
        let image_url = image_url.into();
        let parent = self.versions.get(self.current_version);
        let version = StoryVersion {
            version_id: format!("v{}", self.versions.len() + 1),
            parent_version_id: parent.map(|entry| entry.version_id.clone()),
            operation: "apply".to_string(),
            image_url: image_url.clone(),
            prompt: prompt.to_string(),
            prompt_diff: prompt_diff(parent.map(|entry| entry.prompt.as_str()), prompt),
            created_at: now_utc_iso(),
        };
        self.versions.push(version);
        self.current_version = self.versions.len() - 1;
        self.generated_url = Some(image_url);
        self.analysis = None;
        self.analyzed_url = None;
        if !self.edit_prompt_is_custom {
            self.edit_prompt.clear();
        }
        self.last_error = None;
        &self.versions[self.current_version]
    }

    pub fn select_version(&mut self, index: usize) -> anyhow::Result<&StoryVersion> {
        let Some(version) = self.versions.get(index) else {
            bail!(
                "version {} does not exist ({} available)",
                index + 1,
                self.versions.len()
            );
        };
        self.generated_url = Some(version.image_url.clone());
        self.current_version = index;
        Ok(&self.versions[index])
    }

    /// Stores the analysis of `image_url` and re-derives the edit prompt.
    pub fn set_analysis(&mut self, image_url: impl Into<String>, analysis: StoryAnalysis) {
        self.analysis = Some(analysis);
        self.analyzed_url = Some(image_url.into());
        self.refresh_edit_prompt();
    }

    pub fn edit_block(&mut self, index: usize, text: &str) -> anyhow::Result<()> {
        let Some(analysis) = self.analysis.as_mut() else {
            bail!("no analysis available; analyze the story first");
        };
        analysis.edit_block(index, text)?;
        self.refresh_edit_prompt();
        Ok(())
    }

    pub fn set_edit_prompt(&mut self, prompt: impl Into<String>) {
        self.edit_prompt = prompt.into();
        self.edit_prompt_is_custom = !self.edit_prompt.trim().is_empty();
    }

    pub fn set_custom_edit_image(&mut self, path: Option<PathBuf>) {
        self.custom_edit_image = path;
    }

    fn set_product_caption(&mut self, caption: Option<String>) {
        self.prompt = story_prompt(caption.as_deref());
        self.product_caption = caption;
    }

    fn refresh_edit_prompt(&mut self) {
        let Some(analysis) = self.analysis.as_ref() else {
            return;
        };
        self.edit_prompt_is_custom = false;
        self.edit_prompt = if analysis.text_blocks().is_none() {
            String::new()
        } else {
            edit_prompt_from_analysis(analysis).unwrap_or_else(|| NO_CHANGES_MESSAGE.to_string())
        };
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
