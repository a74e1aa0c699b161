use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const STORY_MODEL_PREFIX: &str = "story_model_";
pub const PRODUCT_PREFIX: &str = "product_";
pub const CAPTIONS_FILE: &str = "captions.json";

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCaption {
    pub filename: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogImage {
    pub path: PathBuf,
    pub filename: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub story_models: Vec<CatalogImage>,
    pub products: Vec<CatalogImage>,
}

impl Catalog {
    /// Looks an entry up by filename or by 1-based position.
    pub fn find_story_model(&self, key: &str) -> Option<&CatalogImage> {
        find_entry(&self.story_models, key)
    }

    pub fn find_product(&self, key: &str) -> Option<&CatalogImage> {
        find_entry(&self.products, key)
    }

    pub fn product_for_path(&self, path: &Path) -> Option<&CatalogImage> {
        self.products.iter().find(|item| item.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTables {
    #[serde(default)]
    pub story_models: Vec<ImageCaption>,
    #[serde(default)]
    pub products: Vec<ImageCaption>,
}

impl Default for CaptionTables {
    fn default() -> Self {
        let story_models = (1..=8)
            .map(|idx| caption(&format!("story_model_{idx}.png"), &format!("Story model {idx}")))
            .collect();
        let products = vec![
            caption("product_1.png", "A lama plush"),
            caption(
                "product_2.png",
                "A woman wearing a black and white dress with geometric patterns, a leather bag and a panama hat",
            ),
            caption("product_3.png", "a blue velvet armchair"),
            caption("product_4.png", "Yellow sneakers Adidas"),
            caption("product_5.png", "A blue backpack with leather details"),
            caption("product_6.png", "A grey leather handback"),
            caption("product_7.png", "A webber bbq with accessories"),
            caption("product_8.png", "A moisturizing lotion"),
        ];
        Self {
            story_models,
            products,
        }
    }
}

impl CaptionTables {
    /// Built-in tables with `captions.json` from `dir` layered on top.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut tables = Self::default();
        let path = dir.join(CAPTIONS_FILE);
        if !path.is_file() {
            return Ok(tables);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let overrides: CaptionTables = serde_json::from_str(&raw)
            .with_context(|| format!("invalid caption table {}", path.display()))?;
        merge_captions(&mut tables.story_models, overrides.story_models);
        merge_captions(&mut tables.products, overrides.products);
        Ok(tables)
    }
}

/// Caption for `filename`, or the filename without its image extension.
pub fn caption_for(filename: &str, captions: &[ImageCaption]) -> String {
    if let Some(found) = captions.iter().find(|item| item.filename == filename) {
        return found.caption.clone();
    }
    strip_image_extension(filename).to_string()
}

pub fn is_image_filename(filename: &str) -> bool {
    let lowered = filename.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

pub fn scan_catalog(dir: &Path) -> anyhow::Result<Catalog> {
    let captions = CaptionTables::load(dir)?;
    let mut filenames = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to scan images in {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to scan images in {}", dir.display()))?;
        if let Some(name) = entry.file_name().to_str() {
            filenames.push(name.to_string());
        }
    }
    filenames.sort();

    Ok(Catalog {
        story_models: collect_prefixed(dir, &filenames, STORY_MODEL_PREFIX, &captions.story_models),
        products: collect_prefixed(dir, &filenames, PRODUCT_PREFIX, &captions.products),
    })
}

fn collect_prefixed(
    dir: &Path,
    filenames: &[String],
    prefix: &str,
    captions: &[ImageCaption],
) -> Vec<CatalogImage> {
    let mut matched: Vec<&String> = filenames
        .iter()
        .filter(|name| name.starts_with(prefix) && is_image_filename(name))
        .collect();
    // stable sort keeps filename order for equal numbers
    matched.sort_by_key(|name| first_number(name));
    matched
        .into_iter()
        .map(|filename| CatalogImage {
            path: dir.join(filename),
            filename: filename.clone(),
            caption: caption_for(filename, captions),
        })
        .collect()
}

fn first_number(filename: &str) -> u64 {
    let digits: String = filename
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn strip_image_extension(filename: &str) -> &str {
    let lowered = filename.to_ascii_lowercase();
    for ext in IMAGE_EXTENSIONS {
        if lowered.ends_with(ext) {
            return &filename[..filename.len() - ext.len()];
        }
    }
    filename
}

fn find_entry<'a>(entries: &'a [CatalogImage], key: &str) -> Option<&'a CatalogImage> {
    let key = key.trim();
    if let Some(found) = entries.iter().find(|item| item.filename == key) {
        return Some(found);
    }
    let index: usize = key.parse().ok()?;
    index.checked_sub(1).and_then(|idx| entries.get(idx))
}

fn merge_captions(base: &mut Vec<ImageCaption>, overrides: Vec<ImageCaption>) {
    for item in overrides {
        if let Some(existing) = base.iter_mut().find(|row| row.filename == item.filename) {
            existing.caption = item.caption;
        } else {
            base.push(item);
        }
    }
}

fn caption(filename: &str, caption: &str) -> ImageCaption {
    ImageCaption {
        filename: filename.to_string(),
        caption: caption.to_string(),
    }
}
