pub mod analysis;
pub mod catalog;
pub mod prompts;

pub use analysis::{
    flatten_model_output, parse_story_analysis, StoryAnalysis, TextBlock, TextBlockSet,
};
pub use catalog::{scan_catalog, Catalog, CatalogImage, CaptionTables, ImageCaption};
pub use prompts::{edit_prompt_from_analysis, story_prompt};
