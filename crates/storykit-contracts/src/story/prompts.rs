use super::analysis::StoryAnalysis;

pub const PRODUCT_PLACEHOLDER: &str = "[PRODUCT_DESCRIPTION]";

pub const DEFAULT_STORY_PROMPT: &str = "Create an Instagram Story from this image. Highlight the product (on the right) using the style of the Story (on the left). Do not alter the product, strictly preserve it. Replace the main subject of the left story by the product (on the right). The story should be 9:16 even if the generated image is 2:3 Add white borders on the sides so the image respect the 9:16 format";

pub const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that analyzes images and returns structured JSON data.";

pub const ANALYSIS_PROMPT: &str = r#"Generate a JSON file to describe the instagram story and the text blocks.
I want to know the type of the text block and what it contains. I also want the typeface and the color of the font.

Example:

{
  "textBlocks": [
    {
      "type": "Title",
      "content": "New Car!",
      "typeface": "Arial",
      "color": "Black"
    },
    {
      "type": "CTA",
      "content": "buy now",
      "typeface": "Arial",
      "color": "Black"
    },
    {
      "type": "Price",
      "content": "$26888",
      "typeface": "Arial",
      "color": "White"
    }
  ]
}

Please analyze the image and return ONLY the JSON structure with all the text blocks you can identify."#;

pub const EDIT_PROMPT_HEADER: &str =
    "Update this Instagram story image by replacing the text content as follows:\n\n";

pub const EDIT_PROMPT_FOOTER: &str = "\nMaintain the same visual style, layout, colors, and typography. Only change the text content as specified. Keep the same aspect ratio and overall design aesthetic.";

pub const NO_CHANGES_MESSAGE: &str = "No changes detected. Please edit some text blocks first.";

/// Generation prompt for the selected product.
pub fn story_prompt(product_caption: Option<&str>) -> String {
    match product_caption {
        Some(caption) => DEFAULT_STORY_PROMPT.replace(PRODUCT_PLACEHOLDER, caption),
        None => DEFAULT_STORY_PROMPT.to_string(),
    }
}

/// Edit instruction listing every changed text block, or `None` when nothing
/// was edited.
pub fn edit_prompt_from_analysis(analysis: &StoryAnalysis) -> Option<String> {
    let blocks = analysis.text_blocks()?;
    if !analysis.has_changes() {
        return None;
    }
    let mut prompt = EDIT_PROMPT_HEADER.to_string();
    for block in blocks {
        let Some(new_content) = block.new_content.as_deref().filter(|text| !text.is_empty())
        else {
            continue;
        };
        let kind = block.kind.as_deref().unwrap_or("Text");
        let original = block.original_content.as_deref().unwrap_or("");
        prompt.push_str(&format!(
            "{kind}: Replace \"{original}\" with \"{new_content}\"\n"
        ));
    }
    prompt.push_str(EDIT_PROMPT_FOOTER);
    Some(prompt)
}
