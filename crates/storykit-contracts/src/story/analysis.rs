use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One piece of on-image text as reported by the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "text_from_any")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typeface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        rename = "originalContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_content: Option<String>,
    #[serde(rename = "newContent", default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextBlock {
    pub fn is_changed(&self) -> bool {
        self.new_content
            .as_deref()
            .map(|text| !text.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlockSet {
    #[serde(rename = "textBlocks")]
    pub text_blocks: Vec<TextBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoryAnalysis {
    Blocks(TextBlockSet),
    Raw {
        #[serde(rename = "rawResponse")]
        raw_response: String,
    },
    Other(Map<String, Value>),
}

impl StoryAnalysis {
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw {
            raw_response: text.into(),
        }
    }

    pub fn text_blocks(&self) -> Option<&[TextBlock]> {
        match self {
            Self::Blocks(set) => Some(set.text_blocks.as_slice()),
            _ => None,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.text_blocks()
            .map(|blocks| blocks.iter().any(TextBlock::is_changed))
            .unwrap_or(false)
    }

    /// Text to pre-fill when editing a block: the pending edit, else the
    /// detected content.
    pub fn editable_text(&self, index: usize) -> Option<&str> {
        let block = self.text_blocks()?.get(index)?;
        Some(
            block
                .new_content
                .as_deref()
                .unwrap_or(block.content.as_str()),
        )
    }

    pub fn edit_block(&mut self, index: usize, text: &str) -> Result<()> {
        let Self::Blocks(set) = self else {
            bail!("analysis has no text blocks to edit");
        };
        let count = set.text_blocks.len();
        let Some(block) = set.text_blocks.get_mut(index) else {
            bail!("text block {index} out of range ({count} blocks)");
        };
        if block.original_content.is_none() {
            block.original_content = Some(block.content.clone());
        }
        block.new_content = Some(text.to_string());
        Ok(())
    }
}

/// Models sometimes report prices or counts as bare numbers, or `null` for
/// an empty block. Those become text so the block itself survives.
fn text_from_any<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Collapses the many output shapes a language model prediction can return
/// into a single text.
pub fn flatten_model_output(output: &Value) -> String {
    match output {
        Value::Array(rows) => rows
            .iter()
            .map(|row| match row {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(text) => text.clone(),
        Value::Object(obj) => {
            if let Some(content) = obj
                .get("choices")
                .and_then(|choices| choices.get(0))
                .and_then(|choice| choice.get("message"))
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
            {
                return content.to_string();
            }
            if let Some(content) = obj.get("content").and_then(Value::as_str) {
                return content.to_string();
            }
            output.to_string()
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn parse_story_analysis(text: &str) -> StoryAnalysis {
    let trimmed = text.trim();
    let mut candidates = vec![trimmed];
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            candidates.push(&trimmed[start..=end]);
        }
    }
    for candidate in candidates {
        let Ok(parsed) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if !parsed.is_object() {
            continue;
        }
        if let Ok(analysis) = serde_json::from_value::<StoryAnalysis>(parsed) {
            return analysis;
        }
    }
    StoryAnalysis::raw(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flatten_joins_streamed_tokens() {
        let output = json!(["{\"textBlocks\"", ": []", "}"]);
        assert_eq!(flatten_model_output(&output), "{\"textBlocks\": []}");
    }

    #[test]
    fn flatten_reads_chat_completion_shapes() {
        let choices = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(flatten_model_output(&choices), "hello");
        let content = json!({"content": "world"});
        assert_eq!(flatten_model_output(&content), "world");
        let other = json!({"answer": 42});
        assert_eq!(flatten_model_output(&other), "{\"answer\":42}");
        assert_eq!(flatten_model_output(&json!("plain")), "plain");
    }

    #[test]
    fn parse_extracts_json_from_chatty_response() {
        let text = "Sure! Here is the analysis:\n```json\n{\"textBlocks\": [{\"type\": \"Title\", \"content\": \"New Car!\", \"typeface\": \"Arial\", \"color\": \"Black\"}]}\n```\nLet me know.";
        let analysis = parse_story_analysis(text);
        let blocks = analysis.text_blocks().unwrap_or_default();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind.as_deref(), Some("Title"));
        assert_eq!(blocks[0].content, "New Car!");
        assert_eq!(blocks[0].typeface.as_deref(), Some("Arial"));
        assert_eq!(blocks[0].color.as_deref(), Some("Black"));
    }

    #[test]
    fn parse_falls_back_to_raw_response() {
        let analysis = parse_story_analysis("There is no text in this image.");
        assert_eq!(analysis, StoryAnalysis::raw("There is no text in this image."));

        let broken = parse_story_analysis("{\"textBlocks\": [ oops }");
        assert!(matches!(broken, StoryAnalysis::Raw { .. }));
    }

    #[test]
    fn parse_keeps_objects_without_text_blocks() {
        let analysis = parse_story_analysis("{\"summary\": \"no text\"}");
        let StoryAnalysis::Other(map) = analysis else {
            panic!("expected an untyped object");
        };
        assert_eq!(map["summary"], json!("no text"));
    }

    #[test]
    fn numeric_content_keeps_every_block() -> anyhow::Result<()> {
        let mut analysis = parse_story_analysis(
            r#"{"textBlocks": [{"type": "Title", "content": "Sale"}, {"type": "Price", "content": 26888}, {"type": "Badge", "content": true}]}"#,
        );
        let blocks = analysis.text_blocks().unwrap_or_default();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].content, "26888");
        assert_eq!(blocks[2].content, "true");

        analysis.edit_block(1, "19999")?;
        let blocks = analysis.text_blocks().unwrap_or_default();
        assert_eq!(blocks[1].original_content.as_deref(), Some("26888"));
        Ok(())
    }

    #[test]
    fn null_content_reads_as_empty_text() {
        let analysis = parse_story_analysis(
            r#"{"textBlocks": [{"type": "Title", "content": "Sale"}, {"type": "Caption", "content": null}]}"#,
        );
        let blocks = analysis.text_blocks().unwrap_or_default();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].content, "");
        assert_eq!(analysis.editable_text(1), Some(""));
    }

    #[test]
    fn edit_block_records_original_once() -> anyhow::Result<()> {
        let mut analysis = parse_story_analysis(
            "{\"textBlocks\": [{\"type\": \"CTA\", \"content\": \"buy now\"}], \"theme\": \"dark\"}",
        );
        assert_eq!(analysis.editable_text(0), Some("buy now"));
        assert!(!analysis.has_changes());

        analysis.edit_block(0, "shop today")?;
        analysis.edit_block(0, "shop now")?;
        let blocks = analysis.text_blocks().unwrap_or_default();
        assert_eq!(blocks[0].original_content.as_deref(), Some("buy now"));
        assert_eq!(blocks[0].new_content.as_deref(), Some("shop now"));
        assert_eq!(analysis.editable_text(0), Some("shop now"));
        assert!(analysis.has_changes());

        let round = serde_json::to_value(&analysis)?;
        assert_eq!(round["theme"], json!("dark"));
        assert_eq!(round["textBlocks"][0]["originalContent"], json!("buy now"));
        assert_eq!(round["textBlocks"][0]["newContent"], json!("shop now"));
        Ok(())
    }

    #[test]
    fn edit_block_rejects_bad_targets() {
        let mut analysis = parse_story_analysis("{\"textBlocks\": []}");
        assert!(analysis.edit_block(0, "x").is_err());

        let mut raw = StoryAnalysis::raw("nothing");
        assert!(raw.edit_block(0, "x").is_err());
    }

    #[test]
    fn empty_new_content_is_not_a_change() -> anyhow::Result<()> {
        let mut analysis = parse_story_analysis("{\"textBlocks\": [{\"content\": \"a\"}]}");
        analysis.edit_block(0, "")?;
        assert!(!analysis.has_changes());
        Ok(())
    }
}
