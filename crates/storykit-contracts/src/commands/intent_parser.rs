use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, CATALOG_KEY_COMMANDS, EDIT_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    SINGLE_PATH_COMMANDS, VERSION_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn invalid(raw: &str, reason: String) -> Self {
        let mut intent = Self::new("invalid", raw);
        intent
            .command_args
            .insert("reason".to_string(), Value::String(reason));
        intent
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }

    pub fn arg_index(&self, key: &str) -> Option<usize> {
        self.command_args
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn strip_matching_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

/// Parses a 1-based position into a 0-based index.
fn parse_position(token: &str) -> Option<u64> {
    token.parse::<u64>().ok()?.checked_sub(1)
}

fn parse_edit(raw: &str, arg: &str) -> Intent {
    let (head, tail) = match arg.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail),
        None => (arg, ""),
    };
    let Some(index) = parse_position(head) else {
        return Intent::invalid(raw, "usage: /edit <n> [text]".to_string());
    };
    let mut intent = Intent::new("edit_block", raw);
    intent
        .command_args
        .insert("index".to_string(), Value::Number(index.into()));
    let text = strip_matching_quotes(tail);
    if !tail.trim().is_empty() {
        intent
            .command_args
            .insert("text".to_string(), Value::String(text.to_string()));
    }
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("text".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, CATALOG_KEY_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "key".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == EDIT_COMMAND {
                return parse_edit(text, arg);
            }

            if command == VERSION_COMMAND {
                let Some(index) = parse_position(arg) else {
                    return Intent::invalid(text, "usage: /version <n>".to_string());
                };
                let mut intent = Intent::new("select_version", text);
                intent
                    .command_args
                    .insert("index".to_string(), Value::Number(index.into()));
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("set_prompt", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
