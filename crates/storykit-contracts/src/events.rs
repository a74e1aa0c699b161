use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// What happened in a studio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ImageSelected,
    ImagesStitched,
    PredictionCreated,
    PredictionSucceeded,
    PredictionFailed,
    AnalysisReady,
    VersionCreated,
    StorySaved,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageSelected => "image_selected",
            Self::ImagesStitched => "images_stitched",
            Self::PredictionCreated => "prediction_created",
            Self::PredictionSucceeded => "prediction_succeeded",
            Self::PredictionFailed => "prediction_failed",
            Self::AnalysisReady => "analysis_ready",
            Self::VersionCreated => "version_created",
            Self::StorySaved => "story_saved",
        }
    }
}

/// Session log appended to `events.jsonl`, one compact object per line.
///
/// Every line starts from `type`, `session_id`, `seq` and `ts`; the caller's
/// payload is merged over them. Clones share the file and the sequence.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        let log = &self.shared;
        let mut next_seq = log
            .next_seq
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(log.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::Number((*next_seq).into()));
        event.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        event.extend(payload);

        if let Some(parent) = log.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", log.path.display()))?;

        *next_seq += 1;
        Ok(Value::Object(event))
    }
}

/// Reads an events file back. A missing file is an empty log.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{} is not a JSON event", path.display(), idx + 1))
        })
        .collect()
}
