//! Conversion from Assistants API payloads to core types
//!
//! SDK objects are re-read through their JSON wire form. Unknown content
//! kinds become `Unsupported`, unknown annotation kinds are skipped and
//! unknown run statuses map to `RunStatus::Unknown`.

use assistline_core::{
    Annotation, AnnotationKind, Message, MessageContent, Result, Role, Run, RunStatus,
    TextContent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<WireLastError>,
}

#[derive(Debug, Deserialize)]
struct WireLastError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    role: Role,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireTextBlock {
    text: WireText,
}

#[derive(Debug, Deserialize)]
struct WireText {
    value: String,
    #[serde(default)]
    annotations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireImageBlock {
    image_file: WireFileRef,
}

#[derive(Debug, Deserialize)]
struct WireFileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct WireCitation {
    file_id: String,
    #[serde(default)]
    quote: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAnnotation {
    FileCitation {
        text: String,
        start_index: usize,
        end_index: usize,
        file_citation: WireCitation,
    },
    FilePath {
        text: String,
        start_index: usize,
        end_index: usize,
        file_path: WireFileRef,
    },
}

/// Convert any serializable run object
pub(crate) fn run_from<T: Serialize>(run: &T) -> Result<Run> {
    run_from_value(serde_json::to_value(run)?)
}

/// Convert any serializable message object
pub(crate) fn message_from<T: Serialize>(message: &T) -> Result<Message> {
    message_from_value(serde_json::to_value(message)?)
}

pub(crate) fn run_from_value(value: Value) -> Result<Run> {
    let wire: WireRun = serde_json::from_value(value)?;
    Ok(Run {
        id: wire.id,
        thread_id: wire.thread_id,
        status: wire.status,
        last_error: wire.last_error.map(|e| match e.code {
            Some(code) if !code.is_empty() => format!("{} ({})", e.message, code),
            _ => e.message,
        }),
    })
}

pub(crate) fn message_from_value(value: Value) -> Result<Message> {
    let wire: WireMessage = serde_json::from_value(value)?;
    let content = wire
        .content
        .into_iter()
        .map(content_from_value)
        .collect::<Result<Vec<_>>>()?;
    Ok(Message {
        id: wire.id,
        role: wire.role,
        run_id: wire.run_id.filter(|id| !id.is_empty()),
        content,
    })
}

fn content_from_value(value: Value) -> Result<MessageContent> {
    let kind = block_kind(&value);
    match kind.as_str() {
        "text" => {
            let block: WireTextBlock = serde_json::from_value(value)?;
            let annotations = block
                .text
                .annotations
                .into_iter()
                .filter_map(annotation_from_value)
                .collect();
            Ok(MessageContent::Text(TextContent {
                value: block.text.value,
                annotations,
            }))
        }
        "image_file" => {
            let block: WireImageBlock = serde_json::from_value(value)?;
            Ok(MessageContent::ImageFile {
                file_id: block.image_file.file_id,
            })
        }
        _ => Ok(MessageContent::Unsupported { kind }),
    }
}

fn annotation_from_value(value: Value) -> Option<Annotation> {
    let kind = block_kind(&value);
    match serde_json::from_value::<WireAnnotation>(value) {
        Ok(WireAnnotation::FileCitation {
            text,
            start_index,
            end_index,
            file_citation,
        }) => Some(Annotation {
            text,
            start_index,
            end_index,
            kind: AnnotationKind::FileCitation {
                file_id: file_citation.file_id,
                quote: file_citation.quote,
            },
        }),
        Ok(WireAnnotation::FilePath {
            text,
            start_index,
            end_index,
            file_path,
        }) => Some(Annotation {
            text,
            start_index,
            end_index,
            kind: AnnotationKind::FilePath {
                file_id: file_path.file_id,
            },
        }),
        Err(e) => {
            debug!("Skipping {} annotation: {}", kind, e);
            None
        }
    }
}

fn block_kind(value: &Value) -> String {
    value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}
