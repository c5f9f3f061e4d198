//! Domain types shared by the poller, renderer and session

use crate::{AssistlineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File extensions accepted for upload
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "csv", "json", "geojson", "xlsx", "xls",
];

/// Extensions the file_search tool can index
const FILE_SEARCH_EXTENSIONS: &[&str] = &["txt", "pdf", "json"];

/// Status of a remote run, using the vendor's wire names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be picked up
    Queued,
    /// Assistant is working
    InProgress,
    /// Waiting for tool outputs
    RequiresAction,
    /// Cancellation requested
    Cancelling,
    /// Cancelled
    Cancelled,
    /// Failed
    Failed,
    /// Completed successfully
    Completed,
    /// Ended early (token limits and similar)
    Incomplete,
    /// Expired before finishing
    Expired,
    /// Any status this crate does not know about
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether the run will not change status any more
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Incomplete
        )
    }

    /// Vendor wire name
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of the assistant over a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Remote run id
    pub id: String,
    /// Thread the run belongs to
    pub thread_id: String,
    /// Current status
    pub status: RunStatus,
    /// Vendor error message for failed runs
    pub last_error: Option<String>,
}

impl Run {
    /// Create a run snapshot without error details
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            status,
            last_error: None,
        }
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Human side
    User,
    /// Assistant side
    Assistant,
}

/// A message stored in a remote thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Remote message id
    pub id: String,
    /// Author
    pub role: Role,
    /// Run that produced the message, if any
    pub run_id: Option<String>,
    /// Content blocks in display order
    pub content: Vec<MessageContent>,
}

/// One content block of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Text with annotations
    Text(TextContent),
    /// Reference to an image stored in the file store
    ImageFile {
        /// Remote file id
        file_id: String,
    },
    /// A block kind this crate does not render
    Unsupported {
        /// Vendor name of the block kind
        kind: String,
    },
}

/// Text block body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    /// Raw text
    pub value: String,
    /// Annotations in the order the API lists them
    pub annotations: Vec<Annotation>,
}

impl TextContent {
    /// Text without annotations
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            annotations: Vec::new(),
        }
    }
}

/// A marked span of message text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// The text the annotation covers
    pub text: String,
    /// Start offset, in characters
    pub start_index: usize,
    /// End offset (exclusive), in characters
    pub end_index: usize,
    /// What the span refers to
    pub kind: AnnotationKind,
}

/// Target of an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Quote from an uploaded source file
    FileCitation {
        /// Source file id
        file_id: String,
        /// Quoted excerpt, when the API supplies one
        quote: Option<String>,
    },
    /// Downloadable file generated by the assistant
    FilePath {
        /// Generated file id
        file_id: String,
    },
}

/// Tool a file attachment is made available to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentTool {
    /// Code interpreter sandbox
    CodeInterpreter,
    /// Retrieval over the file
    FileSearch,
}

/// File attached to a new message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Remote file id
    pub file_id: String,
    /// Tools that may read the file
    pub tools: Vec<AttachmentTool>,
}

impl Attachment {
    /// Attach an uploaded file, picking tools from its extension
    pub fn for_file(file: &FileMetadata) -> Self {
        let extension = extension_of(Path::new(&file.filename));
        let tools = match extension.as_deref() {
            Some(ext) if FILE_SEARCH_EXTENSIONS.contains(&ext) => {
                vec![AttachmentTool::FileSearch, AttachmentTool::CodeInterpreter]
            }
            _ => vec![AttachmentTool::CodeInterpreter],
        };
        Self {
            file_id: file.id.clone(),
            tools,
        }
    }
}

/// A message to add to a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Attached files
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    /// User message without attachments
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Add attachments
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }
}

/// Metadata of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Remote file id
    pub id: String,
    /// Original file name
    pub filename: String,
    /// Size in bytes
    pub bytes: u64,
}

/// Downloaded file body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Raw bytes
    pub data: Bytes,
    /// Response content type
    pub content_type: String,
}

/// Assistant details used by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantInfo {
    /// Remote assistant id
    pub id: String,
    /// Display name, if configured
    pub name: Option<String>,
}

/// A local file queued for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    path: PathBuf,
}

impl FileUpload {
    /// Validate a local path for upload
    ///
    /// The file must exist and carry one of [`ALLOWED_UPLOAD_EXTENSIONS`].
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let extension = extension_of(&path).ok_or_else(|| {
            AssistlineError::validation(format!("{} has no file extension", path.display()))
        })?;
        if !ALLOWED_UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AssistlineError::validation(format!(
                "'.{}' files are not accepted (allowed: {})",
                extension,
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            )));
        }
        if !path.is_file() {
            return Err(AssistlineError::validation(format!(
                "{} is not a readable file",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Local path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// Person at the keyboard
    User,
    /// Remote assistant
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => f.write_str("user"),
            Speaker::Assistant => f.write_str("assistant"),
        }
    }
}

/// One displayed turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Who said it
    pub speaker: Speaker,
    /// Display text
    pub text: String,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}
