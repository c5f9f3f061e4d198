//! OpenAI Assistants API binding for Assistline
//!
//! Implements [`AssistantApi`] on top of `async-openai`. File downloads go
//! through `reqwest` directly so the `Content-Type` header is preserved.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod wire;

use assistline_core::{
    get_optional_env, get_required_env, AssistantApi, AssistantInfo, AssistlineError, Attachment,
    AttachmentTool, FileContent, FileMetadata, FileUpload, Message, NewMessage, Result, Role, Run,
};
use async_openai::{
    config::{Config, OpenAIConfig},
    error::OpenAIError,
    types::{
        CreateFileRequestArgs, CreateMessageRequest, CreateMessageRequestArgs,
        CreateRunRequestArgs, CreateThreadRequestArgs, FilePurpose, MessageAttachment,
        MessageAttachmentTool, MessageRole,
    },
    Client,
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const PAGE_SIZE: &str = "100";

/// Connection settings for the OpenAI API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAIAssistantConfig {
    /// Secret API key
    pub api_key: String,
    /// Override of the API base URL
    pub api_base: Option<String>,
    /// Organization header
    pub org_id: Option<String>,
}

impl OpenAIAssistantConfig {
    /// Settings for the public endpoint with `api_key`
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: None,
            org_id: None,
        }
    }

    /// Read `OPENAI_API_KEY`, `OPENAI_API_BASE` and `OPENAI_ORG_ID`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: get_required_env("OPENAI_API_KEY")?,
            api_base: get_optional_env("OPENAI_API_BASE"),
            org_id: get_optional_env("OPENAI_ORG_ID"),
        })
    }

    fn to_openai(&self) -> OpenAIConfig {
        let mut config = OpenAIConfig::new().with_api_key(self.api_key.clone());
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base.clone());
        }
        if let Some(org) = &self.org_id {
            config = config.with_org_id(org.clone());
        }
        config
    }
}

/// [`AssistantApi`] backed by the OpenAI Assistants v2 endpoints
///
/// Holds no conversation state, so one instance can serve many sessions.
#[derive(Clone)]
pub struct OpenAIAssistantApi {
    client: Client<OpenAIConfig>,
    config: OpenAIConfig,
    http: reqwest::Client,
}

impl OpenAIAssistantApi {
    /// Build a client from explicit settings
    pub fn new(settings: &OpenAIAssistantConfig) -> Self {
        let config = settings.to_openai();
        Self {
            client: Client::with_config(config.clone()),
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Build a client from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&OpenAIAssistantConfig::from_env()?))
    }
}

fn remote(e: OpenAIError) -> AssistlineError {
    AssistlineError::remote(e.to_string())
}

fn to_sdk_tool(tool: AttachmentTool) -> MessageAttachmentTool {
    match tool {
        AttachmentTool::CodeInterpreter => MessageAttachmentTool::CodeInterpreter,
        AttachmentTool::FileSearch => MessageAttachmentTool::FileSearch,
    }
}

fn to_sdk_attachment(attachment: Attachment) -> MessageAttachment {
    MessageAttachment {
        file_id: attachment.file_id,
        tools: attachment.tools.into_iter().map(to_sdk_tool).collect(),
    }
}

fn message_request(message: NewMessage) -> Result<CreateMessageRequest> {
    let role = match message.role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    };
    let mut builder = CreateMessageRequestArgs::default();
    builder.role(role).content(message.content);
    if !message.attachments.is_empty() {
        builder.attachments(
            message
                .attachments
                .into_iter()
                .map(to_sdk_attachment)
                .collect::<Vec<_>>(),
        );
    }
    builder.build().map_err(remote)
}

#[async_trait]
impl AssistantApi for OpenAIAssistantApi {
    async fn create_thread(&self, initial: Vec<NewMessage>) -> Result<String> {
        let messages = initial
            .into_iter()
            .map(message_request)
            .collect::<Result<Vec<_>>>()?;
        let request = CreateThreadRequestArgs::default()
            .messages(messages)
            .build()
            .map_err(remote)?;
        let thread = self.client.threads().create(request).await.map_err(remote)?;
        debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn create_message(&self, thread_id: &str, message: NewMessage) -> Result<()> {
        let request = message_request(message)?;
        let created = self
            .client
            .threads()
            .messages(thread_id)
            .create(request)
            .await
            .map_err(remote)?;
        debug!("Added message {} to thread {}", created.id, thread_id);
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<String>,
    ) -> Result<Run> {
        let mut builder = CreateRunRequestArgs::default();
        builder.assistant_id(assistant_id);
        if let Some(instructions) = instructions {
            builder.instructions(instructions);
        }
        let request = builder.build().map_err(remote)?;
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .create(request)
            .await
            .map_err(remote)?;
        debug!("Started run {} on thread {}", run.id, thread_id);
        wire::run_from(&run)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .retrieve(run_id)
            .await
            .map_err(remote)?;
        wire::run_from(&run)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .cancel(run_id)
            .await
            .map_err(remote)?;
        info!("Requested cancellation of run {}", run_id);
        wire::run_from(&run)
    }

    async fn list_messages(&self, thread_id: &str, run_id: Option<String>) -> Result<Vec<Message>> {
        let mut base: Vec<(&str, String)> =
            vec![("order", "asc".to_string()), ("limit", PAGE_SIZE.to_string())];
        if let Some(run_id) = run_id {
            base.push(("run_id", run_id));
        }

        let mut messages = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut query = base.clone();
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }
            let page = self
                .client
                .threads()
                .messages(thread_id)
                .list(&query)
                .await
                .map_err(remote)?;

            let cursor = page.data.last().map(|m| m.id.clone());
            for message in &page.data {
                messages.push(wire::message_from(message)?);
            }
            match cursor {
                Some(cursor) if page.has_more => after = Some(cursor),
                _ => break,
            }
        }
        debug!("Listed {} messages on thread {}", messages.len(), thread_id);
        Ok(messages)
    }

    async fn get_file_content(&self, file_id: &str) -> Result<FileContent> {
        let url = self.config.url(&format!("/files/{file_id}/content"));
        let response = self
            .http
            .get(url)
            .headers(self.config.headers())
            .send()
            .await
            .map_err(|e| AssistlineError::file_fetch(file_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistlineError::file_fetch(
                file_id,
                format!("{status}: {}", body.trim()),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let data = response
            .bytes()
            .await
            .map_err(|e| AssistlineError::file_fetch(file_id, e.to_string()))?;
        debug!("Downloaded {} bytes of {} ({})", data.len(), file_id, content_type);

        Ok(FileContent { data, content_type })
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        let file = self.client.files().retrieve(file_id).await.map_err(remote)?;
        Ok(FileMetadata {
            id: file.id,
            filename: file.filename,
            bytes: file.bytes as u64,
        })
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<FileMetadata> {
        let request = CreateFileRequestArgs::default()
            .file(upload.path())
            .purpose(FilePurpose::Assistants)
            .build()
            .map_err(remote)?;
        let file = self.client.files().create(request).await.map_err(remote)?;
        debug!("Uploaded {} as {}", upload.file_name(), file.id);
        Ok(FileMetadata {
            id: file.id,
            filename: file.filename,
            bytes: file.bytes as u64,
        })
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<AssistantInfo> {
        let assistant = self
            .client
            .assistants()
            .retrieve(assistant_id)
            .await
            .map_err(remote)?;
        Ok(AssistantInfo {
            id: assistant.id,
            name: assistant.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistline_core::TextContent;

    #[test]
    fn test_config_from_env() {
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_API_BASE", "  ");
        std::env::set_var("OPENAI_ORG_ID", "org-42");

        let config = OpenAIAssistantConfig::from_env().unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.api_base, None);
        assert_eq!(config.org_id.as_deref(), Some("org-42"));

        std::env::remove_var("OPENAI_API_BASE");
        std::env::remove_var("OPENAI_ORG_ID");
    }

    #[test]
    fn test_config_overrides_base_url() {
        let mut settings = OpenAIAssistantConfig::new("sk-test");
        settings.api_base = Some("http://localhost:8080/v1".to_string());

        let config = settings.to_openai();
        assert_eq!(
            config.url("/files/file-1/content"),
            "http://localhost:8080/v1/files/file-1/content"
        );
    }

    #[test]
    fn test_message_request_carries_attachments() {
        let file = FileMetadata {
            id: "file-7".to_string(),
            filename: "notes.pdf".to_string(),
            bytes: 10,
        };
        let message =
            NewMessage::user("Summarize this").with_attachments(vec![Attachment::for_file(&file)]);

        let request = message_request(message).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["content"], "Summarize this");
        assert_eq!(value["attachments"][0]["file_id"], "file-7");
        assert_eq!(value["attachments"][0]["tools"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_message_request_without_attachments() {
        let request = message_request(NewMessage::user("Hello")).unwrap();
        assert!(request.attachments.is_none());
    }

    #[test]
    fn test_tool_mapping() {
        assert!(matches!(
            to_sdk_tool(AttachmentTool::FileSearch),
            MessageAttachmentTool::FileSearch
        ));
        assert!(matches!(
            to_sdk_tool(AttachmentTool::CodeInterpreter),
            MessageAttachmentTool::CodeInterpreter
        ));
    }

    #[test]
    fn test_plain_text_helper_matches_wire_shape() {
        let value = serde_json::json!({
            "id": "msg_1",
            "role": "assistant",
            "run_id": "run_1",
            "content": [{"type": "text", "text": {"value": "Hi", "annotations": []}}]
        });
        let message = wire::message_from(&value).unwrap();
        assert_eq!(
            message.content,
            vec![assistline_core::MessageContent::Text(TextContent::plain("Hi"))]
        );
    }
}
