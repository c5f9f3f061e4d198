//! The remote assistant service as seen by the core

use crate::types::*;
use crate::Result;
use async_trait::async_trait;

/// Remote assistant API (threads, runs, messages and files)
///
/// Implementations must be usable from several sessions at once; all
/// per-conversation state lives in [`crate::ChatSession`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create a thread seeded with `initial` messages and return its id
    async fn create_thread(&self, initial: Vec<NewMessage>) -> Result<String>;

    /// Append a message to an existing thread
    async fn create_message(&self, thread_id: &str, message: NewMessage) -> Result<()>;

    /// Start a run of `assistant_id` over the thread
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<String>,
    ) -> Result<Run>;

    /// Fetch the current state of a run
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Ask the service to stop a run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// List thread messages oldest first, optionally only those produced by `run_id`
    async fn list_messages(&self, thread_id: &str, run_id: Option<String>) -> Result<Vec<Message>>;

    /// Download a stored file
    async fn get_file_content(&self, file_id: &str) -> Result<FileContent>;

    /// Fetch metadata of a stored file
    async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata>;

    /// Upload a local file for use by assistants
    async fn upload_file(&self, upload: FileUpload) -> Result<FileMetadata>;

    /// Fetch assistant details
    async fn get_assistant(&self, assistant_id: &str) -> Result<AssistantInfo>;
}

/// Test double that delegates to a [`MockAssistantApi`] but never answers
/// the call named in `stall`
#[cfg(test)]
pub(crate) struct StallingApi {
    pub(crate) inner: MockAssistantApi,
    pub(crate) stall: &'static str,
}

#[cfg(test)]
impl StallingApi {
    async fn gate(&self, call: &str) {
        if call == self.stall {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[async_trait]
impl AssistantApi for StallingApi {
    async fn create_thread(&self, initial: Vec<NewMessage>) -> Result<String> {
        self.gate("create_thread").await;
        self.inner.create_thread(initial).await
    }

    async fn create_message(&self, thread_id: &str, message: NewMessage) -> Result<()> {
        self.gate("create_message").await;
        self.inner.create_message(thread_id, message).await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<String>,
    ) -> Result<Run> {
        self.gate("create_run").await;
        self.inner.create_run(thread_id, assistant_id, instructions).await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.gate("get_run").await;
        self.inner.get_run(thread_id, run_id).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.gate("cancel_run").await;
        self.inner.cancel_run(thread_id, run_id).await
    }

    async fn list_messages(&self, thread_id: &str, run_id: Option<String>) -> Result<Vec<Message>> {
        self.gate("list_messages").await;
        self.inner.list_messages(thread_id, run_id).await
    }

    async fn get_file_content(&self, file_id: &str) -> Result<FileContent> {
        self.gate("get_file_content").await;
        self.inner.get_file_content(file_id).await
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        self.gate("get_file_metadata").await;
        self.inner.get_file_metadata(file_id).await
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<FileMetadata> {
        self.gate("upload_file").await;
        self.inner.upload_file(upload).await
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<AssistantInfo> {
        self.gate("get_assistant").await;
        self.inner.get_assistant(assistant_id).await
    }
}
