//! Per-client conversation state and the submit-turn pipeline

use crate::api::AssistantApi;
use crate::config::{get_env_secs, get_optional_env, get_required_env};
use crate::poller::{PollConfig, RunOutcome, RunPoller, RunProgress};
use crate::render::MessageRenderer;
use crate::types::*;
use crate::{AssistlineError, Result};
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shown when a completed run produced no messages
const EMPTY_REPLY: &str = "(The assistant did not return a message.)";

/// What every turn of a session runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSettings {
    /// Assistant to run
    pub assistant_id: String,
    /// Per-run instructions override
    pub instructions: Option<String>,
    /// Polling cadence and deadline
    pub poll: PollConfig,
}

impl TurnSettings {
    /// Settings with default polling and no instructions
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            instructions: None,
            poll: PollConfig::default(),
        }
    }

    /// Read settings from the environment
    ///
    /// `ASSISTANT_ID` is required; see [`TurnSettings::from_env_for`] for
    /// the optional variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_for(get_required_env("ASSISTANT_ID")?)
    }

    /// Settings for `assistant_id` with the optional variables applied
    ///
    /// `RUN_INSTRUCTIONS` (blank means none), `ASSISTLINE_POLL_INTERVAL_SECS`
    /// and `ASSISTLINE_POLL_TIMEOUT_SECS` (`0` disables the deadline).
    pub fn from_env_for(assistant_id: impl Into<String>) -> Result<Self> {
        let defaults = PollConfig::default();
        let interval_secs =
            get_env_secs("ASSISTLINE_POLL_INTERVAL_SECS", defaults.interval.as_secs())?;
        let timeout_secs = get_env_secs(
            "ASSISTLINE_POLL_TIMEOUT_SECS",
            defaults.timeout.map(|t| t.as_secs()).unwrap_or(0),
        )?;
        if interval_secs == 0 {
            return Err(AssistlineError::config(
                "ASSISTLINE_POLL_INTERVAL_SECS must be at least 1",
            ));
        }

        Ok(Self {
            assistant_id: assistant_id.into(),
            instructions: get_optional_env("RUN_INSTRUCTIONS"),
            poll: PollConfig {
                interval: Duration::from_secs(interval_secs),
                timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            },
        })
    }
}

/// One client's conversation: remote thread id plus the displayed transcript
pub struct ChatSession {
    api: Arc<dyn AssistantApi>,
    settings: TurnSettings,
    thread_id: Option<String>,
    transcript: Vec<TranscriptEntry>,
    progress: Option<mpsc::UnboundedSender<RunProgress>>,
}

impl ChatSession {
    /// Start an empty session
    pub fn new(api: Arc<dyn AssistantApi>, settings: TurnSettings) -> Self {
        Self {
            api,
            settings,
            thread_id: None,
            transcript: Vec::new(),
            progress: None,
        }
    }

    /// Forward run progress of every turn to `tx`
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<RunProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Remote thread, once the first turn created it
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Displayed turns, oldest first
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Settings every turn runs with
    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Forget the thread and the transcript
    pub fn reset(&mut self) {
        info!("Resetting session (thread {:?})", self.thread_id);
        self.thread_id = None;
        self.transcript.clear();
    }

    /// Send `user_text` (and an optional file) and wait for the reply
    ///
    /// Always appends two transcript entries: the user text and either the
    /// rendered reply or a description of what went wrong. A failed run is
    /// not an error; its notice becomes the reply. Remote errors, timeouts
    /// and cancellation are returned after being recorded.
    pub async fn submit_turn(
        &mut self,
        user_text: &str,
        file: Option<FileUpload>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.push(Speaker::User, user_text.to_string());

        match self.run_turn(user_text, file, cancel).await {
            Ok(reply) => {
                self.push(Speaker::Assistant, reply.clone());
                Ok(reply)
            }
            Err(e) => {
                warn!("Turn failed: {}", e);
                self.push(Speaker::Assistant, format!("⚠️ {}", e));
                Err(e)
            }
        }
    }

    async fn run_turn(
        &mut self,
        user_text: &str,
        file: Option<FileUpload>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let api = Arc::clone(&self.api);

        let mut attachments = Vec::new();
        if let Some(upload) = file {
            let uploaded = cancellable(cancel, "upload", api.upload_file(upload)).await?;
            info!("Uploaded {} as {}", uploaded.filename, uploaded.id);
            attachments.push(Attachment::for_file(&uploaded));
        }
        let message = NewMessage::user(user_text).with_attachments(attachments);

        let thread_id = match &self.thread_id {
            Some(thread_id) => {
                cancellable(cancel, "message", api.create_message(thread_id, message)).await?;
                thread_id.clone()
            }
            None => {
                let thread_id =
                    cancellable(cancel, "thread", api.create_thread(vec![message])).await?;
                info!("Created thread {}", thread_id);
                self.thread_id = Some(thread_id.clone());
                thread_id
            }
        };

        let start = api.create_run(
            &thread_id,
            &self.settings.assistant_id,
            self.settings.instructions.clone(),
        );
        let run = cancellable(cancel, "run start", start).await?;
        debug!("Started run {} on thread {}", run.id, thread_id);

        let mut poller = RunPoller::new(api.as_ref(), self.settings.poll.clone());
        if let Some(tx) = &self.progress {
            poller = poller.with_progress(tx.clone());
        }
        let outcome = match poller.wait(&thread_id, &run.id, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_abandoned_run() {
                    cancel_remote_run(api.as_ref(), &thread_id, &run.id).await;
                }
                return Err(e);
            }
        };

        let listing = api.list_messages(&thread_id, Some(run.id.clone()));
        let messages = cancellable(cancel, "message listing", listing).await?;
        let renderer = MessageRenderer::new(api.as_ref());
        let rendering = async {
            let rendered: Vec<String> = renderer
                .render_all(&messages)
                .map(|message| message.text)
                .filter(|text| futures_util::future::ready(!text.is_empty()))
                .collect()
                .await;
            Ok(rendered)
        };
        let rendered = cancellable(cancel, "rendering", rendering).await?;

        Ok(compose_reply(outcome, rendered))
    }

    fn push(&mut self, speaker: Speaker, text: String) {
        self.transcript.push(TranscriptEntry { speaker, text });
    }
}

/// Run `step` unless `cancel` fires first
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(AssistlineError::cancelled(format!("turn stopped during {step}")))
        }
        result = fut => result,
    }
}

/// Best-effort stop of a run nobody is waiting for any more
async fn cancel_remote_run(api: &dyn AssistantApi, thread_id: &str, run_id: &str) {
    match api.cancel_run(thread_id, run_id).await {
        Ok(run) => info!("Requested cancellation of run {} ({})", run_id, run.status),
        Err(e) => warn!("Could not cancel run {}: {}", run_id, e),
    }
}

fn compose_reply(outcome: RunOutcome, rendered: Vec<String>) -> String {
    let body = rendered.join("\n\n");
    match outcome.into_result() {
        Ok(_) if body.is_empty() => EMPTY_REPLY.to_string(),
        Ok(_) => body,
        Err(failure) if body.is_empty() => format!("⚠️ {}", failure),
        Err(failure) => format!("⚠️ {}\n\n{}", failure, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockAssistantApi, StallingApi};
    use mockall::Sequence;

    fn settings() -> TurnSettings {
        TurnSettings {
            assistant_id: "asst_1".to_string(),
            instructions: Some("Be brief.".to_string()),
            poll: PollConfig {
                interval: Duration::from_millis(1),
                timeout: Some(Duration::from_secs(5)),
            },
        }
    }

    fn reply(text: &str) -> Message {
        Message {
            id: "msg_reply".to_string(),
            role: Role::Assistant,
            run_id: Some("run_1".to_string()),
            content: vec![MessageContent::Text(TextContent::plain(text))],
        }
    }

    fn expect_run(api: &mut MockAssistantApi, final_status: RunStatus) {
        api.expect_create_run()
            .withf(|thread_id, assistant_id, instructions| {
                thread_id == "thread_1"
                    && assistant_id == "asst_1"
                    && instructions.as_deref() == Some("Be brief.")
            })
            .returning(|t, _, _| Ok(Run::new("run_1", t, RunStatus::Queued)));
        api.expect_get_run()
            .returning(move |t, r| Ok(Run::new(r, t, final_status)));
    }

    #[tokio::test]
    async fn test_first_turn_creates_thread() {
        let mut api = MockAssistantApi::new();
        let mut seq = Sequence::new();
        api.expect_create_thread()
            .withf(|initial| initial.len() == 1 && initial[0].content == "Hello")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("thread_1".to_string()));
        api.expect_create_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|t, _, _| Ok(Run::new("run_1", t, RunStatus::Queued)));
        api.expect_get_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|t, r| Ok(Run::new(r, t, RunStatus::Completed)));
        api.expect_list_messages()
            .withf(|thread_id, run_id| thread_id == "thread_1" && run_id.as_deref() == Some("run_1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![reply("Hi there!")]));
        api.expect_create_message().never();

        let mut session = ChatSession::new(Arc::new(api), settings());
        let text = session
            .submit_turn("Hello", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Hi there!");
        assert_eq!(session.thread_id(), Some("thread_1"));
        assert_eq!(
            session.transcript(),
            &[
                TranscriptEntry {
                    speaker: Speaker::User,
                    text: "Hello".to_string()
                },
                TranscriptEntry {
                    speaker: Speaker::Assistant,
                    text: "Hi there!".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_later_turns_reuse_thread() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread()
            .times(1)
            .returning(|_| Ok("thread_1".to_string()));
        api.expect_create_message()
            .withf(|thread_id, message| thread_id == "thread_1" && message.content == "And now?")
            .times(1)
            .returning(|_, _| Ok(()));
        expect_run(&mut api, RunStatus::Completed);
        api.expect_list_messages()
            .returning(|_, _| Ok(vec![reply("Answer")]));

        let mut session = ChatSession::new(Arc::new(api), settings());
        let cancel = CancellationToken::new();
        session.submit_turn("Hello", None, &cancel).await.unwrap();
        session.submit_turn("And now?", None, &cancel).await.unwrap();

        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_run_becomes_failure_entry() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread()
            .returning(|_| Ok("thread_1".to_string()));
        api.expect_create_run()
            .returning(|t, _, _| Ok(Run::new("run_1", t, RunStatus::Queued)));
        api.expect_get_run().returning(|t, r| {
            let mut run = Run::new(r, t, RunStatus::Failed);
            run.last_error = Some("Rate limit reached".to_string());
            Ok(run)
        });
        api.expect_list_messages().returning(|_, _| Ok(vec![]));

        let mut session = ChatSession::new(Arc::new(api), settings());
        let text = session
            .submit_turn("Hello", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(text.starts_with("⚠️ Run run_1 ended with status 'failed'"));
        assert!(text.contains("Rate limit reached"));
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[1].text, text);
    }

    #[tokio::test]
    async fn test_remote_error_is_recorded_and_returned() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread()
            .returning(|_| Err(AssistlineError::remote("401 invalid api key")));

        let mut session = ChatSession::new(Arc::new(api), settings());
        let err = session
            .submit_turn("Hello", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistlineError::Remote(_)));
        assert_eq!(session.thread_id(), None);
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].speaker, Speaker::Assistant);
        assert!(transcript[1].text.contains("401 invalid api key"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_remote_run() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread()
            .returning(|_| Ok("thread_1".to_string()));
        expect_run(&mut api, RunStatus::InProgress);
        api.expect_cancel_run()
            .withf(|t, r| t == "thread_1" && r == "run_1")
            .times(1)
            .returning(|t, r| Ok(Run::new(r, t, RunStatus::Cancelling)));
        api.expect_list_messages().never();

        let mut settings = settings();
        settings.poll.timeout = Some(Duration::from_millis(20));
        let mut session = ChatSession::new(Arc::new(api), settings);
        let err = session
            .submit_turn("Hello", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistlineError::Timeout(_)));
        assert!(session.transcript()[1].text.starts_with("⚠️ Timeout"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_turn_before_any_call() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread().never();
        api.expect_create_run().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = ChatSession::new(Arc::new(api), settings());
        let err = session.submit_turn("Hello", None, &cancel).await.unwrap_err();

        assert!(matches!(err, AssistlineError::Cancelled(_)));
        assert_eq!(session.thread_id(), None);
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_polling_cancels_remote_run() {
        let mut api = MockAssistantApi::new();
        api.expect_create_thread()
            .returning(|_| Ok("thread_1".to_string()));
        expect_run(&mut api, RunStatus::Queued);
        api.expect_cancel_run()
            .times(1)
            .returning(|_, _| Err(AssistlineError::remote("already finished")));
        api.expect_list_messages().never();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut session = ChatSession::new(Arc::new(api), settings());
        let err = session.submit_turn("Hello", None, &cancel).await.unwrap_err();

        assert!(matches!(err, AssistlineError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_listing_messages() {
        let mut inner = MockAssistantApi::new();
        inner
            .expect_create_thread()
            .returning(|_| Ok("thread_1".to_string()));
        expect_run(&mut inner, RunStatus::Completed);
        let api = StallingApi {
            inner,
            stall: "list_messages",
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut session = ChatSession::new(Arc::new(api), settings());
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            session.submit_turn("Hello", None, &cancel),
        )
        .await
        .expect("cancelling must end the turn");

        let err = result.unwrap_err();
        assert!(matches!(err, AssistlineError::Cancelled(_)));
        assert!(err.to_string().contains("message listing"));
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_is_attached_to_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let mut api = MockAssistantApi::new();
        api.expect_upload_file()
            .withf(|upload| upload.file_name() == "report.pdf")
            .times(1)
            .returning(|upload| {
                Ok(FileMetadata {
                    id: "file-up".to_string(),
                    filename: upload.file_name(),
                    bytes: 8,
                })
            });
        api.expect_create_thread()
            .withf(|initial| {
                initial[0].attachments
                    == vec![Attachment {
                        file_id: "file-up".to_string(),
                        tools: vec![AttachmentTool::FileSearch, AttachmentTool::CodeInterpreter],
                    }]
            })
            .returning(|_| Ok("thread_1".to_string()));
        expect_run(&mut api, RunStatus::Completed);
        api.expect_list_messages().returning(|_, _| Ok(vec![]));

        let upload = FileUpload::from_path(&path).unwrap();
        let mut session = ChatSession::new(Arc::new(api), settings());
        let text = session
            .submit_turn("Summarise this", Some(upload), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, EMPTY_REPLY);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut session = ChatSession::new(Arc::new(MockAssistantApi::new()), settings());
        session.thread_id = Some("thread_1".to_string());
        session.push(Speaker::User, "hi".to_string());

        session.reset();
        assert_eq!(session.thread_id(), None);
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_settings_from_env() {
        std::env::set_var("ASSISTANT_ID", "asst_env");
        std::env::set_var("RUN_INSTRUCTIONS", "  ");
        std::env::set_var("ASSISTLINE_POLL_INTERVAL_SECS", "2");
        std::env::set_var("ASSISTLINE_POLL_TIMEOUT_SECS", "0");

        let settings = TurnSettings::from_env().unwrap();
        assert_eq!(settings.assistant_id, "asst_env");
        assert_eq!(settings.instructions, None);
        assert_eq!(settings.poll.interval, Duration::from_secs(2));
        assert_eq!(settings.poll.timeout, None);

        for key in [
            "ASSISTANT_ID",
            "RUN_INSTRUCTIONS",
            "ASSISTLINE_POLL_INTERVAL_SECS",
            "ASSISTLINE_POLL_TIMEOUT_SECS",
        ] {
            std::env::remove_var(key);
        }
    }
}
