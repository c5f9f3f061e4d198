//! Interactive terminal chat over an [`AssistantApi`]
//!
//! Reads one user turn per line from stdin, prints run progress while the
//! assistant works and saves any inline file links to a download directory.

#![warn(missing_docs)]

use assistline_core::{
    AssistantApi, AssistantInfo, AssistlineError, CancellationToken, ChatSession, FileUpload,
    Result, RunProgress, TurnSettings,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Highest ` (n)` suffix tried before giving up on a download name
const MAX_NAME_SUFFIX: u32 = 999;

/// Title used when the assistant has no name
pub const DEFAULT_TITLE: &str = "Assistants API UI";

/// Terminal chat options
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Where inline file links are saved
    pub download_dir: PathBuf,
    /// Print a line for every run status check
    pub show_progress: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            show_progress: true,
        }
    }
}

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    /// Text to send to the assistant
    Say(String),
    /// `/attach <path>`: file for the next message
    Attach(String),
    /// `/history`
    History,
    /// `/reset`
    Reset,
    /// `/quit` or `/exit`
    Quit,
    /// Unrecognised slash command
    Unknown(String),
}

/// Parse one line of input
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Say(line.to_string());
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    match name {
        "/attach" if !rest.is_empty() => Command::Attach(rest.to_string()),
        "/history" => Command::History,
        "/reset" => Command::Reset,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Pick the window title from the assistant details
pub fn title_for(info: Result<AssistantInfo>) -> String {
    match info {
        Ok(AssistantInfo {
            name: Some(name), ..
        }) if !name.trim().is_empty() => name.trim().to_string(),
        Ok(_) => DEFAULT_TITLE.to_string(),
        Err(e) => {
            warn!("Could not fetch assistant details: {}", e);
            DEFAULT_TITLE.to_string()
        }
    }
}

/// One-line description of a progress report
pub fn format_progress(progress: &RunProgress) -> String {
    format!(
        "... {} (check {}, {:.1}s)",
        progress.status.as_str().replace('_', " "),
        progress.attempt,
        progress.elapsed.as_secs_f32()
    )
}

fn data_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<a href="data:[^;"]*;base64,([A-Za-z0-9+/=]*)" download="([^"]*)">([^<]*)</a>"#)
            .expect("data link pattern is valid")
    })
}

/// Replace inline data links with files saved under `download_dir`
///
/// Each link becomes `label (saved to <path>)`, or
/// `label (could not save: <error>)` when the file cannot be written.
/// Links whose payload does not decode are left as they are.
pub fn present(text: &str, download_dir: &Path) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in data_link_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        let name = unescape_html(&caps[2]);
        let label = unescape_html(&caps[3]);
        let bytes = match BASE64.decode(&caps[1]) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Leaving undecodable link for {}: {}", name, e);
                out.push_str(whole.as_str());
                continue;
            }
        };
        match save_download(download_dir, &name, &bytes) {
            Ok(path) => out.push_str(&format!("{} (saved to {})", label, path.display())),
            Err(e) => {
                warn!("Could not save {} under {}: {}", name, download_dir.display(), e);
                out.push_str(&format!("{} (could not save: {})", label, e));
            }
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Write `bytes` under `dir`, keeping only the final component of `name`
///
/// An existing file with other contents is kept; the new one gets a
/// ` (n)` suffix. Identical contents reuse the existing file.
fn save_download(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    std::fs::create_dir_all(dir)?;

    for candidate in candidate_names(&file_name) {
        let path = dir.join(candidate);
        match std::fs::read(&path) {
            Ok(existing) if existing == bytes => {
                debug!("{} already saved", path.display());
                return Ok(path);
            }
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&path, bytes)?;
                debug!("Saved {} bytes to {}", bytes.len(), path.display());
                return Ok(path);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AssistlineError::validation(format!(
        "no free file name for {file_name}"
    )))
}

/// `name`, then `stem (1).ext`, `stem (2).ext`, ...
fn candidate_names(name: &str) -> impl Iterator<Item = String> {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    std::iter::once(name.to_string()).chain((1..=MAX_NAME_SUFFIX).map(move |n| match &extension {
        Some(ext) => format!("{stem} ({n}).{ext}"),
        None => format!("{stem} ({n})"),
    }))
}

fn unescape_html(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Line-oriented chat loop bound to stdin and stdout
pub struct TerminalChat {
    api: Arc<dyn AssistantApi>,
    settings: TurnSettings,
    config: TerminalConfig,
}

impl TerminalChat {
    /// Create a chat for one assistant
    pub fn new(api: Arc<dyn AssistantApi>, settings: TurnSettings, config: TerminalConfig) -> Self {
        Self {
            api,
            settings,
            config,
        }
    }

    /// Assistant name, or [`DEFAULT_TITLE`]
    pub async fn title(&self) -> String {
        title_for(self.api.get_assistant(&self.settings.assistant_id).await)
    }

    /// Run until `/quit`, end of input or Ctrl-C at the prompt
    pub async fn run(&self) -> Result<()> {
        let title = self.title().await;
        println!("{}", title);
        println!("{}", "=".repeat(title.chars().count().max(20)));
        println!("Commands: /attach <path>, /history, /reset, /quit. Ctrl-C stops a running turn.\n");

        let (tx, rx) = mpsc::unbounded_channel();
        let progress_task = self.spawn_progress_printer(rx);
        let mut session = ChatSession::new(Arc::clone(&self.api), self.settings.clone())
            .with_progress(tx);
        let mut pending: Option<FileUpload> = None;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            prompt(pending.as_ref());
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::Reset => {
                    session.reset();
                    pending = None;
                    println!("Started a new conversation.");
                }
                Command::History => self.print_history(&session),
                Command::Attach(path) => match FileUpload::from_path(path) {
                    Ok(upload) => {
                        println!("Will attach {} to the next message.", upload.file_name());
                        pending = Some(upload);
                    }
                    Err(e) => println!("⚠️ {}", e),
                },
                Command::Unknown(text) => println!("Unknown command: {}", text),
                Command::Say(text) => {
                    let cancel = CancellationToken::new();
                    let interrupt = watch_interrupt(cancel.clone());
                    let result = session.submit_turn(&text, pending.take(), &cancel).await;
                    interrupt.abort();

                    match result {
                        Ok(reply) => println!("\n{}\n", present(&reply, &self.config.download_dir)),
                        Err(e) => println!("\n⚠️ {}\n", e),
                    }
                }
            }
        }

        drop(session);
        let _ = progress_task.await;
        println!("Goodbye.");
        Ok(())
    }

    fn spawn_progress_printer(&self, mut rx: mpsc::UnboundedReceiver<RunProgress>) -> JoinHandle<()> {
        let show = self.config.show_progress;
        tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if show {
                    println!("{}", format_progress(&progress));
                }
            }
        })
    }

    fn print_history(&self, session: &ChatSession) {
        if session.transcript().is_empty() {
            println!("No messages yet.");
            return;
        }
        for entry in session.transcript() {
            println!(
                "[{}] {}",
                entry.speaker,
                present(&entry.text, &self.config.download_dir)
            );
        }
    }
}

fn prompt(pending: Option<&FileUpload>) {
    match pending {
        Some(upload) => print!("[{}] > ", upload.file_name()),
        None => print!("> "),
    }
    let _ = std::io::stdout().flush();
}

/// Cancel `token` on Ctrl-C until the returned task is aborted
fn watch_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping...");
            token.cancel();
        }
    })
}
