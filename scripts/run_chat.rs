//! Terminal chat with an OpenAI assistant
//!
//! Settings come from flags, the environment or a `.env` file, in that
//! order of precedence.

use anyhow::{ensure, Context};
use assistline_adaptor_terminal::{TerminalChat, TerminalConfig};
use assistline_core::{init_logging, load_env, load_env_from_path, TurnSettings};
use assistline_provider_openai::OpenAIAssistantApi;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Assistant to chat with (overrides ASSISTANT_ID)
    #[arg(long)]
    assistant_id: Option<String>,

    /// Instructions sent with every run (overrides RUN_INSTRUCTIONS)
    #[arg(long)]
    instructions: Option<String>,

    /// Seconds between run status checks (overrides ASSISTLINE_POLL_INTERVAL_SECS)
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Give up on a run after this many seconds, 0 waits forever
    /// (overrides ASSISTLINE_POLL_TIMEOUT_SECS)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Where files offered by the assistant are saved
    #[arg(long, env = "ASSISTLINE_DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Extra .env file to load
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log filter
    #[arg(long, env = "ASSISTLINE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Hide run status lines
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    /// Environment settings with command-line overrides applied
    fn turn_settings(&self) -> anyhow::Result<TurnSettings> {
        let mut settings = match &self.assistant_id {
            Some(id) => TurnSettings::from_env_for(id.clone())?,
            None => TurnSettings::from_env().context("no assistant given, use --assistant-id")?,
        };
        if let Some(instructions) = &self.instructions {
            let instructions = instructions.trim();
            settings.instructions = (!instructions.is_empty()).then(|| instructions.to_string());
        }
        if let Some(secs) = self.poll_interval_secs {
            ensure!(secs > 0, "--poll-interval-secs must be at least 1");
            settings.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout_secs {
            settings.poll.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env()?;
    let mut cli = Cli::parse();
    if let Some(path) = cli.env_file.clone() {
        load_env_from_path(&path).with_context(|| format!("loading {}", path.display()))?;
        // ASSISTLINE_DOWNLOAD_DIR and ASSISTLINE_LOG_LEVEL may come from the file
        cli = Cli::parse();
    }

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("ASSISTLINE_LOG_LEVEL", &cli.log_level);
    }
    init_logging();

    let settings = cli.turn_settings()?;
    let api = OpenAIAssistantApi::from_env().context("configuring the OpenAI client")?;
    info!(
        "Chatting with assistant {} (poll every {:?}, timeout {:?})",
        settings.assistant_id, settings.poll.interval, settings.poll.timeout
    );

    let chat = TerminalChat::new(
        Arc::new(api),
        settings,
        TerminalConfig {
            download_dir: cli.download_dir.clone(),
            show_progress: !cli.quiet,
        },
    );
    chat.run().await?;
    Ok(())
}
