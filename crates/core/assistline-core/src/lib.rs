//! Assistline Core
//!
//! This crate drives a conversation with a hosted assistant API. It includes:
//!
//! - The [`AssistantApi`] seam every remote call goes through
//! - A cancellable, deadline-bounded run poller
//! - A renderer that turns assistant messages into display text with
//!   numbered citation footnotes and self-contained download links
//! - A per-client [`ChatSession`] holding the thread id and transcript
//!
//! # Example
//!
//! ```no_run
//! use assistline_core::*;
//! use std::sync::Arc;
//!
//! async fn chat(api: Arc<dyn AssistantApi>) -> Result<()> {
//!     let settings = TurnSettings::new("asst_123");
//!     let mut session = ChatSession::new(api, settings);
//!     let reply = session
//!         .submit_turn("Hello", None, &CancellationToken::new())
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod link;
pub mod logger;
pub mod poller;
pub mod render;
pub mod session;
pub mod types;

pub use api::AssistantApi;
pub use config::{get_env_secs, get_optional_env, get_required_env, load_env, load_env_from_path};
pub use error::{AssistlineError, Result};
pub use link::{build_file_link, FileLink};
pub use logger::init_logging;
pub use poller::{PollConfig, RunOutcome, RunPoller, RunProgress};
pub use render::{MessageRenderer, RenderedMessage};
pub use session::{ChatSession, TurnSettings};
pub use tokio_util::sync::CancellationToken;
pub use types::*;

#[cfg(test)]
pub use api::MockAssistantApi;
