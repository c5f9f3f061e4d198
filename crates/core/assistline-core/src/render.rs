//! Turns assistant messages into display text
//!
//! Annotated spans are replaced by footnote markers (`[0]`, `[1]`, ...)
//! numbered in the order the API lists the annotations. Citations become
//! footnote lines under the message body; generated files become
//! self-contained download links.

use crate::api::AssistantApi;
use crate::link::{as_file_fetch, build_file_link};
use crate::types::*;
use crate::Result;
use futures_util::stream::{self, Stream, StreamExt};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Anchor text used when a markdown link has an empty label
const DEFAULT_LINK_LABEL: &str = "Download Link";

static MARKDOWN_LINK: OnceLock<Regex> = OnceLock::new();

fn markdown_link() -> &'static Regex {
    MARKDOWN_LINK.get_or_init(|| {
        Regex::new(r"\[([^\[\]]*)\]\s*\(\s*([^()]*?)\s*\)").expect("valid markdown link pattern")
    })
}

/// Display text for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Remote message id
    pub message_id: String,
    /// Text to show
    pub text: String,
    /// Whether `text` is an error marker instead of the message body
    pub failed: bool,
}

/// Renders messages, fetching referenced files through the API
pub struct MessageRenderer<'a, A: ?Sized> {
    api: &'a A,
}

impl<'a, A> MessageRenderer<'a, A>
where
    A: AssistantApi + ?Sized,
{
    /// Create a renderer over `api`
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Lazily render `messages`, one item per message, keeping their order
    ///
    /// A message whose files cannot be fetched yields an error marker; the
    /// remaining messages are still rendered.
    pub fn render_all<'m>(
        &'m self,
        messages: &'m [Message],
    ) -> impl Stream<Item = RenderedMessage> + 'm
    where
        'a: 'm,
        A: 'm,
    {
        stream::iter(messages).then(move |message| self.render_or_mark(message))
    }

    async fn render_or_mark(&self, message: &Message) -> RenderedMessage {
        match self.render_message(message).await {
            Ok(text) => RenderedMessage {
                message_id: message.id.clone(),
                text,
                failed: false,
            },
            Err(e) => {
                warn!("Failed to render message {}: {}", message.id, e);
                RenderedMessage {
                    message_id: message.id.clone(),
                    text: format!("⚠️ Could not render message {}: {}", message.id, e),
                    failed: true,
                }
            }
        }
    }

    /// Render a single message
    pub async fn render_message(&self, message: &Message) -> Result<String> {
        let mut blocks = Vec::with_capacity(message.content.len());
        let mut footnotes = Vec::new();
        let mut next_index = 0;

        for block in &message.content {
            match block {
                MessageContent::Text(text) => {
                    blocks.push(self.render_text(text, next_index, &mut footnotes).await?);
                    next_index += text.annotations.len();
                }
                MessageContent::ImageFile { file_id } => {
                    blocks.push(self.render_image(file_id).await?);
                }
                MessageContent::Unsupported { kind } => {
                    debug!("Skipping {} block in message {}", kind, message.id);
                }
            }
        }

        let mut out = blocks.join("\n\n");
        if !footnotes.is_empty() {
            out.push_str("\n\n");
            out.push_str(&footnotes.join("\n"));
        }
        Ok(out)
    }

    async fn render_image(&self, file_id: &str) -> Result<String> {
        let file = self
            .api
            .get_file_metadata(file_id)
            .await
            .map_err(|e| as_file_fetch(file_id, e))?;
        let link = build_file_link(self.api, &file.filename, file_id).await?;
        Ok(format!(
            "Click {} to download {}",
            link.to_html("here"),
            file.filename
        ))
    }

    async fn render_text(
        &self,
        text: &TextContent,
        first_index: usize,
        footnotes: &mut Vec<String>,
    ) -> Result<String> {
        if text.annotations.is_empty() {
            return Ok(text.value.clone());
        }

        let value = text.value.as_str();
        let mut claimed: Vec<Range<usize>> = Vec::new();
        let mut edits = Vec::new();

        for (offset, annotation) in text.annotations.iter().enumerate() {
            let marker = format!("[{}]", first_index + offset);
            let span = locate_span(value, annotation, &claimed);
            match &span {
                Some(range) => claimed.push(range.clone()),
                None => debug!("Annotation {} not found in message text", marker),
            }

            match &annotation.kind {
                AnnotationKind::FileCitation { file_id, quote } => {
                    let source = self
                        .api
                        .get_file_metadata(file_id)
                        .await
                        .map_err(|e| as_file_fetch(file_id, e))?;
                    let quote = quote.as_deref().map(str::trim).filter(|q| !q.is_empty());
                    footnotes.push(match quote {
                        Some(quote) => format!("{} {} from {}", marker, quote, source.filename),
                        None => format!("{} from {}", marker, source.filename),
                    });
                    if let Some(range) = span {
                        edits.push(Edit::new(range, marker));
                    }
                }
                AnnotationKind::FilePath { file_id } => {
                    let name = download_name(&annotation.text, file_id);
                    let link = build_file_link(self.api, &name, file_id).await?;
                    match span
                        .as_ref()
                        .and_then(|range| enclosing_markdown_link(value, range))
                    {
                        Some((range, label)) => edits.push(Edit::new(range, link.to_html(label))),
                        None => {
                            if let Some(range) = span {
                                edits.push(Edit::new(range, marker.clone()));
                            }
                            footnotes.push(format!("{} {}", marker, link.to_html(&name)));
                        }
                    }
                }
            }
        }

        Ok(apply_edits(value, edits))
    }
}

/// A replacement of a byte range of the source text
#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    replacement: String,
}

impl Edit {
    fn new(range: Range<usize>, replacement: String) -> Self {
        Self { range, replacement }
    }
}

/// Find the byte range an annotation covers
///
/// Prefers the reported character offsets; falls back to the first
/// occurrence of the annotation text not already claimed by another
/// annotation.
fn locate_span(value: &str, annotation: &Annotation, claimed: &[Range<usize>]) -> Option<Range<usize>> {
    if annotation.text.is_empty() {
        return None;
    }
    if let Some(range) = char_to_byte_range(value, annotation.start_index, annotation.end_index) {
        if value[range.clone()] == *annotation.text && !overlaps_any(claimed, &range) {
            return Some(range);
        }
    }
    value
        .match_indices(annotation.text.as_str())
        .map(|(start, found)| start..start + found.len())
        .find(|range| !overlaps_any(claimed, range))
}

fn char_to_byte_range(value: &str, start: usize, end: usize) -> Option<Range<usize>> {
    if start >= end {
        return None;
    }
    let mut boundaries = value
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(value.len()));
    let byte_start = boundaries.nth(start)?;
    let byte_end = boundaries.nth(end - start - 1)?;
    Some(byte_start..byte_end)
}

fn overlaps_any(claimed: &[Range<usize>], range: &Range<usize>) -> bool {
    claimed
        .iter()
        .any(|other| range.start < other.end && other.start < range.end)
}

/// Markdown link `[label](target)` whose target contains `span`
fn enclosing_markdown_link<'v>(value: &'v str, span: &Range<usize>) -> Option<(Range<usize>, &'v str)> {
    markdown_link().captures_iter(value).find_map(|caps| {
        let whole = caps.get(0)?;
        let target = caps.get(2)?;
        if target.start() <= span.start && span.end <= target.end() {
            let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let label = if label.is_empty() { DEFAULT_LINK_LABEL } else { label };
            Some((whole.range(), label))
        } else {
            None
        }
    })
}

/// Last path segment of a sandbox path, or the file id
fn download_name(annotation_text: &str, file_id: &str) -> String {
    annotation_text
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(file_id)
        .to_string()
}

/// Apply non-overlapping edits; on overlap the edit starting first wins
fn apply_edits(value: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|edit| edit.range.start);
    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.range.start < cursor {
            debug!("Dropping overlapping edit at {:?}", edit.range);
            continue;
        }
        out.push_str(&value[cursor..edit.range.start]);
        out.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    out.push_str(&value[cursor..]);
    out
}
