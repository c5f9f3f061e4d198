//! Self-contained download links for files held by the assistant service

use crate::api::AssistantApi;
use crate::types::FileContent;
use crate::{AssistlineError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

/// Fallback when the service does not report a content type
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A download link with the file body embedded as base64
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    file_name: String,
    content_type: String,
    payload: String,
}

impl FileLink {
    /// Encode downloaded content under the given display name
    pub fn new(file_name: impl Into<String>, content: &FileContent) -> Self {
        let content_type = content.content_type.trim();
        Self {
            file_name: file_name.into(),
            content_type: if content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                content_type.to_string()
            },
            payload: BASE64.encode(&content.data),
        }
    }

    /// Suggested download name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Content type embedded in the link
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// `data:` URL carrying the whole file
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.payload)
    }

    /// Anchor markup with `label` as the visible text
    pub fn to_html(&self, label: &str) -> String {
        format!(
            "<a href=\"{}\" download=\"{}\">{}</a>",
            escape_html(&self.data_url()),
            escape_html(&self.file_name),
            escape_html(label)
        )
    }

    /// Decode the embedded payload
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.payload).map_err(|e| {
            AssistlineError::validation(format!("invalid base64 payload for {}: {}", self.file_name, e))
        })
    }
}

/// Fetch `file_id` and wrap it into a [`FileLink`] named `file_name`
///
/// Every failure is reported as [`AssistlineError::FileFetch`].
pub async fn build_file_link<A>(api: &A, file_name: &str, file_id: &str) -> Result<FileLink>
where
    A: AssistantApi + ?Sized,
{
    let content = api
        .get_file_content(file_id)
        .await
        .map_err(|e| as_file_fetch(file_id, e))?;
    debug!(
        "Fetched {} bytes ({}) for file {}",
        content.data.len(),
        content.content_type,
        file_id
    );
    Ok(FileLink::new(file_name, &content))
}

/// Re-tag a remote failure as a fetch failure for `file_id`
pub(crate) fn as_file_fetch(file_id: &str, err: AssistlineError) -> AssistlineError {
    match err {
        AssistlineError::FileFetch { .. } => err,
        other => AssistlineError::file_fetch(file_id, other.to_string()),
    }
}

/// Escape text for use inside HTML attributes and bodies
pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockAssistantApi;
    use bytes::Bytes;

    fn content(data: &'static [u8], content_type: &str) -> FileContent {
        FileContent {
            data: Bytes::from_static(data),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_payload_decodes_to_original_bytes() {
        let raw: &'static [u8] = b"col_a,col_b\n1,2\n\xff\x00binary tail";
        let link = FileLink::new("data.csv", &content(raw, "text/csv"));

        assert_eq!(link.decode_payload().unwrap(), raw.to_vec());
        assert!(link.data_url().starts_with("data:text/csv;base64,"));
    }

    #[test]
    fn test_html_markup_is_escaped() {
        let link = FileLink::new("q\"3\".csv", &content(b"x", "text/csv"));
        let html = link.to_html("<report>");

        assert!(html.starts_with("<a href=\"data:text/csv;base64,eA==\""));
        assert!(html.contains("download=\"q&quot;3&quot;.csv\""));
        assert!(html.ends_with(">&lt;report&gt;</a>"));
    }

    #[test]
    fn test_missing_content_type_defaults() {
        let link = FileLink::new("blob", &content(b"x", " "));
        assert_eq!(link.content_type(), DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_build_file_link_fetches_content() {
        let mut api = MockAssistantApi::new();
        api.expect_get_file_content()
            .withf(|id| id == "file-7")
            .times(1)
            .returning(|_| Ok(content(b"hello", "text/plain")));

        let link = build_file_link(&api, "hello.txt", "file-7").await.unwrap();
        assert_eq!(link.file_name(), "hello.txt");
        assert_eq!(link.decode_payload().unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_build_file_link_reports_fetch_errors() {
        let mut api = MockAssistantApi::new();
        api.expect_get_file_content()
            .returning(|_| Err(AssistlineError::remote("404 No such File object")));

        let err = build_file_link(&api, "gone.txt", "file-404").await.unwrap_err();
        match err {
            AssistlineError::FileFetch { file_id, message } => {
                assert_eq!(file_id, "file-404");
                assert!(message.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
