//! Message content extraction: annotation footnotes, citation lines, and the
//! `[bytes]…[/bytes]` side channel for binary attachments.

use base64::Engine;
use serde_json::Value;

use crate::error::{AssistantError, Result};
use crate::openai::OpenAiClient;

const BYTES_OPEN: &str = "[bytes]";
const BYTES_CLOSE: &str = "[/bytes]";

/// The user-visible text of an assistant message plus any decoded binary
/// payloads it carried out-of-band.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ExtractedMessage {
    pub(crate) text: String,
    pub(crate) attachments: Vec<Vec<u8>>,
}

/// Flatten a raw message object into displayable text. Annotations become
/// numbered `[i]` footnotes with citation lines appended; `[bytes]` segments
/// are stripped out and decoded.
pub(crate) fn extract_text(client: &OpenAiClient, message: &Value) -> Result<ExtractedMessage> {
    let content = message
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AssistantError::Decode("message has no content array".into()))?;

    let mut text = String::new();
    let mut citations = Vec::new();
    for part in content {
        let Some(body) = part.get("text") else {
            continue; // non-text parts (images) are not surfaced
        };
        let annotations = body
            .get("annotations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let value = body
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| AssistantError::Decode("text part has no value".into()))?;
        let (replaced, mut notes) = apply_annotations(value, &annotations, |file_id| {
            client
                .retrieve_file(file_id)
                .map(|f| f.filename)
                .unwrap_or_else(|_| file_id.to_string())
        });
        text.push_str(&replaced);
        citations.append(&mut notes);
    }
    for line in &citations {
        text.push('\n');
        text.push_str(line);
    }

    let (clean, attachments) = strip_bytes_segments(&text)?;
    Ok(ExtractedMessage {
        text: clean,
        attachments,
    })
}

/// Substitute each annotation's matched text with a ` [i]` marker and build
/// the corresponding citation lines. `resolve` maps a file id to a display
/// name.
pub(crate) fn apply_annotations(
    value: &str,
    annotations: &[Value],
    resolve: impl Fn(&str) -> String,
) -> (String, Vec<String>) {
    let mut text = value.to_string();
    let mut citations = Vec::new();
    for (i, ann) in annotations.iter().enumerate() {
        if let Some(marker) = ann.get("text").and_then(Value::as_str) {
            text = text.replace(marker, &format!(" [{i}]"));
        }
        if let Some(cite) = ann.get("file_citation") {
            let quote = cite.get("quote").and_then(Value::as_str).unwrap_or("");
            let filename = cite
                .get("file_id")
                .and_then(Value::as_str)
                .map(&resolve)
                .unwrap_or_default();
            citations.push(format!("[{i}] {quote} from {filename}"));
        } else if let Some(fp) = ann.get("file_path") {
            let filename = fp
                .get("file_id")
                .and_then(Value::as_str)
                .map(&resolve)
                .unwrap_or_default();
            citations.push(format!("[{i}] Click <here> to download {filename}"));
        }
    }
    (text, citations)
}

/// Remove every `[bytes]…[/bytes]` segment from `text`, returning the
/// remaining text and the decoded payloads in order of appearance.
pub(crate) fn strip_bytes_segments(text: &str) -> Result<(String, Vec<Vec<u8>>)> {
    let mut clean = String::new();
    let mut attachments = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(BYTES_OPEN) {
        clean.push_str(&rest[..open]);
        let after = &rest[open + BYTES_OPEN.len()..];
        let close = after.find(BYTES_CLOSE).ok_or_else(|| {
            AssistantError::Decode("unterminated [bytes] segment".into())
        })?;
        let payload = after[..close].trim();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| AssistantError::Decode(format!("bad base64 in bytes segment: {e}")))?;
        attachments.push(decoded);
        rest = &after[close + BYTES_CLOSE.len()..];
    }
    clean.push_str(rest);
    Ok((clean, attachments))
}

/// Wrap binary data for transport inside a tool output string.
pub(crate) fn encode_bytes(data: &[u8]) -> String {
    format!(
        "{BYTES_OPEN}{}{BYTES_CLOSE}",
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_annotations_footnotes_and_citations() {
        let value = "Weather is mild【0†src】 and dry【1†src】.";
        let annotations = vec![
            json!({
                "text": "【0†src】",
                "file_citation": { "file_id": "file_a", "quote": "mild climate" }
            }),
            json!({
                "text": "【1†src】",
                "file_path": { "file_id": "file_b" }
            }),
        ];
        let (text, notes) = apply_annotations(value, &annotations, |id| format!("{id}.txt"));
        assert_eq!(text, "Weather is mild [0] and dry [1].");
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0], "[0] mild climate from file_a.txt");
        assert_eq!(notes[1], "[1] Click <here> to download file_b.txt");
    }

    #[test]
    fn test_strip_bytes_round_trip() {
        let wrapped = format!("before {} after", encode_bytes(b"\x00\x01binary"));
        let (clean, attachments) = strip_bytes_segments(&wrapped).unwrap();
        assert_eq!(clean, "before  after");
        assert_eq!(attachments, vec![b"\x00\x01binary".to_vec()]);
    }

    #[test]
    fn test_strip_bytes_without_segments_is_identity() {
        let (clean, attachments) = strip_bytes_segments("plain text").unwrap();
        assert_eq!(clean, "plain text");
        assert!(attachments.is_empty());
    }

    #[test]
    fn test_unterminated_bytes_is_decode_error() {
        let err = strip_bytes_segments("x [bytes]aGk=").unwrap_err();
        assert!(matches!(err, AssistantError::Decode(_)));
    }

    #[test]
    fn test_bad_base64_is_decode_error() {
        let err = strip_bytes_segments("[bytes]not!!base64[/bytes]").unwrap_err();
        assert!(matches!(err, AssistantError::Decode(_)));
    }
}
