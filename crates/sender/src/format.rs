//! Outbound message formatting. Plain text only; the mirrored content is
//! untrusted and must never be interpreted as markup.

use mirrelay_common::types::OutboundMessage;

/// Render the delivery text for one queued message.
///
/// Layout: an optional `#source` tag line, then `author: text`. Deterministic
/// for a given message, so a redelivery after a crash looks identical.
#[must_use]
pub fn format_message(message: &OutboundMessage, source_name: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(name) = source_name {
        let tag: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !tag.is_empty() {
            out.push('#');
            out.push_str(&tag);
            out.push('\n');
        }
    }

    let text = message.text.trim();
    if message.author.is_empty() {
        if text.is_empty() {
            out.push_str("Attachment");
        } else {
            out.push_str(text);
        }
    } else if text.is_empty() {
        out.push_str(&message.author);
        out.push_str(" sent an attachment");
    } else {
        out.push_str(&message.author);
        out.push_str(": ");
        out.push_str(text);
    }
    out
}

/// Whether an attachment URL looks like an inline-renderable image, which
/// picks `sendPhoto` over `sendDocument`.
#[must_use]
pub fn is_image_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use mirrelay_common::types::{Fingerprint, MessageStatus};

    use super::*;

    fn message(author: &str, text: &str) -> OutboundMessage {
        OutboundMessage {
            id: "m1".into(),
            source_id: "s1".into(),
            fingerprint: Fingerprint("ab".repeat(16)),
            author: author.into(),
            text: text.into(),
            attachments: vec![],
            status: MessageStatus::Pending,
            error: None,
        }
    }

    #[test]
    fn tags_source_and_prefixes_author() {
        let text = format_message(&message("alice", "hello"), Some("general"));
        assert_eq!(text, "#general\nalice: hello");
    }

    #[test]
    fn source_tag_drops_unsafe_characters() {
        let text = format_message(&message("alice", "hi"), Some("dev chat!"));
        assert_eq!(text, "#devchat\nalice: hi");
    }

    #[test]
    fn no_source_name_means_no_tag_line() {
        assert_eq!(format_message(&message("alice", "hi"), None), "alice: hi");
    }

    #[test]
    fn attachment_only_message_names_the_author() {
        let text = format_message(&message("alice", "  "), Some("general"));
        assert_eq!(text, "#general\nalice sent an attachment");
    }

    #[test]
    fn image_extension_detection_ignores_query_strings() {
        assert!(is_image_url("https://cdn.example.com/a/b.PNG"));
        assert!(is_image_url("https://cdn.example.com/a/b.jpg?ex=123&hm=ab"));
        assert!(!is_image_url("https://cdn.example.com/a/report.pdf"));
        assert!(!is_image_url("https://cdn.example.com/a/clip.mp4?f=.png"));
    }
}
