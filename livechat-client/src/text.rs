//! Text transforms applied to untrusted chat content.
//!
//! [`sanitize`] runs exactly once, when a message is ingested. [`linkify`]
//! runs at render time on the already sanitized body and injects trusted
//! anchor markup around the escaped URL text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?:https?:(?://|&#x2F;&#x2F;))?",
        r"(?:www\.)?",
        r"[-a-zA-Z0-9@:%._~#=]{2,256}\.[a-z]{2,6}\b",
        r"(?:&#x2F;|[-a-zA-Z0-9@:%_.~#?&/=])*",
    ))
    .expect("URL pattern is valid")
});

/// Escapes HTML-significant characters with a fixed map.
///
/// Not idempotent: sanitizing twice double-escapes.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            '`' => escaped.push_str("&grave;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Wraps bare domain-like substrings of sanitized text in anchors that open
/// in a new browsing context. Matches without a scheme get `http://`.
#[must_use]
pub fn linkify(sanitized: &str) -> String {
    URL_PATTERN
        .replace_all(sanitized, |caps: &Captures<'_>| {
            let matched = &caps[0];
            let href = if matched.starts_with("http") {
                matched.to_string()
            } else {
                format!("http://{matched}")
            };
            format!(
                r#"<a href="{href}" class="chat-line__link" target="_blank" rel="noopener noreferrer">{matched}</a>"#
            )
        })
        .into_owned()
}

/// Escapes the characters that would break the quoting of an outbound text
/// frame: backslash first, then double quote.
#[must_use]
pub fn escape_outbound(content: &str) -> String {
    content.replace('\\', "\\\\").replace('"', "\\\"")
}
