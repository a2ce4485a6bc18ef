//! Message body decoding: part-tree walk, base64url bodies, snippet and
//! address helpers. Malformed parts are skipped, never fatal — one broken
//! MIME node must not cost the rest of the message.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tracing::debug;

use super::api::MessagePart;

/// Walks the part tree depth-first and concatenates every decodable
/// `text/*` body.
pub fn extract_text(payload: &MessagePart) -> String {
    let mut out = String::new();
    walk(payload, &mut out);
    out
}

fn walk(part: &MessagePart, out: &mut String) {
    if part.mime_type.starts_with("text/") {
        if let Some(data) = &part.body_data {
            match decode_body(data) {
                Some(text) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&text);
                }
                None => debug!(mime_type = %part.mime_type, "skipping undecodable part"),
            }
        }
    }
    for child in &part.parts {
        walk(child, out);
    }
}

/// Gmail emits base64url, sometimes padded; accept both, reject non-UTF-8.
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// First `max_chars` characters, on a char boundary.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Splits an RFC 5322 style `From` value into (display name, address).
/// "Alice Example <alice@example.com>" → (Some("Alice Example"), "alice@example.com")
pub fn parse_address(raw: &str) -> (Option<String>, String) {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>')) {
        if open < close {
            let address = raw[open + 1..close].trim().to_string();
            let name = raw[..open].trim().trim_matches('"').trim();
            let name = if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            };
            return (name, address.to_lowercase());
        }
    }
    (None, raw.to_lowercase())
}
