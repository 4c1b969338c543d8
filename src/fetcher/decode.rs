use encoding_rs::Encoding;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s;]+)"#).unwrap());

/// Subscription bodies are mostly ASCII; sniffing more than this adds nothing.
const SNIFF_LEN: usize = 4096;

/// Decodes a body to UTF-8 and reports the encoding it was read as.
/// Never fails: malformed sequences become U+FFFD.
pub fn decode_body(content_type: Option<&str>, body_bytes: &[u8]) -> (String, &'static Encoding) {
    let encoding = detect_encoding(content_type, body_bytes);
    let (decoded, _encoding, had_errors) = encoding.decode(body_bytes);

    if had_errors {
        debug!(encoding = encoding.name(), "body contained malformed sequences");
    }

    (decoded.into_owned(), encoding)
}

fn detect_encoding(content_type: Option<&str>, body_bytes: &[u8]) -> &'static Encoding {
    // 1. Check Content-Type header for charset
    if let Some(content_type) = content_type
        && let Some(captures) = CHARSET_REGEX.captures(content_type)
        && let Some(charset_str) = captures.get(1)
    {
        let charset_name = charset_str.as_str().to_lowercase();
        if let Some(encoding) = Encoding::for_label(charset_name.as_bytes()) {
            return encoding;
        }
    }

    // 2. Plain UTF-8 is by far the common case
    if std::str::from_utf8(body_bytes).is_ok() {
        return encoding_rs::UTF_8;
    }

    // 3. Use chardet for heuristic detection
    let search_bytes = &body_bytes[..body_bytes.len().min(SNIFF_LEN)];
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(search_bytes, false);
    detector.guess(None, true)
}
