//! CLI wire codec
//!
//! The server speaks newline-terminated lines of space-separated tokens.
//! Reserved characters inside a token are percent-escaped, and tagged
//! parameters in replies are sent as `key%3Avalue`.
//!
//! Example reply line:
//! `albums 0 1 count%3A42 id%3A9 album%3AFoo%20Bar correlationid%3A5`

use std::borrow::Cow;

/// Escaped form of `:` that separates a tagged token's key from its value.
pub const TAG_SEPARATOR: &str = "%3A";

/// Percent-escape a raw value so it survives as a single token.
pub fn encode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Undo [`encode`]. Never fails: invalid UTF-8 is replaced and malformed
/// escapes are passed through unchanged.
pub fn decode(token: &str) -> String {
    match urlencoding::decode(token) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            let bytes = urlencoding::decode_binary(token.as_bytes());
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

/// Split a line into raw (still escaped) tokens.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Split a tagged reply token at the first escaped colon and decode both
/// halves. Returns `None` for tokens without a tag separator.
///
/// The split happens on the escaped form, so a decoded value may itself
/// contain colons (e.g. `url%3Afile%3A%2F%2F...`).
pub fn split_tagged(token: &str) -> Option<(String, String)> {
    let pos = token.find(TAG_SEPARATOR)?;
    let key = decode(&token[..pos]);
    let value = decode(&token[pos + TAG_SEPARATOR.len()..]);
    Some((key, value))
}

/// Format an outgoing tagged parameter (`key:escaped-value`).
///
/// The server splits request parameters at the first literal colon, so
/// the key stays readable and only the value is escaped.
pub fn tagged(key: &str, value: &str) -> String {
    format!("{}:{}", key, encode(value))
}

/// Decode a token only when it contains an escape, avoiding an allocation
/// for the common all-ASCII verb tokens.
pub fn decode_cow(token: &str) -> Cow<'_, str> {
    if token.contains('%') {
        Cow::Owned(decode(token))
    } else {
        Cow::Borrowed(token)
    }
}

/// Parse a decimal token, treating anything malformed as zero.
pub fn parse_int_or_zero(token: &str) -> i64 {
    let decoded = decode_cow(token);
    let trimmed = decoded.trim();
    trimmed
        .parse::<i64>()
        .or_else(|_| trimmed.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reserved_characters() {
        assert_eq!(encode("a b"), "a%20b");
        assert_eq!(encode("a:b"), "a%3Ab");
        assert_eq!(encode("100%"), "100%25");
    }

    #[test]
    fn test_round_trip_spaces_colons_percent() {
        let samples = [
            "",
            "plain",
            "with space",
            "00:04:20:aa:bb:cc",
            "50% off: the album",
            "%3A literal escape",
            "  leading and trailing  ",
            "ünïcödé: ∞ %",
        ];
        for s in samples {
            assert_eq!(decode(&encode(s)), s, "round trip failed for {:?}", s);
        }
    }

    #[test]
    fn test_decode_malformed_does_not_panic() {
        assert_eq!(decode("%zz"), "%zz");
        assert_eq!(decode("trailing%"), "trailing%");
        // Lone continuation byte - replaced, not rejected
        let out = decode("bad%80byte");
        assert!(out.starts_with("bad"));
        assert!(out.ends_with("byte"));
    }

    #[test]
    fn test_split_tagged_at_first_escaped_colon() {
        let (key, value) = split_tagged("url%3Afile%3A%2F%2F%2Fmusic%2Fa.flac").unwrap();
        assert_eq!(key, "url");
        assert_eq!(value, "file:///music/a.flac");
    }

    #[test]
    fn test_split_tagged_key_with_space() {
        let (key, value) = split_tagged("playlist%20index%3A3").unwrap();
        assert_eq!(key, "playlist index");
        assert_eq!(value, "3");
    }

    #[test]
    fn test_split_tagged_ignores_literal_colon() {
        // A literal colon is not the separator
        assert!(split_tagged("tags:alyj").is_none());
        assert!(split_tagged("noseparator").is_none());
    }

    #[test]
    fn test_tagged_escapes_value_only() {
        assert_eq!(tagged("search", "pink floyd"), "search:pink%20floyd");
        assert_eq!(tagged("tags", "alyj"), "tags:alyj");
    }

    #[test]
    fn test_tokenize_collapses_whitespace() {
        assert_eq!(tokenize("a  b\tc \r"), vec!["a", "b", "c"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_parse_int_or_zero() {
        assert_eq!(parse_int_or_zero("42"), 42);
        assert_eq!(parse_int_or_zero("12.7"), 12);
        assert_eq!(parse_int_or_zero("-"), 0);
        assert_eq!(parse_int_or_zero("abc"), 0);
    }
}
