//! Reversible file-name escaping for query strings and path components.
//!
//! Every byte that is significant to a filesystem or to a URL is rewritten to
//! a `__XX__` token (upper-case hex). So is any `_` next to another `_`, which
//! keeps literal underscore runs from reading as tokens. Everything else
//! passes through, so ordinary filter expressions stay readable on disk.

use std::borrow::Cow;

/// Bytes that never appear raw in an escaped file name.
const RESERVED: &[u8] = b"/\\:*?\"<>|&=%#+,; ";

fn needs_escape(b: u8) -> bool {
    !b.is_ascii() || b.is_ascii_control() || RESERVED.contains(&b)
}

/// Escape a string into a single safe path component.
///
/// Distinct inputs always produce distinct names.
pub fn escape_file_name(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        let underscore_run = b == b'_' && ((i > 0 && bytes[i - 1] == b'_') || bytes.get(i + 1) == Some(&b'_'));
        if needs_escape(b) || underscore_run {
            out.push_str(&format!("__{b:02X}__"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Exact inverse of [`escape_file_name`].
///
/// Only upper-case `__XX__` tokens are decoded. Escaped names never hold a
/// raw `__` outside a token, so scanning left to right is unambiguous.
pub fn unescape_file_name(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if let Some(b) = token_at(bytes, i) {
            out.push(b);
            i += 6;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

fn token_at(bytes: &[u8], i: usize) -> Option<u8> {
    let window = bytes.get(i..i + 6)?;
    if &window[..2] != b"__" || &window[4..] != b"__" {
        return None;
    }
    let hi = upper_hex_value(window[2])?;
    let lo = upper_hex_value(window[3])?;
    Some((hi << 4) | lo)
}

fn upper_hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// File name stem for a normalized query string.
///
/// The query is percent-decoded once so `filter=a%2Cb` and `filter=a,b` land
/// in the same file, then escaped.
pub fn query_file_name(query: &str) -> String {
    let decoded = urlencoding::decode(query).unwrap_or(Cow::Borrowed(query));
    escape_file_name(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_reserved() {
        assert_eq!(escape_file_name("filter=type:article"), "filter__3D__type__3A__article");
        assert_eq!(escape_file_name("a&b"), "a__26__b");
        assert_eq!(escape_file_name("a/b"), "a__2F__b");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(escape_file_name("publication_year-2020.v1"), "publication_year-2020.v1");
    }

    #[test]
    fn test_round_trip() {
        let samples = [
            "filter=author.id:A123,type:article&sort=cited_by_count:desc",
            "search=machine learning",
            "q=\"quoted\"|<pipe>",
            "a_&",
            "_&_",
            "ünïcödé=ok",
            "per_page=200&cursor=*",
            "x=__2F&y",
            "__41&",
            "a__26__b",
            "___",
            "&_&",
            "_41&",
            "",
        ];
        for s in samples {
            assert_eq!(unescape_file_name(&escape_file_name(s)), s, "round trip failed for {s:?}");
        }
    }

    #[test]
    fn test_escaped_output_has_no_reserved_bytes() {
        let escaped = escape_file_name("a:b/c?d*e\"f<g>h|i&j=k%l#m+n,o;p q\\r");
        assert!(escaped.bytes().all(|b| !needs_escape(b)));
    }

    #[test]
    fn test_single_underscores_stay_readable() {
        assert_eq!(escape_file_name("per_page=25"), "per_page__3D__25");
        assert_eq!(escape_file_name("a__b"), "a__5F____5F__b");
    }

    #[test]
    fn test_distinct_inputs_get_distinct_names() {
        assert_ne!(escape_file_name("a&b"), escape_file_name("a__26__b"));
        assert_ne!(escape_file_name("x=/26__y"), escape_file_name("x=__2F&y"));

        let samples = ["a&b", "a__26__b", "a_&b", "a_26_b", "__", "_", "__5F__", "&", "x=__2F&y", "x=/26__y"];
        let names: std::collections::HashSet<String> = samples.iter().map(|s| escape_file_name(s)).collect();
        assert_eq!(names.len(), samples.len());
    }

    #[test]
    fn test_lowercase_token_not_decoded() {
        assert_eq!(unescape_file_name("a__2c__b"), "a__2c__b");
    }

    #[test]
    fn test_query_file_name_decodes_once() {
        assert_eq!(query_file_name("filter=a%2Cb"), query_file_name("filter=a,b"));
        assert_eq!(query_file_name("search=a%2520b"), escape_file_name("search=a%20b"));
    }
}
