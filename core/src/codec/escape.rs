/*
 * escape.rs
 * Copyright (C) 2026 Emberweb contributors
 *
 * This file is part of Emberweb, an embedded web server and client.
 *
 * Emberweb is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Emberweb is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Emberweb.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Percent decoding/encoding, HTML escaping and URI character validation.

use percent_encoding::{percent_encode, AsciiSet, CONTROLS};

/// Bytes escaped when encoding a URI: controls plus the characters that
/// are not URI-legal. `+` is escaped so decoding (which maps `+` to space)
/// round-trips. Non-ASCII bytes are always escaped.
const URI_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// URL percent decoding. Converts `%HH` (both nibbles required, `%00`
/// excluded) and `+` to space. Invalid sequences are copied through
/// verbatim. The result is never longer than the input.
pub fn decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'+' {
            out.push(b' ');
            i += 1;
        } else if c == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
            && !(bytes[i + 1] == b'0' && bytes[i + 2] == b'0')
        {
            let hi = hex_val(bytes[i + 1]);
            let lo = hex_val(bytes[i + 2]);
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(c);
            i += 1;
        }
    }
    // Decoded bytes may not be valid UTF-8; replace invalid sequences.
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Percent-encode a URI, escaping controls, whitespace and non-URI bytes
/// with uppercase `%HH`. Always allocates.
pub fn encode_uri(uri: &str) -> String {
    percent_encode(uri.as_bytes(), URI_ENCODE).to_string()
}

/// Escape text for embedding in HTML: `& < > " ' # ( )` map to entities,
/// other bytes are preserved.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '#' => out.push_str("&#x23;"),
            '(' => out.push_str("&#x28;"),
            ')' => out.push_str("&#x29;"),
            _ => out.push(c),
        }
    }
    out
}

/// True iff every byte is in the URI-legal set
/// `[A-Za-z0-9._~:/?#\[\]@!$&'()*+,;=%-]`.
pub fn validate_uri_chars(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.bytes().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                b'-' | b'.'
                    | b'_'
                    | b'~'
                    | b':'
                    | b'/'
                    | b'?'
                    | b'#'
                    | b'['
                    | b']'
                    | b'@'
                    | b'!'
                    | b'$'
                    | b'&'
                    | b'\''
                    | b'('
                    | b')'
                    | b'*'
                    | b'+'
                    | b','
                    | b';'
                    | b'='
                    | b'%'
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_basic() {
        assert_eq!(decode("a%20b"), "a b");
        assert_eq!(decode("a+b"), "a b");
        assert_eq!(decode("%41%42%43"), "ABC");
        assert_eq!(decode("hello"), "hello");
    }

    #[test]
    fn decode_invalid_verbatim() {
        assert_eq!(decode("%zz"), "%zz");
        assert_eq!(decode("%4"), "%4");
        assert_eq!(decode("100%"), "100%");
        // %00 is never decoded
        assert_eq!(decode("%00"), "%00");
    }

    #[test]
    fn encode_round_trip_for_legal_bytes() {
        let s = "abc-._~:/?#[]@!$&'()*,;=123";
        // Legal bytes other than '%' and '+' pass through encode unchanged
        assert_eq!(encode_uri(s), s);
        // The full URI-legal set round-trips through encode then decode
        let all = "abc-._~:/?#[]@!$&'()*+,;=%123";
        assert_eq!(decode(&encode_uri(all)), all);
    }

    #[test]
    fn encode_escapes() {
        assert_eq!(encode_uri("a b"), "a%20b");
        assert_eq!(encode_uri("a\"b"), "a%22b");
        assert_eq!(encode_uri("100%"), "100%25");
        assert_eq!(encode_uri("a+b"), "a%2Bb");
    }

    #[test]
    fn html_escaping() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
        assert_eq!(escape_html("f('#')"), "f&#x28;&#x27;&#x23;&#x27;&#x29;");
    }

    #[test]
    fn uri_validation() {
        assert!(validate_uri_chars("/index.html?q=1#frag"));
        assert!(validate_uri_chars("/a%20b"));
        assert!(!validate_uri_chars("/a b"));
        assert!(!validate_uri_chars("/a\"b"));
        assert!(!validate_uri_chars(""));
    }
}
