//! JSON string escaping.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::EncodeError;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// ASCII bytes that pass through unescaped.
static SAFE: [bool; 128] = safe_table(false);
/// Same, but also escaping `<`, `>` and `&`.
static HTML_SAFE: [bool; 128] = safe_table(true);

const fn safe_table(html: bool) -> [bool; 128] {
    let mut t = [true; 128];
    let mut i = 0;
    while i < 0x20 {
        t[i] = false;
        i += 1;
    }
    t[b'"' as usize] = false;
    t[b'\\' as usize] = false;
    if html {
        t[b'<' as usize] = false;
        t[b'>' as usize] = false;
        t[b'&' as usize] = false;
    }
    t
}

/// Writes `s` as a quoted JSON string.
pub(crate) fn append_str<const HTML: bool>(b: &mut Vec<u8>, s: &str, line_sep: bool) {
    b.push(b'"');
    escape_into::<HTML>(b, s, line_sep);
    b.push(b'"');
}

/// Writes possibly-invalid UTF-8 as a quoted JSON string. Invalid bytes
/// become U+FFFD, or an error when `strict`.
pub(crate) fn append_bytes_str<const HTML: bool>(
    b: &mut Vec<u8>,
    bytes: &[u8],
    line_sep: bool,
    strict: bool,
) -> Result<(), EncodeError> {
    b.push(b'"');
    let mut offset = 0;
    for chunk in bytes.utf8_chunks() {
        escape_into::<HTML>(b, chunk.valid(), line_sep);
        offset += chunk.valid().len();
        if !chunk.invalid().is_empty() {
            if strict {
                return Err(EncodeError::InvalidUtf8 { offset });
            }
            for _ in chunk.invalid() {
                b.extend_from_slice(b"\\u");
                b.extend_from_slice(b"fffd");
            }
            offset += chunk.invalid().len();
        }
    }
    b.push(b'"');
    Ok(())
}

/// Escapes `s` without the surrounding quotes.
pub(crate) fn escape_into<const HTML: bool>(b: &mut Vec<u8>, s: &str, line_sep: bool) {
    let table = if HTML { &HTML_SAFE } else { &SAFE };
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c < 0x80 {
            if table[c as usize] {
                i += 1;
                continue;
            }
            b.extend_from_slice(&bytes[start..i]);
            match c {
                b'"' => b.extend_from_slice(b"\\\""),
                b'\\' => b.extend_from_slice(b"\\\\"),
                b'\n' => b.extend_from_slice(b"\\n"),
                b'\r' => b.extend_from_slice(b"\\r"),
                b'\t' => b.extend_from_slice(b"\\t"),
                _ => {
                    b.extend_from_slice(b"\\u00");
                    b.push(HEX[(c >> 4) as usize]);
                    b.push(HEX[(c & 0xf) as usize]);
                }
            }
            i += 1;
            start = i;
            continue;
        }
        // U+2028 / U+2029 encode as E2 80 A8 / E2 80 A9.
        if line_sep && c == 0xe2 && bytes.get(i + 1) == Some(&0x80) && matches!(bytes.get(i + 2), Some(0xa8 | 0xa9)) {
            b.extend_from_slice(&bytes[start..i]);
            b.extend_from_slice(b"\\u202");
            b.push(HEX[(bytes[i + 2] & 0xf) as usize]);
            i += 3;
            start = i;
            continue;
        }
        i += 1;
    }
    b.extend_from_slice(&bytes[start..]);
}

/// Writes a byte slice as a quoted standard base64 string.
pub(crate) fn append_base64(b: &mut Vec<u8>, bytes: &[u8]) {
    b.push(b'"');
    let start = b.len();
    let len = base64::encoded_len(bytes.len(), true).unwrap_or(0);
    b.resize(start + len, 0);
    match STANDARD.encode_slice(bytes, &mut b[start..]) {
        Ok(n) => b.truncate(start + n),
        Err(_) => b.truncate(start),
    }
    b.push(b'"');
}

/// Returns true when `c` must be escaped inside a JSON string in HTML mode.
pub(crate) fn is_html_special(c: u8) -> bool {
    matches!(c, b'<' | b'>' | b'&')
}

pub(crate) fn push_unicode_escape(b: &mut Vec<u8>, c: u8) {
    b.extend_from_slice(b"\\u00");
    b.push(HEX[(c >> 4) as usize]);
    b.push(HEX[(c & 0xf) as usize]);
}
