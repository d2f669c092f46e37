//! Re-emission of `MarshalJson` output: validate, strip insignificant
//! whitespace, and optionally re-indent.

use serde::de::IgnoredAny;

use super::string::{is_html_special, push_unicode_escape};
use crate::error::InvalidJson;

pub(crate) fn validate(src: &[u8]) -> Result<(), InvalidJson> {
    serde_json::from_slice::<IgnoredAny>(src)
        .map(|_| ())
        .map_err(|e| InvalidJson {
            line: e.line(),
            column: e.column(),
            reason: match e.classify() {
                serde_json::error::Category::Eof => "unexpected end of input".to_string(),
                _ => "syntax error".to_string(),
            },
        })
}

/// Copies validated JSON into `b` without whitespace between tokens.
pub(crate) fn compact_into(b: &mut Vec<u8>, src: &[u8], html: bool, line_sep: bool) {
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                b.push(c);
                i += 1;
                while i < src.len() {
                    let s = src[i];
                    match s {
                        b'\\' => {
                            b.push(s);
                            i += 1;
                            if let Some(&n) = src.get(i) {
                                b.push(n);
                            }
                        }
                        b'"' => {
                            b.push(s);
                            break;
                        }
                        _ if html && is_html_special(s) => push_unicode_escape(b, s),
                        0xe2 if line_sep
                            && src.get(i + 1) == Some(&0x80)
                            && matches!(src.get(i + 2), Some(0xa8 | 0xa9)) =>
                        {
                            b.extend_from_slice(b"\\u202");
                            b.push(if src[i + 2] == 0xa8 { b'8' } else { b'9' });
                            i += 2;
                        }
                        _ => b.push(s),
                    }
                    i += 1;
                }
            }
            _ => b.push(c),
        }
        i += 1;
    }
}

/// Re-indents compact JSON. `depth` is the nesting level of the line the
/// value starts on.
pub(crate) fn indent_into(b: &mut Vec<u8>, src: &[u8], prefix: &[u8], unit: &[u8], depth: usize) {
    let mut depth = depth;
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        match c {
            b'"' => {
                let start = i;
                i += 1;
                while i < src.len() {
                    match src[i] {
                        b'\\' => i += 1,
                        b'"' => break,
                        _ => {}
                    }
                    i += 1;
                }
                b.extend_from_slice(&src[start..=i.min(src.len() - 1)]);
            }
            b'{' | b'[' => {
                b.push(c);
                let close = if c == b'{' { b'}' } else { b']' };
                if src.get(i + 1) == Some(&close) {
                    b.push(close);
                    i += 1;
                } else {
                    depth += 1;
                    newline(b, prefix, unit, depth);
                }
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                newline(b, prefix, unit, depth);
                b.push(c);
            }
            b',' => {
                b.push(c);
                newline(b, prefix, unit, depth);
            }
            b':' => {
                b.push(c);
                b.push(b' ');
            }
            _ => b.push(c),
        }
        i += 1;
    }
}

fn newline(b: &mut Vec<u8>, prefix: &[u8], unit: &[u8], depth: usize) {
    b.push(b'\n');
    b.extend_from_slice(prefix);
    for _ in 0..depth {
        b.extend_from_slice(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(src: &str, html: bool) -> String {
        let mut b = Vec::new();
        compact_into(&mut b, src.as_bytes(), html, false);
        String::from_utf8(b).unwrap()
    }

    #[test]
    fn strips_whitespace_outside_strings() {
        assert_eq!(compact(" { \"a b\" : [1, 2 ,\n3] } ", false), r#"{"a b":[1,2,3]}"#);
        assert_eq!(compact(r#"{"k":"x\" y"}"#, false), r#"{"k":"x\" y"}"#);
    }

    #[test]
    fn html_escapes_inside_strings_only() {
        let out = compact(r#"{"<":"a&b"}"#, true);
        assert!(!out.contains('<') && !out.contains('&'));
        assert!(out.starts_with("{\"\\u003"));
    }

    #[test]
    fn validation_reports_position() {
        assert!(validate(b"{\"a\":1}").is_ok());
        assert!(validate(b" [1, 2] ").is_ok());
        let err = validate(b"{\"a\":}").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(validate(b"").is_err());
        assert!(validate(b"1 2").is_err());
    }

    #[test]
    fn indents_nested_values() {
        let mut b = Vec::new();
        indent_into(&mut b, br#"{"a":[1,2],"b":{},"c":"x,y"}"#, b"", b"  ", 0);
        assert_eq!(
            String::from_utf8(b).unwrap(),
            "{\n  \"a\": [\n    1,\n    2\n  ],\n  \"b\": {},\n  \"c\": \"x,y\"\n}"
        );
    }

    #[test]
    fn indent_starts_at_given_depth() {
        let mut b = Vec::new();
        indent_into(&mut b, br#"[true]"#, b">", b"\t", 1);
        assert_eq!(b, b"[\n>\t\ttrue\n>\t]");
    }
}
