use std::io::Write;

use crate::error::EncodeError;

static DIGIT_PAIRS: &[u8; 200] = b"\
0001020304050607080910111213141516171819\
2021222324252627282930313233343536373839\
4041424344454647484950515253545556575859\
6061626364656667686970717273747576777879\
8081828384858687888990919293949596979899";

pub(crate) fn append_u64(b: &mut Vec<u8>, mut n: u64) {
    let mut tmp = [0u8; 20];
    let mut pos = tmp.len();
    while n >= 100 {
        let d = (n % 100) as usize * 2;
        n /= 100;
        pos -= 2;
        tmp[pos..pos + 2].copy_from_slice(&DIGIT_PAIRS[d..d + 2]);
    }
    if n >= 10 {
        let d = n as usize * 2;
        pos -= 2;
        tmp[pos..pos + 2].copy_from_slice(&DIGIT_PAIRS[d..d + 2]);
    } else {
        pos -= 1;
        tmp[pos] = b'0' + n as u8;
    }
    b.extend_from_slice(&tmp[pos..]);
}

pub(crate) fn append_i64(b: &mut Vec<u8>, n: i64) {
    if n < 0 {
        b.push(b'-');
    }
    append_u64(b, n.unsigned_abs());
}

pub(crate) fn append_f64(b: &mut Vec<u8>, v: f64) -> Result<(), EncodeError> {
    if !v.is_finite() {
        return Err(EncodeError::UnsupportedFloat { value: v });
    }
    if v == 0.0 {
        b.push(b'0');
        return Ok(());
    }
    let abs = v.abs();
    let start = b.len();
    // Vec<u8> writes are infallible.
    if abs < 1e-6 || abs >= 1e21 {
        let _ = write!(b, "{v:e}");
        sign_exponent(b, start);
    } else {
        let _ = write!(b, "{v}");
    }
    Ok(())
}

pub(crate) fn append_f32(b: &mut Vec<u8>, v: f32) -> Result<(), EncodeError> {
    if !v.is_finite() {
        return Err(EncodeError::UnsupportedFloat { value: v as f64 });
    }
    if v == 0.0 {
        b.push(b'0');
        return Ok(());
    }
    let abs = v.abs();
    let start = b.len();
    if abs < 1e-6 || abs >= 1e21 {
        let _ = write!(b, "{v:e}");
        sign_exponent(b, start);
    } else {
        let _ = write!(b, "{v}");
    }
    Ok(())
}

/// Positive exponents carry an explicit `+`: `1e21` becomes `1e+21`.
fn sign_exponent(b: &mut Vec<u8>, start: usize) {
    if let Some(e) = b[start..].iter().position(|&c| c == b'e') {
        let at = start + e + 1;
        if b.get(at) != Some(&b'-') {
            b.insert(at, b'+');
        }
    }
}

/// Appends a `Number` literal; the empty literal encodes as `0`.
pub(crate) fn append_number(b: &mut Vec<u8>, literal: &str) -> Result<(), EncodeError> {
    if literal.is_empty() {
        b.push(b'0');
        return Ok(());
    }
    if !is_valid_number(literal.as_bytes()) {
        return Err(EncodeError::InvalidNumber { literal: literal.to_string() });
    }
    b.extend_from_slice(literal.as_bytes());
    Ok(())
}

/// `-? (0 | [1-9][0-9]*) (\.[0-9]+)? ([eE][+-]?[0-9]+)?`
pub(crate) fn is_valid_number(s: &[u8]) -> bool {
    let mut i = 0;
    if s.first() == Some(&b'-') {
        i += 1;
    }
    match s.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            while matches!(s.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        _ => return false,
    }
    if s.get(i) == Some(&b'.') {
        i += 1;
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    if matches!(s.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(s.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    i == s.len()
}
