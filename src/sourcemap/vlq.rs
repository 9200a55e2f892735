//! Base64 VLQ coding used by the `mappings` field of version-3 source maps.

use crate::{err_msg, WeaveError};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const CONTINUATION: i64 = 0b10_0000;
const MASK: i64 = 0b01_1111;

fn digit_value(c: u8) -> Option<i64> {
    BASE64.iter().position(|b| *b == c).map(|p| p as i64)
}

/// Appends the VLQ encoding of `value` to `out`.
pub fn encode(value: i64, out: &mut String) {
    let mut v = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = v & MASK;
        v >>= 5;
        if v > 0 {
            digit |= CONTINUATION;
        }
        out.push(BASE64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Decodes every value in one comma-free segment.
pub fn decode_segment(segment: &str) -> Result<Vec<i64>, WeaveError> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;
    for c in segment.bytes() {
        let digit = digit_value(c)
            .ok_or_else(|| err_msg!(Internal, "invalid base64 digit '{}' in source map", c as char))?;
        value += (digit & MASK) << shift;
        if digit & CONTINUATION != 0 {
            shift += 5;
            if shift > 60 {
                return Err(err_msg!(Internal, "source map value overflows in '{}'", segment));
            }
            continue;
        }
        let negative = value & 1 == 1;
        let magnitude = value >> 1;
        values.push(if negative { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }
    if shift != 0 {
        return Err(err_msg!(Internal, "truncated source map segment '{}'", segment));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        let mut s = String::new();
        for v in [0, 1, -1, 16, 123] {
            encode(v, &mut s);
            s.push(',');
        }
        assert_eq!(s, "A,C,D,gB,2H,");
    }

    #[test]
    fn test_decodes_multi_value_segment() {
        assert_eq!(decode_segment("AAgBC").unwrap(), vec![0, 0, 16, 1]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode_segment("A*").is_err());
        assert!(decode_segment("g").is_err());
    }
}
