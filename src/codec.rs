//! Reversible encoding for text that must survive the markup parser.
//!
//! Lowercase hex is used everywhere: it is a valid tag-name and attribute
//! character set and it is unaffected by the parser's case folding.

const DIGITS: &[u8; 16] = b"0123456789abcdef";

pub fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for byte in raw.bytes() {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode hex produced by [`encode`]. `None` for odd lengths, non-hex
/// characters or invalid UTF-8.
pub fn decode(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }

    let mut out = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks(2) {
        out.push(nibble(pair[0])? << 4 | nibble(pair[1])?);
    }

    String::from_utf8(out).ok()
}

pub fn is_encoded(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| nibble(b).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_lowercase_hex() {
        assert_eq!(encode("Card"), "43617264");
        assert_eq!(encode(""), "");
    }

    #[test]
    fn test_decode_restores_unicode() {
        let raw = "if .Ok }} <b>é</b>";
        assert_eq!(decode(&encode(raw)).as_deref(), Some(raw));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode("abc"), None);
        assert_eq!(decode("zz"), None);
        assert!(!is_encoded(".Foo"));
        assert!(is_encoded("2e466f6f"));
    }
}
