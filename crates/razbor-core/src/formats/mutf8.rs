//! Modified UTF-8, the string encoding of DEX string data and class file
//! constant pools.
//!
//! It differs from standard UTF-8 in two ways: NUL is encoded as `C0 80`,
//! and supplementary characters are encoded as two 3-byte surrogates.

/// Decodes modified UTF-8; malformed sequences become U+FFFD
pub(crate) fn decode(bytes: &[u8]) -> String {
    let continuation = |i: usize| bytes.get(i).is_some_and(|b| b & 0xC0 == 0x80);
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && continuation(i + 1) {
            units.push(((b & 0x1F) as u16) << 6 | (bytes[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 && continuation(i + 1) && continuation(i + 2) {
            units.push(
                ((b & 0x0F) as u16) << 12
                    | ((bytes[i + 1] & 0x3F) as u16) << 6
                    | (bytes[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }

    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_and_embedded_nul() {
        assert_eq!(decode(b"Ljava/lang/Object;"), "Ljava/lang/Object;");
        assert_eq!(decode(b"A\xC0\x80B"), "A\0B");
    }

    #[test]
    fn test_surrogate_pair() {
        assert_eq!(decode(b"\xED\xA0\xBD\xED\xB8\x80"), "\u{1F600}");
    }

    #[test]
    fn test_truncated_sequence() {
        assert_eq!(decode(b"a\xE2\x82"), "a\u{FFFD}\u{FFFD}");
    }
}
