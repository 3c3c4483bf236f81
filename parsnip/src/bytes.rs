//! Parsers over byte input.

use crate::parser::{literal, satisfy_labeled, token, Parser};

/// Accepts exactly `b`.
pub fn byte(b: u8) -> Parser<u8, u8> {
    token(b)
}

/// Accepts exactly the bytes of `tag`.
pub fn tag(tag: &[u8]) -> Parser<u8, Vec<u8>> {
    literal(tag)
}

/// Accepts any byte.
pub fn any_byte() -> Parser<u8, u8> {
    satisfy_labeled("any byte", |_| true)
}

/// Accepts a byte in `lo..=hi`.
pub fn byte_range(lo: u8, hi: u8) -> Parser<u8, u8> {
    satisfy_labeled(format!("byte in {lo:#04x}..={hi:#04x}"), move |b| (lo..=hi).contains(b))
}

/// A big-endian `u16`.
pub fn be_u16() -> Parser<u8, u16> {
    any_byte().zip_with(any_byte(), |hi, lo| u16::from_be_bytes([hi, lo]))
}

/// A big-endian `u32`.
pub fn be_u32() -> Parser<u8, u32> {
    be_u16().zip_with(be_u16(), |hi, lo| (u32::from(hi) << 16) | u32::from(lo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsnip_compiler::ErrorItem;

    #[test]
    fn length_prefixed_frames() {
        // a magic tag, a length and that many payload bytes
        let frame = tag(b"PK")
            .then(be_u16())
            .zip(any_byte().many());
        let compiled = frame.compile().unwrap();
        let (len, payload) = compiled
            .parse(b"PK\x00\x03abc")
            .into_result()
            .unwrap();
        assert_eq!(len, 3);
        assert_eq!(payload, b"abc".to_vec());

        let truncated = compiled.parse(b"PK\x01").into_result().unwrap_err();
        assert_eq!(truncated.offset(), 3);
        assert_eq!(truncated.unexpected(), Some(&ErrorItem::EndOfInput));
    }

    #[test]
    fn ranges_report_the_offending_byte() {
        let e = byte_range(b'0', b'9')
            .compile()
            .unwrap()
            .parse(b"a")
            .into_result()
            .unwrap_err();
        assert_eq!(e.unexpected(), Some(&ErrorItem::Tokens(vec![b'a'])));
        assert_eq!(
            e.to_string(),
            "at offset 0: unexpected b\"a\", expected byte in 0x30..=0x39"
        );
    }

    #[test]
    fn wide_integers_are_big_endian() {
        let n = be_u32().compile().unwrap().parse(&[0, 1, 0, 2]).into_result().unwrap();
        assert_eq!(n, 0x0001_0002);
    }

    #[test]
    fn single_bytes() {
        let nul_terminated = byte(0).not_followed_by().then(any_byte()).many().skip(byte(0));
        let compiled = nul_terminated.compile().unwrap();
        let outcome = compiled.parse(b"ab\0cd");
        assert_eq!(outcome.rest(), b"cd");
        assert_eq!(outcome.into_result().unwrap(), b"ab".to_vec());
    }
}
