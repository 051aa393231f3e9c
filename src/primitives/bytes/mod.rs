#![forbid(unsafe_code)]
//! Encoding utilities for fixed-width index keys.

pub mod ord {
    //! Order-preserving encoders for numeric and word keys.

    use core::convert::TryInto;

    const U32_LEN: usize = core::mem::size_of::<u32>();
    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        assert!(dst.len() >= U32_LEN, "destination too small");
        dst[..U32_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u32 from big-endian byte order.
    pub fn get_u32_be(src: &[u8]) -> u32 {
        let head = src
            .get(..U32_LEN)
            .unwrap_or_else(|| panic!("u32 source shorter than 4 bytes (have {})", src.len()));
        let bytes: [u8; U32_LEN] = head.try_into().unwrap();
        u32::from_be_bytes(bytes)
    }

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head = src
            .get(..U64_LEN)
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        let bytes: [u8; U64_LEN] = head.try_into().unwrap();
        u64::from_be_bytes(bytes)
    }

    /// Writes `word` zero-padded to the full width of `dst`.
    ///
    /// Words never contain NUL, so bytewise comparison of padded keys
    /// orders them the same way as the unpadded words.
    pub fn put_word_key(dst: &mut [u8], word: &[u8]) {
        assert!(word.len() < dst.len(), "word longer than key width");
        dst[..word.len()].copy_from_slice(word);
        dst[word.len()..].fill(0);
    }

    /// Strips the zero padding written by [`put_word_key`].
    pub fn word_from_key(src: &[u8]) -> &[u8] {
        let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
        &src[..end]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn padded_words_sort_like_words() {
            let mut a = [0u8; 8];
            let mut b = [0u8; 8];
            put_word_key(&mut a, b"cat");
            put_word_key(&mut b, b"cats");
            assert!(a < b);
            assert_eq!(word_from_key(&b), b"cats");
        }

        #[test]
        fn u32_encoding_preserves_order() {
            let mut lo = [0u8; 4];
            let mut hi = [0u8; 4];
            put_u32_be(&mut lo, 255);
            put_u32_be(&mut hi, 256);
            assert!(lo < hi);
            assert_eq!(get_u32_be(&hi), 256);
        }
    }
}
