//! Bounds-checked readers for the little-endian bundle fields.
//!
//! Every reader returns `None` when the field would run past the end of the
//! slice, so the bundle parser can turn a short buffer into a
//! [`ProtocolError`](crate::error::ProtocolError) instead of panicking.
//! IP and TCP headers are read through etherparse.

#[inline]
fn array<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    data.get(offset..end)?.try_into().ok()
}

#[inline]
pub fn u8_at(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

#[inline]
pub fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    array(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    array(data, offset).map(u32::from_le_bytes)
}

/// Find the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_readers() {
        let data = [0x52, 0x52, 0xa0, 0x41];
        assert_eq!(le_u32(&data, 0), Some(0x41a0_5252));
        assert_eq!(le_u16(&data, 2), Some(0x41a0));
    }

    #[test]
    fn test_out_of_bounds() {
        let data = [0u8; 3];
        assert_eq!(u8_at(&data, 3), None);
        assert_eq!(le_u16(&data, 2), None);
        assert_eq!(le_u32(&data, 0), None);
        assert_eq!(le_u32(&data, usize::MAX), None);
    }

    #[test]
    fn test_find() {
        let hay = b"garbage\x52\x52\xa0\x41rest";
        assert_eq!(find(hay, &[0x52, 0x52, 0xa0, 0x41]), Some(7));
        assert_eq!(find(hay, b"nope"), None);
        assert_eq!(find(b"ab", b"abc"), None);
    }
}
