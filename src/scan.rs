//! Bounded signature search around an anchor symbol.

use memchr::memmem;

/// Size of the search window past the anchor. Patch sites live right next to their anchor
/// table, so one page is plenty.
pub const PAGE_SIZE: usize = 4096;

/// Finds the first occurrence of `needle` starting at one of the `window` positions
/// following `start`.
///
/// A match may begin on the last candidate position and run past the window by up to
/// `needle.len() - 1` bytes, but never past the end of `haystack`. Returns the absolute
/// offset of the match within `haystack`.
pub fn find_near(haystack: &[u8], start: usize, needle: &[u8], window: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    let end = start
        .saturating_add(window)
        .saturating_add(needle.len() - 1)
        .min(haystack.len());

    memmem::find(&haystack[start..end], needle).map(|pos| start + pos)
}
