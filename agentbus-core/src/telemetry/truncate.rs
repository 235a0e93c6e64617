//! Attribute truncation
//!
//! Bounds the copy of a serialized payload that goes into span attributes.
//! Lengths are counted in characters and cuts land on character boundaries.

use std::borrow::Cow;

/// Appended after a cut
pub const TRUNCATION_MARKER: &str = "...";

/// Returns `serialized` unchanged when it has at most `max_len` characters,
/// otherwise its first `max_len` characters followed by [`TRUNCATION_MARKER`].
pub fn truncate(serialized: &str, max_len: usize) -> Cow<'_, str> {
    match serialized.char_indices().nth(max_len) {
        None => Cow::Borrowed(serialized),
        Some((cut, _)) => {
            let mut bounded = String::with_capacity(cut + TRUNCATION_MARKER.len());
            bounded.push_str(&serialized[..cut]);
            bounded.push_str(TRUNCATION_MARKER);
            Cow::Owned(bounded)
        }
    }
}
