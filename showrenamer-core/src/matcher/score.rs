//! Title similarity scoring.

use rapidfuzz::fuzz;

/// Similarity of two titles on a 0-100 scale, ignoring case.
///
/// Indel ratio as computed by `rapidfuzz::fuzz::ratio`, scaled and rounded.
/// Lengths count Unicode scalar values. Either side empty scores 0.
pub fn similarity(a: &str, b: &str) -> u8 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let ratio = fuzz::ratio(a.chars(), b.chars());
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}
