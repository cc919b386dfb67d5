//! Small shared helpers: clock-seeded randomness and string truncation.

/// Pseudo-random u64 seeded from the high-resolution clock.
///
/// xorshift64, which avoids pulling in the `rand` crate. Good enough for
/// request jitter, identity attribute picks, and placeholder values; not
/// crypto.
pub(crate) fn rand_u64() -> u64 {
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// Uniform-ish value in `[lo, hi]`. Returns `lo` when the range is empty.
pub(crate) fn rand_range(lo: u64, hi: u64) -> u64 {
    if hi <= lo {
        return lo;
    }
    lo + rand_u64() % (hi - lo + 1)
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a
/// UTF-8 code point.
pub(crate) fn head_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// First `max_chars` characters of `s`.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
