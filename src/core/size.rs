//! Free-text construction size parsing.
//!
//! Sizes arrive as strings such as `"3x6"`, `"6 х 3"` (Cyrillic x) or
//! `"1,2*1,8 m"`. Dimensions are normalised to `(shorter, longer)` so that
//! orientation never affects comparison.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default relative tolerance for size comparison (15%)
pub const SIZE_TOLERANCE: f64 = 0.15;

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+[,.]?\d*)\s*[xхXХ*×]\s*(\d+[,.]?\d*)").expect("size pattern is valid")
});

fn round_1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn parse_dimension(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a size string into `(width, height)` with `width <= height`
///
/// Returns `None` when no `number separator number` pair is present.
pub fn parse_size(text: &str) -> Option<(f64, f64)> {
    let caps = SIZE_RE.captures(text)?;
    let first = parse_dimension(&caps[1])?;
    let second = parse_dimension(&caps[2])?;

    let (width, height) = if first <= second { (first, second) } else { (second, first) };
    Some((round_1(width), round_1(height)))
}

/// Canonical `"{w}x{h}"` form of a size string
pub fn normalize_size(text: &str) -> Option<String> {
    parse_size(text).map(|(w, h)| format!("{}x{}", w, h))
}

/// Surface area in square units of the parsed size
pub fn area(text: &str) -> Option<f64> {
    parse_size(text).map(|(w, h)| w * h)
}

/// Check whether a candidate's parsed size lies within `tolerance` of a target
///
/// Tolerance is relative to the target's own width and height.
#[inline]
pub fn dimensions_within(target: (f64, f64), candidate: (f64, f64), tolerance: f64) -> bool {
    let (w1, h1) = target;
    let (w2, h2) = candidate;
    (w1 - w2).abs() <= w1 * tolerance && (h1 - h2).abs() <= h1 * tolerance
}

/// Compare two optional size strings
///
/// Both absent counts as similar, one absent does not. Identical strings are
/// similar without parsing; unparsable strings are never similar.
pub fn sizes_similar(size_1: Option<&str>, size_2: Option<&str>, tolerance: f64) -> bool {
    match (size_1, size_2) {
        (None, None) => true,
        (Some(a), Some(b)) if a == b => true,
        (Some(a), Some(b)) => match (parse_size(a), parse_size(b)) {
            (Some(first), Some(second)) => dimensions_within(first, second, tolerance),
            _ => false,
        },
        _ => false,
    }
}
