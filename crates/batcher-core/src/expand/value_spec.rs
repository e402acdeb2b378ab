//! Value-specification parsing.
//!
//! A specification is a comma-separated list of segments:
//!
//! | segment          | values                               |
//! |------------------|--------------------------------------|
//! | `42`, `7.5`      | the literal                          |
//! | `1-5`            | `1, 2, 3, 4, 5`                      |
//! | `1-10:2`         | `1, 3, 5, 7, 9`                      |
//! | `-2-2`           | `-2, -1, 0, 1, 2`                    |
//!
//! Anything else (non-numeric bounds, `step <= 0`, `start > end`, empty
//! segments) is dropped without error.

use serde_json::Number;

/// Parse `spec` into the ordered list of values it denotes.
pub fn parse_values(spec: &str) -> Vec<Number> {
    spec.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .flat_map(parse_segment)
        .collect()
}

/// Number of values `spec` denotes, computed without materializing ranges.
///
/// Saturates at `usize::MAX`.
pub fn count_values(spec: &str) -> usize {
    spec.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if parse_literal(segment).is_some() {
                return 1;
            }
            match range_bounds(segment) {
                Some((start, end, step)) => {
                    let span = (end as i128 - start as i128) / step as i128 + 1;
                    usize::try_from(span).unwrap_or(usize::MAX)
                }
                None => 0,
            }
        })
        .fold(0usize, usize::saturating_add)
}

fn parse_segment(segment: &str) -> Vec<Number> {
    if let Some(literal) = parse_literal(segment) {
        return vec![literal];
    }
    match range_bounds(segment) {
        Some((start, end, step)) => expand_range(start, end, step),
        None => Vec::new(),
    }
}

fn parse_literal(segment: &str) -> Option<Number> {
    if let Ok(n) = segment.parse::<i64>() {
        return Some(Number::from(n));
    }
    // `f64::from_str` accepts "inf" and "NaN"; neither is a usable value.
    segment
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

/// Split `start-end[:step]` into its parts; `None` if the segment is not a
/// usable range.
fn range_bounds(segment: &str) -> Option<(i64, i64, i64)> {
    let (bounds, step) = match segment.split_once(':') {
        Some((bounds, step)) => (bounds.trim(), step.trim().parse::<i64>().ok()?),
        None => (segment, 1),
    };
    if step <= 0 {
        return None;
    }

    // Skip the first char so a leading minus is read as a sign, not a separator.
    let mut chars = bounds.char_indices();
    chars.next()?;
    let sep = chars.find(|&(_, c)| c == '-').map(|(i, _)| i)?;
    let start = bounds[..sep].trim().parse::<i64>().ok()?;
    let end = bounds[sep + 1..].trim().parse::<i64>().ok()?;
    if start > end {
        return None;
    }
    Some((start, end, step))
}

fn expand_range(start: i64, end: i64, step: i64) -> Vec<Number> {
    let mut values = Vec::new();
    let mut current = start;
    loop {
        values.push(Number::from(current));
        match current.checked_add(step) {
            Some(next) if next <= end => current = next,
            _ => break,
        }
    }
    values
}
