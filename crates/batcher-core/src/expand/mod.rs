//! Parameter expansion.
//!
//! Turns a list of [`Dimension`]s into the ordered cartesian product of their
//! values. The first declared dimension is the outermost loop and the last
//! one varies fastest, so `seed = "1-2"` and `steps = "10,20"` expand to
//! `(1,10) (1,20) (2,10) (2,20)`.

mod value_spec;

use serde::{Deserialize, Serialize};
use serde_json::Number;

pub use value_spec::{count_values, parse_values};

use crate::task::{Combination, Override};

/// One independently varying parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Field name (or `/`-separated path) inside the target node.
    pub field: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Value specification, e.g. `"1-10:2,42"`.
    pub values: String,
    /// Per-dimension target; falls back to the shared target id.
    #[serde(default)]
    pub target_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Dimension {
    pub fn new(field: impl Into<String>, values: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            enabled: true,
            values: values.into(),
            target_id: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }
}

/// A dimension that survived filtering, with its parsed values.
struct Participant<'a> {
    target_id: &'a str,
    field: &'a str,
    values: Vec<Number>,
}

fn participants<'a>(dimensions: &'a [Dimension], target_id: &'a str) -> Vec<Participant<'a>> {
    dimensions
        .iter()
        .filter(|d| d.enabled)
        .filter_map(|d| {
            let values = parse_values(&d.values);
            if values.is_empty() {
                return None;
            }
            Some(Participant {
                target_id: d.target_id.as_deref().unwrap_or(target_id),
                field: &d.field,
                values,
            })
        })
        .collect()
}

/// Number of combinations [`expand`] would produce, or `None` on overflow.
///
/// Returns `Some(0)` when no dimension participates.
pub fn combination_count(dimensions: &[Dimension]) -> Option<usize> {
    let sizes: Vec<usize> = dimensions
        .iter()
        .filter(|d| d.enabled)
        .map(|d| count_values(&d.values))
        .filter(|&n| n > 0)
        .collect();
    if sizes.is_empty() {
        return Some(0);
    }
    sizes.into_iter().try_fold(1usize, usize::checked_mul)
}

/// Expand `dimensions` into the ordered list of override combinations.
///
/// Disabled dimensions and dimensions whose specification yields no value are
/// skipped. An empty result means there is nothing to run.
pub fn expand(dimensions: &[Dimension], target_id: &str) -> Vec<Combination> {
    let participants = participants(dimensions, target_id);
    if participants.is_empty() {
        return Vec::new();
    }

    let mut combos: Vec<Vec<Override>> = vec![Vec::with_capacity(participants.len())];
    for p in &participants {
        let mut next = Vec::with_capacity(combos.len() * p.values.len());
        for prefix in &combos {
            for value in &p.values {
                let mut combo = prefix.clone();
                combo.push(Override::new(
                    p.target_id,
                    p.field,
                    serde_json::Value::Number(value.clone()),
                ));
                next.push(combo);
            }
        }
        combos = next;
    }

    combos.into_iter().map(Combination).collect()
}
