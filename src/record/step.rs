//! Step resolution policy
//!
//! Training logs disagree on where the step lives: some carry `global_step`,
//! some `step`, the wrapped `{"_i": .., "out": {..}}` shape carries `_i`, and
//! some carry nothing at all. A [`StepPolicy`] is the ordered list of places
//! to look; the first tier present on a record wins.

use serde::{Deserialize, Serialize};

use super::Record;

/// Explicit per-line index field written by the wrapped log shape.
pub const LINE_INDEX_FIELD: &str = "_i";

/// One tier of a [`StepPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepSource {
    /// A named scalar field on the record.
    Field(String),
    /// The record's physical line position in its file (0-based).
    LineIndex,
}

impl StepSource {
    /// Shorthand for [`StepSource::Field`].
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Resolve this tier alone against `record`.
    ///
    /// Float steps truncate toward zero; non-finite values do not resolve.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve(&self, record: &Record) -> Option<i64> {
        match self {
            Self::Field(name) => record
                .scalar(name)
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64),
            Self::LineIndex => i64::try_from(record.line()).ok(),
        }
    }
}

/// Ordered, injectable step-resolution policy.
///
/// The default order is `global_step`, `step`, `_i`, then line position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPolicy {
    tiers: Vec<StepSource>,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                StepSource::field("global_step"),
                StepSource::field("step"),
                StepSource::field(LINE_INDEX_FIELD),
                StepSource::LineIndex,
            ],
        }
    }
}

impl StepPolicy {
    /// Create a policy from explicit tiers, tried in order.
    #[must_use]
    pub fn new(tiers: Vec<StepSource>) -> Self {
        Self { tiers }
    }

    /// Create a policy from field names, optionally ending in a line-index tier.
    #[must_use]
    pub fn from_fields<I, S>(fields: I, line_index_fallback: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tiers: Vec<StepSource> = fields.into_iter().map(StepSource::field).collect();
        if line_index_fallback {
            tiers.push(StepSource::LineIndex);
        }
        Self { tiers }
    }

    /// The tiers in priority order.
    #[must_use]
    pub fn tiers(&self) -> &[StepSource] {
        &self.tiers
    }

    /// Resolve the step of `record`, or `None` if no tier applies.
    #[must_use]
    pub fn resolve(&self, record: &Record) -> Option<i64> {
        self.tiers.iter().find_map(|tier| tier.resolve(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: usize, fields: &[(&str, f64)]) -> Record {
        fields
            .iter()
            .fold(Record::builder(line), |b, (k, v)| b.scalar(*k, *v))
            .build()
    }

    #[test]
    fn test_default_priority_global_step_first() {
        let r = record(7, &[("_i", 3.0), ("step", 2.0), ("global_step", 1.0)]);
        assert_eq!(StepPolicy::default().resolve(&r), Some(1));
    }

    #[test]
    fn test_step_before_line_index_field() {
        let r = record(7, &[("_i", 3.0), ("step", 2.0)]);
        assert_eq!(StepPolicy::default().resolve(&r), Some(2));
    }

    #[test]
    fn test_explicit_index_before_line_position() {
        let r = record(7, &[("_i", 3.0)]);
        assert_eq!(StepPolicy::default().resolve(&r), Some(3));
    }

    #[test]
    fn test_line_position_last_resort() {
        let r = record(7, &[("train/loss", 0.5)]);
        assert_eq!(StepPolicy::default().resolve(&r), Some(7));
    }

    #[test]
    fn test_policy_without_fallback_can_fail() {
        let policy = StepPolicy::from_fields(["step"], false);
        let r = record(7, &[("train/loss", 0.5)]);
        assert_eq!(policy.resolve(&r), None);
    }

    #[test]
    fn test_float_step_truncates() {
        let r = record(0, &[("step", 99.9)]);
        assert_eq!(StepSource::field("step").resolve(&r), Some(99));
    }
}
