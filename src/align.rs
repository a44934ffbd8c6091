//! Series alignment - joining sparse series on their step axis
//!
//! Two joins:
//!
//! - [`intersect`] / [`intersect_all`]: keep only steps every series logged
//!   ([`align_or_intersect`] skips the join for series logged together).
//! - [`nearest_join`]: anchor on a sparse milestone series and pair each
//!   milestone with the closest step of a denser diagnostic series.
//!
//! Both index each input once (hash map for the intersection, a sorted
//! [`StepIndex`] with binary search for the nearest join) rather than
//! rescanning per step.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::series::Series;
use crate::{Error, Result};

/// N series joined on a common, strictly increasing step axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSeries {
    steps: Vec<i64>,
    keys: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl AlignedSeries {
    /// Create aligned series from a step axis and labelled columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if steps are not strictly increasing,
    /// a column length differs from the step count, or keys and columns
    /// disagree in number.
    pub fn new(steps: Vec<i64>, keys: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if keys.len() != columns.len() {
            return Err(Error::InvalidInput(format!(
                "{} keys for {} columns",
                keys.len(),
                columns.len()
            )));
        }
        if steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidInput(
                "aligned steps must be strictly increasing".to_string(),
            ));
        }
        if let Some((key, col)) = keys
            .iter()
            .zip(&columns)
            .find(|(_, col)| col.len() != steps.len())
        {
            return Err(Error::InvalidInput(format!(
                "column '{key}' has {} values for {} steps",
                col.len(),
                steps.len()
            )));
        }
        Ok(Self {
            steps,
            keys,
            columns,
        })
    }

    /// The shared step axis.
    #[must_use]
    pub fn steps(&self) -> &[i64] {
        &self.steps
    }

    /// Column labels, in join order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Column `index`, in join order.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&[f64]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Column labelled `key`.
    #[must_use]
    pub fn column_by_key(&self, key: &str) -> Option<&[f64]> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.column(i))
    }

    /// Number of joined steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step survived the join.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Column `index` as a standalone [`Series`] on the shared steps.
    #[must_use]
    pub fn to_series(&self, index: usize) -> Option<Series> {
        let column = self.columns.get(index)?;
        Some(Series::from_pairs(
            self.keys[index].clone(),
            self.steps.iter().copied().zip(column.iter().copied()),
        ))
    }
}

/// Step → value lookup with later duplicates overriding earlier ones.
fn last_value_map(series: &Series) -> FxHashMap<i64, f64> {
    series.iter().collect()
}

/// Intersection join of two series.
///
/// A step logged more than once within one series contributes its last value.
///
/// # Errors
///
/// Returns [`Error::NoOverlap`] if the series share no step.
pub fn intersect(a: &Series, b: &Series) -> Result<AlignedSeries> {
    intersect_all(&[a, b])
}

/// Intersection join of any number of series.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an empty input list and
/// [`Error::NoOverlap`] if the series share no step.
pub fn intersect_all(series: &[&Series]) -> Result<AlignedSeries> {
    let Some((first, rest)) = series.split_first() else {
        return Err(Error::InvalidInput("nothing to intersect".to_string()));
    };

    let maps: Vec<FxHashMap<i64, f64>> = series.iter().map(|s| last_value_map(s)).collect();
    let mut common: Vec<i64> = maps[0]
        .keys()
        .copied()
        .filter(|step| maps[1..].iter().all(|m| m.contains_key(step)))
        .collect();
    common.sort_unstable();

    if common.is_empty() {
        let right = if rest.is_empty() {
            first.key().to_string()
        } else {
            rest.iter().map(|s| s.key()).collect::<Vec<_>>().join(", ")
        };
        return Err(Error::NoOverlap {
            left: first.key().to_string(),
            right,
        });
    }

    let columns = maps
        .iter()
        .map(|m| common.iter().map(|step| m[step]).collect())
        .collect();
    let keys = series.iter().map(|s| s.key().to_string()).collect();

    tracing::debug!(series = series.len(), steps = common.len(), "intersection join");
    AlignedSeries::new(common, keys, columns)
}

/// Pair two series that were logged together, else intersect them.
///
/// Series logged in the same records share a step axis exactly; when that
/// axis is strictly increasing it is used as-is.
///
/// # Errors
///
/// Returns [`Error::NoOverlap`] if the fallback intersection is empty.
pub fn align_or_intersect(a: &Series, b: &Series) -> Result<AlignedSeries> {
    let paired = a.steps() == b.steps()
        && !a.is_empty()
        && a.steps().windows(2).all(|w| w[0] < w[1]);
    if !paired {
        return intersect(a, b);
    }
    AlignedSeries::new(
        a.steps().to_vec(),
        vec![a.key().to_string(), b.key().to_string()],
        vec![a.values().to_vec(), b.values().to_vec()],
    )
}

/// A series indexed for nearest-step lookup: sorted, one value per step.
#[derive(Debug, Clone)]
pub struct StepIndex {
    steps: Vec<i64>,
    values: Vec<f64>,
}

impl StepIndex {
    /// Sort once and keep the last value logged for each step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySeries`] if `series` is empty.
    pub fn build(series: &Series) -> Result<Self> {
        if series.is_empty() {
            return Err(Error::EmptySeries(format!(
                "cannot join against empty series '{}'",
                series.key()
            )));
        }
        let mut pairs: Vec<(i64, f64)> = series.iter().collect();
        pairs.sort_by_key(|&(step, _)| step);

        let mut steps: Vec<i64> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
        for (step, value) in pairs {
            if steps.last() == Some(&step) {
                if let Some(last) = values.last_mut() {
                    *last = value;
                }
            } else {
                steps.push(step);
                values.push(value);
            }
        }
        Ok(Self { steps, values })
    }

    /// The indexed step closest to `step`; ties go to the smaller step.
    #[must_use]
    pub fn nearest(&self, step: i64) -> (i64, f64) {
        let idx = self.steps.partition_point(|&s| s < step);
        let pick = if idx == 0 {
            0
        } else if idx == self.steps.len() {
            idx - 1
        } else {
            let below = step.abs_diff(self.steps[idx - 1]);
            let above = self.steps[idx].abs_diff(step);
            if below <= above {
                idx - 1
            } else {
                idx
            }
        };
        (self.steps[pick], self.values[pick])
    }

    /// Number of distinct indexed steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false: an index is never built from an empty series.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One milestone paired with its nearest diagnostic observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearestMatch {
    /// Step the milestone was logged at.
    pub milestone_step: i64,
    /// Diagnostic step it was paired with.
    pub matched_step: i64,
    /// Diagnostic value at `matched_step`.
    pub diagnostic: f64,
    /// Milestone value.
    pub milestone: f64,
}

/// Pair every milestone observation with the nearest dense observation.
///
/// Output follows milestone order, one match per milestone observation.
///
/// # Errors
///
/// Returns [`Error::EmptySeries`] if `dense` is empty.
pub fn nearest_join(dense: &Series, milestone: &Series) -> Result<Vec<NearestMatch>> {
    let index = StepIndex::build(dense)?;
    let matches: Vec<NearestMatch> = milestone
        .iter()
        .map(|(step, value)| {
            let (matched_step, diagnostic) = index.nearest(step);
            NearestMatch {
                milestone_step: step,
                matched_step,
                diagnostic,
                milestone: value,
            }
        })
        .collect();
    tracing::debug!(
        dense = dense.key(),
        milestone = milestone.key(),
        matches = matches.len(),
        "nearest-step join"
    );
    Ok(matches)
}
