//! Series extraction - projecting sparse records onto one metric
//!
//! Logs are sparse: most records carry a single family of keys. Extraction
//! tolerates that by skipping, silently, every record that lacks the key,
//! carries a non-scalar under it, or has no resolvable step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{Record, StepPolicy};
use crate::{Error, Result};

/// Step/value series for one metric key.
///
/// Arrays are parallel and in file order. Duplicate steps are preserved;
/// nothing here sorts or deduplicates implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    key: String,
    steps: Vec<i64>,
    values: Vec<f64>,
}

impl Series {
    /// Create a series from parallel arrays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the arrays differ in length.
    pub fn new(key: impl Into<String>, steps: Vec<i64>, values: Vec<f64>) -> Result<Self> {
        let key = key.into();
        if steps.len() != values.len() {
            return Err(Error::InvalidInput(format!(
                "series '{key}' has {} steps but {} values",
                steps.len(),
                values.len()
            )));
        }
        Ok(Self { key, steps, values })
    }

    /// Create an empty series for `key`.
    #[must_use]
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            steps: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Create a series from `(step, value)` pairs.
    pub fn from_pairs(key: impl Into<String>, pairs: impl IntoIterator<Item = (i64, f64)>) -> Self {
        let (steps, values) = pairs.into_iter().unzip();
        Self {
            key: key.into(),
            steps,
            values,
        }
    }

    /// Append one observation.
    pub fn push(&mut self, step: i64, value: f64) {
        self.steps.push(step);
        self.values.push(value);
    }

    /// Metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Steps, in file order.
    #[must_use]
    pub fn steps(&self) -> &[i64] {
        &self.steps
    }

    /// Values, parallel to [`Series::steps`].
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the series has no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterate `(step, value)` pairs in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.steps.iter().copied().zip(self.values.iter().copied())
    }

    /// Split into `(key, steps, values)`.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<i64>, Vec<f64>) {
        (self.key, self.steps, self.values)
    }

    /// Whether steps never decrease.
    #[must_use]
    pub fn is_step_sorted(&self) -> bool {
        self.steps.windows(2).all(|w| w[0] <= w[1])
    }

    /// A copy sorted by step. The sort is stable, so duplicate steps keep
    /// their file order.
    #[must_use]
    pub fn sorted_by_step(&self) -> Self {
        let mut pairs: Vec<(i64, f64)> = self.iter().collect();
        pairs.sort_by_key(|&(step, _)| step);
        Self::from_pairs(self.key.clone(), pairs)
    }

    /// A copy with the values replaced, keeping steps and key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `values` has a different length.
    pub fn with_values(&self, values: Vec<f64>) -> Result<Self> {
        Self::new(self.key.clone(), self.steps.clone(), values)
    }

    /// Observations with `step <= max_step` (early-phase view).
    #[must_use]
    pub fn truncate_steps(&self, max_step: i64) -> Self {
        Self::from_pairs(
            self.key.clone(),
            self.iter().filter(|&(step, _)| step <= max_step),
        )
    }

    /// The observation with the smallest non-NaN value.
    ///
    /// Ties keep the earliest observation. Used to mark the best checkpoint
    /// of a lower-is-better metric such as FID.
    #[must_use]
    pub fn best_min(&self) -> Option<(i64, f64)> {
        self.iter()
            .filter(|(_, v)| !v.is_nan())
            .fold(None, |best, (step, value)| match best {
                Some((_, b)) if b <= value => best,
                _ => Some((step, value)),
            })
    }

    /// Population mean and standard deviation of the values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_std(&self) -> Option<(f64, f64)> {
        if self.values.is_empty() {
            return None;
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some((mean, var.sqrt()))
    }
}

/// A timestep-indexed loss-reweighting function, logged once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightCurve {
    t: Vec<f64>,
    weight: Vec<f64>,
}

impl WeightCurve {
    /// Create a weight curve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the arrays differ in length or `t`
    /// decreases anywhere.
    pub fn new(t: Vec<f64>, weight: Vec<f64>) -> Result<Self> {
        if t.len() != weight.len() {
            return Err(Error::InvalidInput(format!(
                "weight curve has {} timesteps but {} weights",
                t.len(),
                weight.len()
            )));
        }
        if let Some(i) = t.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::InvalidInput(format!(
                "weight curve timesteps decrease at index {}: {} -> {}",
                i + 1,
                t[i],
                t[i + 1]
            )));
        }
        Ok(Self { t, weight })
    }

    /// Timestep indices.
    #[must_use]
    pub fn t(&self) -> &[f64] {
        &self.t
    }

    /// Weights, parallel to [`WeightCurve::t`].
    #[must_use]
    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    /// Resolution of the curve.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weight.len()
    }

    /// Whether the curve has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }
}

/// Projects record streams onto named metrics under a [`StepPolicy`].
#[derive(Debug, Clone, Default)]
pub struct SeriesExtractor {
    policy: StepPolicy,
}

impl SeriesExtractor {
    /// Create an extractor with an explicit step policy.
    #[must_use]
    pub const fn new(policy: StepPolicy) -> Self {
        Self { policy }
    }

    /// The step policy in use.
    #[must_use]
    pub const fn policy(&self) -> &StepPolicy {
        &self.policy
    }

    /// Extract the scalar series for `key`. May be empty.
    #[must_use]
    pub fn extract(&self, records: &[Record], key: &str) -> Series {
        let mut series = Series::empty(key);
        for record in records {
            let Some(value) = record.scalar(key) else {
                continue;
            };
            if let Some(step) = self.policy.resolve(record) {
                series.push(step, value);
            }
        }
        series
    }

    /// Extract the series for a primary metric that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if no record yields a value for `key`.
    pub fn require(&self, records: &[Record], key: &str, source_name: &str) -> Result<Series> {
        let series = self.extract(records, key);
        if series.is_empty() {
            return Err(Error::key_not_found(key, source_name));
        }
        Ok(series)
    }

    /// Extract every scalar key in one pass.
    #[must_use]
    pub fn extract_all(&self, records: &[Record]) -> BTreeMap<String, Series> {
        let mut all: BTreeMap<String, Series> = BTreeMap::new();
        for record in records {
            let Some(step) = self.policy.resolve(record) else {
                continue;
            };
            for (key, value) in record.fields() {
                if let Some(v) = value.as_scalar() {
                    all.entry(key.clone())
                        .or_insert_with(|| Series::empty(key.clone()))
                        .push(step, v);
                }
            }
        }
        all
    }

    /// The first record carrying both vector keys, as a [`WeightCurve`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if no record has both, or
    /// [`Error::InvalidInput`] if the found pair is not a valid curve.
    pub fn extract_first_vector(
        &self,
        records: &[Record],
        t_key: &str,
        w_key: &str,
    ) -> Result<WeightCurve> {
        records
            .iter()
            .find_map(|r| Some((r.vector(t_key)?, r.vector(w_key)?)))
            .ok_or_else(|| Error::key_not_found(format!("{t_key} & {w_key}"), "records"))
            .and_then(|(t, w)| WeightCurve::new(t.to_vec(), w.to_vec()))
    }
}
