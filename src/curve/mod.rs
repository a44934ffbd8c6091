//! Derived curves for cross-run comparison
//!
//! Per-timestep curves are indexed by the diffusion timestep, not the
//! training step. Per-timestep metrics are logged under a fixed prefix and an
//! integer suffix (`mse_per_t/mse_t0004`, `mse_per_t/mse_t4`).

mod cross_run;

pub use cross_run::{cross_run_alignment, RunAlignment, RunOutcome, RunSeries};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::series::{Series, WeightCurve};
use crate::{Error, Result};

/// Recover the timestep index from a prefixed per-timestep key.
///
/// ```rust
/// use steplog::curve::parse_timestep_key;
///
/// assert_eq!(parse_timestep_key("mse_per_t/mse_t0004", "mse_per_t/mse_t"), Some(4));
/// assert_eq!(parse_timestep_key("mse_per_t/mse_t17", "mse_per_t/mse_t"), Some(17));
/// assert_eq!(parse_timestep_key("mse_per_t/mse_tx", "mse_per_t/mse_t"), None);
/// ```
#[must_use]
pub fn parse_timestep_key(key: &str, prefix: &str) -> Option<usize> {
    let digits = key.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Scalar values indexed by timestep, sorted ascending by timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepProfile {
    t: Vec<usize>,
    values: Vec<f64>,
}

impl TimestepProfile {
    /// Create a profile from `(timestep, value)` pairs; sorted on the way in.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut pairs: Vec<(usize, f64)> = pairs.into_iter().collect();
        pairs.sort_by_key(|&(t, _)| t);
        let (t, values) = pairs.into_iter().unzip();
        Self { t, values }
    }

    /// Mean of every logged value per timestep, across all records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if no record carries a parsable
    /// prefixed scalar.
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate(records: &[Record], prefix: &str) -> Result<Self> {
        let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for record in records {
            for (key, value) in record.fields() {
                let (Some(t), Some(v)) = (parse_timestep_key(key, prefix), value.as_scalar())
                else {
                    continue;
                };
                let entry = sums.entry(t).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
        if sums.is_empty() {
            return Err(Error::key_not_found(format!("{prefix}*"), "records"));
        }
        Ok(Self::from_pairs(
            sums.into_iter().map(|(t, (sum, count))| (t, sum / count as f64)),
        ))
    }

    /// The profile logged by the last record carrying any prefixed key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if no record carries the prefix or the
    /// last such record has no parsable scalar entry.
    pub fn last(records: &[Record], prefix: &str) -> Result<Self> {
        let last = records
            .iter()
            .rev()
            .find(|r| r.fields().keys().any(|k| k.starts_with(prefix)))
            .ok_or_else(|| Error::key_not_found(format!("{prefix}*"), "records"))?;

        let profile = Self::from_pairs(last.fields().iter().filter_map(|(key, value)| {
            Some((parse_timestep_key(key, prefix)?, value.as_scalar()?))
        }));
        if profile.is_empty() {
            return Err(Error::key_not_found(format!("{prefix}<digits>"), "records"));
        }
        Ok(profile)
    }

    /// Timestep indices.
    #[must_use]
    pub fn t(&self) -> &[usize] {
        &self.t
    }

    /// Values, parallel to [`TimestepProfile::t`].
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of timesteps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Whether the profile is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Largest timestep, if any.
    #[must_use]
    pub fn max_t(&self) -> Option<usize> {
        self.t.last().copied()
    }

    /// Timesteps divided by the largest one (1.0 guard for an all-zero axis).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn normalized_t(&self) -> Vec<f64> {
        let max = self.max_t().unwrap_or(0) as f64;
        normalize_axis(self.t.iter().map(|&t| t as f64), max)
    }
}

fn normalize_axis(values: impl Iterator<Item = f64>, max: f64) -> Vec<f64> {
    let denom = if max > 0.0 { max } else { 1.0 };
    values.map(|v| v / denom).collect()
}

/// Unweighted and weighted per-timestep loss on a normalised timestep axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveLossCurve {
    /// Timestep indices of the profile.
    pub t: Vec<usize>,
    /// `t` divided by the largest timestep of curve and profile.
    pub t_norm: Vec<f64>,
    /// Profile values.
    pub unweighted: Vec<f64>,
    /// `weight(min(t, len − 1)) · value`.
    pub weighted: Vec<f64>,
}

/// Weight a per-timestep profile by a weight curve.
///
/// A timestep beyond the curve's resolution uses the curve's last weight.
///
/// # Errors
///
/// Returns [`Error::EmptySeries`] if the curve or the profile is empty.
#[allow(clippy::cast_precision_loss)]
pub fn effective_loss(curve: &WeightCurve, profile: &TimestepProfile) -> Result<EffectiveLossCurve> {
    if curve.is_empty() {
        return Err(Error::EmptySeries("weight curve has no points".to_string()));
    }
    if profile.is_empty() {
        return Err(Error::EmptySeries("per-timestep profile has no points".to_string()));
    }

    let last = curve.len() - 1;
    let weights = curve.weight();
    let weighted = profile
        .t()
        .iter()
        .zip(profile.values())
        .map(|(&t, &v)| weights[t.min(last)] * v)
        .collect();

    let curve_max = curve.t().iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let profile_max = profile.max_t().unwrap_or(0) as f64;
    let max_t = curve_max.max(profile_max);

    Ok(EffectiveLossCurve {
        t: profile.t().to_vec(),
        t_norm: normalize_axis(profile.t().iter().map(|&t| t as f64), max_t),
        unweighted: profile.values().to_vec(),
        weighted,
    })
}

/// Mean ± one standard deviation of sampled timesteps, clipped to a curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampledBand {
    /// Mean sampled timestep.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// `max(t_min, mean − std)`.
    pub low: f64,
    /// `min(t_max, mean + std)`.
    pub high: f64,
}

impl WeightCurve {
    /// Timesteps divided by the largest one (1.0 guard for an all-zero axis).
    #[must_use]
    pub fn normalized_t(&self) -> Vec<f64> {
        let max = self.t().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        normalize_axis(self.t().iter().copied(), max)
    }

    /// The curve with weights divided by their mean.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty curve or zero mean weight.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_normalized(&self) -> Result<Self> {
        if self.is_empty() {
            return Err(Error::InvalidInput("cannot normalise an empty weight curve".to_string()));
        }
        let mean = self.weight().iter().sum::<f64>() / self.len() as f64;
        if mean == 0.0 || !mean.is_finite() {
            return Err(Error::InvalidInput(format!("mean weight is {mean}")));
        }
        Self::new(
            self.t().to_vec(),
            self.weight().iter().map(|w| w / mean).collect(),
        )
    }

    /// Where training actually sampled: mean ± std of logged `t_mean` values,
    /// clipped to this curve's timestep range.
    #[must_use]
    pub fn sampled_band(&self, t_means: &Series) -> Option<SampledBand> {
        let (mean, std) = t_means.mean_std()?;
        let t_min = self.t().first().copied()?;
        let t_max = self.t().last().copied()?;
        Some(SampledBand {
            mean,
            std,
            low: t_min.max(mean - std),
            high: t_max.min(mean + std),
        })
    }
}

/// Map steps linearly onto wall time: `run_time · step / max_step`.
///
/// # Errors
///
/// Returns [`Error::EmptySeries`] for no steps and [`Error::InvalidInput`]
/// when the largest step is not positive.
#[allow(clippy::cast_precision_loss)]
pub fn walltime_axis(steps: &[i64], run_time_s: f64) -> Result<Vec<f64>> {
    let max_step = steps
        .iter()
        .copied()
        .max()
        .ok_or_else(|| Error::EmptySeries("no steps to map onto wall time".to_string()))?;
    if max_step <= 0 {
        return Err(Error::InvalidInput(format!(
            "largest step is {max_step}; cannot scale wall time"
        )));
    }
    let max_step = max_step as f64;
    Ok(steps
        .iter()
        .map(|&s| run_time_s * (s as f64 / max_step))
        .collect())
}

/// Total run time in seconds from a results record (`run_time_s`, then
/// `_elapsed_sec`).
#[must_use]
pub fn run_time_seconds(record: &Record) -> Option<f64> {
    record
        .scalar("run_time_s")
        .or_else(|| record.scalar("_elapsed_sec"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "mse_per_t/mse_t";

    fn curve(n: usize) -> WeightCurve {
        #[allow(clippy::cast_precision_loss)]
        let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
        #[allow(clippy::cast_precision_loss)]
        let w: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        WeightCurve::new(t, w).unwrap()
    }

    #[test]
    fn test_parse_timestep_key_rejects_other_keys() {
        assert_eq!(parse_timestep_key("train/loss", PREFIX), None);
        assert_eq!(parse_timestep_key(PREFIX, PREFIX), None);
        assert_eq!(parse_timestep_key("mse_per_t/mse_t12a", PREFIX), None);
    }

    #[test]
    fn test_effective_loss_clamps_to_last_weight() {
        let c = curve(100);
        let profile = TimestepProfile::from_pairs([(150, 2.0)]);
        let eff = effective_loss(&c, &profile).unwrap();
        assert_eq!(eff.weighted, vec![c.weight()[99] * 2.0]);
        assert!((eff.t_norm[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_effective_loss_normalises_by_joint_max() {
        let c = curve(11); // t up to 10
        let profile = TimestepProfile::from_pairs([(5, 1.0), (0, 1.0)]);
        let eff = effective_loss(&c, &profile).unwrap();
        assert_eq!(eff.t, vec![0, 5]);
        assert_eq!(eff.t_norm, vec![0.0, 0.5]);
        assert_eq!(eff.unweighted, vec![1.0, 1.0]);
        assert_eq!(eff.weighted, vec![1.0, 6.0]);
    }

    #[test]
    fn test_effective_loss_empty_inputs() {
        let empty_curve = WeightCurve::new(vec![], vec![]).unwrap();
        let profile = TimestepProfile::from_pairs([(0, 1.0)]);
        assert!(matches!(
            effective_loss(&empty_curve, &profile),
            Err(Error::EmptySeries(_))
        ));
        assert!(matches!(
            effective_loss(&curve(3), &TimestepProfile::from_pairs([])),
            Err(Error::EmptySeries(_))
        ));
    }

    #[test]
    fn test_aggregate_averages_across_records() {
        let records = vec![
            Record::builder(0).scalar("mse_per_t/mse_t0004", 1.0).build(),
            Record::builder(1)
                .scalar("mse_per_t/mse_t4", 3.0)
                .scalar("mse_per_t/mse_t0001", 5.0)
                .scalar("train/loss", 9.0)
                .build(),
        ];
        let p = TimestepProfile::aggregate(&records, PREFIX).unwrap();
        assert_eq!(p.t(), &[1, 4]);
        assert_eq!(p.values(), &[5.0, 2.0]);
    }

    #[test]
    fn test_last_profile_uses_last_record() {
        let records = vec![
            Record::builder(0).scalar("mse_per_t/mse_t0", 1.0).build(),
            Record::builder(1).scalar("mse_per_t/mse_t2", 7.0).build(),
            Record::builder(2).scalar("train/loss", 0.1).build(),
        ];
        let p = TimestepProfile::last(&records, PREFIX).unwrap();
        assert_eq!(p.t(), &[2]);
        assert_eq!(p.values(), &[7.0]);
        assert!(TimestepProfile::last(&records[2..], PREFIX).is_err());
    }

    #[test]
    fn test_weight_curve_normalisations() {
        let c = WeightCurve::new(vec![0.0, 5.0, 10.0], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(c.normalized_t(), vec![0.0, 0.5, 1.0]);
        let n = c.mean_normalized().unwrap();
        assert_eq!(n.weight(), &[0.5, 1.0, 1.5]);

        let flat = WeightCurve::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(flat.normalized_t(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_sampled_band_clipped_to_curve() {
        let c = WeightCurve::new(vec![0.0, 10.0], vec![1.0, 1.0]).unwrap();
        let t_means = Series::from_pairs("mins_snr/t_mean", [(0, 0.0), (1, 10.0)]);
        let band = c.sampled_band(&t_means).unwrap();
        assert!((band.mean - 5.0).abs() < 1e-12);
        assert!((band.std - 5.0).abs() < 1e-12);
        assert!((band.low - 0.0).abs() < 1e-12);
        assert!((band.high - 10.0).abs() < 1e-12);
        assert!(c.sampled_band(&Series::empty("x")).is_none());
    }

    #[test]
    fn test_walltime_axis() {
        let t = walltime_axis(&[0, 500, 1000], 120.0).unwrap();
        assert_eq!(t, vec![0.0, 60.0, 120.0]);
        assert!(walltime_axis(&[], 1.0).is_err());
        assert!(walltime_axis(&[0], 1.0).is_err());
    }

    #[test]
    fn test_run_time_seconds_fallback() {
        let r = Record::builder(0).scalar("_elapsed_sec", 42.0).build();
        assert_eq!(run_time_seconds(&r), Some(42.0));
        let r = Record::builder(0)
            .scalar("_elapsed_sec", 42.0)
            .scalar("run_time_s", 40.0)
            .build();
        assert_eq!(run_time_seconds(&r), Some(40.0));
    }
}
