//! Timestep-weighting reports: weight curves, per-timestep loss, effective
//! loss, and the single-run Min-SNR diagnostics bundle.

use serde::Serialize;

use super::{extractor, load, per_run, skip_optional, source_label, Report, RunEntry, RunFiles};
use crate::config::AnalysisConfig;
use crate::curve::{self, EffectiveLossCurve, SampledBand, TimestepProfile};
use crate::record::{Record, StepPolicy};
use crate::series::{Series, WeightCurve};
use crate::{Error, Result};

/// Bins used for the sampled-timestep histogram.
const T_MEAN_BINS: usize = 30;

/// A weight curve with its normalised axes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightCurveView {
    /// Timesteps.
    pub t: Vec<f64>,
    /// `t / max t`.
    pub t_norm: Vec<f64>,
    /// Weights as logged.
    pub weight: Vec<f64>,
    /// Weights divided by their mean, when the mean is non-zero.
    pub mean_normalized: Option<Vec<f64>>,
}

impl WeightCurveView {
    fn new(curve: &WeightCurve, run: &str, warnings: &mut Vec<String>) -> Self {
        let mean_normalized = match curve.mean_normalized() {
            Ok(normalized) => Some(normalized.weight().to_vec()),
            Err(e) => {
                skip_optional(warnings, run, "mean-normalised weights", &e);
                None
            }
        };
        Self {
            t: curve.t().to_vec(),
            t_norm: curve.normalized_t(),
            weight: curve.weight().to_vec(),
            mean_normalized,
        }
    }
}

fn load_weight_curve(records: &[Record], config: &AnalysisConfig) -> Result<WeightCurve> {
    extractor(config).extract_first_vector(records, &config.keys.weight_t, &config.keys.weight)
}

/// The logged weight curve of each run.
#[must_use]
pub fn weight_curves(runs: &[RunFiles], config: &AnalysisConfig) -> Report<WeightCurveView> {
    per_run("weight-curves", runs, |run| {
        let records = load(&run.loss, config)?;
        let curve = load_weight_curve(&records, config)?;
        let mut warnings = Vec::new();
        let view = WeightCurveView::new(&curve, &run.name, &mut warnings);
        Ok((view, warnings))
    })
}

/// Unweighted and weighted per-timestep loss of each run.
///
/// The per-timestep loss is averaged over every record of the run.
#[must_use]
pub fn effective_loss(runs: &[RunFiles], config: &AnalysisConfig) -> Report<EffectiveLossCurve> {
    per_run("effective-loss", runs, |run| {
        let records = load(&run.loss, config)?;
        let curve = load_weight_curve(&records, config)?;
        let profile = TimestepProfile::aggregate(&records, &config.keys.mse_prefix)?;
        Ok((curve::effective_loss(&curve, &profile)?, Vec::new()))
    })
}

/// The last per-timestep loss profile logged by each run.
#[must_use]
pub fn per_t_profile(runs: &[RunFiles], config: &AnalysisConfig) -> Report<TimestepProfile> {
    per_run("per-t-profile", runs, |run| {
        let records = load(&run.loss, config)?;
        Ok((TimestepProfile::last(&records, &config.keys.mse_prefix)?, Vec::new()))
    })
}

/// Equal-width histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// `bins + 1` bin edges.
    pub edges: Vec<f64>,
    /// Count per bin; the last bin includes its right edge.
    pub counts: Vec<usize>,
}

/// Histogram of the finite values over their own range.
///
/// A degenerate range `[v, v]` widens to `[v − 0.5, v + 0.5]`. Returns `None`
/// for zero bins or no finite values.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if bins == 0 || finite.is_empty() {
        return None;
    }
    let mut lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let edges = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0; bins];
    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    Some(Histogram { edges, counts })
}

/// Best (lowest) FID checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestCheckpoint {
    /// Step of the checkpoint.
    pub step: i64,
    /// Its FID.
    pub fid: f64,
}

/// Early-training loss with every FID evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarlyPhase {
    /// Last step included in `loss`.
    pub max_step: i64,
    /// Loss up to `max_step`.
    pub loss: Series,
    /// All FID evaluations.
    pub fid: Series,
    /// Lowest FID, ignoring NaN.
    pub best: Option<BestCheckpoint>,
}

/// Weight curve with the band of timesteps training actually sampled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightCurveBand {
    /// The curve.
    pub curve: WeightCurveView,
    /// Mean ± std of the logged `t_mean`, clipped to the curve.
    pub band: Option<SampledBand>,
}

/// Where training spent its timesteps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestepUsage {
    /// Mean sampled timestep per step.
    pub t_mean: Series,
    /// Distribution of `t_mean` values.
    pub histogram: Option<Histogram>,
}

/// Min-SNR diagnostics of one run; each section is independent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinSnrDiagnostics {
    /// Early-phase loss and FID.
    pub early: Option<EarlyPhase>,
    /// Weight curve with sampled band.
    pub weight_curve: Option<WeightCurveBand>,
    /// Sampled-timestep statistics.
    pub timesteps: Option<TimestepUsage>,
}

/// Mean SNR against a partner metric logged in the same record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnrPairs {
    /// Step of each pair.
    pub steps: Vec<i64>,
    /// Mean SNR.
    pub snr: Vec<f64>,
    /// Partner metric.
    pub value: Vec<f64>,
}

impl SnrPairs {
    fn collect(records: &[Record], policy: &StepPolicy, snr_key: &str, partner: &str) -> Self {
        let mut pairs = Self::default();
        for record in records {
            let (Some(snr), Some(value)) = (record.scalar(snr_key), record.scalar(partner)) else {
                continue;
            };
            let Some(step) = policy.resolve(record) else {
                continue;
            };
            pairs.steps.push(step);
            pairs.snr.push(snr);
            pairs.value.push(value);
        }
        pairs
    }
}

/// Gradient norm and curvature against mean SNR, one point per record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnrGeometry {
    /// Global gradient L2 norm against SNR.
    pub grad: Option<SnrPairs>,
    /// Hutchinson trace mean against SNR.
    pub curvature: Option<SnrPairs>,
}

/// Gradient and curvature against mean SNR per run.
///
/// Only records carrying both the SNR and the partner metric contribute a
/// point. A partner never logged alongside SNR is skipped with a warning.
#[must_use]
pub fn snr_geometry(runs: &[RunFiles], config: &AnalysisConfig) -> Report<SnrGeometry> {
    let extractor = extractor(config);
    let keys = &config.keys;
    per_run("snr-geometry", runs, |run| {
        let records = load(&run.loss, config)?;
        let source = source_label(&run.loss);
        if !records.iter().any(|r| r.scalar(&keys.snr_mean).is_some()) {
            return Err(Error::key_not_found(&keys.snr_mean, source));
        }

        let mut warnings = Vec::new();
        let mut paired = |partner: &str| {
            let pairs = SnrPairs::collect(&records, extractor.policy(), &keys.snr_mean, partner);
            if pairs.steps.is_empty() {
                let e = Error::key_not_found(partner, &source);
                skip_optional(&mut warnings, &run.name, partner, &e);
                None
            } else {
                Some(pairs)
            }
        };
        let grad = paired(&keys.grad_l2);
        let curvature = paired(&keys.curvature_mean);
        Ok((SnrGeometry { grad, curvature }, warnings))
    })
}

/// Early-phase, weight-curve and timestep diagnostics for one run.
///
/// Each section is skipped with a warning when its metrics are missing.
///
/// # Errors
///
/// Fails only if the log cannot be read.
pub fn minsnr_diagnostics(run: &RunFiles, config: &AnalysisConfig) -> Result<Report<MinSnrDiagnostics>> {
    let records = load(&run.loss, config)?;
    let extractor = extractor(config);
    let keys = &config.keys;
    let source = source_label(&run.loss);
    let mut warnings = Vec::new();

    let early = extractor
        .require(&records, &keys.loss, &source)
        .and_then(|loss| Ok((loss, extractor.require(&records, &keys.fid, &source)?)))
        .map(|(loss, fid)| EarlyPhase {
            max_step: config.early_max_step,
            loss: loss.truncate_steps(config.early_max_step),
            best: fid.best_min().map(|(step, fid)| BestCheckpoint { step, fid }),
            fid,
        })
        .map_err(|e| skip_optional(&mut warnings, &run.name, "early loss/fid", &e))
        .ok();

    let t_mean = extractor
        .require(&records, &keys.t_mean, &source)
        .map_err(|e| skip_optional(&mut warnings, &run.name, "timestep usage", &e))
        .ok();

    let weight_curve = match load_weight_curve(&records, config) {
        Ok(curve) => Some(WeightCurveBand {
            band: t_mean.as_ref().and_then(|t| curve.sampled_band(t)),
            curve: WeightCurveView::new(&curve, &run.name, &mut warnings),
        }),
        Err(e) => {
            skip_optional(&mut warnings, &run.name, "weight curve", &e);
            None
        }
    };

    let timesteps = t_mean.map(|t_mean| TimestepUsage {
        histogram: histogram(t_mean.values(), T_MEAN_BINS),
        t_mean,
    });

    let diagnostics = MinSnrDiagnostics {
        early,
        weight_curve,
        timesteps,
    };
    Ok(Report::new(
        "minsnr-diagnostics",
        vec![RunEntry::produced(run.name.clone(), diagnostics, warnings)],
    ))
}
