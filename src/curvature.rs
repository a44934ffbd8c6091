//! Curvature diagnostics from Hutchinson trace estimates
//!
//! The training loop estimates `tr(H)` of the loss Hessian with Hutchinson
//! probes and logs the probe mean and standard deviation. This module
//! summarises probe samples and assembles the per-run curvature views.

use std::collections::BTreeMap;

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::align::{align_or_intersect, intersect, AlignedSeries};
use crate::config::MetricKeys;
use crate::series::Series;
use crate::smooth::rolling_mean;
use crate::{Error, Result};

/// Summary of Hutchinson probe samples `vᵀAv`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceSummary {
    /// Mean over probes (the trace estimate).
    pub mean: f64,
    /// Population standard deviation over probes.
    pub std: f64,
    /// Number of probes.
    pub probes: usize,
}

impl TraceSummary {
    /// Summarise probe samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySeries`] for no samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f64]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::EmptySeries("no Hutchinson probe samples".to_string()));
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Ok(Self {
            mean,
            std: var.sqrt(),
            probes: samples.len(),
        })
    }
}

/// Estimate `tr(A)` with Rademacher probes through a matrix-vector product.
///
/// `matvec` computes `A·v` for a `dim`-vector `v`; the operator is never
/// materialised.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for zero `dim` or `probes`, or if
/// `matvec` returns a vector of the wrong length.
pub fn hutchinson_trace<F>(mut matvec: F, dim: usize, probes: usize, seed: u64) -> Result<TraceSummary>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    if dim == 0 || probes == 0 {
        return Err(Error::InvalidInput(format!(
            "hutchinson needs dim > 0 and probes > 0 (got {dim}, {probes})"
        )));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(probes);
    for _ in 0..probes {
        let v = DVector::from_fn(dim, |_, _| if rng.gen_bool(0.5) { 1.0 } else { -1.0 });
        let av = matvec(&v);
        if av.len() != dim {
            return Err(Error::InvalidInput(format!(
                "matvec returned length {} for dim {dim}",
                av.len()
            )));
        }
        samples.push(v.dot(&av));
    }
    TraceSummary::from_samples(&samples)
}

/// Single-run curvature views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvatureDiagnostics {
    /// Trace mean and std on their shared steps.
    pub trace: AlignedSeries,
    /// Rolling mean of the trace mean.
    pub mean_smoothed: Vec<f64>,
    /// Training loss, when logged.
    pub loss: Option<Series>,
    /// Trace mean against the gradient metric on common steps.
    pub vs_gradient: Option<AlignedSeries>,
    /// Sub-outputs that were skipped, and why.
    pub warnings: Vec<String>,
}

impl CurvatureDiagnostics {
    /// Assemble the views from a run's extracted series.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if trace mean or std is missing and
    /// [`Error::NoOverlap`] if they share no step. Loss and gradient are
    /// optional.
    pub fn build(
        series: &BTreeMap<String, Series>,
        keys: &MetricKeys,
        smooth_window: usize,
        source_name: &str,
    ) -> Result<Self> {
        let lookup = |key: &str| {
            series
                .get(key)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::key_not_found(key, source_name))
        };
        let mean = lookup(keys.curvature_mean.as_str())?;
        let std = lookup(keys.curvature_std.as_str())?;
        let trace = align_or_intersect(mean, std)?;

        let mean_values = trace.column(0).unwrap_or_default();
        let mean_smoothed = rolling_mean(mean_values, smooth_window);

        let mut warnings = Vec::new();
        let loss = series.get(&keys.loss).filter(|s| !s.is_empty()).cloned();
        if loss.is_none() {
            tracing::debug!(key = %keys.loss, source = source_name, "no loss alongside curvature");
        }

        let vs_gradient = match lookup(keys.grad_abs_mean.as_str()) {
            Ok(grad) => {
                let trace_mean = trace.to_series(0).unwrap_or_else(|| Series::empty(mean.key()));
                match intersect(&trace_mean, grad) {
                    Ok(joined) => Some(joined),
                    Err(e) => {
                        tracing::warn!(source = source_name, error = %e, "skipping curvature vs gradient");
                        warnings.push(e.to_string());
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(source = source_name, error = %e, "skipping curvature vs gradient");
                warnings.push(e.to_string());
                None
            }
        };

        Ok(Self {
            trace,
            mean_smoothed,
            loss,
            vs_gradient,
            warnings,
        })
    }
}
