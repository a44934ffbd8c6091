//! Analysis configuration
//!
//! Metric key names, step resolution and smoothing are all configurable;
//! defaults match the training loop's log schema. Loaded from JSON with every
//! field optional, or assembled with [`AnalysisConfigBuilder`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::record::{StepPolicy, DEFAULT_VECTOR_KEYS, LINE_INDEX_FIELD};
use crate::{Error, Result};

/// Metric key names used by the reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricKeys {
    /// Training loss.
    pub loss: String,
    /// Global gradient L2 norm.
    pub grad_l2: String,
    /// Mean absolute gradient (curvature-vs-gradient axis).
    pub grad_abs_mean: String,
    /// Hutchinson trace mean.
    pub curvature_mean: String,
    /// Hutchinson trace standard deviation.
    pub curvature_std: String,
    /// Validation FID.
    pub fid: String,
    /// Prefix of per-timestep MSE keys.
    pub mse_prefix: String,
    /// Weight-curve timestep vector.
    pub weight_t: String,
    /// Weight-curve weight vector.
    pub weight: String,
    /// Mean sampled timestep per step.
    pub t_mean: String,
    /// Mean SNR of the sampled timesteps per step.
    pub snr_mean: String,
}

impl Default for MetricKeys {
    fn default() -> Self {
        Self {
            loss: "train/loss".to_string(),
            grad_l2: "train/grad_global_L2".to_string(),
            grad_abs_mean: "train/grad_abs_mean".to_string(),
            curvature_mean: "curvature/hutch_trace_mean".to_string(),
            curvature_std: "curvature/hutch_trace_std".to_string(),
            fid: "val/fid".to_string(),
            mse_prefix: "mse_per_t/mse_t".to_string(),
            weight_t: DEFAULT_VECTOR_KEYS[0].to_string(),
            weight: DEFAULT_VECTOR_KEYS[1].to_string(),
            t_mean: "mins_snr/t_mean".to_string(),
            snr_mean: "mins_snr/snr_mean".to_string(),
        }
    }
}

/// Settings shared by every report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Metric key names.
    pub keys: MetricKeys,
    /// Step fields in priority order.
    pub step_fields: Vec<String>,
    /// Fall back to the record's line index when no step field resolves.
    pub line_index_fallback: bool,
    /// Keys whose list values are kept as vectors.
    pub vector_keys: Vec<String>,
    /// Rolling-mean window for smoothed curvature (`<= 1` disables).
    pub smooth_window: usize,
    /// Last step of the early-training view.
    pub early_max_step: i64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            keys: MetricKeys::default(),
            step_fields: vec![
                "global_step".to_string(),
                "step".to_string(),
                LINE_INDEX_FIELD.to_string(),
            ],
            line_index_fallback: true,
            vector_keys: DEFAULT_VECTOR_KEYS.iter().map(ToString::to_string).collect(),
            smooth_window: 1,
            early_max_step: 10_000,
        }
    }
}

impl AnalysisConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Load a JSON config; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] naming the path, or JSON errors.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded analysis config");
        Ok(config)
    }

    /// The step policy described by `step_fields` and `line_index_fallback`.
    #[must_use]
    pub fn step_policy(&self) -> StepPolicy {
        StepPolicy::from_fields(&self.step_fields, self.line_index_fallback)
    }
}

/// Builder for [`AnalysisConfig`]
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    /// Replace all metric keys.
    #[must_use]
    pub fn keys(mut self, keys: MetricKeys) -> Self {
        self.config.keys = keys;
        self
    }

    /// Set step fields in priority order.
    #[must_use]
    pub fn step_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.step_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable the line-index fallback.
    #[must_use]
    pub const fn line_index_fallback(mut self, enabled: bool) -> Self {
        self.config.line_index_fallback = enabled;
        self
    }

    /// Set the vector keys.
    #[must_use]
    pub fn vector_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.vector_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the curvature smoothing window.
    #[must_use]
    pub const fn smooth_window(mut self, window: usize) -> Self {
        self.config.smooth_window = window;
        self
    }

    /// Set the last step of the early-training view.
    #[must_use]
    pub const fn early_max_step(mut self, step: i64) -> Self {
        self.config.early_max_step = step;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AnalysisConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StepSource;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"smooth_window": 21, "keys": {"fid": "eval/fid"}}"#).unwrap();
        assert_eq!(config.smooth_window, 21);
        assert_eq!(config.keys.fid, "eval/fid");
        assert_eq!(config.keys.loss, "train/loss");
        assert_eq!(config.early_max_step, 10_000);
    }

    #[test]
    fn test_default_step_policy_order() {
        let policy = AnalysisConfig::default().step_policy();
        assert_eq!(policy, StepPolicy::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = AnalysisConfig::builder()
            .step_fields(["epoch"])
            .line_index_fallback(false)
            .smooth_window(5)
            .build();
        assert_eq!(config.step_policy().tiers(), &[StepSource::field("epoch")]);
        assert_eq!(config.smooth_window, 5);
    }
}
