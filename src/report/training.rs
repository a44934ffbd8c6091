//! Training-curve reports: loss, gradient, curvature and FID against step or
//! wall time.

use serde::Serialize;

use super::{extractor, load, per_run, skip_optional, source_label, Report, RunFiles};
use crate::config::AnalysisConfig;
use crate::curve::{run_time_seconds, walltime_axis};
use crate::record::Record;
use crate::series::{Series, SeriesExtractor};
use crate::Error;

/// Loss with optional gradient norms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradStats {
    /// Training loss.
    pub loss: Series,
    /// Global gradient L2 norm.
    pub grad_l2: Option<Series>,
    /// Mean absolute gradient.
    pub grad_abs_mean: Option<Series>,
}

/// Look up an optional metric, recording a warning when it is absent.
fn optional(
    extractor: &SeriesExtractor,
    records: &[Record],
    key: &str,
    run: &RunFiles,
    source: &str,
    warnings: &mut Vec<String>,
) -> Option<Series> {
    match extractor.require(records, key, source) {
        Ok(series) => Some(series),
        Err(e) => {
            skip_optional(warnings, &run.name, key, &e);
            None
        }
    }
}

/// Loss and gradient statistics per run.
///
/// Loss is primary; a run without gradient keys still reports its loss.
#[must_use]
pub fn grad_stats(runs: &[RunFiles], config: &AnalysisConfig) -> Report<GradStats> {
    let extractor = extractor(config);
    let keys = &config.keys;
    per_run("grad-stats", runs, |run| {
        let records = load(&run.loss, config)?;
        let source = source_label(&run.loss);
        let loss = extractor.require(&records, &keys.loss, &source)?;

        let mut warnings = Vec::new();
        let grad_l2 = optional(&extractor, &records, &keys.grad_l2, run, &source, &mut warnings);
        let grad_abs_mean = optional(
            &extractor,
            &records,
            &keys.grad_abs_mean,
            run,
            &source,
            &mut warnings,
        );
        Ok((
            GradStats {
                loss,
                grad_l2,
                grad_abs_mean,
            },
            warnings,
        ))
    })
}

/// Loss, gradient, curvature and FID against step for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepCurves {
    /// Training loss (from the training log).
    pub loss: Series,
    /// Global gradient L2 norm.
    pub grad_l2: Option<Series>,
    /// Hutchinson trace mean.
    pub curvature: Option<Series>,
    /// Validation FID (from the results log).
    pub fid: Option<Series>,
}

/// Step curves per `(loss, results)` run pair.
#[must_use]
pub fn step_curves(runs: &[RunFiles], config: &AnalysisConfig) -> Report<StepCurves> {
    let extractor = extractor(config);
    let keys = &config.keys;
    per_run("step-curves", runs, |run| {
        let loss_records = load(&run.loss, config)?;
        let results_path = run.results()?;
        let results_records = load(results_path, config)?;

        let source = source_label(&run.loss);
        let loss = extractor.require(&loss_records, &keys.loss, &source)?;

        let mut warnings = Vec::new();
        let grad_l2 = optional(&extractor, &loss_records, &keys.grad_l2, run, &source, &mut warnings);
        let curvature = optional(
            &extractor,
            &loss_records,
            &keys.curvature_mean,
            run,
            &source,
            &mut warnings,
        );
        let fid = optional(
            &extractor,
            &results_records,
            &keys.fid,
            run,
            &source_label(results_path),
            &mut warnings,
        );
        Ok((
            StepCurves {
                loss,
                grad_l2,
                curvature,
                fid,
            },
            warnings,
        ))
    })
}

/// FID against approximate wall time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalltimeCurve {
    /// Training steps of the FID evaluations.
    pub steps: Vec<i64>,
    /// Wall time at each step, in `unit`.
    pub time: Vec<f64>,
    /// `"s"` or `"min"`.
    pub unit: &'static str,
    /// FID values.
    pub fid: Vec<f64>,
    /// Total run time in seconds.
    pub run_time_s: f64,
}

/// FID against wall time per `(loss, results)` run pair.
///
/// Steps map linearly onto the run's total time, read from the first
/// results record that carries it.
#[must_use]
pub fn walltime_fid(runs: &[RunFiles], config: &AnalysisConfig, minutes: bool) -> Report<WalltimeCurve> {
    let extractor = extractor(config);
    let keys = &config.keys;
    per_run("walltime-fid", runs, |run| {
        let loss_records = load(&run.loss, config)?;
        let results_path = run.results()?;
        let results_records = load(results_path, config)?;

        let fid = extractor.require(&loss_records, &keys.fid, &source_label(&run.loss))?;
        let run_time_s = results_records
            .iter()
            .find_map(run_time_seconds)
            .ok_or_else(|| {
                Error::key_not_found("run_time_s | _elapsed_sec", source_label(results_path))
            })?;

        let mut time = walltime_axis(fid.steps(), run_time_s)?;
        let unit = if minutes {
            time.iter_mut().for_each(|t| *t /= 60.0);
            "min"
        } else {
            "s"
        };
        let (_, steps, fid) = fid.into_parts();
        Ok((
            WalltimeCurve {
                steps,
                time,
                unit,
                fid,
                run_time_s,
            },
            Vec::new(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunStatus;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn log(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_grad_stats_loss_only_is_partial() {
        let file = log(&[
            r#"{"_i": 0, "out": {"train/loss": 1.0}}"#,
            r#"{"_i": 1, "out": {"train/loss": 0.9}}"#,
        ]);
        let runs = vec![RunFiles::new("a", file.path())];
        let report = grad_stats(&runs, &AnalysisConfig::default());
        let entry = report.run("a").unwrap();
        assert_eq!(entry.status(), RunStatus::Partial);
        assert_eq!(entry.warnings().len(), 2);
        let data = entry.data().unwrap();
        assert_eq!(data.loss.values(), &[1.0, 0.9]);
        assert!(data.grad_l2.is_none());
    }

    #[test]
    fn test_walltime_fid_minutes() {
        let loss = log(&[
            r#"{"_i": 500, "out": {"val/fid": 80.0}}"#,
            r#"{"_i": 1000, "out": {"val/fid": 40.0}}"#,
        ]);
        let results = log(&[r#"{"out": {"run_time_s": 600.0}}"#]);
        let runs = vec![RunFiles::new("a", loss.path()).with_results(results.path())];
        let report = walltime_fid(&runs, &AnalysisConfig::default(), true);
        let curve = report.run("a").unwrap().data().unwrap();
        assert_eq!(curve.time, vec![5.0, 10.0]);
        assert_eq!(curve.unit, "min");
        assert_eq!(curve.fid, vec![80.0, 40.0]);
    }

    #[test]
    fn test_walltime_without_run_time_skips() {
        let loss = log(&[r#"{"_i": 5, "out": {"val/fid": 80.0}}"#]);
        let results = log(&[r#"{"out": {"val/fid": 70.0}}"#]);
        let runs = vec![RunFiles::new("a", loss.path()).with_results(results.path())];
        let report = walltime_fid(&runs, &AnalysisConfig::default(), false);
        assert!(report.all_skipped());
    }

    #[test]
    fn test_step_curves_reads_fid_from_results() {
        let loss = log(&[
            r#"{"_i": 0, "out": {"train/loss": 1.0, "train/grad_global_L2": 3.0}}"#,
            r#"{"_i": 10, "out": {"train/loss": 0.5, "curvature/hutch_trace_mean": 7.0}}"#,
        ]);
        let results = log(&[r#"{"_i": 10, "out": {"val/fid": 55.0}}"#]);
        let runs = vec![RunFiles::new("a", loss.path()).with_results(results.path())];
        let report = step_curves(&runs, &AnalysisConfig::default());
        let entry = report.run("a").unwrap();
        assert_eq!(entry.status(), RunStatus::Complete);
        let curves = entry.data().unwrap();
        assert_eq!(curves.fid.as_ref().unwrap().steps(), &[10]);
        assert_eq!(curves.curvature.as_ref().unwrap().values(), &[7.0]);
        assert_eq!(curves.grad_l2.as_ref().unwrap().steps(), &[0]);
    }
}
