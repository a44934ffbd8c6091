//! Curvature reports: single-run diagnostics, multi-run overlay, and
//! curvature against FID milestones.

use serde::Serialize;

use super::{extractor, load, per_run, source_label, Report, RunEntry, RunFiles};
use crate::config::AnalysisConfig;
use crate::curvature::CurvatureDiagnostics;
use crate::curve::{cross_run_alignment, RunAlignment, RunSeries};
use crate::fanout::map_runs;
use crate::series::Series;
use crate::smooth::rolling_mean;
use crate::{Error, Result};

/// Curvature diagnostics for a single run.
///
/// # Errors
///
/// Fails if the log cannot be read, or the trace mean or std is missing or
/// never logged on a shared step. Missing loss or gradient only adds a
/// warning.
pub fn curvature(run: &RunFiles, config: &AnalysisConfig) -> Result<Report<CurvatureDiagnostics>> {
    let records = load(&run.loss, config)?;
    let series = extractor(config).extract_all(&records);
    let diagnostics = CurvatureDiagnostics::build(
        &series,
        &config.keys,
        config.smooth_window,
        &source_label(&run.loss),
    )?;
    let warnings = diagnostics.warnings.clone();
    Ok(Report::new(
        "curvature",
        vec![RunEntry::produced(run.name.clone(), diagnostics, warnings)],
    ))
}

/// Raw and smoothed curvature of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothedCurvature {
    /// Hutchinson trace mean as logged.
    pub raw: Series,
    /// Rolling mean, parallel to `raw`.
    pub smoothed: Vec<f64>,
}

/// Smoothed curvature per run, for overlaying on one step axis.
#[must_use]
pub fn curvature_overlay(runs: &[RunFiles], config: &AnalysisConfig) -> Report<SmoothedCurvature> {
    let extractor = extractor(config);
    per_run("curvature-overlay", runs, |run| {
        let records = load(&run.loss, config)?;
        let raw = extractor.require(&records, &config.keys.curvature_mean, &source_label(&run.loss))?;
        let smoothed = rolling_mean(raw.values(), config.smooth_window);
        Ok((SmoothedCurvature { raw, smoothed }, Vec::new()))
    })
}

/// Curvature at each FID milestone, per run.
///
/// FID steps are matched to the nearest logged curvature step; the output is
/// sorted by the matched step.
#[must_use]
pub fn curvature_vs_fid(runs: &[RunFiles], config: &AnalysisConfig) -> Report<RunAlignment> {
    let extractor = extractor(config);
    let loaded: Vec<Result<RunSeries>> = map_runs(runs, |run| {
        let records = load(&run.loss, config)?;
        Ok(RunSeries {
            name: run.name.clone(),
            diagnostic: extractor.extract(&records, &config.keys.curvature_mean),
            milestone: extractor.extract(&records, &config.keys.fid),
        })
    });

    let mut ready = Vec::new();
    let mut load_errors = Vec::with_capacity(runs.len());
    for result in loaded {
        match result {
            Ok(series) => {
                ready.push(series);
                load_errors.push(None);
            }
            Err(e) => load_errors.push(Some(e)),
        }
    }

    let mut aligned = cross_run_alignment(&ready).into_iter();
    let entries = runs
        .iter()
        .zip(load_errors)
        .map(|(run, load_error)| match load_error {
            Some(e) => {
                tracing::warn!(run = %run.name, error = %e, "skipping run");
                RunEntry::skipped(run.name.clone(), &e)
            }
            None => aligned.next().map_or_else(
                || RunEntry::skipped(run.name.clone(), &Error::Other("alignment missing".to_string())),
                RunEntry::from,
            ),
        })
        .collect();
    Report::new("curvature-vs-fid", entries)
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

    fn curvature_log() -> NamedTempFile {
        log(&[
            r#"{"_i": 0, "out": {"curvature/hutch_trace_mean": 1.0, "curvature/hutch_trace_std": 0.1}}"#,
            r#"{"_i": 100, "out": {"curvature/hutch_trace_mean": 2.0, "curvature/hutch_trace_std": 0.2}}"#,
            r#"{"_i": 120, "out": {"val/fid": 60.0}}"#,
            r#"{"_i": 200, "out": {"curvature/hutch_trace_mean": 3.0, "curvature/hutch_trace_std": 0.3}}"#,
        ])
    }

    #[test]
    fn test_curvature_vs_fid_skips_missing_file_only() {
        let good = curvature_log();
        let runs = vec![
            RunFiles::new("missing", "/nonexistent/loss.jsonl"),
            RunFiles::new("good", good.path()),
        ];
        let report = curvature_vs_fid(&runs, &AnalysisConfig::default());
        assert_eq!(report.runs()[0].status(), RunStatus::Skipped);
        let aligned = report.run("good").unwrap().data().unwrap();
        assert_eq!(aligned.steps, vec![100]);
        assert_eq!(aligned.diagnostic, vec![2.0]);
        assert_eq!(aligned.milestone, vec![60.0]);
    }

    #[test]
    fn test_curvature_single_run_partial_without_gradient() {
        let file = curvature_log();
        let report = curvature(&RunFiles::new("e5", file.path()), &AnalysisConfig::default()).unwrap();
        let entry = report.run("e5").unwrap();
        assert_eq!(entry.status(), RunStatus::Partial);
        assert_eq!(entry.data().unwrap().trace.steps(), &[0, 100, 200]);
    }

    #[test]
    fn test_curvature_single_run_missing_trace_is_fatal() {
        let file = log(&[r#"{"_i": 0, "out": {"train/loss": 1.0}}"#]);
        let err = curvature(&RunFiles::new("e1", file.path()), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    #[test]
    fn test_overlay_smooths_per_run() {
        let file = curvature_log();
        let config = AnalysisConfig::builder().smooth_window(3).build();
        let report = curvature_overlay(&[RunFiles::new("a", file.path())], &config);
        let data = report.run("a").unwrap().data().unwrap();
        assert_eq!(data.raw.values(), &[1.0, 2.0, 3.0]);
        assert_eq!(data.smoothed.len(), 3);
        assert!((data.smoothed[1] - 2.0).abs() < 1e-12);
    }
}
