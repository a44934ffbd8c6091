//! Report assembly - per-run numeric outputs ready for rendering
//!
//! A report is a header plus one [`RunEntry`] per requested run. Each run is
//! processed independently: a run whose primary metric is missing is recorded
//! as [`RunStatus::Skipped`] with its error, and a run missing only optional
//! metrics is [`RunStatus::Partial`] with a warning per skipped sub-output.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use steplog::config::AnalysisConfig;
//! use steplog::report::{self, validate_runs};
//!
//! let paths = vec![PathBuf::from("e5/loss.jsonl"), PathBuf::from("e6/loss.jsonl")];
//! let names = vec!["e5".to_string(), "e6".to_string()];
//! let runs = validate_runs(&paths, &names)?;
//! let report = report::curvature_vs_fid(&runs, &AnalysisConfig::default());
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod curvature;
mod minsnr;
mod training;

pub use curvature::{curvature, curvature_overlay, curvature_vs_fid, SmoothedCurvature};
pub use minsnr::{
    effective_loss, histogram, minsnr_diagnostics, per_t_profile, snr_geometry, weight_curves,
    BestCheckpoint, EarlyPhase, Histogram, MinSnrDiagnostics, SnrGeometry, SnrPairs, TimestepUsage,
    WeightCurveBand, WeightCurveView,
};
pub use training::{grad_stats, step_curves, walltime_fid, GradStats, StepCurves, WalltimeCurve};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::curve::RunOutcome;
use crate::fanout::map_runs;
use crate::record::{read_records, Record};
use crate::series::SeriesExtractor;
use crate::{Error, Result};

/// Log files of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    /// Display name.
    pub name: String,
    /// Training log (`loss.jsonl`).
    pub loss: PathBuf,
    /// Results log (`results.jsonl`), for paired reports.
    pub results: Option<PathBuf>,
}

impl RunFiles {
    /// A run with only a training log.
    pub fn new(name: impl Into<String>, loss: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            loss: loss.into(),
            results: None,
        }
    }

    /// Attach a results log.
    #[must_use]
    pub fn with_results(mut self, results: impl Into<PathBuf>) -> Self {
        self.results = Some(results.into());
        self
    }

    /// The results log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the run has none.
    pub fn results(&self) -> Result<&Path> {
        self.results
            .as_deref()
            .ok_or_else(|| Error::InvalidInput(format!("run '{}' has no results log", self.name)))
    }
}

/// Pair each path with a name. Performs no I/O.
///
/// # Errors
///
/// Returns [`Error::RunCountMismatch`] if the counts differ.
pub fn validate_runs(paths: &[PathBuf], names: &[String]) -> Result<Vec<RunFiles>> {
    if paths.len() != names.len() {
        return Err(Error::RunCountMismatch {
            paths: paths.len(),
            names: names.len(),
        });
    }
    Ok(paths
        .iter()
        .zip(names)
        .map(|(path, name)| RunFiles::new(name.clone(), path.clone()))
        .collect())
}

/// Group `loss results loss results ..` paths into runs. Performs no I/O.
///
/// # Errors
///
/// Returns [`Error::UnpairedPaths`] for an odd path count and
/// [`Error::RunCountMismatch`] if pairs and names differ in count.
pub fn validate_pairs(paths: &[PathBuf], names: &[String]) -> Result<Vec<RunFiles>> {
    if paths.len() % 2 != 0 {
        return Err(Error::UnpairedPaths(paths.len()));
    }
    let pairs = paths.len() / 2;
    if pairs != names.len() {
        return Err(Error::RunCountMismatch {
            paths: pairs,
            names: names.len(),
        });
    }
    Ok(paths
        .chunks_exact(2)
        .zip(names)
        .map(|(pair, name)| RunFiles::new(name.clone(), pair[0].clone()).with_results(pair[1].clone()))
        .collect())
}

/// Outcome of one run within a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every sub-output was produced.
    Complete,
    /// The primary output was produced; some optional sub-outputs were not.
    Partial,
    /// The run produced nothing.
    Skipped,
}

/// One run's section of a report.
#[derive(Debug, Clone, Serialize)]
pub struct RunEntry<T> {
    name: String,
    status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> RunEntry<T> {
    /// A run that produced `data`; any warning makes it partial.
    pub fn produced(name: impl Into<String>, data: T, warnings: Vec<String>) -> Self {
        let status = if warnings.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        };
        Self {
            name: name.into(),
            status,
            data: Some(data),
            warnings,
            error: None,
        }
    }

    /// A run that produced nothing.
    pub fn skipped(name: impl Into<String>, error: &Error) -> Self {
        Self {
            name: name.into(),
            status: RunStatus::Skipped,
            data: None,
            warnings: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// Run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// The run's output, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Skipped sub-outputs.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Why the run was skipped.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<T> From<RunOutcome<T>> for RunEntry<T> {
    fn from(outcome: RunOutcome<T>) -> Self {
        match outcome.result {
            Ok(data) => Self::produced(outcome.name, data, Vec::new()),
            Err(e) => Self::skipped(outcome.name, &e),
        }
    }
}

/// A named report over one or more runs.
#[derive(Debug, Clone, Serialize)]
pub struct Report<T> {
    kind: String,
    generated_at: DateTime<Utc>,
    runs: Vec<RunEntry<T>>,
}

impl<T> Report<T> {
    /// Create a report stamped with the current time.
    pub fn new(kind: impl Into<String>, runs: Vec<RunEntry<T>>) -> Self {
        Self {
            kind: kind.into(),
            generated_at: Utc::now(),
            runs,
        }
    }

    /// Report kind (the subcommand that produced it).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Per-run sections, in request order.
    #[must_use]
    pub fn runs(&self) -> &[RunEntry<T>] {
        &self.runs
    }

    /// The section for run `name`.
    #[must_use]
    pub fn run(&self, name: &str) -> Option<&RunEntry<T>> {
        self.runs.iter().find(|r| r.name == name)
    }

    /// Whether no run produced output.
    #[must_use]
    pub fn all_skipped(&self) -> bool {
        self.runs.iter().all(|r| r.status == RunStatus::Skipped)
    }
}

/// Output of one run plus the optional sub-outputs it had to skip.
pub(crate) type RunOutput<T> = (T, Vec<String>);

/// Run `build` for every run and collect a report.
pub(crate) fn per_run<T, F>(kind: &str, runs: &[RunFiles], build: F) -> Report<T>
where
    T: Send,
    F: Fn(&RunFiles) -> Result<RunOutput<T>> + Sync + Send,
{
    let entries = map_runs(runs, |run| match build(run) {
        Ok((data, warnings)) => RunEntry::produced(run.name.clone(), data, warnings),
        Err(e) => {
            tracing::warn!(report = kind, run = %run.name, error = %e, "skipping run");
            RunEntry::skipped(run.name.clone(), &e)
        }
    });
    tracing::info!(report = kind, runs = runs.len(), "report assembled");
    Report::new(kind, entries)
}

/// Records of a log file under the configured vector keys.
pub(crate) fn load(path: &Path, config: &AnalysisConfig) -> Result<Vec<Record>> {
    read_records(path, &config.vector_keys)
}

/// Extractor under the configured step policy.
pub(crate) fn extractor(config: &AnalysisConfig) -> SeriesExtractor {
    SeriesExtractor::new(config.step_policy())
}

/// Record a skipped optional sub-output.
pub(crate) fn skip_optional(warnings: &mut Vec<String>, run: &str, what: &str, error: &Error) {
    tracing::warn!(run, sub_output = what, error = %error, "skipping optional output");
    warnings.push(format!("{what}: {error}"));
}

/// Source label used in errors: the file path.
pub(crate) fn source_label(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/nonexistent/{i}.jsonl"))).collect()
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("run{i}")).collect()
    }

    #[test]
    fn test_validate_runs_mismatch() {
        let err = validate_runs(&paths(2), &names(3)).unwrap_err();
        assert!(matches!(err, Error::RunCountMismatch { paths: 2, names: 3 }));
    }

    #[test]
    fn test_validate_pairs() {
        assert!(matches!(
            validate_pairs(&paths(3), &names(1)),
            Err(Error::UnpairedPaths(3))
        ));
        assert!(matches!(
            validate_pairs(&paths(4), &names(1)),
            Err(Error::RunCountMismatch { paths: 2, names: 1 })
        ));
        let runs = validate_pairs(&paths(4), &names(2)).unwrap();
        assert_eq!(runs[1].loss, PathBuf::from("/nonexistent/2.jsonl"));
        assert_eq!(runs[1].results().unwrap(), Path::new("/nonexistent/3.jsonl"));
    }

    #[test]
    fn test_entry_status() {
        let complete = RunEntry::produced("a", 1, vec![]);
        let partial = RunEntry::produced("b", 1, vec!["grad missing".to_string()]);
        let skipped: RunEntry<i32> = RunEntry::skipped("c", &Error::EmptySeries("x".into()));
        assert_eq!(complete.status(), RunStatus::Complete);
        assert_eq!(partial.status(), RunStatus::Partial);
        assert_eq!(skipped.status(), RunStatus::Skipped);
        assert!(skipped.error().unwrap().contains("Empty series"));

        let report = Report::new("test", vec![complete, partial, skipped]);
        assert!(!report.all_skipped());
        assert_eq!(report.run("b").unwrap().warnings().len(), 1);
    }

    #[test]
    fn test_missing_file_skips_run() {
        let runs = validate_runs(&paths(1), &names(1)).unwrap();
        let report = per_run("test", &runs, |run| {
            let records = load(&run.loss, &AnalysisConfig::default())?;
            Ok((records.len(), vec![]))
        });
        assert!(report.all_skipped());
        let error = report.runs()[0].error().unwrap();
        assert!(error.contains("Cannot read"));
        assert!(error.contains("/nonexistent/0.jsonl"));
    }
}
