//! Cross-run alignment of a dense diagnostic against sparse milestones
//!
//! Every run is aligned on its own; one run failing never aborts the others.

use serde::Serialize;

use crate::align::nearest_join;
use crate::fanout::map_runs;
use crate::series::Series;
use crate::{Error, Result};

/// The two series of one run to be aligned.
#[derive(Debug, Clone)]
pub struct RunSeries {
    /// Display name of the run.
    pub name: String,
    /// Dense diagnostic (e.g. curvature trace).
    pub diagnostic: Series,
    /// Sparse milestone (e.g. validation FID).
    pub milestone: Series,
}

/// Per-run result of a multi-run operation.
#[derive(Debug)]
pub struct RunOutcome<T> {
    /// Display name of the run.
    pub name: String,
    /// The run's result, or why it was skipped.
    pub result: Result<T>,
}

impl<T> RunOutcome<T> {
    /// Wrap `result` for run `name`.
    pub fn new(name: impl Into<String>, result: Result<T>) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }

    /// Whether the run produced a value.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// `(matched step, diagnostic, milestone)` triples for one run, sorted by
/// matched step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAlignment {
    /// Display name of the run.
    pub name: String,
    /// Diagnostic step each milestone was matched to.
    pub steps: Vec<i64>,
    /// Diagnostic value at the matched step.
    pub diagnostic: Vec<f64>,
    /// Milestone value.
    pub milestone: Vec<f64>,
    /// Step each milestone was originally logged at.
    pub milestone_steps: Vec<i64>,
}

fn align_run(run: &RunSeries) -> Result<RunAlignment> {
    if run.diagnostic.is_empty() {
        return Err(Error::key_not_found(run.diagnostic.key(), &run.name));
    }
    if run.milestone.is_empty() {
        return Err(Error::key_not_found(run.milestone.key(), &run.name));
    }

    let mut matches = nearest_join(&run.diagnostic, &run.milestone)?;
    matches.sort_by_key(|m| m.matched_step);

    Ok(RunAlignment {
        name: run.name.clone(),
        steps: matches.iter().map(|m| m.matched_step).collect(),
        diagnostic: matches.iter().map(|m| m.diagnostic).collect(),
        milestone: matches.iter().map(|m| m.milestone).collect(),
        milestone_steps: matches.iter().map(|m| m.milestone_step).collect(),
    })
}

/// Align each run's milestones to its nearest diagnostic steps.
///
/// Outcomes follow input order. A run missing either series yields
/// [`Error::KeyNotFound`] in its outcome and is logged as skipped.
#[must_use]
pub fn cross_run_alignment(runs: &[RunSeries]) -> Vec<RunOutcome<RunAlignment>> {
    map_runs(runs, |run| {
        let result = align_run(run);
        match &result {
            Ok(alignment) => {
                tracing::debug!(run = %run.name, points = alignment.steps.len(), "aligned run");
            }
            Err(e) => tracing::warn!(run = %run.name, error = %e, "skipping run"),
        }
        RunOutcome::new(run.name.clone(), result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, diagnostic: Series, milestone: Series) -> RunSeries {
        RunSeries {
            name: name.to_string(),
            diagnostic,
            milestone,
        }
    }

    #[test]
    fn test_alignment_sorted_by_matched_step() {
        let diag = Series::from_pairs("curv", [(0, 1.0), (100, 2.0), (200, 3.0)]);
        let fid = Series::from_pairs("fid", [(190, 40.0), (10, 80.0)]);
        let out = cross_run_alignment(&[run("a", diag, fid)]);
        let a = out[0].result.as_ref().unwrap();
        assert_eq!(a.steps, vec![0, 200]);
        assert_eq!(a.diagnostic, vec![1.0, 3.0]);
        assert_eq!(a.milestone, vec![80.0, 40.0]);
        assert_eq!(a.milestone_steps, vec![10, 190]);
    }

    #[test]
    fn test_failed_run_does_not_abort_siblings() {
        let diag = Series::from_pairs("curv", [(0, 1.0)]);
        let fid = Series::from_pairs("fid", [(0, 9.0)]);
        let out = cross_run_alignment(&[
            run("broken", diag.clone(), Series::empty("fid")),
            run("ok", diag, fid),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "broken");
        assert!(matches!(out[0].result, Err(Error::KeyNotFound { .. })));
        assert!(out[1].is_ok());
    }
}
