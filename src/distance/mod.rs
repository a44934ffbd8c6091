//! Fréchet distance between Gaussian feature summaries
//!
//! ```text
//! d² = ||μ1 − μ2||² + tr(Σ1) + tr(Σ2) − 2·tr((Σ1·Σ2)^{1/2})
//! ```
//!
//! The product square root is never formed. Its trace is the sum of square
//! roots of the eigenvalues of `Σ1^{1/2} Σ2 Σ1^{1/2}`, which is symmetric and
//! shares its spectrum with `Σ1·Σ2`. Small-sample covariances are often not
//! positive definite; negative eigenvalues are clipped to zero at both
//! eigendecompositions and a negative final score is clipped to zero.

mod baseline;

pub use baseline::{
    noise_baseline, BaselineScore, FeatureExtractor, ImageBatch, NoiseBaselineConfig, NoiseMode,
};

use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Relative tolerance for the covariance symmetry check.
const SYMMETRY_TOLERANCE: f64 = 1e-6;

/// Mean vector and covariance matrix of an empirical feature distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianSummary {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
}

/// On-disk reference statistics: `{"mu": [..], "sigma": [[..], ..]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceStats {
    /// Mean vector.
    pub mu: Vec<f64>,
    /// Covariance rows.
    pub sigma: Vec<Vec<f64>>,
}

impl GaussianSummary {
    /// Create a summary, checking shapes and covariance symmetry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the covariance is not `D×D` for a
    /// mean of length `D`, holds a NaN or infinite entry, or is not
    /// symmetric within tolerance.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let d = mean.len();
        if covariance.nrows() != d || covariance.ncols() != d {
            return Err(Error::InvalidInput(format!(
                "covariance is {}x{} for a mean of length {d}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if let Some(i) = mean.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!("mean[{i}] is {}", mean[i])));
        }
        if let Some(i) = covariance.iter().position(|v| !v.is_finite()) {
            let (row, col) = (i % d, i / d);
            return Err(Error::InvalidInput(format!(
                "covariance[{row}, {col}] is {}",
                covariance[(row, col)]
            )));
        }
        let asymmetry = (&covariance - covariance.transpose()).amax();
        let scale = covariance.amax().max(1.0);
        if asymmetry > SYMMETRY_TOLERANCE * scale {
            return Err(Error::InvalidInput(format!(
                "covariance is not symmetric (max |Σ − Σᵀ| = {asymmetry:e})"
            )));
        }
        Ok(Self { mean, covariance })
    }

    /// Summarise an `n × D` feature matrix (one sample per row).
    ///
    /// Uses the sample mean and the unbiased (`n − 1`) covariance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySeries`] for zero rows and
    /// [`Error::InvalidInput`] for a single row.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_features(features: &DMatrix<f64>) -> Result<Self> {
        let (n, d) = features.shape();
        if n == 0 {
            return Err(Error::EmptySeries("no feature rows to summarise".to_string()));
        }
        if n == 1 {
            return Err(Error::InvalidInput(
                "covariance needs at least two samples".to_string(),
            ));
        }

        let mean = DVector::from_iterator(d, (0..d).map(|j| features.column(j).mean()));
        let mut centered = features.clone();
        for (j, m) in mean.iter().enumerate() {
            centered.column_mut(j).add_scalar_mut(-m);
        }
        let covariance = (centered.transpose() * &centered) / (n - 1) as f64;

        tracing::debug!(samples = n, dim = d, "built gaussian summary");
        Self::new(mean, covariance)
    }

    /// Create a summary from the nested-vector reference format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for ragged or mis-sized rows.
    pub fn from_reference(stats: ReferenceStats) -> Result<Self> {
        let d = stats.mu.len();
        if stats.sigma.len() != d {
            return Err(Error::InvalidInput(format!(
                "sigma has {} rows for mu of length {d}",
                stats.sigma.len()
            )));
        }
        let mut flat = Vec::with_capacity(d * d);
        for (i, row) in stats.sigma.iter().enumerate() {
            if row.len() != d {
                return Err(Error::InvalidInput(format!(
                    "sigma row {i} has {} entries, expected {d}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
        Self::new(
            DVector::from_vec(stats.mu),
            DMatrix::from_row_slice(d, d, &flat),
        )
    }

    /// Load reference statistics from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] naming the path, or JSON or shape errors.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::read(path, e))?;
        let stats: ReferenceStats = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_reference(stats)
    }

    /// Convert back to the nested-vector reference format.
    #[must_use]
    pub fn to_reference(&self) -> ReferenceStats {
        ReferenceStats {
            mu: self.mean.iter().copied().collect(),
            sigma: self
                .covariance
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
        }
    }

    /// Feature dimension `D`.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Mean vector.
    #[must_use]
    pub const fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Covariance matrix.
    #[must_use]
    pub const fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }
}

/// Square root of a symmetric matrix with negative eigenvalues clipped.
fn psd_sqrt(m: &DMatrix<f64>) -> DMatrix<f64> {
    let eig = m.clone().symmetric_eigen();
    let roots = eig.eigenvalues.map(|l| l.max(0.0).sqrt());
    &eig.eigenvectors * DMatrix::from_diagonal(&roots) * eig.eigenvectors.transpose()
}

/// Fréchet distance (squared) between two Gaussian summaries.
///
/// Symmetric in its arguments and zero for identical inputs, up to
/// floating-point tolerance.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the summaries differ in dimension or
/// the score is not finite.
pub fn frechet_distance(a: &GaussianSummary, b: &GaussianSummary) -> Result<f64> {
    if a.dim() != b.dim() {
        return Err(Error::InvalidInput(format!(
            "cannot compare summaries of dimension {} and {}",
            a.dim(),
            b.dim()
        )));
    }

    let mean_term = (&a.mean - &b.mean).norm_squared();

    let root_a = psd_sqrt(&a.covariance);
    let inner = &root_a * &b.covariance * &root_a;
    let inner = (&inner + inner.transpose()) * 0.5;
    let eigenvalues = inner.symmetric_eigen().eigenvalues;

    let clipped = eigenvalues.iter().filter(|l| **l < 0.0).count();
    if clipped > 0 {
        tracing::debug!(clipped, "clipped negative eigenvalues of covariance product");
    }
    let trace_covmean: f64 = eigenvalues.iter().map(|l| l.max(0.0).sqrt()).sum();

    let d2 = mean_term + a.covariance.trace() + b.covariance.trace() - 2.0 * trace_covmean;
    if !d2.is_finite() {
        return Err(Error::InvalidInput(format!("Fréchet distance is {d2}")));
    }
    Ok(d2.max(0.0))
}
