//! Zero-skill baseline: pure noise scored against reference statistics
//!
//! The feature network is an external collaborator behind [`FeatureExtractor`].
//! Noise is sampled in generator space `[-1, 1]` and mapped to `[0, 1]` before
//! embedding, the same path real samples take.

use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{frechet_distance, GaussianSummary};
use crate::{Error, Result};

/// A batch of images, `n × c × h × w`, row-major, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    /// Shape as `(n, c, h, w)`.
    pub shape: (usize, usize, usize, usize),
    /// Pixel values.
    pub pixels: Vec<f32>,
}

impl ImageBatch {
    /// Number of images.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.shape.0
    }

    /// Whether the batch holds no images.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.shape.0 == 0
    }

    /// Pixels of image `index`, or `None` if the index is past the batch or
    /// `pixels` is shorter than `shape` implies.
    #[must_use]
    pub fn image(&self, index: usize) -> Option<&[f32]> {
        let (n, c, h, w) = self.shape;
        if index >= n {
            return None;
        }
        let size = c * h * w;
        self.pixels.get(index * size..(index + 1) * size)
    }
}

/// Maps image batches to embedding vectors, one row per image.
pub trait FeatureExtractor {
    /// Embed `batch`, returning a `batch.len() × D` matrix.
    ///
    /// # Errors
    ///
    /// Implementations report their own failures.
    fn embed(&mut self, batch: &ImageBatch) -> Result<DMatrix<f64>>;
}

/// Noise distribution in generator space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMode {
    /// Uniform on `[-1, 1]`.
    #[default]
    Uniform,
    /// Standard normal clamped to `[-1, 1]`.
    Gaussian,
}

/// Settings for [`noise_baseline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseBaselineConfig {
    /// Images per seed.
    pub n_images: usize,
    /// Images per embedding call.
    pub batch_size: usize,
    /// Channels per image.
    pub channels: usize,
    /// Image height.
    pub height: usize,
    /// Image width.
    pub width: usize,
    /// One score per seed.
    pub seeds: Vec<u64>,
    /// Noise distribution.
    pub mode: NoiseMode,
}

impl Default for NoiseBaselineConfig {
    fn default() -> Self {
        Self {
            n_images: 50_000,
            batch_size: 250,
            channels: 3,
            height: 32,
            width: 32,
            seeds: vec![0],
            mode: NoiseMode::Uniform,
        }
    }
}

/// Baseline score for one seed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineScore {
    /// RNG seed.
    pub seed: u64,
    /// Images scored.
    pub n_images: usize,
    /// Fréchet distance against the reference.
    pub score: f64,
}

impl BaselineScore {
    /// Population mean and standard deviation across seeds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_std(scores: &[Self]) -> Option<(f64, f64)> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = scores.iter().map(|s| s.score).sum::<f64>() / n;
        let var = scores.iter().map(|s| (s.score - mean).powi(2)).sum::<f64>() / n;
        Some((mean, var.sqrt()))
    }
}

fn noise_batch(rng: &mut ChaCha8Rng, n: usize, config: &NoiseBaselineConfig) -> ImageBatch {
    let len = n * config.channels * config.height * config.width;
    let pixels = (0..len)
        .map(|_| {
            let x: f32 = match config.mode {
                NoiseMode::Uniform => rng.gen_range(-1.0..=1.0),
                NoiseMode::Gaussian => rng.sample::<f32, _>(StandardNormal).clamp(-1.0, 1.0),
            };
            (x + 1.0) / 2.0
        })
        .collect();
    ImageBatch {
        shape: (n, config.channels, config.height, config.width),
        pixels,
    }
}

fn embed_noise<E>(extractor: &mut E, seed: u64, config: &NoiseBaselineConfig) -> Result<DMatrix<f64>>
where
    E: FeatureExtractor + ?Sized,
{
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut flat: Vec<f64> = Vec::new();
    let mut dim: Option<usize> = None;
    let mut done = 0;

    while done < config.n_images {
        let n = config.batch_size.min(config.n_images - done);
        let batch = noise_batch(&mut rng, n, config);
        let features = extractor.embed(&batch)?;

        if features.nrows() != n {
            return Err(Error::InvalidInput(format!(
                "extractor returned {} rows for a batch of {n}",
                features.nrows()
            )));
        }
        match dim {
            Some(d) if d != features.ncols() => {
                return Err(Error::InvalidInput(format!(
                    "extractor changed feature dimension from {d} to {}",
                    features.ncols()
                )));
            }
            _ => dim = Some(features.ncols()),
        }
        for row in features.row_iter() {
            flat.extend(row.iter());
        }
        done += n;
    }

    let d = dim.unwrap_or(0);
    Ok(DMatrix::from_row_slice(config.n_images, d, &flat))
}

/// Score pure noise against `reference`, once per configured seed.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a zero image count, zero batch size or
/// no seeds, plus any extractor, summary or scoring failure.
pub fn noise_baseline<E>(
    extractor: &mut E,
    reference: &GaussianSummary,
    config: &NoiseBaselineConfig,
) -> Result<Vec<BaselineScore>>
where
    E: FeatureExtractor + ?Sized,
{
    if config.n_images == 0 || config.batch_size == 0 {
        return Err(Error::InvalidInput(
            "n_images and batch_size must be greater than 0".to_string(),
        ));
    }
    if config.seeds.is_empty() {
        return Err(Error::InvalidInput("at least one seed is required".to_string()));
    }

    config
        .seeds
        .iter()
        .map(|&seed| {
            let features = embed_noise(extractor, seed, config)?;
            let summary = GaussianSummary::from_features(&features)?;
            let score = frechet_distance(&summary, reference)?;
            tracing::info!(seed, n_images = config.n_images, score, "noise baseline");
            Ok(BaselineScore {
                seed,
                n_images: config.n_images,
                score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    /// Per-channel mean intensity as a 3-D embedding.
    struct ChannelMeans;

    impl FeatureExtractor for ChannelMeans {
        fn embed(&mut self, batch: &ImageBatch) -> Result<DMatrix<f64>> {
            let (n, c, h, w) = batch.shape;
            let plane = h * w;
            Ok(DMatrix::from_fn(n, c, |i, ch| {
                let img = batch.image(i).unwrap();
                let sum: f32 = img[ch * plane..(ch + 1) * plane].iter().sum();
                f64::from(sum) / plane as f64
            }))
        }
    }

    struct Truncating;

    impl FeatureExtractor for Truncating {
        fn embed(&mut self, _batch: &ImageBatch) -> Result<DMatrix<f64>> {
            Ok(DMatrix::zeros(1, 2))
        }
    }

    /// Reports NaN for every feature.
    struct Broken;

    impl FeatureExtractor for Broken {
        fn embed(&mut self, batch: &ImageBatch) -> Result<DMatrix<f64>> {
            Ok(DMatrix::from_element(batch.len(), 3, f64::NAN))
        }
    }

    fn small_config() -> NoiseBaselineConfig {
        NoiseBaselineConfig {
            n_images: 40,
            batch_size: 16,
            channels: 3,
            height: 4,
            width: 4,
            seeds: vec![0, 1],
            mode: NoiseMode::Uniform,
        }
    }

    fn reference() -> GaussianSummary {
        GaussianSummary::new(DVector::from_element(3, 0.5), DMatrix::identity(3, 3) * 0.01)
            .unwrap()
    }

    #[test]
    fn test_baseline_is_deterministic_per_seed() {
        let config = small_config();
        let first = noise_baseline(&mut ChannelMeans, &reference(), &config).unwrap();
        let second = noise_baseline(&mut ChannelMeans, &reference(), &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|s| s.score.is_finite() && s.score >= 0.0));
    }

    #[test]
    fn test_noise_pixels_in_unit_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let config = NoiseBaselineConfig {
            mode: NoiseMode::Gaussian,
            ..small_config()
        };
        let batch = noise_batch(&mut rng, 2, &config);
        assert_eq!(batch.pixels.len(), 2 * 3 * 4 * 4);
        assert!(batch.pixels.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_extractor_row_mismatch() {
        let err = noise_baseline(&mut Truncating, &reference(), &small_config()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_nan_embeddings_fail_instead_of_scoring_zero() {
        let err = noise_baseline(&mut Broken, &reference(), &small_config()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_image_out_of_range_is_none() {
        let batch = ImageBatch {
            shape: (2, 1, 2, 2),
            pixels: vec![0.5; 6],
        };
        assert_eq!(batch.image(0).map(<[f32]>::len), Some(4));
        assert!(batch.image(1).is_none());
        assert!(batch.image(2).is_none());
    }

    #[test]
    fn test_rejects_empty_config() {
        let config = NoiseBaselineConfig {
            seeds: vec![],
            ..small_config()
        };
        assert!(noise_baseline(&mut ChannelMeans, &reference(), &config).is_err());
    }

    #[test]
    fn test_mean_std_across_seeds() {
        let scores = [
            BaselineScore { seed: 0, n_images: 1, score: 1.0 },
            BaselineScore { seed: 1, n_images: 1, score: 3.0 },
        ];
        assert_eq!(BaselineScore::mean_std(&scores), Some((2.0, 1.0)));
        assert_eq!(BaselineScore::mean_std(&[]), None);
    }
}
