//! # steplog: Sparse Step-Indexed Training-Log Analytics
//!
//! **Version**: 0.1.0
//!
//! steplog turns the append-only JSONL logs of generative-model training runs
//! into aligned, comparable numeric series: loss curves, FID against step,
//! gradient/curvature correlations, and per-timestep loss weighting.
//!
//! ## Design Principles
//!
//! - **Sparse by default**: every metric keeps its own step axis; records that
//!   lack a key are skipped, never zero-filled
//! - **Explicit joins**: intersection and nearest-step joins are separate
//!   operations with separate failure modes
//! - **Partial failure**: a missing optional metric skips one sub-output with
//!   a warning; the rest of the report completes
//! - **Deterministic numerics**: seeded RNGs and clipped eigenvalues
//!
//! ## Pipeline
//!
//! ```text
//! JSONL ──> RecordStream ──> SeriesExtractor ──> align / smooth ──> report
//!                                                  │
//!                                    distance (Fréchet) / curve (per-t)
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use steplog::record::RecordStream;
//! use steplog::series::SeriesExtractor;
//!
//! let log = r#"{"_i": 0, "out": {"train/loss": 1.0, "curvature/hutch_trace_mean": 0.5}}
//! {"_i": 100, "out": {"train/loss": 0.8}}
//! {"_i": 200, "out": {"val/fid": 50.0}}
//! "#;
//! let records = RecordStream::from_reader(log.as_bytes()).collect::<steplog::Result<Vec<_>>>()?;
//! let loss = SeriesExtractor::default().extract(&records, "train/loss");
//!
//! assert_eq!(loss.steps(), &[0, 100]);
//! assert_eq!(loss.values(), &[1.0, 0.8]);
//! # Ok::<(), steplog::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod align;
pub mod config;
pub mod curvature;
pub mod curve;
pub mod distance;
pub mod error;
mod fanout;
pub mod record;
pub mod report;
pub mod series;
pub mod smooth;

pub use error::{Error, Result};
