//! Integration tests for record streaming and series extraction

use std::io::Write;

use steplog::record::{read_records, RecordStream, StepPolicy, StepSource};
use steplog::series::SeriesExtractor;
use steplog::Error;
use tempfile::NamedTempFile;

fn write_log(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

#[test]
fn test_sparse_multi_key_log() {
    let file = write_log(&[
        r#"{"_i":0,"out":{"train/loss":1.0}}"#,
        r#"{"_i":0,"out":{"curvature/hutch_trace_mean":0.5}}"#,
        r#"{"_i":100,"out":{"train/loss":0.8}}"#,
    ]);
    let records = read_records(file.path(), ["mins_snr_curve/t"]).unwrap();
    let extractor = SeriesExtractor::default();

    let loss = extractor.extract(&records, "train/loss");
    assert_eq!(loss.steps(), &[0, 100]);
    assert_eq!(loss.values(), &[1.0, 0.8]);

    let curvature = extractor.extract(&records, "curvature/hutch_trace_mean");
    assert_eq!(curvature.steps(), &[0]);
    assert_eq!(curvature.values(), &[0.5]);
}

#[test]
fn test_flat_and_wrapped_shapes_mix() {
    let log = concat!(
        "{\"global_step\": 5, \"train/loss\": 2.0}\n",
        "{\"_i\": 10, \"out\": {\"train/loss\": 1.5}}\n",
        "{\"step\": 15, \"train/loss\": 1.0}\n",
    );
    let records = RecordStream::from_reader(log.as_bytes())
        .collect::<steplog::Result<Vec<_>>>()
        .unwrap();
    let loss = SeriesExtractor::default().extract(&records, "train/loss");
    assert_eq!(loss.steps(), &[5, 10, 15]);
}

#[test]
fn test_line_index_fallback_counts_blank_lines() {
    let log = "{\"train/loss\": 1.0}\n\n{\"train/loss\": 0.5}\n";
    let records = RecordStream::from_reader(log.as_bytes())
        .collect::<steplog::Result<Vec<_>>>()
        .unwrap();
    let loss = SeriesExtractor::default().extract(&records, "train/loss");
    assert_eq!(loss.steps(), &[0, 2]);
}

#[test]
fn test_policy_without_line_fallback_drops_unstepped_records() {
    let log = "{\"train/loss\": 1.0}\n{\"step\": 3, \"train/loss\": 0.5}\n";
    let records = RecordStream::from_reader(log.as_bytes())
        .collect::<steplog::Result<Vec<_>>>()
        .unwrap();
    let extractor = SeriesExtractor::new(StepPolicy::new(vec![StepSource::field("step")]));
    let loss = extractor.extract(&records, "train/loss");
    assert_eq!(loss.steps(), &[3]);
    assert_eq!(loss.values(), &[0.5]);
}

#[test]
fn test_nan_token_drops_field_only() {
    let log = "{\"step\": 1, \"train/loss\": NaN, \"val/fid\": 40.0}\n";
    let records = RecordStream::from_reader(log.as_bytes())
        .collect::<steplog::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].contains("train/loss"));
    assert_eq!(records[0].scalar("val/fid"), Some(40.0));
}

#[test]
fn test_malformed_line_reports_position() {
    let file = write_log(&[r#"{"step": 0, "train/loss": 1.0}"#, "not json"]);
    let err = read_records(file.path(), Vec::<String>::new()).unwrap_err();
    match err {
        Error::MalformedLog { path, line, .. } => {
            assert_eq!(path, file.path());
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_weight_curve_vectors_kept_for_declared_keys() {
    let log = concat!(
        "{\"step\": 0, \"mins_snr_curve/t\": [0, 1, 2], \"mins_snr_curve/weight\": [1.0, 0.5, 0.25]}\n",
        "{\"step\": 1, \"train/loss\": 0.9}\n",
    );
    let records = RecordStream::from_reader(log.as_bytes())
        .collect::<steplog::Result<Vec<_>>>()
        .unwrap();
    let curve = SeriesExtractor::default()
        .extract_first_vector(&records, "mins_snr_curve/t", "mins_snr_curve/weight")
        .unwrap();
    assert_eq!(curve.len(), 3);
    assert_eq!(curve.weight(), &[1.0, 0.5, 0.25]);
}
