//! Compare Runs: curvature against FID across two synthetic training logs
//!
//! Writes two sparse JSONL logs to a temporary directory, then runs the
//! curvature-vs-FID and grad-stats reports over them. The second run never
//! logs gradients, so its grad-stats entry comes back partial.
//!
//! Run with: cargo run --example compare_runs

use std::io::Write;
use std::path::{Path, PathBuf};

use steplog::config::AnalysisConfig;
use steplog::report::{self, validate_runs};

fn write_log(path: &Path, decay: f64, with_grad: bool) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for step in (0..=5_000).step_by(100) {
        let s = f64::from(step);
        let loss = (-s / decay).exp() + 0.05;
        let curv = 40.0 * (-s / (2.0 * decay)).exp() + 2.0;
        if with_grad {
            writeln!(
                file,
                r#"{{"_i": {step}, "out": {{"train/loss": {loss}, "train/grad_global_L2": {}, "curvature/hutch_trace_mean": {curv}, "curvature/hutch_trace_std": {}}}}}"#,
                loss * 3.0,
                curv * 0.1
            )?;
        } else {
            writeln!(
                file,
                r#"{{"_i": {step}, "out": {{"train/loss": {loss}, "curvature/hutch_trace_mean": {curv}, "curvature/hutch_trace_std": {}}}}}"#,
                curv * 0.1
            )?;
        }
        if step % 1_000 == 0 && step > 0 {
            // FID lands off the curvature grid
            writeln!(
                file,
                r#"{{"_i": {}, "out": {{"val/fid": {}}}}}"#,
                step + 30,
                200.0 * loss + 10.0
            )?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== steplog: Compare Runs ===\n");

    let dir = std::env::temp_dir().join(format!("steplog-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let paths: Vec<PathBuf> = vec![dir.join("fast.jsonl"), dir.join("slow.jsonl")];
    write_log(&paths[0], 800.0, true)?;
    write_log(&paths[1], 2_500.0, false)?;
    let names = vec!["fast".to_string(), "slow".to_string()];

    let runs = validate_runs(&paths, &names)?;
    let config = AnalysisConfig::builder().smooth_window(5).build();

    println!("--- curvature vs FID (nearest step) ---");
    let aligned = report::curvature_vs_fid(&runs, &config);
    for entry in aligned.runs() {
        let Some(data) = entry.data() else {
            println!("  {}: skipped ({})", entry.name(), entry.error().unwrap_or("?"));
            continue;
        };
        println!("  {}:", entry.name());
        for ((step, curv), fid) in data.steps.iter().zip(&data.diagnostic).zip(&data.milestone) {
            println!("    step {step:>5}  curvature {curv:>7.3}  fid {fid:>7.2}");
        }
    }

    println!("\n--- grad stats ---");
    let grads = report::grad_stats(&runs, &config);
    for entry in grads.runs() {
        println!(
            "  {}: {:?}, {} loss points, warnings: {:?}",
            entry.name(),
            entry.status(),
            entry.data().map_or(0, |d| d.loss.len()),
            entry.warnings()
        );
    }

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
