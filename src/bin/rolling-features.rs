//! Rolling-window featurizer binary
//!
//! Run with:
//! ```text
//! FEATURIZER_CONFIG=job.json INPUT_CSV=input.csv OUTPUT_CSV=features.csv \
//!     cargo run --bin rolling-features
//! ```

use rolling_features::{run_job, JobConfig};
use tracing_subscriber::EnvFilter;

fn required(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("{} must be set", name))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g.
    //   RUST_LOG=rolling_features=debug cargo run --bin rolling-features
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = JobConfig::new(
        required("FEATURIZER_CONFIG")?,
        required("INPUT_CSV")?,
        required("OUTPUT_CSV")?,
    );
    if let Ok(path) = std::env::var("WARMUP_CSV") {
        config = config.with_warmup(path);
    }
    if let Ok(path) = std::env::var("STATE_IN") {
        config = config.with_state_in(path);
    }
    if let Ok(path) = std::env::var("STATE_OUT") {
        config = config.with_state_out(path);
    }

    println!("Rolling-window featurizer");
    println!("   Job:    {}", config.job_file.display());
    println!("   Input:  {}", config.input_csv.display());
    println!("   Output: {}", config.output_csv.display());

    let summary = run_job(&config)?;

    if let Some(warmup) = &summary.warmup {
        println!("{}", warmup);
    }
    println!(
        "Transformed {} rows across {} grains",
        summary.rows_transformed, summary.grains
    );
    Ok(())
}
