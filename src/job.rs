//! End-to-end featurization job: optional checkpoint restore, CSV warm-up,
//! CSV transform, optional checkpoint save.

use crate::config::{ConfigError, RollingWindowConfig};
use crate::csv_source::CsvRowSource;
use crate::engine::{EngineError, RollingWindowEngine};
use crate::row::{Row, RowSource, RowSourceError, Schema};
use crate::state::{read_state_file, write_state_file, StateError};
use crate::training::WarmupSummary;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Contents of a job description file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    /// Featurizer configuration. May be omitted when resuming from a
    /// checkpoint, which carries its own.
    #[serde(default)]
    pub featurizer: Option<RollingWindowConfig>,
    /// Schema of the input (and warm-up) CSV files
    pub schema: Schema,
}

impl JobFile {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            JobError::Config(ConfigError::Parse(format!("{}: {}", path.as_ref().display(), e)))
        })?;
        serde_json::from_str(&text).map_err(|e| JobError::Config(ConfigError::Parse(e.to_string())))
    }
}

/// Job configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// JSON job description (`JobFile`)
    pub job_file: PathBuf,
    /// CSV used to seed history before transforming
    pub warmup_csv: Option<PathBuf>,
    /// CSV to featurize
    pub input_csv: PathBuf,
    /// Destination of the featurized CSV
    pub output_csv: PathBuf,
    /// Checkpoint to resume from
    pub state_in: Option<PathBuf>,
    /// Checkpoint to write once the input is processed
    pub state_out: Option<PathBuf>,
}

impl JobConfig {
    pub fn new(
        job_file: impl Into<PathBuf>,
        input_csv: impl Into<PathBuf>,
        output_csv: impl Into<PathBuf>,
    ) -> Self {
        JobConfig {
            job_file: job_file.into(),
            warmup_csv: None,
            input_csv: input_csv.into(),
            output_csv: output_csv.into(),
            state_in: None,
            state_out: None,
        }
    }

    pub fn with_warmup(mut self, path: impl Into<PathBuf>) -> Self {
        self.warmup_csv = Some(path.into());
        self
    }

    pub fn with_state_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_in = Some(path.into());
        self
    }

    pub fn with_state_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_out = Some(path.into());
        self
    }
}

/// Outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub warmup: Option<WarmupSummary>,
    pub rows_transformed: usize,
    pub grains: usize,
}

/// Errors that can stop a job
#[derive(Debug)]
pub enum JobError {
    /// Job file could not be read or is invalid
    Config(ConfigError),
    /// Neither the job file nor a checkpoint supplied a configuration
    MissingConfig,
    /// The job file's configuration disagrees with the checkpoint's
    ConfigMismatch,
    Engine(EngineError),
    Source(RowSourceError),
    State(StateError),
    /// Writing the output CSV failed
    Output(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Config(err) => write!(f, "Job configuration error: {}", err),
            JobError::MissingConfig => write!(
                f,
                "No featurizer configuration: set 'featurizer' in the job file or resume from a checkpoint"
            ),
            JobError::ConfigMismatch => write!(
                f,
                "Job file configuration does not match the checkpoint configuration"
            ),
            JobError::Engine(err) => write!(f, "{}", err),
            JobError::Source(err) => write!(f, "Input error: {}", err),
            JobError::State(err) => write!(f, "Checkpoint error: {}", err),
            JobError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl From<EngineError> for JobError {
    fn from(err: EngineError) -> Self {
        JobError::Engine(err)
    }
}

impl From<RowSourceError> for JobError {
    fn from(err: RowSourceError) -> Self {
        JobError::Source(err)
    }
}

impl From<StateError> for JobError {
    fn from(err: StateError) -> Self {
        JobError::State(err)
    }
}

impl From<csv::Error> for JobError {
    fn from(err: csv::Error) -> Self {
        JobError::Output(err.to_string())
    }
}

/// Header of the output CSV: every input column, then one column per lag
/// offset of every output column, highest offset first.
pub fn output_header(schema: &Schema, config: &RollingWindowConfig) -> Vec<String> {
    let mut header: Vec<String> = schema.columns().iter().map(|c| c.name.clone()).collect();
    for pair in config.columns() {
        for offset in (1..=config.horizon()).rev() {
            header.push(format!("{}_lag{}", pair.output, offset));
        }
    }
    header
}

fn output_record(row: &Row, features: &[Vec<f64>]) -> Vec<String> {
    row.values()
        .iter()
        .map(ToString::to_string)
        .chain(features.iter().flatten().map(ToString::to_string))
        .collect()
}

fn resolve_engine(job: &JobFile, state_in: Option<&Path>) -> Result<RollingWindowEngine, JobError> {
    match (state_in, &job.featurizer) {
        (Some(path), featurizer) => {
            let engine = read_state_file(path)?;
            if featurizer.as_ref().is_some_and(|c| c != engine.config()) {
                return Err(JobError::ConfigMismatch);
            }
            info!(
                path = %path.display(),
                grains = engine.grain_count(),
                "resumed from checkpoint"
            );
            Ok(engine)
        }
        (None, Some(config)) => Ok(RollingWindowEngine::new(config.clone())),
        (None, None) => Err(JobError::MissingConfig),
    }
}

/// Runs one featurization job.
pub fn run_job(config: &JobConfig) -> Result<JobSummary, JobError> {
    let job = JobFile::from_json_file(&config.job_file)?;
    let mut engine = resolve_engine(&job, config.state_in.as_deref())?;
    engine.bind(&job.schema).map_err(EngineError::from)?;

    let warmup = match &config.warmup_csv {
        Some(path) => {
            let mut source = CsvRowSource::from_path(path, job.schema.clone())?;
            let summary = engine.warm_up(&mut source)?;
            info!("{}", summary);
            Some(summary)
        }
        None => None,
    };

    let mut input = CsvRowSource::from_path(&config.input_csv, job.schema.clone())?;
    let mut writer = csv::Writer::from_path(&config.output_csv)?;
    writer.write_record(output_header(input.schema(), engine.config()))?;

    let rows_transformed = engine.transform_source_with(&mut input, |row, features| {
        writer.write_record(output_record(row, &features))?;
        Ok::<(), JobError>(())
    })?;
    writer.flush().map_err(|e| JobError::Output(e.to_string()))?;
    info!(
        rows = rows_transformed,
        output = %config.output_csv.display(),
        "wrote features"
    );

    if let Some(path) = &config.state_out {
        write_state_file(&engine, path)?;
        info!(path = %path.display(), grains = engine.grain_count(), "saved checkpoint");
    }

    Ok(JobSummary {
        warmup,
        rows_transformed,
        grains: engine.grain_count(),
    })
}
