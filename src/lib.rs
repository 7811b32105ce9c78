pub mod config;
pub mod row;
pub mod grain_key;
pub mod window;
pub mod engine;
pub mod training;
pub mod state;
pub mod sharding;
pub mod csv_source;
pub mod job;


pub use config::{ColumnPair, ConfigError, RollingWindowConfig, WindowCalculation};
pub use row::{
    BindError, ColumnType, InMemoryRowSource, Row, RowSource, RowSourceError, Schema, SchemaColumn,
    Value,
};
pub use grain_key::{GrainKey, GrainKeyCodec, GrainKeyError, GrainValue};
pub use window::{WindowAggregator, WindowBuffer};
pub use engine::{EngineError, FeatureVector, OutputColumnInfo, RollingWindowEngine};
pub use training::{FitStatus, TrainingCoordinator, WarmupStep, WarmupSummary, DEFAULT_MAX_PASSES};
pub use state::{decode_state, encode_state, StateError, STATE_FORMAT_VERSION};
pub use csv_source::CsvRowSource;
pub use job::{run_job, JobConfig, JobError, JobFile, JobSummary};
