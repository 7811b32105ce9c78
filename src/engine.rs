//! Rolling-Window Featurizer Engine
//!
//! Holds bounded per-grain history for every output column and runs the
//! online transform step: the lag vector is computed from the history as it
//! stands, and only then is the row's own value appended. A row therefore
//! never sees its own signal.

use crate::config::{ConfigError, RollingWindowConfig};
use crate::grain_key::{GrainKey, GrainKeyCodec, GrainKeyError};
use crate::row::{BindError, ColumnType, Row, RowSource, RowSourceError, Schema, Value};
use crate::state::StateError;
use crate::training::{FitStatus, TrainingCoordinator, WarmupStep, WarmupSummary};
use crate::window::{aggregator_for, WindowAggregator, WindowBuffer};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use tracing::{debug, trace};

/// Lag vector for one output column, highest offset first.
pub type FeatureVector = Vec<f64>;

/// Window sizes shared by every aggregation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowParams {
    pub horizon: usize,
    pub max_window: usize,
    pub min_window: usize,
}

impl WindowParams {
    fn from_config(config: &RollingWindowConfig) -> Self {
        WindowParams {
            horizon: config.horizon(),
            max_window: config.max_window_size(),
            min_window: config.min_window_size(),
        }
    }
}

/// History of one grain, one buffer per output column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GrainState {
    buffers: Vec<WindowBuffer>,
}

impl GrainState {
    pub(crate) fn new(columns: usize, capacity: usize) -> Self {
        GrainState {
            buffers: (0..columns).map(|_| WindowBuffer::new(capacity)).collect(),
        }
    }

    pub(crate) fn from_buffers(buffers: Vec<WindowBuffer>) -> Self {
        GrainState { buffers }
    }

    pub(crate) fn buffers(&self) -> &[WindowBuffer] {
        &self.buffers
    }

    /// Appends one value per column without producing output.
    pub(crate) fn observe(&mut self, signals: &[f64]) {
        for (buffer, &value) in self.buffers.iter_mut().zip(signals) {
            buffer.append(value);
        }
    }

    /// Computes every column's lag vector, then appends the new values.
    pub(crate) fn transform(
        &mut self,
        aggregator: &dyn WindowAggregator,
        params: WindowParams,
        signals: &[f64],
    ) -> Vec<FeatureVector> {
        self.buffers
            .iter_mut()
            .zip(signals)
            .map(|(buffer, &value)| {
                let features = aggregator.compute(
                    buffer.view(),
                    params.horizon,
                    params.max_window,
                    params.min_window,
                );
                buffer.append(value);
                features
            })
            .collect()
    }
}

fn grain_entry(
    grains: &mut HashMap<GrainKey, GrainState>,
    grain: GrainKey,
    columns: usize,
    capacity: usize,
) -> &mut GrainState {
    match grains.entry(grain) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            debug!(grain = %entry.key(), "new grain, starting with empty history");
            entry.insert(GrainState::new(columns, capacity))
        }
    }
}

/// Converts a numeric cell to the signal value. `Missing` reads as NaN.
fn read_signal(value: &Value) -> Option<f64> {
    match value {
        Value::I8(v) => Some(f64::from(*v)),
        Value::I16(v) => Some(f64::from(*v)),
        Value::I32(v) => Some(f64::from(*v)),
        Value::I64(v) => Some(*v as f64),
        Value::U8(v) => Some(f64::from(*v)),
        Value::U16(v) => Some(f64::from(*v)),
        Value::U32(v) => Some(f64::from(*v)),
        Value::U64(v) => Some(*v as f64),
        Value::F32(v) => Some(f64::from(*v)),
        Value::F64(v) => Some(*v),
        Value::Missing => Some(f64::NAN),
        Value::Bool(_) | Value::Text(_) | Value::Date(_) => None,
    }
}

#[derive(Debug, Clone)]
struct SourceColumn {
    name: String,
    index: usize,
}

/// Column positions resolved against one input schema.
#[derive(Debug, Clone)]
pub(crate) struct SchemaBinding {
    codec: GrainKeyCodec,
    sources: Vec<SourceColumn>,
}

impl SchemaBinding {
    fn bind(config: &RollingWindowConfig, schema: &Schema) -> Result<Self, BindError> {
        let codec = GrainKeyCodec::bind(config.grain_columns(), schema)?;

        let sources = config
            .columns()
            .iter()
            .map(|pair| {
                let index = schema
                    .index_of(&pair.source)
                    .ok_or_else(|| BindError::MissingSourceColumn(pair.source.clone()))?;
                let column_type = schema
                    .column_type(index)
                    .ok_or_else(|| BindError::MissingSourceColumn(pair.source.clone()))?;
                if !column_type.is_numeric() {
                    return Err(BindError::UnsupportedSourceType {
                        column: pair.source.clone(),
                        column_type,
                    });
                }
                Ok(SourceColumn {
                    name: pair.source.clone(),
                    index,
                })
            })
            .collect::<Result<Vec<_>, BindError>>()?;

        Ok(SchemaBinding { codec, sources })
    }

    /// Grain key and one signal value per output column.
    pub(crate) fn decode(&self, row: &Row) -> Result<(GrainKey, Vec<f64>), EngineError> {
        let grain = self.codec.key_for(row)?;
        let signals = self
            .sources
            .iter()
            .map(|source| {
                let value = row.get(source.index).ok_or_else(|| EngineError::RowTooShort {
                    column: source.name.clone(),
                    index: source.index,
                })?;
                read_signal(value).ok_or_else(|| EngineError::SignalTypeMismatch {
                    column: source.name.clone(),
                    found: value.column_type(),
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok((grain, signals))
    }
}

/// Schema description of one generated feature column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputColumnInfo {
    /// Name of the generated column
    pub name: String,
    /// Numeric input column it is derived from
    pub source: String,
    /// Number of entries in every vector (the horizon)
    pub arity: usize,
    /// Element type of the vector
    pub element_type: &'static str,
    /// Descriptive annotations for the host schema
    pub annotations: BTreeMap<String, String>,
}

/// Streaming rolling-window featurizer.
///
/// # Examples
/// ```
/// use rolling_features::{
///     ColumnPair, ColumnType, RollingWindowConfig, RollingWindowEngine, Row, Schema, Value,
///     WindowCalculation,
/// };
///
/// let config = RollingWindowConfig::new(
///     vec!["store".to_string()],
///     vec![ColumnPair::new("sales_min", "sales")],
///     1,
///     2,
///     1,
///     WindowCalculation::Min,
/// )?;
/// let schema = Schema::new()
///     .with_column("store", ColumnType::Text)
///     .with_column("sales", ColumnType::F64);
///
/// let mut engine = RollingWindowEngine::new(config);
/// engine.bind(&schema)?;
///
/// let row = |v: f64| Row::new(vec![Value::Text("A".into()), Value::F64(v)]);
/// assert!(engine.transform_row(&row(10.0))?[0][0].is_nan());
/// assert_eq!(engine.transform_row(&row(4.0))?[0], vec![10.0]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct RollingWindowEngine {
    config: RollingWindowConfig,
    aggregator: Box<dyn WindowAggregator>,
    binding: Option<SchemaBinding>,
    grains: HashMap<GrainKey, GrainState>,
}

impl RollingWindowEngine {
    /// Creates an engine with no history and no schema binding.
    pub fn new(config: RollingWindowConfig) -> Self {
        Self::from_parts(config, HashMap::new())
    }

    pub(crate) fn from_parts(
        config: RollingWindowConfig,
        grains: HashMap<GrainKey, GrainState>,
    ) -> Self {
        let aggregator = aggregator_for(config.calculation());
        RollingWindowEngine {
            config,
            aggregator,
            binding: None,
            grains,
        }
    }

    /// Resolves grain and source columns against `schema`.
    ///
    /// Rebinding replaces the previous binding; history is keyed by grain
    /// values, not column positions, so it carries over. Every grain already
    /// held (for example after `load_state`) must still be producible from
    /// the new schema's grain column types.
    ///
    /// # Errors
    /// Returns a `BindError` when a grain or source column is missing, a
    /// source column is not numeric, or a held grain does not match the grain
    /// column types. The previous binding is kept on error.
    pub fn bind(&mut self, schema: &Schema) -> Result<(), BindError> {
        let binding = SchemaBinding::bind(&self.config, schema)?;
        for grain in self.grains.keys() {
            binding.codec.check_stored(grain)?;
        }
        debug!(
            grain_columns = ?self.config.grain_columns(),
            output_columns = self.config.columns().len(),
            calculation = %self.config.calculation(),
            "bound featurizer to input schema"
        );
        self.binding = Some(binding);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn config(&self) -> &RollingWindowConfig {
        &self.config
    }

    /// Number of grains seen so far.
    pub fn grain_count(&self) -> usize {
        self.grains.len()
    }

    /// Current history of `grain` for the output column at `column`,
    /// oldest first.
    pub fn history(&self, grain: &GrainKey, column: usize) -> Option<Vec<f64>> {
        self.grains
            .get(grain)
            .and_then(|state| state.buffers().get(column))
            .map(WindowBuffer::snapshot)
    }

    /// Describes every generated column for the host schema.
    pub fn output_columns(&self) -> Vec<OutputColumnInfo> {
        let config = &self.config;
        config
            .columns()
            .iter()
            .map(|pair| {
                let mut annotations = BTreeMap::new();
                annotations.insert("calculation".to_string(), config.calculation().to_string());
                annotations.insert("horizon".to_string(), config.horizon().to_string());
                annotations.insert(
                    "max_window_size".to_string(),
                    config.max_window_size().to_string(),
                );
                annotations.insert(
                    "min_window_size".to_string(),
                    config.min_window_size().to_string(),
                );
                OutputColumnInfo {
                    name: pair.output.clone(),
                    source: pair.source.clone(),
                    arity: config.horizon(),
                    element_type: "f64",
                    annotations,
                }
            })
            .collect()
    }

    pub(crate) fn grain_states(&self) -> &HashMap<GrainKey, GrainState> {
        &self.grains
    }

    pub(crate) fn grain_states_mut(&mut self) -> &mut HashMap<GrainKey, GrainState> {
        &mut self.grains
    }

    pub(crate) fn aggregator(&self) -> &dyn WindowAggregator {
        self.aggregator.as_ref()
    }

    pub(crate) fn params(&self) -> WindowParams {
        WindowParams::from_config(&self.config)
    }

    pub(crate) fn binding(&self) -> Result<&SchemaBinding, EngineError> {
        self.binding.as_ref().ok_or(EngineError::NotBound)
    }

    fn check_signals(&self, signals: &[f64]) -> Result<(), EngineError> {
        let expected = self.config.columns().len();
        if signals.len() != expected {
            return Err(EngineError::SignalCountMismatch {
                expected,
                found: signals.len(),
            });
        }
        Ok(())
    }

    /// Appends one value per output column to `grain`'s history without
    /// producing features.
    pub fn observe_keyed(&mut self, grain: GrainKey, signals: &[f64]) -> Result<(), EngineError> {
        self.check_signals(signals)?;
        let columns = self.config.columns().len();
        let capacity = self.config.buffer_capacity();
        trace!(grain = %grain, "warm-up observation");
        grain_entry(&mut self.grains, grain, columns, capacity).observe(signals);
        Ok(())
    }

    /// Transform step for a pre-extracted grain key and signal values.
    ///
    /// Returns one lag vector per output column, computed before the new
    /// values are appended.
    pub fn transform_keyed(
        &mut self,
        grain: GrainKey,
        signals: &[f64],
    ) -> Result<Vec<FeatureVector>, EngineError> {
        self.check_signals(signals)?;
        let params = self.params();
        let columns = self.config.columns().len();
        let capacity = self.config.buffer_capacity();
        trace!(grain = %grain, "transform step");
        let state = grain_entry(&mut self.grains, grain, columns, capacity);
        Ok(state.transform(self.aggregator.as_ref(), params, signals))
    }

    /// Warm-up update for one row of the bound schema.
    pub fn observe_row(&mut self, row: &Row) -> Result<(), EngineError> {
        let (grain, signals) = self.binding()?.decode(row)?;
        self.observe_keyed(grain, &signals)
    }

    /// Transform step for one row of the bound schema.
    pub fn transform_row(&mut self, row: &Row) -> Result<Vec<FeatureVector>, EngineError> {
        let (grain, signals) = self.binding()?.decode(row)?;
        self.transform_keyed(grain, &signals)
    }

    /// Binds to the source's schema and seeds history from every row.
    pub fn warm_up<S: RowSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<WarmupSummary, EngineError> {
        self.bind(source.schema())?;
        TrainingCoordinator::new().run(source, self)
    }

    /// Transforms every remaining row of `source`, handing each row and its
    /// features to `sink`. Returns the number of rows transformed.
    pub fn transform_source_with<S, F, E>(&mut self, source: &mut S, mut sink: F) -> Result<usize, E>
    where
        S: RowSource + ?Sized,
        F: FnMut(&Row, Vec<FeatureVector>) -> Result<(), E>,
        E: From<EngineError>,
    {
        if !self.is_bound() {
            self.bind(source.schema()).map_err(EngineError::from)?;
        }

        let mut count = 0;
        while source.advance().map_err(EngineError::from)? {
            let row = source.current_row().ok_or(EngineError::NoCurrentRow)?;
            let features = self.transform_row(row)?;
            sink(row, features)?;
            count += 1;
        }

        debug!(rows = count, grains = self.grains.len(), "transformed row source");
        Ok(count)
    }

    /// Transforms every remaining row of `source`, collecting the features.
    pub fn transform_source<S: RowSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<Vec<Vec<FeatureVector>>, EngineError> {
        let mut outputs = Vec::new();
        self.transform_source_with(source, |_row, features| {
            outputs.push(features);
            Ok::<(), EngineError>(())
        })?;
        Ok(outputs)
    }
}

impl WarmupStep for RollingWindowEngine {
    fn fit_row(&mut self, row: &Row) -> Result<FitStatus, EngineError> {
        self.observe_row(row)?;
        Ok(FitStatus::Continue)
    }

    fn end_of_pass(&mut self) -> FitStatus {
        FitStatus::Complete
    }
}

/// Error types for featurizer operations
#[derive(Debug)]
pub enum EngineError {
    /// Invalid configuration
    Config(ConfigError),
    /// Schema binding failed
    Bind(BindError),
    /// Grain key could not be extracted from a row
    GrainKey(GrainKeyError),
    /// Row has no cell at a source column's position
    RowTooShort { column: String, index: usize },
    /// Source cell is not numeric
    SignalTypeMismatch {
        column: String,
        found: Option<ColumnType>,
    },
    /// Wrong number of signal values for the configured columns
    SignalCountMismatch { expected: usize, found: usize },
    /// Engine not bound (call bind() or warm_up() first)
    NotBound,
    /// Row source reported a row but exposed none
    NoCurrentRow,
    /// Row source failed
    Source(RowSourceError),
    /// Persisted state could not be read or written
    State(StateError),
    /// Warm-up asked for more restarts than allowed
    PassLimitExceeded(usize),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(err) => write!(f, "Configuration error: {}", err),
            EngineError::Bind(err) => write!(f, "Binding error: {}", err),
            EngineError::GrainKey(err) => write!(f, "Grain key error: {}", err),
            EngineError::RowTooShort { column, index } => write!(
                f,
                "Row has no value at position {} for source column '{}'",
                index, column
            ),
            EngineError::SignalTypeMismatch { column, found } => match found {
                Some(found) => write!(
                    f,
                    "Source column '{}' holds a non-numeric {} value",
                    column, found
                ),
                None => write!(f, "Source column '{}' holds a non-numeric value", column),
            },
            EngineError::SignalCountMismatch { expected, found } => write!(
                f,
                "Expected {} signal values, got {}",
                expected, found
            ),
            EngineError::NotBound => {
                write!(f, "Engine not bound to a schema - call bind() first")
            }
            EngineError::NoCurrentRow => write!(f, "Row source has no current row"),
            EngineError::Source(err) => write!(f, "Row source error: {}", err),
            EngineError::State(err) => write!(f, "State error: {}", err),
            EngineError::PassLimitExceeded(passes) => {
                write!(f, "Warm-up did not complete within {} passes", passes)
            }
        }
    }
}

impl Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<BindError> for EngineError {
    fn from(err: BindError) -> Self {
        EngineError::Bind(err)
    }
}

impl From<GrainKeyError> for EngineError {
    fn from(err: GrainKeyError) -> Self {
        EngineError::GrainKey(err)
    }
}

impl From<RowSourceError> for EngineError {
    fn from(err: RowSourceError) -> Self {
        EngineError::Source(err)
    }
}

impl From<StateError> for EngineError {
    fn from(err: StateError) -> Self {
        EngineError::State(err)
    }
}
