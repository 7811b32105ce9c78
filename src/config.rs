//! Featurizer configuration
//!
//! A `RollingWindowConfig` is validated once when it is built (or parsed) and
//! is immutable afterwards. Every output column shares the same grain columns,
//! horizon and window sizes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Statistic computed over each lagged window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowCalculation {
    Mean,
    Min,
    Max,
}

impl WindowCalculation {
    /// Tag used by the persisted state layout.
    pub fn tag(self) -> u8 {
        match self {
            WindowCalculation::Mean => 1,
            WindowCalculation::Min => 2,
            WindowCalculation::Max => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(WindowCalculation::Mean),
            2 => Some(WindowCalculation::Min),
            3 => Some(WindowCalculation::Max),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowCalculation::Mean => "mean",
            WindowCalculation::Min => "min",
            WindowCalculation::Max => "max",
        }
    }
}

impl fmt::Display for WindowCalculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maps a numeric source column onto a generated feature column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPair {
    /// Name of the generated feature column
    pub output: String,
    /// Name of the numeric input column
    pub source: String,
}

impl ColumnPair {
    pub fn new(output: impl Into<String>, source: impl Into<String>) -> Self {
        ColumnPair {
            output: output.into(),
            source: source.into(),
        }
    }
}

/// Validated rolling-window configuration.
///
/// `max_window_size` counts observations, not elapsed time: every row of a
/// grain is one step of history, so rows are expected to arrive densely.
///
/// # Examples
/// ```
/// use rolling_features::{ColumnPair, RollingWindowConfig, WindowCalculation};
///
/// let config = RollingWindowConfig::new(
///     vec!["store".to_string()],
///     vec![ColumnPair::new("sales_min", "sales")],
///     2,
///     3,
///     1,
///     WindowCalculation::Min,
/// )
/// .unwrap();
///
/// assert_eq!(config.buffer_capacity(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct RollingWindowConfig {
    grain_columns: Vec<String>,
    columns: Vec<ColumnPair>,
    horizon: usize,
    max_window_size: usize,
    min_window_size: usize,
    calculation: WindowCalculation,
}

/// Unvalidated wire form of `RollingWindowConfig`.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    grain_columns: Vec<String>,
    columns: Vec<ColumnPair>,
    horizon: usize,
    max_window_size: usize,
    #[serde(default = "default_min_window_size")]
    min_window_size: usize,
    calculation: WindowCalculation,
}

fn default_min_window_size() -> usize {
    1
}

impl TryFrom<RawConfig> for RollingWindowConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        RollingWindowConfig::new(
            raw.grain_columns,
            raw.columns,
            raw.horizon,
            raw.max_window_size,
            raw.min_window_size,
            raw.calculation,
        )
    }
}

impl RollingWindowConfig {
    /// Creates a configuration, rejecting anything the engine cannot run with.
    ///
    /// # Errors
    /// Returns a `ConfigError` when the horizon or either window size is zero
    /// or out of the signed 32-bit range, when `max_window_size` is below
    /// `min_window_size`, or when no grain columns or output columns are given.
    pub fn new(
        grain_columns: Vec<String>,
        columns: Vec<ColumnPair>,
        horizon: usize,
        max_window_size: usize,
        min_window_size: usize,
        calculation: WindowCalculation,
    ) -> Result<Self, ConfigError> {
        let config = RollingWindowConfig {
            grain_columns,
            columns,
            horizon,
            max_window_size,
            min_window_size,
            calculation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Parse(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let signed_limit = i32::MAX as usize;

        if self.horizon == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        if self.horizon > signed_limit {
            return Err(ConfigError::HorizonOutOfRange(self.horizon));
        }
        if self.min_window_size == 0 {
            return Err(ConfigError::ZeroMinWindowSize);
        }
        if self.max_window_size < self.min_window_size {
            return Err(ConfigError::MaxBelowMin {
                max: self.max_window_size,
                min: self.min_window_size,
            });
        }
        if self.max_window_size > signed_limit {
            return Err(ConfigError::WindowOutOfRange(self.max_window_size));
        }
        if self.max_window_size.checked_add(self.horizon).is_none() {
            return Err(ConfigError::WindowOutOfRange(self.max_window_size));
        }
        if self.grain_columns.is_empty() {
            return Err(ConfigError::NoGrainColumns);
        }
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns);
        }

        for (index, pair) in self.columns.iter().enumerate() {
            if pair.output.is_empty() || pair.source.is_empty() {
                return Err(ConfigError::EmptyColumnName);
            }
            if self.columns[..index].iter().any(|p| p.output == pair.output) {
                return Err(ConfigError::DuplicateOutput(pair.output.clone()));
            }
        }
        if self.grain_columns.iter().any(String::is_empty) {
            return Err(ConfigError::EmptyColumnName);
        }

        Ok(())
    }

    pub fn grain_columns(&self) -> &[String] {
        &self.grain_columns
    }

    pub fn columns(&self) -> &[ColumnPair] {
        &self.columns
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn max_window_size(&self) -> usize {
        self.max_window_size
    }

    pub fn min_window_size(&self) -> usize {
        self.min_window_size
    }

    pub fn calculation(&self) -> WindowCalculation {
        self.calculation
    }

    /// Values retained per grain and column: enough trailing history to
    /// answer the oldest offset with a full window.
    pub fn buffer_capacity(&self) -> usize {
        self.max_window_size + self.horizon - 1
    }
}

/// Errors raised while constructing a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Horizon must be at least 1
    ZeroHorizon,
    /// Horizon exceeds the signed 32-bit range
    HorizonOutOfRange(usize),
    /// Minimum window size must be at least 1
    ZeroMinWindowSize,
    /// Maximum window size is smaller than the minimum window size
    MaxBelowMin { max: usize, min: usize },
    /// Maximum window size exceeds the signed 32-bit range
    WindowOutOfRange(usize),
    /// No grain columns were configured
    NoGrainColumns,
    /// No output columns were configured
    NoColumns,
    /// A column name is empty
    EmptyColumnName,
    /// Two column pairs share an output name
    DuplicateOutput(String),
    /// The configuration document could not be parsed
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroHorizon => write!(f, "Horizon must be greater than 0"),
            ConfigError::HorizonOutOfRange(h) => {
                write!(f, "Horizon {} exceeds the supported maximum of {}", h, i32::MAX)
            }
            ConfigError::ZeroMinWindowSize => {
                write!(f, "Minimum window size must be greater than 0")
            }
            ConfigError::MaxBelowMin { max, min } => write!(
                f,
                "Maximum window size {} is smaller than minimum window size {}",
                max, min
            ),
            ConfigError::WindowOutOfRange(size) => write!(
                f,
                "Window size {} exceeds the supported maximum of {}",
                size,
                i32::MAX
            ),
            ConfigError::NoGrainColumns => write!(f, "At least one grain column is required"),
            ConfigError::NoColumns => write!(f, "At least one output column is required"),
            ConfigError::EmptyColumnName => write!(f, "Column names cannot be empty"),
            ConfigError::DuplicateOutput(name) => {
                write!(f, "Output column '{}' is configured more than once", name)
            }
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn grains() -> Vec<String> {
        vec!["store".to_string()]
    }

    fn columns() -> Vec<ColumnPair> {
        vec![ColumnPair::new("sales_mean", "sales")]
    }

    #[test]
    fn test_valid_config_exposes_capacity() {
        let config =
            RollingWindowConfig::new(grains(), columns(), 3, 5, 2, WindowCalculation::Mean)
                .unwrap();
        assert_eq!(config.horizon(), 3);
        assert_eq!(config.max_window_size(), 5);
        assert_eq!(config.min_window_size(), 2);
        assert_eq!(config.buffer_capacity(), 7);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let result = RollingWindowConfig::new(grains(), columns(), 0, 2, 1, WindowCalculation::Min);
        assert_eq!(result.unwrap_err(), ConfigError::ZeroHorizon);
    }

    #[test]
    fn test_zero_min_window_rejected() {
        let result = RollingWindowConfig::new(grains(), columns(), 1, 2, 0, WindowCalculation::Min);
        assert_eq!(result.unwrap_err(), ConfigError::ZeroMinWindowSize);
    }

    #[test]
    fn test_max_below_min_rejected() {
        let result = RollingWindowConfig::new(grains(), columns(), 1, 2, 3, WindowCalculation::Max);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::MaxBelowMin { max: 2, min: 3 }
        );
    }

    #[test]
    fn test_horizon_beyond_signed_range_rejected() {
        let horizon = i32::MAX as usize + 1;
        let result =
            RollingWindowConfig::new(grains(), columns(), horizon, 2, 1, WindowCalculation::Max);
        assert_eq!(result.unwrap_err(), ConfigError::HorizonOutOfRange(horizon));
    }

    #[test]
    fn test_missing_grain_and_output_columns_rejected() {
        let result =
            RollingWindowConfig::new(Vec::new(), columns(), 1, 2, 1, WindowCalculation::Max);
        assert_eq!(result.unwrap_err(), ConfigError::NoGrainColumns);

        let result = RollingWindowConfig::new(grains(), Vec::new(), 1, 2, 1, WindowCalculation::Max);
        assert_eq!(result.unwrap_err(), ConfigError::NoColumns);
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let pairs = vec![
            ColumnPair::new("feature", "sales"),
            ColumnPair::new("feature", "visits"),
        ];
        let result = RollingWindowConfig::new(grains(), pairs, 1, 2, 1, WindowCalculation::Mean);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::DuplicateOutput("feature".to_string())
        );
    }

    #[test]
    fn test_json_round_trip_is_validated() {
        let json = r#"{
            "grain_columns": ["store", "item"],
            "columns": [{"output": "sales_max", "source": "sales"}],
            "horizon": 2,
            "max_window_size": 4,
            "calculation": "max"
        }"#;
        let config = RollingWindowConfig::from_json_str(json).unwrap();
        assert_eq!(config.min_window_size(), 1);
        assert_eq!(config.calculation(), WindowCalculation::Max);

        let encoded = serde_json::to_string(&config).unwrap();
        assert_eq!(RollingWindowConfig::from_json_str(&encoded).unwrap(), config);

        let invalid = json.replace("\"horizon\": 2", "\"horizon\": 0");
        assert!(matches!(
            RollingWindowConfig::from_json_str(&invalid),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_calculation_tags_round_trip() {
        for calc in [
            WindowCalculation::Mean,
            WindowCalculation::Min,
            WindowCalculation::Max,
        ] {
            assert_eq!(WindowCalculation::from_tag(calc.tag()), Some(calc));
        }
        assert_eq!(WindowCalculation::from_tag(0), None);
    }
}
