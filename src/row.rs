use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of an input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    I8,
    I16,
    #[serde(alias = "int32")]
    I32,
    #[serde(alias = "int64")]
    I64,
    U8,
    U16,
    U32,
    U64,
    #[serde(alias = "float32")]
    F32,
    #[serde(alias = "float64", alias = "double")]
    F64,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "string")]
    Text,
    Date,
}

impl ColumnType {
    /// Whether values of this type can feed a rolling-window signal.
    pub fn is_numeric(self) -> bool {
        !matches!(self, ColumnType::Bool | ColumnType::Text | ColumnType::Date)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            ColumnType::I8 => "i8",
            ColumnType::I16 => "i16",
            ColumnType::I32 => "i32",
            ColumnType::I64 => "i64",
            ColumnType::U8 => "u8",
            ColumnType::U16 => "u16",
            ColumnType::U32 => "u32",
            ColumnType::U64 => "u64",
            ColumnType::F32 => "f32",
            ColumnType::F64 => "f64",
            ColumnType::Bool => "bool",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
        };
        write!(f, "{repr}")
    }
}

/// A single cell of an input row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Text(String),
    Date(NaiveDate),
    Missing,
}

impl Value {
    /// Type carried by this value, or `None` for `Missing`.
    pub fn column_type(&self) -> Option<ColumnType> {
        let ty = match self {
            Value::I8(_) => ColumnType::I8,
            Value::I16(_) => ColumnType::I16,
            Value::I32(_) => ColumnType::I32,
            Value::I64(_) => ColumnType::I64,
            Value::U8(_) => ColumnType::U8,
            Value::U16(_) => ColumnType::U16,
            Value::U32(_) => ColumnType::U32,
            Value::U64(_) => ColumnType::U64,
            Value::F32(_) => ColumnType::F32,
            Value::F64(_) => ColumnType::F64,
            Value::Bool(_) => ColumnType::Bool,
            Value::Text(_) => ColumnType::Text,
            Value::Date(_) => ColumnType::Date,
            Value::Missing => return None,
        };
        Some(ty)
    }

    /// Parses a textual cell as the given column type.
    ///
    /// Empty cells become `Value::Missing`. Dates use `%Y-%m-%d`.
    pub fn parse(column_type: ColumnType, text: &str) -> Result<Value, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Value::Missing);
        }

        fn num<T: std::str::FromStr>(text: &str) -> Result<T, String>
        where
            T::Err: fmt::Display,
        {
            text.parse::<T>().map_err(|e| format!("'{}': {}", text, e))
        }

        let value = match column_type {
            ColumnType::I8 => Value::I8(num(text)?),
            ColumnType::I16 => Value::I16(num(text)?),
            ColumnType::I32 => Value::I32(num(text)?),
            ColumnType::I64 => Value::I64(num(text)?),
            ColumnType::U8 => Value::U8(num(text)?),
            ColumnType::U16 => Value::U16(num(text)?),
            ColumnType::U32 => Value::U32(num(text)?),
            ColumnType::U64 => Value::U64(num(text)?),
            ColumnType::F32 => Value::F32(num(text)?),
            ColumnType::F64 => Value::F64(num(text)?),
            ColumnType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(format!("'{}' is not a boolean", text)),
            },
            ColumnType::Text => Value::Text(text.to_string()),
            ColumnType::Date => Value::Date(
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map_err(|e| format!("'{}': {}", text, e))?,
            ),
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Missing => Ok(()),
        }
    }
}

/// Name and declared type of one input column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Ordered list of input columns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: Vec<SchemaColumn>,
}

impl Schema {
    pub fn new() -> Self {
        Schema {
            columns: Vec::new(),
        }
    }

    /// Appends a column, returning the extended schema.
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(SchemaColumn {
            name: name.into(),
            column_type,
        });
        self
    }

    /// Position of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).map(|column| column.column_type)
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<Vec<SchemaColumn>> for Schema {
    fn from(columns: Vec<SchemaColumn>) -> Self {
        Schema { columns }
    }
}

/// One input row, positionally aligned with a `Schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Pull-based cursor over an ordered row sequence.
///
/// A fresh cursor is positioned before the first row: call `advance` to
/// move onto it. Implementations can be:
/// - In-memory vectors (for testing and embedding)
/// - CSV files
/// - Any other ordered source
pub trait RowSource {
    /// Schema every row conforms to.
    fn schema(&self) -> &Schema;

    /// The row under the cursor, or `None` before the first `advance` and
    /// after the source is exhausted.
    fn current_row(&self) -> Option<&Row>;

    /// Moves to the next row. Returns `Ok(false)` once the source is exhausted.
    fn advance(&mut self) -> Result<bool, RowSourceError>;

    /// Rewinds to before the first row.
    ///
    /// # Errors
    /// Returns `RowSourceError::NotRestartable` for single-pass sources.
    fn restart(&mut self) -> Result<(), RowSourceError>;
}

/// Errors that can occur when reading from a row source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSourceError {
    /// The source can only be read once
    NotRestartable,
    /// A schema column is absent from the underlying data
    MissingColumn(String),
    /// A cell could not be parsed as its declared type
    Parse {
        line: u64,
        column: String,
        message: String,
    },
    /// The underlying reader failed
    Read(String),
}

impl fmt::Display for RowSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSourceError::NotRestartable => write!(f, "Row source cannot be restarted"),
            RowSourceError::MissingColumn(name) => {
                write!(f, "Column '{}' not found in row source", name)
            }
            RowSourceError::Parse {
                line,
                column,
                message,
            } => write!(
                f,
                "Line {}: cannot parse column '{}': {}",
                line, column, message
            ),
            RowSourceError::Read(msg) => write!(f, "Read failed: {}", msg),
        }
    }
}

impl std::error::Error for RowSourceError {}

/// Schema-binding failures, raised before any row is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// No grain columns to bind
    NoGrainColumns,
    /// A configured grain column is absent from the schema
    MissingGrainColumn(String),
    /// A configured source column is absent from the schema
    MissingSourceColumn(String),
    /// A source column is not numeric
    UnsupportedSourceType {
        column: String,
        column_type: ColumnType,
    },
    /// A grain already held in state has a different number of components
    /// than there are grain columns
    StoredGrainArity {
        grain: String,
        expected: usize,
        found: usize,
    },
    /// A grain already held in state has a component the bound column type
    /// cannot produce
    StoredGrainType {
        grain: String,
        column: String,
        column_type: ColumnType,
    },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::NoGrainColumns => write!(f, "At least one grain column is required"),
            BindError::MissingGrainColumn(name) => {
                write!(f, "Grain column '{}' not found in input schema", name)
            }
            BindError::MissingSourceColumn(name) => {
                write!(f, "Source column '{}' not found in input schema", name)
            }
            BindError::UnsupportedSourceType {
                column,
                column_type,
            } => write!(
                f,
                "Source column '{}' has unsupported type {}; a numeric type is required",
                column, column_type
            ),
            BindError::StoredGrainArity {
                grain,
                expected,
                found,
            } => write!(
                f,
                "Stored grain '{}' has {} components but {} grain columns are configured",
                grain, found, expected
            ),
            BindError::StoredGrainType {
                grain,
                column,
                column_type,
            } => write!(
                f,
                "Stored grain '{}' cannot come from grain column '{}' of type {}",
                grain, column, column_type
            ),
        }
    }
}

impl std::error::Error for BindError {}

/// Restartable in-memory row source.
#[derive(Debug, Clone)]
pub struct InMemoryRowSource {
    schema: Schema,
    rows: Vec<Row>,
    position: Option<usize>,
}

impl InMemoryRowSource {
    /// Creates a source over `rows`, which should already be in arrival order.
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        InMemoryRowSource {
            schema,
            rows,
            position: None,
        }
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for InMemoryRowSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn current_row(&self) -> Option<&Row> {
        self.position.and_then(|index| self.rows.get(index))
    }

    fn advance(&mut self) -> Result<bool, RowSourceError> {
        let next = self.position.map_or(0, |index| index + 1).min(self.rows.len());
        self.position = Some(next);
        Ok(next < self.rows.len())
    }

    fn restart(&mut self) -> Result<(), RowSourceError> {
        self.position = None;
        Ok(())
    }
}
