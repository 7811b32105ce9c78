use crate::row::{BindError, ColumnType, Row, Schema, Value};
use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use std::fmt;

/// Canonical form of one grain-column value.
///
/// Integers of every width collapse onto `Int`/`UInt` and floats onto a
/// totally ordered `f64`, so equal values hash equally whatever the
/// declared column width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GrainValue {
    Missing,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Text(String),
    Date(NaiveDate),
}

impl GrainValue {
    /// Float component with `-0.0` folded onto `0.0`.
    pub fn float(value: f64) -> Self {
        GrainValue::Float(OrderedFloat(if value == 0.0 { 0.0 } else { value }))
    }

    pub fn text(value: impl Into<String>) -> Self {
        GrainValue::Text(value.into())
    }

    /// Whether a column of `column_type` can produce this component.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        match self {
            GrainValue::Missing => true,
            GrainValue::Bool(_) => column_type == ColumnType::Bool,
            GrainValue::Int(_) => matches!(
                column_type,
                ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64
            ),
            GrainValue::UInt(_) => matches!(
                column_type,
                ColumnType::U8 | ColumnType::U16 | ColumnType::U32 | ColumnType::U64
            ),
            GrainValue::Float(_) => matches!(column_type, ColumnType::F32 | ColumnType::F64),
            GrainValue::Text(_) => column_type == ColumnType::Text,
            GrainValue::Date(_) => column_type == ColumnType::Date,
        }
    }
}

impl fmt::Display for GrainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrainValue::Missing => Ok(()),
            GrainValue::Bool(v) => write!(f, "{}", v),
            GrainValue::Int(v) => write!(f, "{}", v),
            GrainValue::UInt(v) => write!(f, "{}", v),
            GrainValue::Float(v) => write!(f, "{}", v.0),
            GrainValue::Text(v) => write!(f, "{}", v),
            GrainValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
        }
    }
}

/// Partition key identifying one independent time series.
///
/// Equality and hashing are structural over the ordered component tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrainKey(Vec<GrainValue>);

impl GrainKey {
    pub fn new(values: Vec<GrainValue>) -> Self {
        GrainKey(values)
    }

    pub fn values(&self) -> &[GrainValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

type RenderFn = fn(&Value) -> Option<GrainValue>;

/// Converts cells of one declared column type into grain components.
///
/// Chosen once per column when binding to a schema.
#[derive(Debug, Clone, Copy)]
pub struct ValueRenderer {
    column_type: ColumnType,
    render: RenderFn,
}

impl ValueRenderer {
    pub fn for_type(column_type: ColumnType) -> Self {
        let render: RenderFn = match column_type {
            ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64 => render_signed,
            ColumnType::U8 | ColumnType::U16 | ColumnType::U32 | ColumnType::U64 => {
                render_unsigned
            }
            ColumnType::F32 | ColumnType::F64 => render_float,
            ColumnType::Bool => render_bool,
            ColumnType::Text => render_text,
            ColumnType::Date => render_date,
        };
        ValueRenderer {
            column_type,
            render,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Renders a cell, or `None` when it does not belong to this column type.
    pub fn render(&self, value: &Value) -> Option<GrainValue> {
        (self.render)(value)
    }
}

fn render_signed(value: &Value) -> Option<GrainValue> {
    match value {
        Value::I8(v) => Some(GrainValue::Int(i64::from(*v))),
        Value::I16(v) => Some(GrainValue::Int(i64::from(*v))),
        Value::I32(v) => Some(GrainValue::Int(i64::from(*v))),
        Value::I64(v) => Some(GrainValue::Int(*v)),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

fn render_unsigned(value: &Value) -> Option<GrainValue> {
    match value {
        Value::U8(v) => Some(GrainValue::UInt(u64::from(*v))),
        Value::U16(v) => Some(GrainValue::UInt(u64::from(*v))),
        Value::U32(v) => Some(GrainValue::UInt(u64::from(*v))),
        Value::U64(v) => Some(GrainValue::UInt(*v)),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

fn render_float(value: &Value) -> Option<GrainValue> {
    match value {
        Value::F32(v) => Some(GrainValue::float(f64::from(*v))),
        Value::F64(v) => Some(GrainValue::float(*v)),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

fn render_bool(value: &Value) -> Option<GrainValue> {
    match value {
        Value::Bool(v) => Some(GrainValue::Bool(*v)),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

fn render_text(value: &Value) -> Option<GrainValue> {
    match value {
        Value::Text(v) => Some(GrainValue::Text(v.clone())),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

fn render_date(value: &Value) -> Option<GrainValue> {
    match value {
        Value::Date(v) => Some(GrainValue::Date(*v)),
        Value::Missing => Some(GrainValue::Missing),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct BoundGrainColumn {
    name: String,
    index: usize,
    renderer: ValueRenderer,
}

/// Builds grain keys from rows of a bound schema.
#[derive(Debug, Clone)]
pub struct GrainKeyCodec {
    columns: Vec<BoundGrainColumn>,
}

impl GrainKeyCodec {
    /// Resolves the grain columns against `schema`.
    ///
    /// # Errors
    /// Returns `BindError::NoGrainColumns` for an empty column list and
    /// `BindError::MissingGrainColumn` when a name is absent from the schema.
    pub fn bind(grain_columns: &[String], schema: &Schema) -> Result<Self, BindError> {
        if grain_columns.is_empty() {
            return Err(BindError::NoGrainColumns);
        }

        let columns = grain_columns
            .iter()
            .map(|name| {
                let index = schema
                    .index_of(name)
                    .ok_or_else(|| BindError::MissingGrainColumn(name.clone()))?;
                let column_type = schema
                    .column_type(index)
                    .ok_or_else(|| BindError::MissingGrainColumn(name.clone()))?;
                Ok(BoundGrainColumn {
                    name: name.clone(),
                    index,
                    renderer: ValueRenderer::for_type(column_type),
                })
            })
            .collect::<Result<Vec<_>, BindError>>()?;

        Ok(GrainKeyCodec { columns })
    }

    /// Extracts the grain key of `row`.
    pub fn key_for(&self, row: &Row) -> Result<GrainKey, GrainKeyError> {
        let values = self
            .columns
            .iter()
            .map(|column| {
                let value = row.get(column.index).ok_or_else(|| GrainKeyError::RowTooShort {
                    column: column.name.clone(),
                    index: column.index,
                })?;
                column
                    .renderer
                    .render(value)
                    .ok_or_else(|| GrainKeyError::TypeMismatch {
                        column: column.name.clone(),
                        expected: column.renderer.column_type(),
                        found: value.column_type(),
                    })
            })
            .collect::<Result<Vec<_>, GrainKeyError>>()?;

        Ok(GrainKey(values))
    }

    /// Checks that `key` is one this codec could have produced, so history
    /// kept under it stays reachable from rows of the bound schema.
    ///
    /// # Errors
    /// Returns `BindError::StoredGrainArity` when the component count differs
    /// from the grain column count, and `BindError::StoredGrainType` when a
    /// component cannot come from its column's declared type.
    pub fn check_stored(&self, key: &GrainKey) -> Result<(), BindError> {
        if key.len() != self.columns.len() {
            return Err(BindError::StoredGrainArity {
                grain: key.to_string(),
                expected: self.columns.len(),
                found: key.len(),
            });
        }

        for (column, value) in self.columns.iter().zip(key.values()) {
            let column_type = column.renderer.column_type();
            if !value.fits(column_type) {
                return Err(BindError::StoredGrainType {
                    grain: key.to_string(),
                    column: column.name.clone(),
                    column_type,
                });
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

/// Errors that can occur when extracting a grain key from a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrainKeyError {
    /// The row has no cell at the grain column's position
    RowTooShort { column: String, index: usize },
    /// The cell does not match the column's declared type
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: Option<ColumnType>,
    },
}

impl fmt::Display for GrainKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrainKeyError::RowTooShort { column, index } => write!(
                f,
                "Row has no value at position {} for grain column '{}'",
                index, column
            ),
            GrainKeyError::TypeMismatch {
                column,
                expected,
                found,
            } => match found {
                Some(found) => write!(
                    f,
                    "Grain column '{}' expected {} but row holds {}",
                    column, expected, found
                ),
                None => write!(f, "Grain column '{}' expected {}", column, expected),
            },
        }
    }
}

impl std::error::Error for GrainKeyError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn schema() -> Schema {
        Schema::new()
            .with_column("store", ColumnType::Text)
            .with_column("region", ColumnType::I16)
            .with_column("sales", ColumnType::F64)
    }

    fn grains(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_key_is_ordered_tuple_of_components() {
        let codec = GrainKeyCodec::bind(&grains(&["store", "region"]), &schema()).unwrap();
        let row = Row::new(vec![
            Value::Text("A".to_string()),
            Value::I16(7),
            Value::F64(1.5),
        ]);

        let key = codec.key_for(&row).unwrap();
        assert_eq!(
            key,
            GrainKey::new(vec![GrainValue::text("A"), GrainValue::Int(7)])
        );
        assert_eq!(key.to_string(), "A|7");
    }

    #[test]
    fn test_integer_widths_render_to_same_component() {
        let narrow = ValueRenderer::for_type(ColumnType::I8);
        let wide = ValueRenderer::for_type(ColumnType::I64);
        assert_eq!(narrow.render(&Value::I8(5)), wide.render(&Value::I64(5)));
    }

    #[test]
    fn test_float_zero_is_canonical() {
        let renderer = ValueRenderer::for_type(ColumnType::F64);
        assert_eq!(
            renderer.render(&Value::F64(-0.0)),
            renderer.render(&Value::F64(0.0))
        );
    }

    #[test]
    fn test_missing_grain_column_fails_bind() {
        let result = GrainKeyCodec::bind(&grains(&["item"]), &schema());
        assert_eq!(
            result.unwrap_err(),
            BindError::MissingGrainColumn("item".to_string())
        );
    }

    #[test]
    fn test_empty_grain_columns_fail_bind() {
        let result = GrainKeyCodec::bind(&[], &schema());
        assert_eq!(result.unwrap_err(), BindError::NoGrainColumns);
    }

    #[test]
    fn test_mismatched_cell_is_reported() {
        let codec = GrainKeyCodec::bind(&grains(&["region"]), &schema()).unwrap();
        let row = Row::new(vec![
            Value::Text("A".to_string()),
            Value::Text("north".to_string()),
            Value::F64(1.0),
        ]);

        let err = codec.key_for(&row).unwrap_err();
        assert_eq!(
            err,
            GrainKeyError::TypeMismatch {
                column: "region".to_string(),
                expected: ColumnType::I16,
                found: Some(ColumnType::Text),
            }
        );
    }

    #[test]
    fn test_short_row_is_reported() {
        let codec = GrainKeyCodec::bind(&grains(&["region"]), &schema()).unwrap();
        let row = Row::new(vec![Value::Text("A".to_string())]);
        assert!(matches!(
            codec.key_for(&row),
            Err(GrainKeyError::RowTooShort { index: 1, .. })
        ));
    }

    #[test]
    fn test_stored_keys_are_checked_against_column_types() {
        let codec = GrainKeyCodec::bind(&grains(&["store", "region"]), &schema()).unwrap();
        let good = GrainKey::new(vec![GrainValue::text("A"), GrainValue::Int(-3)]);
        let gap = GrainKey::new(vec![GrainValue::Missing, GrainValue::Int(2)]);
        assert_eq!(codec.check_stored(&good), Ok(()));
        assert_eq!(codec.check_stored(&gap), Ok(()));

        let unsigned = GrainKey::new(vec![GrainValue::text("A"), GrainValue::UInt(3)]);
        assert_eq!(
            codec.check_stored(&unsigned),
            Err(BindError::StoredGrainType {
                grain: "A|3".to_string(),
                column: "region".to_string(),
                column_type: ColumnType::I16,
            })
        );

        let short = GrainKey::new(vec![GrainValue::text("A")]);
        assert_eq!(
            codec.check_stored(&short),
            Err(BindError::StoredGrainArity {
                grain: "A".to_string(),
                expected: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn test_grain_key_hashable() {
        let key1 = GrainKey::new(vec![GrainValue::text("A"), GrainValue::float(1.5)]);
        let key2 = GrainKey::new(vec![GrainValue::text("A"), GrainValue::float(1.5)]);
        let key3 = GrainKey::new(vec![GrainValue::text("B"), GrainValue::float(1.5)]);

        let mut map = HashMap::new();
        map.insert(key1, "first");
        assert_eq!(map.get(&key2), Some(&"first"));
        assert_eq!(map.get(&key3), None);
    }
}
