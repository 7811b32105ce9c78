//! Checkpoint encoding for featurizer state
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "RWFS" | version: u8
//! grain column count: u32 | names: (len: u32, utf8)*
//! column pair count: u32  | (output, source)*
//! horizon: u32 | max_window_size: u32 | min_window_size: u32 | calculation: u8
//! per output column:
//!     grain count: u32
//!     per grain: component count: u32 | (tag: u8, payload)* | value count: u32 | f64*
//! ```
//!
//! Grains are written in sorted key order so the same state always encodes
//! to the same bytes. Decoding validates the whole payload before an engine
//! is built from it.

use crate::config::{ColumnPair, RollingWindowConfig, WindowCalculation};
use crate::engine::{GrainState, RollingWindowEngine};
use crate::grain_key::{GrainKey, GrainValue};
use crate::window::WindowBuffer;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::Path;
use tracing::debug;

/// Leading bytes of every state payload.
pub const STATE_MAGIC: &[u8; 4] = b"RWFS";

/// Layout version written by `encode_state`.
pub const STATE_FORMAT_VERSION: u8 = 1;

const TAG_MISSING: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_TEXT: u8 = 5;
const TAG_DATE: u8 = 6;

/// Errors that can occur when encoding or decoding persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Payload does not start with the state magic
    BadMagic,
    /// Payload was written by an unknown layout version
    UnsupportedVersion(u8),
    /// Payload ended early
    Truncated,
    /// Payload continues past the encoded state
    TrailingBytes(usize),
    /// A string is not valid UTF-8
    InvalidUtf8,
    /// Unknown calculation tag
    UnknownCalculation(u8),
    /// Unknown grain component tag
    UnknownGrainTag(u8),
    /// Encoded date is out of range
    InvalidDate(i32),
    /// Encoded configuration is invalid
    InvalidConfig(String),
    /// Grain key has the wrong number of components
    GrainArity { expected: usize, found: usize },
    /// The same grain appears twice for one column
    DuplicateGrain(String),
    /// A buffer holds more values than the configuration allows
    BufferOverflow { length: usize, capacity: usize },
    /// A length does not fit the layout's 32-bit fields
    TooLarge(usize),
    /// Reading or writing a state file failed
    Io(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::BadMagic => write!(f, "Not a featurizer state payload"),
            StateError::UnsupportedVersion(v) => write!(
                f,
                "Unsupported state version {} (latest supported is {})",
                v, STATE_FORMAT_VERSION
            ),
            StateError::Truncated => write!(f, "State payload is truncated"),
            StateError::TrailingBytes(n) => {
                write!(f, "State payload has {} unexpected trailing bytes", n)
            }
            StateError::InvalidUtf8 => write!(f, "State payload contains invalid UTF-8"),
            StateError::UnknownCalculation(tag) => write!(f, "Unknown calculation tag {}", tag),
            StateError::UnknownGrainTag(tag) => write!(f, "Unknown grain value tag {}", tag),
            StateError::InvalidDate(days) => write!(f, "Invalid encoded date {}", days),
            StateError::InvalidConfig(msg) => write!(f, "Invalid stored configuration: {}", msg),
            StateError::GrainArity { expected, found } => write!(
                f,
                "Grain key has {} components, expected {}",
                found, expected
            ),
            StateError::DuplicateGrain(key) => write!(f, "Grain '{}' stored twice", key),
            StateError::BufferOverflow { length, capacity } => write!(
                f,
                "Stored history of {} values exceeds capacity {}",
                length, capacity
            ),
            StateError::TooLarge(n) => write!(f, "Length {} exceeds the state layout limit", n),
            StateError::Io(msg) => write!(f, "State I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StateError {}

impl From<io::Error> for StateError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StateError::Truncated
        } else {
            StateError::Io(err.to_string())
        }
    }
}

fn len_u32(len: usize) -> Result<u32, StateError> {
    u32::try_from(len).map_err(|_| StateError::TooLarge(len))
}

fn write_str(out: &mut Vec<u8>, value: &str) -> Result<(), StateError> {
    out.write_u32::<LittleEndian>(len_u32(value.len())?)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_grain_value(out: &mut Vec<u8>, value: &GrainValue) -> Result<(), StateError> {
    match value {
        GrainValue::Missing => out.write_u8(TAG_MISSING)?,
        GrainValue::Bool(v) => {
            out.write_u8(TAG_BOOL)?;
            out.write_u8(u8::from(*v))?;
        }
        GrainValue::Int(v) => {
            out.write_u8(TAG_INT)?;
            out.write_i64::<LittleEndian>(*v)?;
        }
        GrainValue::UInt(v) => {
            out.write_u8(TAG_UINT)?;
            out.write_u64::<LittleEndian>(*v)?;
        }
        GrainValue::Float(v) => {
            out.write_u8(TAG_FLOAT)?;
            out.write_f64::<LittleEndian>(v.0)?;
        }
        GrainValue::Text(v) => {
            out.write_u8(TAG_TEXT)?;
            write_str(out, v)?;
        }
        GrainValue::Date(v) => {
            out.write_u8(TAG_DATE)?;
            out.write_i32::<LittleEndian>(v.num_days_from_ce())?;
        }
    }
    Ok(())
}

/// Encodes the configuration and all per-grain history of `engine`.
pub fn encode_state(engine: &RollingWindowEngine) -> Result<Vec<u8>, StateError> {
    let config = engine.config();
    let mut out = Vec::new();
    out.extend_from_slice(STATE_MAGIC);
    out.write_u8(STATE_FORMAT_VERSION)?;

    out.write_u32::<LittleEndian>(len_u32(config.grain_columns().len())?)?;
    for name in config.grain_columns() {
        write_str(&mut out, name)?;
    }

    out.write_u32::<LittleEndian>(len_u32(config.columns().len())?)?;
    for pair in config.columns() {
        write_str(&mut out, &pair.output)?;
        write_str(&mut out, &pair.source)?;
    }

    out.write_u32::<LittleEndian>(len_u32(config.horizon())?)?;
    out.write_u32::<LittleEndian>(len_u32(config.max_window_size())?)?;
    out.write_u32::<LittleEndian>(len_u32(config.min_window_size())?)?;
    out.write_u8(config.calculation().tag())?;

    let mut grains: Vec<(&GrainKey, &GrainState)> = engine.grain_states().iter().collect();
    grains.sort_by(|a, b| a.0.cmp(b.0));

    for column in 0..config.columns().len() {
        out.write_u32::<LittleEndian>(len_u32(grains.len())?)?;
        for (key, state) in &grains {
            out.write_u32::<LittleEndian>(len_u32(key.len())?)?;
            for value in key.values() {
                write_grain_value(&mut out, value)?;
            }
            let buffer = &state.buffers()[column];
            out.write_u32::<LittleEndian>(len_u32(buffer.len())?)?;
            for value in buffer.iter() {
                out.write_f64::<LittleEndian>(value)?;
            }
        }
    }

    debug!(
        bytes = out.len(),
        grains = grains.len(),
        "encoded featurizer state"
    );
    Ok(out)
}

struct StateReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> StateReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        StateReader {
            cursor: Cursor::new(bytes),
        }
    }

    fn remaining(&self) -> usize {
        let total = self.cursor.get_ref().len();
        total.saturating_sub(self.cursor.position() as usize)
    }

    fn u8(&mut self) -> Result<u8, StateError> {
        Ok(self.cursor.read_u8()?)
    }

    fn u32(&mut self) -> Result<usize, StateError> {
        Ok(self.cursor.read_u32::<LittleEndian>()? as usize)
    }

    /// Reads a count of items that each occupy at least `min_item_size`
    /// bytes, rejecting counts the remaining payload cannot hold.
    fn count(&mut self, min_item_size: usize) -> Result<usize, StateError> {
        let count = self.u32()?;
        if count.saturating_mul(min_item_size) > self.remaining() {
            return Err(StateError::Truncated);
        }
        Ok(count)
    }

    fn string(&mut self) -> Result<String, StateError> {
        let len = self.count(1)?;
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| StateError::InvalidUtf8)
    }

    fn grain_value(&mut self) -> Result<GrainValue, StateError> {
        let value = match self.u8()? {
            TAG_MISSING => GrainValue::Missing,
            TAG_BOOL => GrainValue::Bool(self.u8()? != 0),
            TAG_INT => GrainValue::Int(self.cursor.read_i64::<LittleEndian>()?),
            TAG_UINT => GrainValue::UInt(self.cursor.read_u64::<LittleEndian>()?),
            TAG_FLOAT => GrainValue::float(self.cursor.read_f64::<LittleEndian>()?),
            TAG_TEXT => GrainValue::Text(self.string()?),
            TAG_DATE => {
                let days = self.cursor.read_i32::<LittleEndian>()?;
                let date = NaiveDate::from_num_days_from_ce_opt(days)
                    .ok_or(StateError::InvalidDate(days))?;
                GrainValue::Date(date)
            }
            other => return Err(StateError::UnknownGrainTag(other)),
        };
        Ok(value)
    }

    fn f64(&mut self) -> Result<f64, StateError> {
        Ok(self.cursor.read_f64::<LittleEndian>()?)
    }
}

/// Decodes a payload written by `encode_state`.
///
/// The returned engine is not bound to a schema; call `bind` (or
/// `warm_up`) before transforming rows.
///
/// # Errors
/// Returns a `StateError` describing the first problem found. No engine is
/// produced from a payload that fails validation.
pub fn decode_state(bytes: &[u8]) -> Result<RollingWindowEngine, StateError> {
    let mut reader = StateReader::new(bytes);

    let mut magic = [0u8; 4];
    reader.cursor.read_exact(&mut magic).map_err(|_| StateError::BadMagic)?;
    if &magic != STATE_MAGIC {
        return Err(StateError::BadMagic);
    }

    let engine = match reader.u8()? {
        1 => decode_v1(&mut reader)?,
        other => return Err(StateError::UnsupportedVersion(other)),
    };

    let trailing = reader.remaining();
    if trailing > 0 {
        return Err(StateError::TrailingBytes(trailing));
    }
    Ok(engine)
}

fn decode_v1(reader: &mut StateReader<'_>) -> Result<RollingWindowEngine, StateError> {
    let grain_column_count = reader.count(4)?;
    let grain_columns = (0..grain_column_count)
        .map(|_| reader.string())
        .collect::<Result<Vec<_>, _>>()?;

    let pair_count = reader.count(8)?;
    let columns = (0..pair_count)
        .map(|_| Ok(ColumnPair::new(reader.string()?, reader.string()?)))
        .collect::<Result<Vec<_>, StateError>>()?;

    let horizon = reader.u32()?;
    let max_window_size = reader.u32()?;
    let min_window_size = reader.u32()?;
    let tag = reader.u8()?;
    let calculation = WindowCalculation::from_tag(tag).ok_or(StateError::UnknownCalculation(tag))?;

    let config = RollingWindowConfig::new(
        grain_columns,
        columns,
        horizon,
        max_window_size,
        min_window_size,
        calculation,
    )
    .map_err(|e| StateError::InvalidConfig(e.to_string()))?;

    let arity = config.grain_columns().len();
    let column_count = config.columns().len();
    let capacity = config.buffer_capacity();

    let mut histories: BTreeMap<GrainKey, Vec<Option<WindowBuffer>>> = BTreeMap::new();
    for column in 0..column_count {
        let grain_count = reader.count(8)?;
        for _ in 0..grain_count {
            let found = reader.count(1)?;
            if found != arity {
                return Err(StateError::GrainArity {
                    expected: arity,
                    found,
                });
            }
            let key = GrainKey::new(
                (0..found)
                    .map(|_| reader.grain_value())
                    .collect::<Result<Vec<_>, _>>()?,
            );

            let length = reader.count(8)?;
            if length > capacity {
                return Err(StateError::BufferOverflow { length, capacity });
            }
            let values = (0..length)
                .map(|_| reader.f64())
                .collect::<Result<Vec<_>, _>>()?;

            let slots = histories
                .entry(key.clone())
                .or_insert_with(|| vec![None; column_count]);
            if slots[column].is_some() {
                return Err(StateError::DuplicateGrain(key.to_string()));
            }
            slots[column] = Some(WindowBuffer::from_values(capacity, values));
        }
    }

    let grains: HashMap<GrainKey, GrainState> = histories
        .into_iter()
        .map(|(key, slots)| {
            let buffers = slots
                .into_iter()
                .map(|slot| slot.unwrap_or_else(|| WindowBuffer::new(capacity)))
                .collect();
            (key, GrainState::from_buffers(buffers))
        })
        .collect();

    debug!(grains = grains.len(), "decoded featurizer state");
    Ok(RollingWindowEngine::from_parts(config, grains))
}

/// Writes `engine`'s encoded state to `path`.
pub fn write_state_file<P: AsRef<Path>>(
    engine: &RollingWindowEngine,
    path: P,
) -> Result<(), StateError> {
    let bytes = encode_state(engine)?;
    std::fs::write(path.as_ref(), bytes)
        .map_err(|e| StateError::Io(format!("{}: {}", path.as_ref().display(), e)))
}

/// Reads and decodes a state file written by `write_state_file`.
pub fn read_state_file<P: AsRef<Path>>(path: P) -> Result<RollingWindowEngine, StateError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| StateError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
    decode_state(&bytes)
}

impl RollingWindowEngine {
    /// Encodes this engine's configuration and history.
    pub fn save_state(&self) -> Result<Vec<u8>, StateError> {
        encode_state(self)
    }

    /// Rebuilds an unbound engine from `save_state` output.
    pub fn load_state(bytes: &[u8]) -> Result<Self, StateError> {
        decode_state(bytes)
    }
}
