//! Per-grain history buffers and the lagged window statistics computed from
//! them.
//!
//! `WindowBuffer` holds the bounded history. `WindowAggregator`
//! implementations turn a history snapshot into a lag vector using the
//! primitives in `primitives`, in `O(history + horizon)` per row.

pub mod aggregator;
pub mod buffer;
pub mod primitives;

pub use aggregator::{aggregator_for, MaxAggregator, MeanAggregator, MinAggregator, WindowAggregator};
pub use buffer::WindowBuffer;
