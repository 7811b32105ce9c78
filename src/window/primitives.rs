//! Stateless windowing primitives used by the aggregators.
//!
//! These are pure functions over a history snapshot (oldest value first).
//! NaN entries occupy a position in the history but are never counted as
//! valid observations.

use std::collections::VecDeque;

/// Half-open `[start, end)` span of the snapshot covered by one lag offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagWindow {
    pub start: usize,
    pub end: usize,
}

impl LagWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Windows for offsets `horizon, horizon - 1, ..., 1` over a snapshot of
/// `len` values.
///
/// Offset `d` ends just before the `d - 1` most recent values and spans at
/// most `max_window` values back from there. Offsets reaching further back
/// than the available history get an empty window at position 0. Both ends
/// are non-decreasing across the returned sequence.
pub fn lag_windows(len: usize, horizon: usize, max_window: usize) -> Vec<LagWindow> {
    (1..=horizon)
        .rev()
        .map(|offset| {
            let end = (len + 1).saturating_sub(offset);
            LagWindow {
                start: end.saturating_sub(max_window),
                end,
            }
        })
        .collect()
}

/// Largest ratio between the accumulated magnitude of a prefix and the
/// magnitude of a window sum for which the prefix difference is trusted.
const CANCELLATION_RATIO: f64 = 65536.0;

/// Prefix sums and valid-value counts over a snapshot.
///
/// Infinite values are counted as valid but kept out of the running sum, so
/// one infinity cannot poison every later window with `inf - inf`. A running
/// sum of absolute values tracks how much rounding error a prefix difference
/// can carry.
#[derive(Debug, Clone)]
pub struct PrefixSums {
    sums: Vec<f64>,
    magnitudes: Vec<f64>,
    valid: Vec<usize>,
    infinite: Vec<usize>,
}

impl PrefixSums {
    /// Single oldest-to-newest pass over `values`.
    pub fn new(values: &[f64]) -> Self {
        let mut sums = Vec::with_capacity(values.len() + 1);
        let mut magnitudes = Vec::with_capacity(values.len() + 1);
        let mut valid = Vec::with_capacity(values.len() + 1);
        let mut infinite = Vec::with_capacity(values.len() + 1);
        sums.push(0.0);
        magnitudes.push(0.0);
        valid.push(0);
        infinite.push(0);

        let (mut sum, mut magnitude) = (0.0, 0.0);
        let (mut count, mut infinities) = (0usize, 0usize);
        for &value in values {
            if !value.is_nan() {
                count += 1;
                if value.is_infinite() {
                    infinities += 1;
                } else {
                    sum += value;
                    magnitude += value.abs();
                }
            }
            sums.push(sum);
            magnitudes.push(magnitude);
            valid.push(count);
            infinite.push(infinities);
        }

        PrefixSums {
            sums,
            magnitudes,
            valid,
            infinite,
        }
    }

    /// Number of non-NaN values inside `window`.
    pub fn valid_count(&self, window: LagWindow) -> usize {
        self.valid[window.end] - self.valid[window.start]
    }

    /// Mean of the valid values inside `window`, or `None` if there are none.
    ///
    /// `values` must be the slice the sums were built from. It is summed
    /// directly, oldest first, when the window holds an infinity or when the
    /// prefix difference is small enough next to the values accumulated
    /// before it that rounding could have cancelled it away.
    pub fn mean(&self, values: &[f64], window: LagWindow) -> Option<f64> {
        let count = self.valid_count(window);
        if count == 0 {
            return None;
        }

        let direct = || {
            values[window.start..window.end]
                .iter()
                .filter(|v| !v.is_nan())
                .sum::<f64>()
        };
        let sum = if self.infinite[window.end] > self.infinite[window.start] {
            direct()
        } else {
            let difference = self.sums[window.end] - self.sums[window.start];
            if self.magnitudes[window.end] > CANCELLATION_RATIO * difference.abs() {
                direct()
            } else {
                difference
            }
        };

        Some(sum / count as f64)
    }
}

/// Which end of the ordering a sliding extremum tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

impl Extremum {
    /// Whether `candidate` makes `incumbent` redundant in the deque.
    fn dominates(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Extremum::Min => candidate <= incumbent,
            Extremum::Max => candidate >= incumbent,
        }
    }
}

/// Extremum of every window using one monotonic deque pass.
///
/// `windows` must have non-decreasing starts and ends, as produced by
/// `lag_windows`. Each snapshot index enters and leaves the deque at most
/// once, so the cost is `O(values.len() + windows.len())`. Windows with no
/// valid value yield `None`.
pub fn sliding_extrema(values: &[f64], windows: &[LagWindow], extremum: Extremum) -> Vec<Option<f64>> {
    let mut deque: VecDeque<usize> = VecDeque::new();
    let mut next = 0;
    let mut result = Vec::with_capacity(windows.len());

    for window in windows {
        while next < window.end {
            let value = values[next];
            if !value.is_nan() {
                while let Some(&back) = deque.back() {
                    if extremum.dominates(value, values[back]) {
                        deque.pop_back();
                    } else {
                        break;
                    }
                }
                deque.push_back(next);
            }
            next += 1;
        }

        while let Some(&front) = deque.front() {
            if front < window.start {
                deque.pop_front();
            } else {
                break;
            }
        }

        result.push(deque.front().map(|&index| values[index]));
    }

    result
}
