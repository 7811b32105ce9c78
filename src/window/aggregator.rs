use crate::config::WindowCalculation;
use crate::window::primitives::{lag_windows, sliding_extrema, Extremum, PrefixSums};

/// Computes the lag vector for one history snapshot.
///
/// The returned vector always holds `horizon` entries, highest offset first.
/// An entry is NaN when its window has fewer than `min_window` valid values.
pub trait WindowAggregator: Send + Sync + std::fmt::Debug {
    fn calculation(&self) -> WindowCalculation;

    fn name(&self) -> &'static str {
        self.calculation().as_str()
    }

    fn compute(
        &self,
        snapshot: &[f64],
        horizon: usize,
        max_window: usize,
        min_window: usize,
    ) -> Vec<f64>;
}

/// Returns the aggregator for a configured calculation.
pub fn aggregator_for(calculation: WindowCalculation) -> Box<dyn WindowAggregator> {
    match calculation {
        WindowCalculation::Mean => Box::new(MeanAggregator),
        WindowCalculation::Min => Box::new(MinAggregator),
        WindowCalculation::Max => Box::new(MaxAggregator),
    }
}

/// Arithmetic mean via one prefix-sum pass per snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAggregator;

impl WindowAggregator for MeanAggregator {
    fn calculation(&self) -> WindowCalculation {
        WindowCalculation::Mean
    }

    fn compute(
        &self,
        snapshot: &[f64],
        horizon: usize,
        max_window: usize,
        min_window: usize,
    ) -> Vec<f64> {
        let prefix = PrefixSums::new(snapshot);
        lag_windows(snapshot.len(), horizon, max_window)
            .into_iter()
            .map(|window| {
                if prefix.valid_count(window) < min_window {
                    return f64::NAN;
                }
                prefix.mean(snapshot, window).unwrap_or(f64::NAN)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinAggregator;

impl WindowAggregator for MinAggregator {
    fn calculation(&self) -> WindowCalculation {
        WindowCalculation::Min
    }

    fn compute(
        &self,
        snapshot: &[f64],
        horizon: usize,
        max_window: usize,
        min_window: usize,
    ) -> Vec<f64> {
        extremum_vector(snapshot, horizon, max_window, min_window, Extremum::Min)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAggregator;

impl WindowAggregator for MaxAggregator {
    fn calculation(&self) -> WindowCalculation {
        WindowCalculation::Max
    }

    fn compute(
        &self,
        snapshot: &[f64],
        horizon: usize,
        max_window: usize,
        min_window: usize,
    ) -> Vec<f64> {
        extremum_vector(snapshot, horizon, max_window, min_window, Extremum::Max)
    }
}

fn extremum_vector(
    snapshot: &[f64],
    horizon: usize,
    max_window: usize,
    min_window: usize,
    extremum: Extremum,
) -> Vec<f64> {
    let prefix = PrefixSums::new(snapshot);
    let windows = lag_windows(snapshot.len(), horizon, max_window);
    let extrema = sliding_extrema(snapshot, &windows, extremum);

    windows
        .iter()
        .zip(extrema)
        .map(|(window, value)| {
            if prefix.valid_count(*window) < min_window {
                f64::NAN
            } else {
                value.unwrap_or(f64::NAN)
            }
        })
        .collect()
}
