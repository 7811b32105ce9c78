//! Warm-up Coordination
//!
//! Before inference starts, the featurizer is fed historical rows so that
//! the first live rows of each grain already have history behind them. No
//! features are produced during warm-up.
//!
//! The coordinator owns the iteration: it pulls rows from a `RowSource`,
//! hands them to a `WarmupStep`, and restarts the source whenever the step
//! asks for another pass.

use crate::engine::EngineError;
use crate::row::{Row, RowSource};
use std::fmt;
use tracing::{debug, info, warn};

/// Default cap on the number of passes a warm-up may take.
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Signal returned by a warm-up step after each row and at end of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// Keep feeding rows
    Continue,
    /// Rewind the source and start another pass
    ResetAndContinue,
    /// Warm-up is finished
    Complete,
}

/// Participant in a coordinated warm-up.
pub trait WarmupStep {
    /// Consumes one row of the current pass.
    fn fit_row(&mut self, row: &Row) -> Result<FitStatus, EngineError>;

    /// Called when the source is exhausted. Returning `Continue` here is
    /// treated as `Complete`, since there are no rows left to continue with.
    fn end_of_pass(&mut self) -> FitStatus;
}

/// Summary of a finished warm-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupSummary {
    /// Number of passes started over the source
    pub passes: usize,
    /// Rows handed to the warm-up step, across all passes
    pub rows: usize,
}

impl fmt::Display for WarmupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Warm-up complete: {} rows over {} pass(es)",
            self.rows, self.passes
        )
    }
}

/// Drives a `WarmupStep` over a `RowSource` until it reports `Complete`.
#[derive(Debug, Clone, Copy)]
pub struct TrainingCoordinator {
    max_passes: usize,
}

impl Default for TrainingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCoordinator {
    pub fn new() -> Self {
        TrainingCoordinator {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    /// Caps the number of passes; at least one pass is always allowed.
    pub fn with_max_passes(max_passes: usize) -> Self {
        TrainingCoordinator {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Runs the warm-up loop.
    ///
    /// # Errors
    /// - Any error from the source or from `fit_row`
    /// - `RowSourceError::NotRestartable` if a restart is requested on a
    ///   single-pass source
    /// - `EngineError::PassLimitExceeded` if the step keeps asking for
    ///   restarts beyond `max_passes`
    pub fn run<S, W>(&self, source: &mut S, step: &mut W) -> Result<WarmupSummary, EngineError>
    where
        S: RowSource + ?Sized,
        W: WarmupStep + ?Sized,
    {
        info!(max_passes = self.max_passes, "starting warm-up");

        let mut passes = 1;
        let mut rows = 0;

        loop {
            let exhausted = !source.advance()?;
            let status = if exhausted {
                step.end_of_pass()
            } else {
                let row = source.current_row().ok_or(EngineError::NoCurrentRow)?;
                rows += 1;
                step.fit_row(row)?
            };

            match status {
                FitStatus::Continue if exhausted => {
                    warn!(passes, rows, "warm-up step continued past end of data");
                    break;
                }
                FitStatus::Continue => {}
                FitStatus::ResetAndContinue => {
                    if passes >= self.max_passes {
                        return Err(EngineError::PassLimitExceeded(self.max_passes));
                    }
                    source.restart()?;
                    passes += 1;
                    debug!(pass = passes, rows, "restarting warm-up source");
                }
                FitStatus::Complete => break,
            }
        }

        info!(passes, rows, "warm-up complete");
        Ok(WarmupSummary { passes, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{ColumnType, InMemoryRowSource, RowSourceError, Schema, Value};

    fn source(values: &[f64]) -> InMemoryRowSource {
        let schema = Schema::new().with_column("x", ColumnType::F64);
        let rows = values.iter().map(|v| Row::new(vec![Value::F64(*v)])).collect();
        InMemoryRowSource::new(schema, rows)
    }

    /// Records rows and requests a fixed number of full passes.
    struct MultiPass {
        wanted: usize,
        finished: usize,
        seen: Vec<f64>,
    }

    impl WarmupStep for MultiPass {
        fn fit_row(&mut self, row: &Row) -> Result<FitStatus, EngineError> {
            if let Some(Value::F64(v)) = row.get(0) {
                self.seen.push(*v);
            }
            Ok(FitStatus::Continue)
        }

        fn end_of_pass(&mut self) -> FitStatus {
            self.finished += 1;
            if self.finished < self.wanted {
                FitStatus::ResetAndContinue
            } else {
                FitStatus::Complete
            }
        }
    }

    /// Stops as soon as it has seen `limit` rows.
    struct EarlyStop {
        limit: usize,
        seen: usize,
    }

    impl WarmupStep for EarlyStop {
        fn fit_row(&mut self, _row: &Row) -> Result<FitStatus, EngineError> {
            self.seen += 1;
            if self.seen >= self.limit {
                Ok(FitStatus::Complete)
            } else {
                Ok(FitStatus::Continue)
            }
        }

        fn end_of_pass(&mut self) -> FitStatus {
            FitStatus::Complete
        }
    }

    /// Never stops asking for restarts.
    struct Restless;

    impl WarmupStep for Restless {
        fn fit_row(&mut self, _row: &Row) -> Result<FitStatus, EngineError> {
            Ok(FitStatus::Continue)
        }

        fn end_of_pass(&mut self) -> FitStatus {
            FitStatus::ResetAndContinue
        }
    }

    /// Never reports completion, even at end of data.
    struct Stubborn;

    impl WarmupStep for Stubborn {
        fn fit_row(&mut self, _row: &Row) -> Result<FitStatus, EngineError> {
            Ok(FitStatus::Continue)
        }

        fn end_of_pass(&mut self) -> FitStatus {
            FitStatus::Continue
        }
    }

    /// Source that cannot rewind.
    struct SinglePass(InMemoryRowSource);

    impl RowSource for SinglePass {
        fn schema(&self) -> &Schema {
            self.0.schema()
        }

        fn current_row(&self) -> Option<&Row> {
            self.0.current_row()
        }

        fn advance(&mut self) -> Result<bool, RowSourceError> {
            self.0.advance()
        }

        fn restart(&mut self) -> Result<(), RowSourceError> {
            Err(RowSourceError::NotRestartable)
        }
    }

    #[test]
    fn test_single_pass_sees_every_row_once() {
        let mut step = MultiPass {
            wanted: 1,
            finished: 0,
            seen: Vec::new(),
        };
        let summary = TrainingCoordinator::new()
            .run(&mut source(&[1.0, 2.0, 3.0]), &mut step)
            .unwrap();
        assert_eq!(summary, WarmupSummary { passes: 1, rows: 3 });
        assert_eq!(step.seen, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reset_and_continue_replays_from_the_start() {
        let mut step = MultiPass {
            wanted: 3,
            finished: 0,
            seen: Vec::new(),
        };
        let summary = TrainingCoordinator::new()
            .run(&mut source(&[1.0, 2.0]), &mut step)
            .unwrap();
        assert_eq!(summary.passes, 3);
        assert_eq!(summary.rows, 6);
        assert_eq!(step.seen, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(summary.to_string(), "Warm-up complete: 6 rows over 3 pass(es)");
    }

    #[test]
    fn test_complete_stops_mid_pass() {
        let mut step = EarlyStop { limit: 2, seen: 0 };
        let summary = TrainingCoordinator::new()
            .run(&mut source(&[1.0, 2.0, 3.0, 4.0]), &mut step)
            .unwrap();
        assert_eq!(summary.rows, 2);
    }

    #[test]
    fn test_empty_source_completes_immediately() {
        let mut step = EarlyStop { limit: 1, seen: 0 };
        let summary = TrainingCoordinator::new()
            .run(&mut source(&[]), &mut step)
            .unwrap();
        assert_eq!(summary, WarmupSummary { passes: 1, rows: 0 });
    }

    #[test]
    fn test_endless_restarts_hit_pass_limit() {
        let result = TrainingCoordinator::with_max_passes(4).run(&mut source(&[1.0]), &mut Restless);
        assert!(matches!(result, Err(EngineError::PassLimitExceeded(4))));
    }

    #[test]
    fn test_continue_at_end_of_data_terminates() {
        let summary = TrainingCoordinator::new()
            .run(&mut source(&[1.0, 2.0]), &mut Stubborn)
            .unwrap();
        assert_eq!(summary.rows, 2);
    }

    #[test]
    fn test_restart_on_single_pass_source_fails() {
        let mut single = SinglePass(source(&[1.0]));
        let result = TrainingCoordinator::new().run(&mut single, &mut Restless);
        assert!(matches!(
            result,
            Err(EngineError::Source(RowSourceError::NotRestartable))
        ));
    }
}
