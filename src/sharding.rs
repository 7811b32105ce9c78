//! Grain-sharded batch transform
//!
//! Grains never share state, so a batch of rows can be split by grain and
//! each grain's rows run on their own worker. Within a grain rows are still
//! processed strictly in arrival order, which keeps the output identical to
//! calling `transform_row` on every row in sequence.

use crate::engine::{EngineError, FeatureVector, GrainState, RollingWindowEngine};
use crate::grain_key::GrainKey;
use crate::row::Row;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// One grain's slice of a batch: its state and its rows, as
/// `(position in batch, signals)`.
struct Shard {
    grain: GrainKey,
    state: GrainState,
    rows: Vec<(usize, Vec<f64>)>,
}

impl RollingWindowEngine {
    /// Transforms a batch of rows of the bound schema, running distinct
    /// grains in parallel.
    ///
    /// Every row is decoded before any state changes, so a malformed row
    /// leaves the engine untouched.
    pub fn transform_batch_parallel(
        &mut self,
        rows: &[Row],
    ) -> Result<Vec<Vec<FeatureVector>>, EngineError> {
        let binding = self.binding()?;
        let batch = rows
            .iter()
            .map(|row| binding.decode(row))
            .collect::<Result<Vec<_>, _>>()?;
        self.transform_keyed_batch_parallel(batch)
    }

    /// Parallel batch form of `transform_keyed`. Outputs come back in the
    /// order of `batch`.
    pub fn transform_keyed_batch_parallel(
        &mut self,
        batch: Vec<(GrainKey, Vec<f64>)>,
    ) -> Result<Vec<Vec<FeatureVector>>, EngineError> {
        let expected = self.config().columns().len();
        if let Some((_, signals)) = batch.iter().find(|(_, s)| s.len() != expected) {
            return Err(EngineError::SignalCountMismatch {
                expected,
                found: signals.len(),
            });
        }

        let total = batch.len();
        let shards = self.take_shards(batch);
        debug!(rows = total, shards = shards.len(), "sharded batch transform");

        let aggregator = self.aggregator();
        let params = self.params();
        let finished: Vec<(GrainKey, GrainState, Vec<(usize, Vec<FeatureVector>)>)> = shards
            .into_par_iter()
            .map(|shard| {
                let Shard {
                    grain,
                    mut state,
                    rows,
                } = shard;
                let outputs = rows
                    .into_iter()
                    .map(|(position, signals)| {
                        (position, state.transform(aggregator, params, &signals))
                    })
                    .collect();
                (grain, state, outputs)
            })
            .collect();

        let mut results: Vec<Vec<FeatureVector>> = vec![Vec::new(); total];
        let grains = self.grain_states_mut();
        for (grain, state, outputs) in finished {
            for (position, features) in outputs {
                results[position] = features;
            }
            grains.insert(grain, state);
        }
        Ok(results)
    }

    /// Groups the batch by grain in order of first appearance and moves
    /// each grain's state out of the engine.
    fn take_shards(&mut self, batch: Vec<(GrainKey, Vec<f64>)>) -> Vec<Shard> {
        let columns = self.config().columns().len();
        let capacity = self.config().buffer_capacity();

        let mut slots: HashMap<GrainKey, usize> = HashMap::new();
        let mut shards: Vec<Shard> = Vec::new();
        for (position, (grain, signals)) in batch.into_iter().enumerate() {
            match slots.get(&grain) {
                Some(&slot) => shards[slot].rows.push((position, signals)),
                None => {
                    slots.insert(grain.clone(), shards.len());
                    shards.push(Shard {
                        grain,
                        state: GrainState::new(columns, capacity),
                        rows: vec![(position, signals)],
                    });
                }
            }
        }

        let grains = self.grain_states_mut();
        for shard in &mut shards {
            match grains.remove(&shard.grain) {
                Some(state) => shard.state = state,
                None => debug!(grain = %shard.grain, "new grain, starting with empty history"),
            }
        }
        shards
    }
}
