use rolling_features::{
    decode_state, ColumnPair, ColumnType, EngineError, FitStatus, GrainKey, GrainValue,
    InMemoryRowSource, RollingWindowConfig, RollingWindowEngine, Row, Schema, StateError,
    TrainingCoordinator, Value, WarmupStep, WindowCalculation,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn schema() -> Schema {
    Schema::new()
        .with_column("region", ColumnType::Text)
        .with_column("sku", ColumnType::U32)
        .with_column("units", ColumnType::I64)
        .with_column("price", ColumnType::F32)
}

fn row(region: &str, sku: u32, units: i64, price: f32) -> Row {
    Row::new(vec![
        Value::Text(region.to_string()),
        Value::U32(sku),
        Value::I64(units),
        Value::F32(price),
    ])
}

fn config(calculation: WindowCalculation) -> RollingWindowConfig {
    RollingWindowConfig::from_json_str(&format!(
        r#"{{
            "grain_columns": ["region", "sku"],
            "columns": [
                {{"output": "units_lags", "source": "units"}},
                {{"output": "price_lags", "source": "price"}}
            ],
            "horizon": 2,
            "max_window_size": 3,
            "min_window_size": 2,
            "calculation": "{}"
        }}"#,
        calculation
    ))
    .unwrap()
}

#[test]
fn json_config_drives_multi_column_transform() {
    init_logging();
    let mut engine = RollingWindowEngine::new(config(WindowCalculation::Max));
    engine.bind(&schema()).unwrap();

    let rows = [
        row("east", 7, 4, 2.5),
        row("east", 7, 9, 1.5),
        row("west", 7, 100, 8.0),
        row("east", 7, 1, 3.0),
        row("east", 7, 6, 0.5),
    ];
    let outputs: Vec<_> = rows
        .iter()
        .map(|r| engine.transform_row(r).unwrap())
        .collect();

    // east/7 history before its fourth row: units [4, 9, 1], prices [2.5, 1.5, 3.0]
    assert_eq!(outputs[4][0], vec![9.0, 9.0]);
    assert_eq!(outputs[4][1], vec![2.5, 3.0]);
    // Third east row: lag 2 window [4] is below the minimum of 2
    assert!(outputs[3][0][0].is_nan());
    assert_eq!(outputs[3][0][1], 9.0);
    // west/7 is a separate grain
    assert!(outputs[2].iter().flatten().all(|v| v.is_nan()));
    assert_eq!(engine.grain_count(), 2);
}

#[test]
fn grain_keys_distinguish_component_values() {
    let mut engine = RollingWindowEngine::new(config(WindowCalculation::Min));
    engine.bind(&schema()).unwrap();
    engine.transform_row(&row("east", 1, 5, 1.0)).unwrap();
    engine.transform_row(&row("east", 2, 6, 1.0)).unwrap();
    engine.transform_row(&row("west", 1, 7, 1.0)).unwrap();

    let key = GrainKey::new(vec![GrainValue::text("east"), GrainValue::UInt(2)]);
    assert_eq!(key.to_string(), "east|2");
    assert_eq!(engine.history(&key, 0), Some(vec![6.0]));
    assert_eq!(engine.grain_count(), 3);
}

#[test]
fn bad_config_is_rejected_before_any_row() {
    let result = RollingWindowConfig::from_json_str(
        r#"{"grain_columns": ["g"], "columns": [{"output": "o", "source": "s"}],
            "horizon": 1, "max_window_size": 2, "min_window_size": 3, "calculation": "mean"}"#,
    );
    assert!(result.is_err());

    let result = RollingWindowConfig::new(
        vec![],
        vec![ColumnPair::new("o", "s")],
        1,
        1,
        1,
        WindowCalculation::Mean,
    );
    assert!(result.is_err());
}

/// Custom warm-up step: observes the source twice before completing.
struct TwoPassWarmup<'a> {
    engine: &'a mut RollingWindowEngine,
    passes: usize,
}

impl WarmupStep for TwoPassWarmup<'_> {
    fn fit_row(&mut self, row: &Row) -> Result<FitStatus, EngineError> {
        self.engine.observe_row(row)?;
        Ok(FitStatus::Continue)
    }

    fn end_of_pass(&mut self) -> FitStatus {
        self.passes += 1;
        if self.passes < 2 {
            FitStatus::ResetAndContinue
        } else {
            FitStatus::Complete
        }
    }
}

#[test]
fn custom_warmup_step_replays_the_source() {
    init_logging();
    let mut engine = RollingWindowEngine::new(config(WindowCalculation::Mean));
    engine.bind(&schema()).unwrap();
    let mut source = InMemoryRowSource::new(
        schema(),
        vec![row("east", 7, 2, 1.0), row("east", 7, 4, 3.0)],
    );

    let summary = TrainingCoordinator::new()
        .run(
            &mut source,
            &mut TwoPassWarmup {
                engine: &mut engine,
                passes: 0,
            },
        )
        .unwrap();
    assert_eq!(summary.passes, 2);
    assert_eq!(summary.rows, 4);

    // History now holds [2, 4, 2, 4]: capacity 4 keeps all of it.
    let out = engine.transform_row(&row("east", 7, 0, 0.0)).unwrap();
    let expected = [8.0 / 3.0, 10.0 / 3.0];
    for (actual, expected) in out[0].iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-12);
    }
}

#[test]
fn checkpoint_bytes_are_validated() {
    let mut engine = RollingWindowEngine::new(config(WindowCalculation::Min));
    engine.bind(&schema()).unwrap();
    engine.transform_row(&row("east", 7, 3, 1.0)).unwrap();

    let bytes = engine.save_state().unwrap();
    assert!(decode_state(&bytes).is_ok());
    assert_eq!(
        decode_state(&bytes[..bytes.len() - 3]).unwrap_err(),
        StateError::Truncated
    );
}
