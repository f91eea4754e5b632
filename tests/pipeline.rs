use rand::{rngs::StdRng, Rng, SeedableRng};

use htm_anomaly::core::{
    anomaly::AnomalyMode, column_pool::ColumnPoolParams, sequence_memory::SequenceMemoryParams,
};
use htm_anomaly::{checkpoint, HtmError, Pipeline, PipelineConfig, Prediction};

fn ready(config: PipelineConfig) -> Pipeline {
    let mut pipeline = Pipeline::new(config).unwrap();
    pipeline.init().unwrap();
    pipeline
}

fn random_input(rng: &mut StdRng, size: usize) -> Vec<bool> {
    (0..size).map(|_| rng.random_bool(0.5)).collect()
}

/// A small pipeline whose column pool sees the whole input and does not boost.
fn cyclic_config() -> PipelineConfig {
    PipelineConfig {
        input_dimensions: vec![128],
        column_dimensions: vec![64],
        cells_per_column: 4,
        column_pool: ColumnPoolParams {
            potential_radius: None,
            target_density: 0.1,
            boost_strength: 0.0,
            ..Default::default()
        },
        sequence_memory: SequenceMemoryParams {
            activation_threshold: 3,
            learning_threshold: 2,
            new_synapse_count: 16,
            initial_permanence: 0.6,
            connected_permanence: 0.5,
            permanence_increment: 0.1,
            permanence_decrement: 0.05,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn cyclic_pattern(step: usize) -> Vec<bool> {
    (0..128).map(|i| i % 4 == step % 4).collect()
}

#[test]
fn end_to_end_run_resumes_bit_identically() {
    let mut pipeline = ready(PipelineConfig::default());
    let mut rng = StdRng::seed_from_u64(1);
    let mut last = None;

    for _ in 0..1000 {
        let input = random_input(&mut rng, 10_000);
        let output = pipeline.compute(&input, true).unwrap();
        assert!((0.0..=1.0).contains(&output.raw), "raw {}", output.raw);
        let likelihood = output.likelihood.unwrap();
        assert!((0.0..=1.0).contains(&likelihood));
        last = Some(output);
    }

    let last = last.unwrap();
    assert_eq!(last.tick, 1000);
    assert!(!last.active_columns.is_empty());
    assert!(last.active_columns.len() < 2048 / 10);

    let path = std::env::temp_dir()
        .join(format!("htm-anomaly-{}", std::process::id()))
        .join("tick-1000.bin");
    checkpoint::save(&pipeline, &path).unwrap();
    let mut resumed = checkpoint::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(resumed.tick(), 1000);
    let next = random_input(&mut rng, 10_000);
    let uninterrupted = pipeline.compute(&next, true).unwrap();
    let replayed = resumed.compute(&next, true).unwrap();

    assert_eq!(uninterrupted.tick, 1001);
    assert_eq!(uninterrupted.raw.to_bits(), replayed.raw.to_bits());
    assert_eq!(uninterrupted.score.to_bits(), replayed.score.to_bits());
    assert_eq!(uninterrupted, replayed);
    assert_eq!(pipeline, resumed);
}

/// Tuned for quick convergence; see `default_config_settles_into_a_periodic_burst` for the defaults.
#[test]
fn repeated_sequence_becomes_predictable() {
    let mut config = cyclic_config();
    config.anomaly.mode = AnomalyMode::Pure;
    let mut pipeline = ready(config);

    let mut cycle_means = Vec::new();
    for cycle in 0..40 {
        let mut sum = 0.0;
        for step in 0..4 {
            sum += pipeline.compute(&cyclic_pattern(cycle * 4 + step), true).unwrap().raw;
        }
        cycle_means.push(sum / 4.0);
    }

    assert!(cycle_means[0] > 0.75, "cycle means: {cycle_means:?}");
    let tail: f32 = cycle_means[35..].iter().sum::<f32>() / 5.0;
    assert!(tail < 0.1, "cycle means: {cycle_means:?}");
    assert!(tail < cycle_means[0]);
}

/// Without sequence resets the default configuration does not reach a raw score of zero on a
/// cycle: it settles into a loop where about one tick in 16 bursts fully.
#[test]
fn default_config_settles_into_a_periodic_burst() {
    let mut config = PipelineConfig::default();
    config.anomaly.mode = AnomalyMode::Pure;
    let mut pipeline = ready(config);
    let pattern = |tick: usize| -> Vec<bool> { (0..10_000).map(|i| i % 4 == tick % 4).collect() };

    let raws: Vec<f32> = (0..600)
        .map(|tick| pipeline.compute(&pattern(tick), true).unwrap().raw)
        .collect();

    let head: f32 = raws[..16].iter().sum::<f32>() / 16.0;
    let tail: f32 = raws[536..].iter().sum::<f32>() / 64.0;
    assert!(head > 0.75, "head {head}");
    assert!(tail < 0.25, "tail {tail}");
    assert!(raws[536..].iter().filter(|&&raw| raw == 0.0).count() >= 32);
}

#[test]
fn ticks_without_learning_are_pure() {
    let mut pipeline = ready(cyclic_config());
    for step in 0..12 {
        pipeline.compute(&cyclic_pattern(step), true).unwrap();
    }

    let prediction = pipeline.prediction().unwrap().clone();
    let input = cyclic_pattern(12);
    let mut twin = pipeline.clone();

    let (a, next_a) = pipeline.step(&input, &prediction, false).unwrap();
    let (b, next_b) = twin.step(&input, &prediction, false).unwrap();
    assert_eq!(a, b);
    assert_eq!(next_a, next_b);

    // Nothing learned: permanences and segments are as they were.
    let before = twin.clone();
    twin.compute(&cyclic_pattern(13), false).unwrap();
    let (pool, pool_before) = (twin.column_pool().unwrap(), before.column_pool().unwrap());
    for col in 0..pool.num_columns() {
        assert_eq!(
            pool.column(col).unwrap().synapses,
            pool_before.column(col).unwrap().synapses
        );
    }
    assert_eq!(pool.boost_factors(), pool_before.boost_factors());
    let (memory, memory_before) = (
        twin.sequence_memory().unwrap(),
        before.sequence_memory().unwrap(),
    );
    assert_eq!(memory.num_segments(), memory_before.num_segments());
    assert_eq!(memory.num_synapses(), memory_before.num_synapses());
}

#[test]
fn activation_stays_near_target_sparsity() {
    let config = PipelineConfig {
        input_dimensions: vec![1000],
        column_dimensions: vec![500],
        cells_per_column: 2,
        column_pool: ColumnPoolParams {
            target_density: 0.04,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut pipeline = ready(config);
    let mut rng = StdRng::seed_from_u64(3);
    let target = 20;

    for tick in 0..200 {
        let output = pipeline.compute(&random_input(&mut rng, 1000), true).unwrap();
        if tick >= 100 {
            let active = output.active_columns.len();
            assert!(
                active <= target && active * 10 >= target * 8,
                "tick {tick}: {active} active columns"
            );
        }
    }
}

#[test]
fn likelihood_is_neutral_until_warm_up_completes() {
    let mut config = cyclic_config();
    config.anomaly.warm_up = 10;
    config.anomaly.statistics_window = 100;
    let mut pipeline = ready(config);

    for step in 0..9 {
        let output = pipeline.compute(&cyclic_pattern(step), true).unwrap();
        assert_eq!(output.likelihood, Some(0.5));
    }
    assert!(!pipeline.anomaly_scorer().unwrap().is_warmed_up());

    // The tenth score is part of the history it is measured against.
    let tenth = pipeline.compute(&cyclic_pattern(9), true).unwrap();
    let scorer = pipeline.anomaly_scorer().unwrap();
    assert!(scorer.is_warmed_up());
    assert_eq!(scorer.history().len(), 10);
    assert_eq!(tenth.likelihood, Some(scorer.likelihood_of(tenth.raw)));
}

#[test]
fn misuse_is_reported_and_changes_nothing() {
    let mut idle = Pipeline::new(cyclic_config()).unwrap();
    assert!(matches!(
        idle.compute(&cyclic_pattern(0), true),
        Err(HtmError::NotInitialized)
    ));
    assert!(matches!(
        checkpoint::to_bytes(&idle),
        Err(HtmError::NotInitialized)
    ));

    let mut pipeline = ready(cyclic_config());
    let stale = Prediction::initial();
    let (_, current) = pipeline.step(&cyclic_pattern(0), &stale, true).unwrap();
    let before = pipeline.clone();

    assert!(matches!(
        pipeline.step(&cyclic_pattern(1), &stale, true),
        Err(HtmError::StalePrediction { expected: 2, found: 1 })
    ));
    assert!(matches!(
        pipeline.step(&[true; 5], &current, true),
        Err(HtmError::InputLength { expected: 128, got: 5 })
    ));
    assert_eq!(pipeline, before);

    assert!(pipeline.step(&cyclic_pattern(1), &current, true).is_ok());
}

#[test]
fn config_file_drives_the_pipeline() {
    let dir = std::env::temp_dir().join(format!("htm-anomaly-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(
        &path,
        r#"{ "input_dimensions": [128], "column_dimensions": [64], "cells_per_column": 2 }"#,
    )
    .unwrap();

    let config = PipelineConfig::from_json_file(&path).unwrap();
    let _ = std::fs::remove_dir_all(&dir);
    let mut pipeline = ready(config);

    let output = pipeline.compute(&cyclic_pattern(0), true).unwrap();
    assert_eq!(output.tick, 1);
    assert_eq!(pipeline.sequence_memory().unwrap().num_cells(), 128);
}
