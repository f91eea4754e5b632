//! Work-load for the anomaly pipeline: 10000 input bits, 2048 columns with 10 cells each,
//! 1000 ticks of uniformly random input at 50% density, learning throughout.
//!
//! Usage: `hello_sptp [--config <file.json>] [--checkpoint <file>] [--epochs <n>]`
//!
//! Set `RUST_LOG=debug` to see the raw anomaly score of every tick.

use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;
use tracing::{debug, info};

use htm_anomaly::{checkpoint, Pipeline, PipelineConfig};

const EPOCHS: usize = 1000;

struct Args {
    config: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
    epochs: usize,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        checkpoint: None,
        epochs: EPOCHS,
    };
    let mut iter = std::env::args().skip(1);

    while let Some(flag) = iter.next() {
        let mut value = || iter.next().with_context(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--config" => args.config = Some(value()?.into()),
            "--checkpoint" => args.checkpoint = Some(value()?.into()),
            "--epochs" => args.epochs = value()?.parse().context("--epochs takes a number")?,
            other => bail!("unknown argument `{other}`"),
        }
    }

    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    info!(
        inputs = config.num_inputs(),
        columns = config.num_columns(),
        cells = config.cells_per_column,
        epochs = args.epochs,
        "starting"
    );

    let mut pipeline = Pipeline::new(config)?;
    pipeline.init()?;

    let mut rng = StdRng::seed_from_u64(pipeline.config().seed.wrapping_add(1));
    let mut input = vec![false; pipeline.config().num_inputs()];
    let mut last = None;
    let mut raw_sum = 0.0f64;

    for epoch in 0..args.epochs {
        input.iter_mut().for_each(|bit| *bit = rng.random_bool(0.5));

        let output = pipeline.compute(&input, true)?;
        debug!(tick = output.tick, raw = output.raw, score = output.score, "anomaly");
        raw_sum += output.raw as f64;

        if (epoch + 1) % 100 == 0 {
            info!(
                tick = output.tick,
                mean_raw = raw_sum / 100.0,
                active = output.active_columns.len(),
                "progress"
            );
            raw_sum = 0.0;
        }
        last = Some(output);
    }

    if let Some(output) = last {
        println!("Epoch = {}", output.tick - 1);
        println!("SP= {:?}", output.active_columns.as_slice());
        let predicted = pipeline
            .prediction()
            .map(|p| p.columns().as_slice().to_vec())
            .unwrap_or_default();
        println!("TP= {predicted:?}");
    }

    if let Some(path) = &args.checkpoint {
        checkpoint::save(&pipeline, path)
            .with_context(|| format!("writing checkpoint {}", path.display()))?;
    }

    Ok(())
}
