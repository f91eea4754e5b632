//! Checkpoint and resume.
//!
//! A checkpoint holds every piece of mutable state of an initialized pipeline: the column pool
//! (permanences, duty cycles, boost factors), the sequence memory (cells, segments, synapses and
//! the previous step's activity), the anomaly history and the carried prediction.
//! Resuming from it and continuing gives the same outputs as never having stopped.
//!
//! Layout: a little-endian `u32` format version, followed by the bincode-encoded `Snapshot`
//! (fixed-width integers, little endian).

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::config::PipelineConfig;
use crate::core::{
    anomaly::AnomalyScorer,
    column_pool::ColumnPool,
    pipeline::{Components, Pipeline, Prediction},
    sequence_memory::SequenceMemory,
};
use crate::error::{HtmError, Result};

/// Current checkpoint format version.
pub const FORMAT_VERSION: u32 = 1;

/// The complete state of an initialized pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub config: PipelineConfig,
    pub tick: u64,
    pub column_pool: ColumnPool,
    pub sequence_memory: SequenceMemory,
    pub anomaly_scorer: AnomalyScorer,
    pub prediction: Prediction,
}

impl Snapshot {
    /// Copies the state of `pipeline`. Fails with `NotInitialized` before `init()`.
    pub fn capture(pipeline: &Pipeline) -> Result<Self> {
        let parts = pipeline.ready()?;
        Ok(Self {
            config: pipeline.config().clone(),
            tick: parts.tick,
            column_pool: parts.pool.clone(),
            sequence_memory: parts.memory.clone(),
            anomaly_scorer: parts.scorer.clone(),
            prediction: parts.prediction.clone(),
        })
    }

    /// Rebuilds a ready pipeline from this snapshot.
    pub fn into_pipeline(self) -> Result<Pipeline> {
        if self.prediction.for_tick() != self.tick + 1 {
            return Err(HtmError::StalePrediction {
                expected: self.tick + 1,
                found: self.prediction.for_tick(),
            });
        }

        Pipeline::from_components(
            self.config,
            Components {
                pool: self.column_pool,
                memory: self.sequence_memory,
                scorer: self.anomaly_scorer,
                tick: self.tick,
                prediction: self.prediction,
            },
        )
    }

    /// Writes the version header and the snapshot.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let codec = codec();
        codec.serialize_into(&mut writer, &FORMAT_VERSION)?;
        codec.serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a snapshot, rejecting other format versions before decoding the body.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let codec = codec();
        let version: u32 = codec.deserialize_from(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(HtmError::VersionMismatch {
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        Ok(codec.deserialize_from(&mut reader)?)
    }
}

fn codec() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Encodes the state of `pipeline` into bytes.
pub fn to_bytes(pipeline: &Pipeline) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    Snapshot::capture(pipeline)?.write_to(&mut bytes)?;
    Ok(bytes)
}

/// Decodes a pipeline from bytes produced by `to_bytes`.
pub fn from_bytes(bytes: &[u8]) -> Result<Pipeline> {
    Snapshot::read_from(bytes)?.into_pipeline()
}

/// Writes a checkpoint of `pipeline` to `path`, creating parent directories as needed.
///
/// The checkpoint is written to a sibling `.tmp` file and renamed over `path` once complete,
/// so an existing checkpoint at `path` stays intact if writing fails.
pub fn save(pipeline: &Pipeline, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let snapshot = Snapshot::capture(pipeline)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    if let Err(err) = write_file(&snapshot, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)?;

    info!(path = %path.display(), tick = snapshot.tick, "checkpoint saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_file(snapshot: &Snapshot, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    snapshot.write_to(&mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

/// Loads a pipeline from a checkpoint written by `save`. The pipeline is ready to tick.
pub fn load(path: impl AsRef<Path>) -> Result<Pipeline> {
    let path = path.as_ref();
    let snapshot = Snapshot::read_from(BufReader::new(File::open(path)?))?;
    let tick = snapshot.tick;
    let pipeline = snapshot.into_pipeline()?;

    info!(path = %path.display(), tick, "checkpoint loaded");
    Ok(pipeline)
}
