//! Pipeline module - Resolve, fetch, dispatch and teardown.
//!
//! A run validates the configuration, resolves the distinct variable keys of
//! all requests, fetches each key once into a shared buffer, renders every
//! request on the worker pool against read-only views of those buffers and
//! releases each buffer once no later request needs it.

mod dispatch;
mod fetch;
mod pool;
mod registry;
mod resolve;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

pub use dispatch::{
    BoundRequest, DispatchError, Dispatcher, RequestGroup, keys_needed_after, schedule,
};
pub use fetch::{CellOrdering, FetchContext, FetchError, GridInfo};
pub use pool::{PoolError, WorkerPool};
pub use registry::{Buffer, BufferRegistry, BufferShape, BufferView, RegistryError};
pub use resolve::{RESIDUAL_KEYS, required_keys, resolve};

use crate::animation::{EncodedOutput, EncoderFactory};
use crate::reader::{SimulationReader, build_reader};
use crate::schema::{ConfigError, InvalidRequest, RunConfig, VariableKey, build_requests};

/// Anything that aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] InvalidRequest),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub requests: usize,
    pub buffers_fetched: usize,
    pub buffers_released: usize,
    pub outputs: Vec<EncodedOutput>,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} requests, {} buffers fetched and {} released in {:.2}s",
            self.requests,
            self.buffers_fetched,
            self.buffers_released,
            self.elapsed.as_secs_f64()
        )?;
        for output in &self.outputs {
            writeln!(f, "  {output}")?;
        }
        Ok(())
    }
}

/// Run every request of `config` with the configured reader.
pub fn run(config: &RunConfig, encoders: Arc<dyn EncoderFactory>) -> Result<RunSummary, RunError> {
    let reader: Arc<dyn SimulationReader> = Arc::from(build_reader(config));
    run_with_reader(config, reader, encoders)
}

/// Run every request of `config` against `reader`.
pub fn run_with_reader(
    config: &RunConfig,
    reader: Arc<dyn SimulationReader>,
    encoders: Arc<dyn EncoderFactory>,
) -> Result<RunSummary, RunError> {
    let started = Instant::now();
    config.validate()?;
    let requests = build_requests(&config.animations, &config.output_prefix, &config.file_type)?;
    let all_keys = resolve(requests.iter().map(|named| &named.request));
    info!(
        "{} requests over frames {}..={} need {} buffers",
        requests.len(),
        config.start_frame,
        config.end_frame,
        all_keys.len()
    );

    let mut summary = RunSummary {
        requests: requests.len(),
        buffers_fetched: 0,
        buffers_released: 0,
        outputs: Vec::with_capacity(requests.len()),
        elapsed: Duration::ZERO,
    };
    if requests.is_empty() {
        summary.elapsed = started.elapsed();
        return Ok(summary);
    }

    let pool = WorkerPool::new(config.workers, config.phase_timeout_secs.map(Duration::from_secs))?;
    info!("Worker pool with {} threads", pool.workers());
    let context = Arc::new(FetchContext::prepare(reader, config.start_frame, config.end_frame)?);
    let dispatcher = Dispatcher::new(
        Arc::new(context.grid.clone()),
        config.render_settings(),
        encoders,
    );
    let mut registry = BufferRegistry::new();

    let groups = schedule(&requests, config.group_by_variable);
    let outcome = (|| -> Result<(), RunError> {
        for (g, group) in groups.iter().enumerate() {
            let mut wanted: BTreeSet<VariableKey> = group.keys.clone();
            wanted.insert(VariableKey::TIME);
            let missing: Vec<VariableKey> = wanted
                .into_iter()
                .filter(|key| !registry.contains(*key))
                .collect();

            info!(
                "Group {}/{}: fetching {} buffers for {} requests",
                g + 1,
                groups.len(),
                missing.len(),
                group.requests.len()
            );
            let jobs: Vec<_> = missing
                .into_iter()
                .map(|key| {
                    let context = Arc::clone(&context);
                    move || context.fetch(key)
                })
                .collect();
            for buffer in pool.run_phase("fetch", jobs)? {
                registry.register(buffer?)?;
                summary.buffers_fetched += 1;
            }

            let jobs = group
                .requests
                .iter()
                .map(|&index| {
                    dispatcher
                        .bind(&requests[index], &registry)
                        .map(|bound| dispatcher.job(bound))
                })
                .collect::<Result<Vec<_>, DispatchError>>()?;
            for output in pool.run_phase("render", jobs)? {
                summary.outputs.push(output?);
            }

            let later = keys_needed_after(&groups, g);
            let done: Vec<VariableKey> = registry
                .live_keys()
                .filter(|key| *key != VariableKey::TIME && !later.contains(key))
                .collect();
            summary.buffers_released += registry.release(done);
        }
        Ok(())
    })();

    // Teardown happens on failure too
    summary.buffers_released += registry.release_all();
    outcome?;

    summary.elapsed = started.elapsed();
    info!("Run finished in {:.2}s", summary.elapsed.as_secs_f64());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use crate::animation::{ArchivePlayer, EncodeError, FileEncoders, FrameEncoder};
    use crate::reader::SyntheticReader;
    use crate::render::FramePlot;
    use crate::schema::{
        OutputFormat, RawRequest, ReaderConfig, RenderSettings, SyntheticConfig,
    };
    use serde_json::{Value, json};

    /// Frames pushed per output path.
    #[derive(Default)]
    struct Recording {
        outputs: Arc<Mutex<Vec<(PathBuf, Vec<FramePlot>)>>>,
    }

    struct RecordingEncoder {
        path: PathBuf,
        frames: Vec<FramePlot>,
        sink: Arc<Mutex<Vec<(PathBuf, Vec<FramePlot>)>>>,
    }

    impl FrameEncoder for RecordingEncoder {
        fn push(&mut self, plot: &FramePlot) -> Result<(), EncodeError> {
            self.frames.push(plot.clone());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<EncodedOutput, EncodeError> {
            let RecordingEncoder { path, frames, sink } = *self;
            let output = EncodedOutput {
                path: path.clone(),
                format: OutputFormat::from_path(&path).unwrap(),
                frames: frames.len(),
                width: 1,
                height: 1,
            };
            sink.lock().unwrap().push((path, frames));
            Ok(output)
        }
    }

    impl EncoderFactory for Recording {
        fn open(&self, path: &Path, _settings: &RenderSettings) -> Result<Box<dyn FrameEncoder>, EncodeError> {
            Ok(Box::new(RecordingEncoder {
                path: path.to_path_buf(),
                frames: Vec::new(),
                sink: Arc::clone(&self.outputs),
            }))
        }
    }

    fn config(animations: Vec<RawRequest>, end_frame: u32) -> RunConfig {
        RunConfig {
            bulk_path: PathBuf::from("synthetic"),
            start_frame: 0,
            end_frame,
            output_prefix: "run".to_string(),
            reader: ReaderConfig::Synthetic(SyntheticConfig {
                width: 16,
                ..SyntheticConfig::default()
            }),
            workers: Some(2),
            animations,
            ..RunConfig::default()
        }
    }

    fn run_recorded(config: &RunConfig) -> (Result<RunSummary, RunError>, Vec<(PathBuf, Vec<FramePlot>)>) {
        let recording = Recording::default();
        let sink = Arc::clone(&recording.outputs);
        let result = run(config, Arc::new(recording));
        let mut outputs = sink.lock().unwrap().clone();
        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        (result, outputs)
    }

    #[test]
    fn test_empty_request_list() {
        let (result, outputs) = run_recorded(&config(Vec::new(), 2));
        let summary = result.unwrap();
        assert_eq!(summary.buffers_fetched, 0);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_density_heatmap_run() {
        let (result, outputs) = run_recorded(&config(
            vec![RawRequest::new("2D", "rho", "pass", Value::Null)],
            2,
        ));
        let summary = result.unwrap();
        // Density and time
        assert_eq!(summary.buffers_fetched, 2);
        assert_eq!(summary.buffers_released, 2);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].0, PathBuf::from("run_2D_rho.mp4"));
        let labels: Vec<_> = outputs[0].1.iter().map(|p| crate::render::time_label(p.time.unwrap())).collect();
        assert_eq!(labels, vec!["0.0s", "0.5s", "1.0s"]);
    }

    #[test]
    fn test_shared_keys_fetched_once() {
        let (result, outputs) = run_recorded(&config(
            vec![
                RawRequest::new("2D", "B", "x", json!("unit")),
                RawRequest::new("triple", "B", "x", json!("unit")),
                RawRequest::new("sf", "B", "x", json!([1, 2, 4])),
            ],
            1,
        ));
        let summary = result.unwrap();
        // B_x, B_y, B_z and time
        assert_eq!(summary.buffers_fetched, 4);
        assert_eq!(summary.outputs.len(), 3);
        assert!(outputs.iter().all(|(_, frames)| frames.len() == 2));
    }

    #[test]
    fn test_groups_refetch_nothing_still_needed() {
        let (result, _) = run_recorded(&config(
            vec![
                RawRequest::new("2D", "B", "x", json!("unit")),
                RawRequest::new("2D", "rho", "pass", Value::Null),
                RawRequest::new("rms", "bv", "pass", json!("summary")),
            ],
            1,
        ));
        let summary = result.unwrap();
        // B_x, rho, B_y, B_z, v_x, v_y, v_z, time: each exactly once
        assert_eq!(summary.buffers_fetched, 8);
        assert_eq!(summary.buffers_released, 8);
        let summary_png = summary
            .outputs
            .iter()
            .find(|o| o.format == OutputFormat::Png)
            .unwrap();
        assert_eq!(summary_png.frames, 1);
    }

    #[test]
    fn test_invalid_request_stops_before_fetching() {
        let (result, outputs) = run_recorded(&config(
            vec![
                RawRequest::new("2D", "B", "x", json!("unit")),
                RawRequest::new("3D", "B", "x", json!("unit")),
            ],
            1,
        ));
        match result {
            Err(RunError::Request(invalid)) => assert_eq!(invalid.index, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_render_failure_names_output() {
        // A zero guide field with zero amplitude makes |B| vanish everywhere
        let mut cfg = config(vec![RawRequest::new("2D", "B", "x", json!("unitless"))], 1);
        cfg.reader = ReaderConfig::Synthetic(SyntheticConfig {
            width: 8,
            guide_field_nt: 0.0,
            ..SyntheticConfig::default()
        });
        let (result, _) = run_recorded(&cfg);
        match result {
            Err(RunError::Dispatch(DispatchError::Render { output, .. })) => {
                assert_eq!(output, PathBuf::from("run_2D_B_x_unitless.mp4"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_run_with_reader_uses_given_reader() {
        let reader: Arc<dyn SimulationReader> = Arc::new(SyntheticReader::new(
            "elsewhere",
            SyntheticConfig {
                width: 8,
                ..SyntheticConfig::default()
            },
        ));
        let cfg = config(vec![RawRequest::new("kurtosis", "B", "y", json!([1, 2]))], 0);
        let result = run_with_reader(&cfg, reader, Arc::new(Recording::default())).unwrap();
        assert_eq!(result.outputs[0].frames, 1);
    }

    #[test]
    fn test_file_encoders_write_archive_and_still() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(
            vec![
                RawRequest::new("2D", "rho", "pass", Value::Null),
                RawRequest::new("rms", "bv", "pass", json!("summary")),
            ],
            2,
        );
        cfg.output_prefix = dir.path().join("run").to_string_lossy().into_owned();
        cfg.file_type = "tbv".to_string();
        cfg.panel_size = 240;

        let summary = run(&cfg, Arc::new(FileEncoders)).unwrap();
        assert_eq!(summary.outputs.len(), 2);
        for output in &summary.outputs {
            assert!(output.path.exists(), "{} missing", output.path.display());
        }

        let archive = dir.path().join("run_2D_rho.tbv");
        let mut player = ArchivePlayer::open(&archive).unwrap();
        assert_eq!(player.frame_count(), 3);
        assert_eq!(player.dimensions(), (240, 240 + crate::render::TITLE_HEIGHT));
        assert_eq!(player.frame_time(2), Some(1.0));
        let last = player.read_frame(2).unwrap();
        assert!(last.pixels.iter().any(|&c| c != 255));

        let still = summary
            .outputs
            .iter()
            .find(|o| o.format == OutputFormat::Png)
            .unwrap();
        assert!(std::fs::metadata(&still.path).unwrap().len() > 0);
    }
}
