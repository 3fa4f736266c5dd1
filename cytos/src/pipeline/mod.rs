//! The run: frames in, one feature table out.
//!
//! [`Pipeline::build`] records the stage chain `load -> segment -> extract`
//! on a lazy [`Bag`] fed by a [`FrameSource`]. [`Pipeline::run`] realizes it on an executor and
//! assembles the records. A failing partition aborts the run before any table
//! is produced.

mod source;


pub use source::{FrameFile, FrameFiles, FrameSource, SourceError, load_frame_list};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::{PipelineConfig, SegmentationConfig};
use crate::engine::{Bag, BoxError, Executor, RealizeStats, ThreadedExecutor};
use crate::error::Result;
use crate::features::{FeatureSchema, FeatureSet};
use crate::sample::{Frame, Sample, SampleError};
use crate::segmentation::{
    ModelFactory, ModelSegmenter, NuclearSegmenter, Segmenter, ThresholdModelFactory,
    WatershedSegmenter,
};
use crate::table::{FeatureRecord, FeatureTable};

#[derive(Debug, Clone)]
pub struct RunStats {
    pub frames: usize,
    pub partitions: usize,
    pub samples: usize,
    pub rows: usize,
    pub elapsed_secs: f64,
    pub realize: RealizeStats,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub table: FeatureTable,
    pub stats: RunStats,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    segmenter: Arc<dyn Segmenter>,
    features: Arc<FeatureSet>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("segmenter", &self.segmenter.name())
            .field("features", &self.features)
            .finish()
    }
}

impl Pipeline {
    /// Pipeline for `config`. The model strategy uses the built-in classical model.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_model_factory(config, ThresholdModelFactory::default())
    }

    /// Like [`Pipeline::new`], with `factory` building the detection model.
    pub fn with_model_factory<F: ModelFactory>(config: PipelineConfig, factory: F) -> Result<Self> {
        config.validate()?;
        let segmenter: Arc<dyn Segmenter> = match config.segmentation.clone() {
            SegmentationConfig::Watershed {
                noisy_channels,
                min_object_size,
            } => Arc::new(WatershedSegmenter::new(noisy_channels, min_object_size)),
            SegmentationConfig::Model {
                parent_channel,
                reference_channel,
                cell_diameter,
                gpu_accelerated,
            } => Arc::new(ModelSegmenter::new(
                factory,
                parent_channel,
                reference_channel,
                cell_diameter,
                gpu_accelerated,
            )),
            SegmentationConfig::Nuclear {
                reference_channel,
                cell_diameter,
            } => Arc::new(NuclearSegmenter::new(reference_channel, cell_diameter)),
        };
        Self::with_segmenter(config, segmenter)
    }

    pub fn with_segmenter(config: PipelineConfig, segmenter: Arc<dyn Segmenter>) -> Result<Self> {
        config.validate()?;
        let features = FeatureSet::new(
            &config.features,
            config.channels.clone(),
            config.maximum_pixel_value,
        );
        info!(
            segmenter = segmenter.name(),
            channels = config.channels.len(),
            columns = features.schema().len(),
            "Pipeline configured"
        );
        Ok(Self {
            config: Arc::new(config),
            segmenter,
            features: Arc::new(features),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Feature columns every record carries, known before any frame is read.
    pub fn schema(&self) -> &FeatureSchema {
        self.features.schema()
    }

    /// Threaded executor sized from the configuration.
    pub fn executor(&self) -> Result<ThreadedExecutor> {
        let workers = match self.config.workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        let executor = ThreadedExecutor::new(workers)?;
        Ok(match self.config.max_partitions_in_flight {
            0 => executor,
            n => executor.with_max_in_flight(n),
        })
    }

    /// Record the stage chain over `source`. Nothing runs until the bag is
    /// computed, and each partition reads its own frames when it runs.
    pub fn build<S: FrameSource>(&self, source: S) -> Bag<FeatureRecord> {
        let config = self.config.clone();
        let segmenter = self.segmenter.clone();
        let features = self.features.clone();

        let total = source.len();
        let partition_size = self.config.partition_size;
        let partitions = total.div_ceil(partition_size);

        let load = move |partition: usize| -> std::result::Result<Vec<Frame>, BoxError> {
            let start = partition * partition_size;
            let end = (start + partition_size).min(total);
            debug!(partition, frames = end - start, "Loading frames");
            (start..end)
                .map(|i| -> std::result::Result<Frame, BoxError> {
                    let frame = source.load(i)?;
                    Ok(prepare(frame, &config)?)
                })
                .collect()
        };

        Bag::from_loader("load", partitions, load)
            .map_partitions("segment", move |frames: Vec<Frame>, ctx| {
                segmenter.segment_partition(frames, ctx)
            })
            .map_partitions("extract", move |samples: Vec<Sample>, _ctx| {
                debug!(samples = samples.len(), "Extracting features");
                samples
                    .iter()
                    .map(|sample| features.extract(sample))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
    }

    /// Realize the run and assemble the feature table.
    pub fn run<S: FrameSource>(&self, source: S, executor: &dyn Executor) -> Result<PipelineOutput> {
        let start = Instant::now();
        let frame_count = source.len();
        let bag = self.build(source);
        let partitions = bag.partition_count();

        let (records, realize) = bag.compute_with_stats(executor)?;
        let samples = records.len();
        let table = FeatureTable::assemble(self.schema(), &self.config.meta_keys, records)?;
        table.log_summary();

        let stats = RunStats {
            frames: frame_count,
            partitions,
            samples,
            rows: table.n_rows(),
            elapsed_secs: start.elapsed().as_secs_f64(),
            realize,
        };
        info!(
            frames = stats.frames,
            samples = stats.samples,
            elapsed_secs = stats.elapsed_secs,
            "Run finished"
        );
        Ok(PipelineOutput { table, stats })
    }
}

/// Check the channel count, clip, resolve the group.
fn prepare(mut frame: Frame, config: &PipelineConfig) -> std::result::Result<Frame, SampleError> {
    if frame.num_channels() != config.channels.len() {
        return Err(SampleError::ChannelCountMismatch {
            idx: frame.idx.clone(),
            field: "pixels",
            expected: config.channels.len(),
            actual: frame.num_channels(),
        });
    }
    if let Some(max) = config.clip {
        frame.clip(max);
    }
    frame.group = frame.group_for(&config.group_keys)?;
    Ok(frame)
}
