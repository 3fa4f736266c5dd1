//! Cell segmentation and per-cell feature extraction for multi-channel
//! microscopy frames.
//!
//! A run takes frames through `load -> segment -> extract` on a lazy,
//! partitioned [`engine::Bag`] and assembles the resulting records into a
//! [`table::FeatureTable`] whose columns are declared up front by the
//! configured [`features::FeatureSet`].

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod imgproc;
pub mod math;
pub mod pipeline;
pub mod sample;
pub mod segmentation;
pub mod table;

pub use config::{ConfigError, PipelineConfig, SegmentationConfig};
pub use engine::{Executor, SequentialExecutor, ThreadedExecutor};
pub use error::{Error, Result};
pub use features::{FeatureExtractor, FeatureGroup, FeatureSchema, FeatureSet};
pub use pipeline::{FrameFiles, FrameSource, Pipeline, PipelineOutput, RunStats};
pub use sample::{BBox, Frame, Mask, Meta, MetaValue, Plane, Sample, SampleBuilder};
pub use segmentation::Segmenter;
pub use table::{FeatureRecord, FeatureTable, group_file_stems};
