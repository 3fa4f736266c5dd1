//! Segmentation strategies: frames in, per-cell samples out.
//!
//! Every strategy turns one [`Frame`] into zero or more [`Sample`]s. A frame in
//! which nothing is detected yields no samples, which is not an error.

mod mask_apply;
mod model;
mod nuclear;
mod watershed;

#[cfg(test)]
mod tests;

use common::Buffer2;
use thiserror::Error;

use crate::engine::WorkerContext;
use crate::imgproc::regions;
use crate::sample::{Frame, Mask, Sample, SampleBuilder, SampleError};

pub use mask_apply::{masked_combined_pixels, masked_intensities, masked_pixels};
pub use model::{
    CellDetectionModel, MIN_CHILD_OVERLAP, ModelError, ModelFactory, ModelInput, ModelSegmenter,
    ThresholdModel, ThresholdModelFactory, reconcile_children,
};
pub use nuclear::{NuclearSegmenter, nuclear_labels};
pub use watershed::{WatershedSegmenter, channel_mask};

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("Frame {idx}: channel {channel} is out of range for {channels} channels")]
    ChannelOutOfRange {
        idx: String,
        channel: usize,
        channels: usize,
    },
    #[error("Detection model failed on frame {idx}")]
    Model {
        idx: String,
        #[source]
        source: ModelError,
    },
    #[error("Detection model returned {actual} label maps for {expected} inputs on frame {idx}")]
    ModelOutputCount {
        idx: String,
        expected: usize,
        actual: usize,
    },
    #[error("Detection model returned a label map with the wrong dimensions on frame {idx}")]
    ModelOutputDims { idx: String },
}

pub type Result<T> = std::result::Result<T, SegmentationError>;

/// A segmentation strategy.
pub trait Segmenter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Segment one frame. Worker-scoped resources are looked up through `ctx`.
    fn segment(&self, frame: &Frame, ctx: &WorkerContext) -> Result<Vec<Sample>>;

    fn segment_partition(&self, frames: Vec<Frame>, ctx: &WorkerContext) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        for frame in &frames {
            let found = self.segment(frame, ctx)?;
            tracing::debug!(
                segmenter = self.name(),
                frame = %frame.idx,
                samples = found.len(),
                "Segmented frame"
            );
            samples.extend(found);
        }
        Ok(samples)
    }
}

pub(crate) fn check_channel(frame: &Frame, channel: usize) -> Result<()> {
    if channel >= frame.num_channels() {
        return Err(SegmentationError::ChannelOutOfRange {
            idx: frame.idx.clone(),
            channel,
            channels: frame.num_channels(),
        });
    }
    Ok(())
}

/// One sample per label of `volume[parent_channel]`.
///
/// `volume` holds one label map per channel. Each sample is cropped to the
/// parent label's bounding box; its channel masks select that label in each
/// channel's map and its combined mask is the parent region. Sample idx is
/// `{frame idx}_{label}`.
pub fn samples_from_labels(
    frame: &Frame,
    volume: &[Buffer2<u32>],
    parent_channel: usize,
) -> std::result::Result<Vec<Sample>, SampleError> {
    let height = frame.height();
    let width = frame.width();
    let parent = &volume[parent_channel];

    regions(parent)
        .into_iter()
        .map(|region| {
            let bbox = region.bbox;
            let label = region.label;
            let pixels = frame.pixels.iter().map(|p| bbox.crop(p)).collect();
            let mask: Vec<Mask> = volume
                .iter()
                .map(|labels| bbox.crop(labels).map(|&l| l == label))
                .collect();
            let combined = mask[parent_channel].clone();

            SampleBuilder::new(format!("{}_{}", frame.idx, label), frame.group.clone())
                .id(label)
                .pixels(pixels)
                .mask(mask)
                .combined_mask(combined)
                .bbox(bbox, height, width)
                .meta(frame.meta.clone())
                .build()
        })
        .collect()
}
