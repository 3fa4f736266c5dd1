//! Model-based segmentation with a pluggable cell-detection model.
//!
//! The model runs once on the parent channel and once on every other channel,
//! each paired with the reference (nuclear) channel and batched over all
//! frames of a partition. Child detections are then
//! reconciled onto parent labels so every sample corresponds to one parent
//! cell. The model itself is expensive to build and is created lazily, once
//! per worker, through a [`ModelFactory`].

use common::Buffer2;
use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use super::nuclear::nuclear_labels;
use super::{Result, SegmentationError, Segmenter, check_channel, samples_from_labels};
use crate::engine::{Device, WorkerContext, WorkerLocal};
use crate::imgproc::distance::euclidean_distance;
use crate::imgproc::threshold::otsu;
use crate::imgproc::watershed::watershed;
use crate::sample::{Frame, Plane, Sample, SampleError};

/// A child label is kept for a parent when it covers more than this fraction
/// of the parent's area.
pub const MIN_CHILD_OVERLAP: f64 = 0.1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Failed to load detection model on {device:?}: {message}")]
    Load { device: Device, message: String },
    #[error("Detection model inference failed: {0}")]
    Inference(String),
}

/// One model input: the channel to segment and the nuclear reference.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    /// Index of `channel` within its frame.
    pub channel_index: usize,
    pub channel: &'a Plane,
    pub reference: &'a Plane,
}

/// Predicts a label map (0 = background) per input.
///
/// Inputs of one call share a channel index and come from different frames.
pub trait CellDetectionModel: Send + Sync {
    fn eval(
        &self,
        inputs: &[ModelInput<'_>],
        diameter: Option<f32>,
    ) -> std::result::Result<Vec<Buffer2<u32>>, ModelError>;
}

/// Builds one model instance for a worker's device.
pub trait ModelFactory: Send + Sync + 'static {
    type Model: CellDetectionModel + 'static;

    fn build(&self, device: Device) -> std::result::Result<Self::Model, ModelError>;
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Relabel `child` detections onto `parent` labels.
///
/// For each parent label, child labels covering more than
/// [`MIN_CHILD_OVERLAP`] of the parent's area are kept. Output pixels inside
/// both the parent region and a kept child take the parent label; every other
/// pixel is 0.
pub fn reconcile_children(parent: &Buffer2<u32>, child: &Buffer2<u32>) -> Buffer2<u32> {
    assert!(parent.same_dims(child), "dimension mismatch");

    let mut parent_area: HashMap<u32, usize> = HashMap::new();
    let mut overlap: HashMap<(u32, u32), usize> = HashMap::new();
    for (&p, &c) in parent.iter().zip(child.iter()) {
        if p == 0 {
            continue;
        }
        *parent_area.entry(p).or_default() += 1;
        if c != 0 {
            *overlap.entry((p, c)).or_default() += 1;
        }
    }

    let kept: HashSet<(u32, u32)> = overlap
        .into_iter()
        .filter(|&((p, _), count)| count as f64 / parent_area[&p] as f64 > MIN_CHILD_OVERLAP)
        .map(|(key, _)| key)
        .collect();

    parent.zip_map(child, |&p, &c| {
        if p != 0 && c != 0 && kept.contains(&(p, c)) {
            p
        } else {
            0
        }
    })
}

// ============================================================================
// Segmenter
// ============================================================================

/// Segmentation driven by a [`CellDetectionModel`].
pub struct ModelSegmenter<F: ModelFactory> {
    factory: F,
    models: WorkerLocal<F::Model>,
    parent_channel: usize,
    reference_channel: usize,
    diameter: Option<f32>,
    accelerated: bool,
}

impl<F: ModelFactory> std::fmt::Debug for ModelSegmenter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSegmenter")
            .field("parent_channel", &self.parent_channel)
            .field("reference_channel", &self.reference_channel)
            .field("diameter", &self.diameter)
            .field("accelerated", &self.accelerated)
            .field("models", &self.models)
            .finish()
    }
}

impl<F: ModelFactory> ModelSegmenter<F> {
    pub fn new(
        factory: F,
        parent_channel: usize,
        reference_channel: usize,
        diameter: Option<f32>,
        accelerated: bool,
    ) -> Self {
        Self {
            factory,
            models: WorkerLocal::new(),
            parent_channel,
            reference_channel,
            diameter,
            accelerated,
        }
    }

    /// Number of model instances built so far.
    pub fn models_built(&self) -> usize {
        self.models.constructed()
    }

    /// One batched `eval` over `frames` for `channel`, checked against the frames.
    fn eval_channel(
        &self,
        model: &F::Model,
        frames: &[Frame],
        channel: usize,
    ) -> Result<Vec<Buffer2<u32>>> {
        let inputs: Vec<ModelInput<'_>> = frames
            .iter()
            .map(|frame| ModelInput {
                channel_index: channel,
                channel: &frame.pixels[channel],
                reference: &frame.pixels[self.reference_channel],
            })
            .collect();

        let predicted = model
            .eval(&inputs, self.diameter)
            .map_err(|source| SegmentationError::Model {
                idx: batch_idx(frames),
                source,
            })?;
        if predicted.len() != inputs.len() {
            return Err(SegmentationError::ModelOutputCount {
                idx: batch_idx(frames),
                expected: inputs.len(),
                actual: predicted.len(),
            });
        }
        if let Some(frame) = frames
            .iter()
            .zip(&predicted)
            .find(|(frame, labels)| !labels.same_dims(&frame.pixels[channel]))
            .map(|(frame, _)| frame)
        {
            return Err(SegmentationError::ModelOutputDims {
                idx: frame.idx.clone(),
            });
        }
        Ok(predicted)
    }

    /// Segment a batch of frames with one model call per channel.
    ///
    /// The parent channel is evaluated first; every other channel is then
    /// evaluated for the whole batch and reconciled onto each frame's parents.
    fn segment_frames(&self, frames: &[Frame], ctx: &WorkerContext) -> Result<Vec<Sample>> {
        let Some(first) = frames.first() else {
            return Ok(Vec::new());
        };
        let channels = first.num_channels();
        for frame in frames {
            if frame.num_channels() != channels {
                return Err(SampleError::ChannelCountMismatch {
                    idx: frame.idx.clone(),
                    field: "pixels",
                    expected: channels,
                    actual: frame.num_channels(),
                }
                .into());
            }
            check_channel(frame, self.parent_channel)?;
            check_channel(frame, self.reference_channel)?;
        }

        let model = self
            .models
            .get_or_try_init(ctx, |ctx| {
                let device = ctx.device(self.accelerated);
                tracing::info!(worker = ctx.ordinal(), ?device, "Loading detection model");
                self.factory.build(device)
            })
            .map_err(|source| SegmentationError::Model {
                idx: batch_idx(frames),
                source,
            })?;

        let parents = self.eval_channel(&model, frames, self.parent_channel)?;
        let mut volumes: Vec<Vec<Buffer2<u32>>> = parents
            .iter()
            .map(|parent| vec![parent.clone(); channels])
            .collect();
        for channel in (0..channels).filter(|&c| c != self.parent_channel) {
            let children = self.eval_channel(&model, frames, channel)?;
            for ((volume, parent), child) in volumes.iter_mut().zip(&parents).zip(&children) {
                volume[channel] = reconcile_children(parent, child);
            }
        }
        tracing::debug!(frames = frames.len(), channels, "Model batch evaluated");

        let mut samples = Vec::new();
        for (frame, volume) in frames.iter().zip(&volumes) {
            samples.extend(samples_from_labels(frame, volume, self.parent_channel)?);
        }
        Ok(samples)
    }
}

/// Idx used to report a failure that concerns a whole batch.
fn batch_idx(frames: &[Frame]) -> String {
    match frames {
        [] => String::new(),
        [only] => only.idx.clone(),
        [first, .., last] => format!("{}..{}", first.idx, last.idx),
    }
}

impl<F: ModelFactory> Segmenter for ModelSegmenter<F> {
    fn name(&self) -> &'static str {
        "model"
    }

    fn segment(&self, frame: &Frame, ctx: &WorkerContext) -> Result<Vec<Sample>> {
        self.segment_frames(std::slice::from_ref(frame), ctx)
    }

    fn segment_partition(&self, frames: Vec<Frame>, ctx: &WorkerContext) -> Result<Vec<Sample>> {
        let samples = self.segment_frames(&frames, ctx)?;
        tracing::debug!(
            segmenter = self.name(),
            frames = frames.len(),
            samples = samples.len(),
            "Segmented partition"
        );
        Ok(samples)
    }
}

// ============================================================================
// Built-in classical model
// ============================================================================

/// Classical stand-in for a learned detector.
///
/// Nuclei found in the reference plane seed a watershed over the channel's
/// Otsu foreground; foreground not reached from any nucleus stays background.
#[derive(Debug, Clone)]
pub struct ThresholdModel {
    default_diameter: f32,
}

impl ThresholdModel {
    pub fn new(default_diameter: f32) -> Self {
        Self { default_diameter }
    }

    fn detect(&self, input: &ModelInput<'_>, diameter: f32) -> Buffer2<u32> {
        let seeds = nuclear_labels(input.reference, diameter.round().max(1.0) as usize);
        let threshold = otsu(input.channel);
        let foreground = input.channel.map(|&v| v > threshold);

        let markers = seeds.zip_map(&foreground, |&s, &f| if f { s } else { 0 });
        let landscape = euclidean_distance(&foreground).map(|&d| -d);
        watershed(&landscape, &markers, Some(&foreground))
    }
}

impl CellDetectionModel for ThresholdModel {
    fn eval(
        &self,
        inputs: &[ModelInput<'_>],
        diameter: Option<f32>,
    ) -> std::result::Result<Vec<Buffer2<u32>>, ModelError> {
        let diameter = diameter.unwrap_or(self.default_diameter);
        if !(diameter > 0.0) {
            return Err(ModelError::Inference(format!(
                "cell diameter must be positive, got {diameter}"
            )));
        }
        Ok(inputs.iter().map(|input| self.detect(input, diameter)).collect())
    }
}

/// Builds [`ThresholdModel`]s; the device is irrelevant to it.
#[derive(Debug, Clone)]
pub struct ThresholdModelFactory {
    pub default_diameter: f32,
}

impl Default for ThresholdModelFactory {
    fn default() -> Self {
        Self {
            default_diameter: 30.0,
        }
    }
}

impl ModelFactory for ThresholdModelFactory {
    type Model = ThresholdModel;

    fn build(&self, _device: Device) -> std::result::Result<ThresholdModel, ModelError> {
        Ok(ThresholdModel::new(self.default_diameter))
    }
}
