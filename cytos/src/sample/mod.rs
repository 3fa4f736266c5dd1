//! In-flight data model: loaded frames and segmented per-cell samples.
//!
//! A [`Frame`] is what the loader hands to segmentation: a multi-channel pixel
//! stack plus identity and meta fields. A [`Sample`] is one segmented cell. It
//! can only be obtained through [`SampleBuilder::build`], which checks every
//! invariant, so feature extractors never see a half-built sample.

#[cfg(test)]
mod tests;

mod bbox;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::Buffer2;

pub use bbox::BBox;

/// One channel of pixel data.
pub type Plane = Buffer2<f32>;

/// One boolean foreground mask.
pub type Mask = Buffer2<bool>;

/// Loader-provided meta value, kept in its native type through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{v}"),
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

pub type Meta = BTreeMap<String, MetaValue>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("Frame {idx} has no channels")]
    NoChannels { idx: String },
    #[error("Sample {idx} is missing required field `{field}`")]
    MissingField { idx: String, field: &'static str },
    #[error("Sample {idx}: `{field}` has {actual} channels, expected {expected}")]
    ChannelCountMismatch {
        idx: String,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Sample {idx}: `{field}` channel {channel} has dimensions that differ from the pixel planes")]
    DimensionMismatch {
        idx: String,
        field: &'static str,
        channel: usize,
    },
    #[error("Sample {idx} has an empty combined mask")]
    EmptyCombinedMask { idx: String },
    #[error("Sample {idx} has an invalid bounding box {bbox:?} for a {height}x{width} source")]
    InvalidBBox {
        idx: String,
        bbox: BBox,
        height: usize,
        width: usize,
    },
    #[error("Frame {idx} is missing meta key `{key}`")]
    MissingMeta { idx: String, key: String },
}

// ============================================================================
// Frame
// ============================================================================

/// A raw multi-channel frame as supplied by the loader.
#[derive(Debug, Clone)]
pub struct Frame {
    pub idx: String,
    pub group: String,
    pub pixels: Vec<Plane>,
    pub meta: Meta,
}

impl Frame {
    /// Create a frame, checking that all channel planes share one size.
    pub fn new(
        idx: impl Into<String>,
        group: impl Into<String>,
        pixels: Vec<Plane>,
    ) -> Result<Self, SampleError> {
        let idx = idx.into();
        let Some(first) = pixels.first() else {
            return Err(SampleError::NoChannels { idx });
        };
        if let Some(channel) = pixels.iter().position(|p| !p.same_dims(first)) {
            return Err(SampleError::DimensionMismatch {
                idx,
                field: "pixels",
                channel,
            });
        }
        Ok(Self {
            idx,
            group: group.into(),
            pixels,
            meta: Meta::new(),
        })
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn num_channels(&self) -> usize {
        self.pixels.len()
    }

    pub fn height(&self) -> usize {
        self.pixels[0].height()
    }

    pub fn width(&self) -> usize {
        self.pixels[0].width()
    }

    /// Clamp every pixel to `[0, max]`.
    pub fn clip(&mut self, max: f32) {
        for plane in &mut self.pixels {
            for v in plane.iter_mut() {
                *v = v.clamp(0.0, max);
            }
        }
    }

    /// Group label for samples cut from this frame.
    ///
    /// With no keys the frame's own group is used; otherwise the meta values
    /// for `keys` are joined with `_`.
    pub fn group_for(&self, keys: &[String]) -> Result<String, SampleError> {
        if keys.is_empty() {
            return Ok(self.group.clone());
        }
        let parts = keys
            .iter()
            .map(|key| {
                self.meta
                    .get(key)
                    .map(|v| v.to_string())
                    .ok_or_else(|| SampleError::MissingMeta {
                        idx: self.idx.clone(),
                        key: key.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join("_"))
    }
}

// ============================================================================
// Sample
// ============================================================================

/// One segmented cell, ready for feature extraction.
#[derive(Debug, Clone)]
pub struct Sample {
    idx: String,
    group: String,
    id: Option<u32>,
    pixels: Vec<Plane>,
    mask: Vec<Mask>,
    combined_mask: Mask,
    background: Vec<f32>,
    combined_background: Vec<f32>,
    bbox: BBox,
    regions: Vec<u8>,
    meta: Meta,
}

impl Sample {
    pub fn idx(&self) -> &str {
        &self.idx
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Segmentation label the sample was cut from, if any.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn num_channels(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixels(&self) -> &[Plane] {
        &self.pixels
    }

    pub fn mask(&self) -> &[Mask] {
        &self.mask
    }

    pub fn combined_mask(&self) -> &Mask {
        &self.combined_mask
    }

    pub fn background(&self) -> &[f32] {
        &self.background
    }

    pub fn combined_background(&self) -> &[f32] {
        &self.combined_background
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn regions(&self) -> &[u8] {
        &self.regions
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Re-check the invariants a built sample must hold.
    pub fn validate(&self) -> Result<(), SampleError> {
        let n = self.pixels.len();
        let counts = [
            ("mask", self.mask.len()),
            ("background", self.background.len()),
            ("combined_background", self.combined_background.len()),
            ("regions", self.regions.len()),
        ];
        for (field, actual) in counts {
            if actual != n {
                return Err(SampleError::ChannelCountMismatch {
                    idx: self.idx.clone(),
                    field,
                    expected: n,
                    actual,
                });
            }
        }
        if !self.combined_mask.any() {
            return Err(SampleError::EmptyCombinedMask {
                idx: self.idx.clone(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SampleBuilder
// ============================================================================

/// Accumulates sample fields stage by stage; `build` validates them all.
#[derive(Debug, Default)]
pub struct SampleBuilder {
    idx: String,
    group: String,
    id: Option<u32>,
    pixels: Option<Vec<Plane>>,
    mask: Option<Vec<Mask>>,
    combined_mask: Option<Mask>,
    background: Option<Vec<f32>>,
    combined_background: Option<Vec<f32>>,
    bbox: Option<BBox>,
    source_dims: Option<(usize, usize)>,
    meta: Meta,
}

impl SampleBuilder {
    pub fn new(idx: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            idx: idx.into(),
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn pixels(mut self, pixels: Vec<Plane>) -> Self {
        self.pixels = Some(pixels);
        self
    }

    pub fn mask(mut self, mask: Vec<Mask>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn combined_mask(mut self, combined_mask: Mask) -> Self {
        self.combined_mask = Some(combined_mask);
        self
    }

    pub fn background(mut self, background: Vec<f32>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn combined_background(mut self, combined_background: Vec<f32>) -> Self {
        self.combined_background = Some(combined_background);
        self
    }

    /// Crop location inside a source frame of `height x width` pixels.
    pub fn bbox(mut self, bbox: BBox, height: usize, width: usize) -> Self {
        self.bbox = Some(bbox);
        self.source_dims = Some((height, width));
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn build(self) -> Result<Sample, SampleError> {
        let idx = self.idx;
        let missing = |field| SampleError::MissingField {
            idx: idx.clone(),
            field,
        };

        let pixels = self.pixels.ok_or_else(|| missing("pixels"))?;
        let mask = self.mask.ok_or_else(|| missing("mask"))?;
        let combined_mask = self.combined_mask.ok_or_else(|| missing("combined_mask"))?;
        let bbox = self.bbox.ok_or_else(|| missing("bbox"))?;
        let (source_height, source_width) = self.source_dims.ok_or_else(|| missing("bbox"))?;

        let Some(first) = pixels.first() else {
            return Err(SampleError::NoChannels { idx });
        };
        let n = pixels.len();
        let background = self.background.unwrap_or_else(|| vec![0.0; n]);
        let combined_background = self.combined_background.unwrap_or_else(|| vec![0.0; n]);

        let counts = [
            ("mask", mask.len()),
            ("background", background.len()),
            ("combined_background", combined_background.len()),
        ];
        for (field, actual) in counts {
            if actual != n {
                return Err(SampleError::ChannelCountMismatch {
                    idx,
                    field,
                    expected: n,
                    actual,
                });
            }
        }

        if let Some(channel) = pixels.iter().position(|p| !p.same_dims(first)) {
            return Err(SampleError::DimensionMismatch {
                idx,
                field: "pixels",
                channel,
            });
        }
        if let Some(channel) = mask.iter().position(|m| !m.same_dims(first)) {
            return Err(SampleError::DimensionMismatch {
                idx,
                field: "mask",
                channel,
            });
        }
        if !combined_mask.same_dims(first) {
            return Err(SampleError::DimensionMismatch {
                idx,
                field: "combined_mask",
                channel: 0,
            });
        }

        if !bbox.is_valid_within(source_height, source_width)
            || bbox.height() != first.height()
            || bbox.width() != first.width()
        {
            return Err(SampleError::InvalidBBox {
                idx,
                bbox,
                height: source_height,
                width: source_width,
            });
        }

        if !combined_mask.any() {
            return Err(SampleError::EmptyCombinedMask { idx });
        }

        let regions = mask.iter().map(|m| u8::from(m.any())).collect();

        Ok(Sample {
            idx,
            group: self.group,
            id: self.id,
            pixels,
            mask,
            combined_mask,
            background,
            combined_background,
            bbox,
            regions,
            meta: self.meta,
        })
    }
}
