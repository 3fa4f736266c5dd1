use std::borrow::Cow;

use common::Buffer2;

use super::{Result, Segmenter};
use crate::engine::WorkerContext;
use crate::imgproc::denoise::{NlMeans, denoise_nl_means};
use crate::imgproc::filters::sobel;
use crate::imgproc::morphology::{closing, fill_holes, remove_small_objects};
use crate::imgproc::watershed::watershed;
use crate::math::statistics::quantile_f32;
use crate::sample::{BBox, Frame, Mask, Plane, Sample, SampleBuilder};

const CLOSING_RADIUS: usize = 2;
const BACKGROUND_QUANTILE: f64 = 0.7;
const FOREGROUND_QUANTILE: f64 = 0.95;
const NOISY_DENOISE: NlMeans = NlMeans::new(2, 1);

const BACKGROUND_MARKER: u32 = 1;
const FOREGROUND_MARKER: u32 = 2;

/// Foreground mask of one channel by gradient-seeded watershed.
///
/// Seeds come from the closed Sobel gradient: its lowest 70% are background,
/// its top 5% foreground. The flood runs over the (optionally denoised)
/// intensities; the basin of the highest label reached then has holes filled
/// and specks below `min_object_size` pixels removed. No seed at all gives an
/// empty mask.
pub fn channel_mask(plane: &Plane, noisy: bool, min_object_size: usize) -> Mask {
    let plane: Cow<'_, Plane> = if noisy {
        Cow::Owned(denoise_nl_means(plane, NOISY_DENOISE))
    } else {
        Cow::Borrowed(plane)
    };

    let gradient = closing(&sobel(&plane), CLOSING_RADIUS);
    let low = quantile_f32(gradient.pixels(), BACKGROUND_QUANTILE);
    let high = quantile_f32(gradient.pixels(), FOREGROUND_QUANTILE);

    let markers: Buffer2<u32> = gradient.map(|&g| {
        if g < low {
            BACKGROUND_MARKER
        } else if g > high {
            FOREGROUND_MARKER
        } else {
            0
        }
    });
    let foreground = top_basin(&plane, &markers);
    if !foreground.any() {
        return foreground;
    }
    remove_small_objects(&fill_holes(&foreground), min_object_size)
}

/// Pixels flooded by the highest marker label; empty when there are no markers.
pub(crate) fn top_basin(plane: &Plane, markers: &Buffer2<u32>) -> Mask {
    let flooded = watershed(plane, markers, None);
    match flooded.iter().copied().max() {
        None | Some(0) => Buffer2::new_filled(plane.width(), plane.height(), false),
        Some(top) => flooded.map(|&l| l == top),
    }
}

/// Per-channel watershed; one sample per frame cropped to the union of the
/// channel masks.
#[derive(Debug, Clone)]
pub struct WatershedSegmenter {
    noisy_channels: Vec<usize>,
    min_object_size: usize,
}

impl WatershedSegmenter {
    pub fn new(noisy_channels: Vec<usize>, min_object_size: usize) -> Self {
        Self {
            noisy_channels,
            min_object_size,
        }
    }
}

impl Segmenter for WatershedSegmenter {
    fn name(&self) -> &'static str {
        "watershed"
    }

    fn segment(&self, frame: &Frame, _ctx: &WorkerContext) -> Result<Vec<Sample>> {
        let masks: Vec<Mask> = frame
            .pixels
            .iter()
            .enumerate()
            .map(|(c, plane)| {
                channel_mask(plane, self.noisy_channels.contains(&c), self.min_object_size)
            })
            .collect();

        let mut union = Buffer2::new_filled(frame.width(), frame.height(), false);
        for mask in &masks {
            for (u, &m) in union.iter_mut().zip(mask.iter()) {
                *u |= m;
            }
        }
        let Some(bbox) = BBox::from_mask(&union) else {
            return Ok(Vec::new());
        };

        let sample = SampleBuilder::new(frame.idx.clone(), frame.group.clone())
            .pixels(frame.pixels.iter().map(|p| bbox.crop(p)).collect())
            .mask(masks.iter().map(|m| bbox.crop(m)).collect())
            .combined_mask(bbox.crop(&union))
            .bbox(bbox, frame.height(), frame.width())
            .meta(frame.meta.clone())
            .build()?;
        Ok(vec![sample])
    }
}
