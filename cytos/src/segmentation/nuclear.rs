use common::Buffer2;

use super::{Result, Segmenter, check_channel, samples_from_labels};
use crate::engine::WorkerContext;
use crate::imgproc::denoise::{NlMeans, denoise_nl_means};
use crate::imgproc::distance::euclidean_distance;
use crate::imgproc::morphology::expand_labels;
use crate::imgproc::peaks::peak_local_max;
use crate::imgproc::threshold::otsu;
use crate::imgproc::watershed::watershed;
use crate::sample::{Frame, Plane, Sample};

const NUCLEAR_DENOISE: NlMeans = NlMeans::new(3, 2);
/// Labels grow into the background by this fraction of the cell diameter.
const EXPANSION_FACTOR: f32 = 0.25;

/// Label nuclei in a nuclear-stain plane.
///
/// Otsu foreground is split by a distance-transform watershed seeded at local
/// maxima at least `cell_diameter` apart; the resulting labels are then grown
/// by a quarter diameter.
pub fn nuclear_labels(plane: &Plane, cell_diameter: usize) -> Buffer2<u32> {
    let denoised = denoise_nl_means(plane, NUCLEAR_DENOISE);
    let threshold = otsu(&denoised);
    let cells = denoised.map(|&v| v > threshold);

    let distance = euclidean_distance(&cells);
    let mut markers = Buffer2::new_default(plane.width(), plane.height());
    for (i, (x, y)) in peak_local_max(&distance, cell_diameter)
        .into_iter()
        .enumerate()
    {
        markers[(x, y)] = i as u32 + 1;
    }

    let landscape = distance.map(|&d| -d);
    let labels = watershed(&landscape, &markers, Some(&cells));
    expand_labels(&labels, EXPANSION_FACTOR * cell_diameter as f32)
}

/// Nucleus-driven segmentation: one sample per nucleus, the nuclear region
/// used as the mask of every channel.
#[derive(Debug, Clone)]
pub struct NuclearSegmenter {
    reference_channel: usize,
    cell_diameter: usize,
}

impl NuclearSegmenter {
    pub fn new(reference_channel: usize, cell_diameter: usize) -> Self {
        Self {
            reference_channel,
            cell_diameter,
        }
    }
}

impl Segmenter for NuclearSegmenter {
    fn name(&self) -> &'static str {
        "nuclear"
    }

    fn segment(&self, frame: &Frame, _ctx: &WorkerContext) -> Result<Vec<Sample>> {
        check_channel(frame, self.reference_channel)?;
        let labels = nuclear_labels(&frame.pixels[self.reference_channel], self.cell_diameter);
        let volume = vec![labels; frame.num_channels()];
        Ok(samples_from_labels(frame, &volume, self.reference_channel)?)
    }
}
