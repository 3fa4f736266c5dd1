use crate::imgproc::filters::edge_mask;
use crate::math::statistics::{Summary, describe};
use crate::sample::{Mask, Plane, Sample};

use super::{FeatureExtractor, FeatureGroup};

/// One pixel population the intensity statistics are computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensityView {
    /// Combined mask instead of the channel's own mask.
    pub combined: bool,
    /// Background subtracted.
    pub bgcorr: bool,
    /// Only the mask's edge pixels.
    pub edge: bool,
}

impl IntensityView {
    const fn new(combined: bool, bgcorr: bool, edge: bool) -> Self {
        Self {
            combined,
            bgcorr,
            edge,
        }
    }

    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        if self.combined {
            prefix.push_str("combined_");
        }
        if self.bgcorr {
            prefix.push_str("bgcorr_");
        }
        if self.edge {
            prefix.push_str("edge_");
        }
        prefix
    }
}

/// Views in column order.
pub const INTENSITY_VIEWS: [IntensityView; 8] = [
    IntensityView::new(false, false, false),
    IntensityView::new(false, true, false),
    IntensityView::new(true, false, false),
    IntensityView::new(true, true, false),
    IntensityView::new(false, false, true),
    IntensityView::new(false, true, true),
    IntensityView::new(true, false, true),
    IntensityView::new(true, true, true),
];

/// Distribution statistics of masked pixel values.
///
/// For every channel, eleven statistics on eight views: channel or combined
/// mask, raw or background-subtracted, whole region or edge only. Views on an
/// empty channel mask are all zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityFeatures;

fn collect(plane: &Plane, region: &Mask, background: f32, values: &mut Vec<f64>) {
    values.clear();
    values.extend(
        plane
            .iter()
            .zip(region.iter())
            .filter(|&(_, &set)| set)
            .map(|(&v, _)| (v - background) as f64),
    );
}

impl FeatureExtractor for IntensityFeatures {
    fn group(&self) -> FeatureGroup {
        FeatureGroup::Intensity
    }

    fn columns(&self, channels: &[String]) -> Vec<String> {
        let mut columns = Vec::with_capacity(channels.len() * 8 * Summary::NAMES.len());
        for ch in channels {
            for view in INTENSITY_VIEWS {
                let prefix = view.prefix();
                for stat in Summary::NAMES {
                    columns.push(format!("{prefix}{stat}_{ch}"));
                }
            }
        }
        columns
    }

    fn extract(&self, sample: &Sample, out: &mut Vec<f64>) {
        let combined = sample.combined_mask();
        let combined_edge = edge_mask(combined);
        let mut values = Vec::new();

        for c in 0..sample.num_channels() {
            let plane = &sample.pixels()[c];
            let mask = &sample.mask()[c];
            let has_mask = mask.any();
            let mask_edge = edge_mask(mask);

            for view in INTENSITY_VIEWS {
                if !view.combined && !has_mask {
                    out.extend([0.0; 11]);
                    continue;
                }
                let region = match (view.combined, view.edge) {
                    (false, false) => mask,
                    (false, true) => &mask_edge,
                    (true, false) => combined,
                    (true, true) => &combined_edge,
                };
                let background = match (view.bgcorr, view.combined) {
                    (false, _) => 0.0,
                    (true, false) => sample.background()[c],
                    (true, true) => sample.combined_background()[c],
                };
                collect(plane, region, background, &mut values);
                out.extend(describe(&mut values).to_array());
            }
        }
    }
}
