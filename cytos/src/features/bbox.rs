use super::{FeatureExtractor, FeatureGroup, per_channel};
use crate::sample::Sample;

const BBOX_COLUMNS: [&str; 4] = ["bbox_minr", "bbox_minc", "bbox_maxr", "bbox_maxc"];

/// Crop location in the source frame and which channels found the cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct BBoxFeatures;

impl FeatureExtractor for BBoxFeatures {
    fn group(&self) -> FeatureGroup {
        FeatureGroup::Bbox
    }

    fn columns(&self, channels: &[String]) -> Vec<String> {
        BBOX_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(per_channel("regions", channels))
            .collect()
    }

    fn extract(&self, sample: &Sample, out: &mut Vec<f64>) {
        let bbox = sample.bbox();
        out.extend([
            bbox.min_row as f64,
            bbox.min_col as f64,
            bbox.max_row as f64,
            bbox.max_col as f64,
        ]);
        out.extend(sample.regions().iter().map(|&r| r as f64));
    }
}
