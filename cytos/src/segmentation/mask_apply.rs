use crate::sample::{Mask, Plane, Sample};

fn apply(plane: &Plane, mask: &Mask) -> Plane {
    plane.zip_map(mask, |&v, &m| if m { v } else { 0.0 })
}

/// Channel pixels with everything outside the channel's own mask zeroed.
pub fn masked_pixels(sample: &Sample) -> Vec<Plane> {
    sample
        .pixels()
        .iter()
        .zip(sample.mask())
        .map(|(p, m)| apply(p, m))
        .collect()
}

/// Channel pixels with everything outside the combined mask zeroed.
pub fn masked_combined_pixels(sample: &Sample) -> Vec<Plane> {
    sample
        .pixels()
        .iter()
        .map(|p| apply(p, sample.combined_mask()))
        .collect()
}

/// The pixel values under each channel's mask, in raster order.
pub fn masked_intensities(sample: &Sample) -> Vec<Vec<f32>> {
    sample
        .pixels()
        .iter()
        .zip(sample.mask())
        .map(|(p, m)| {
            p.iter()
                .zip(m.iter())
                .filter(|&(_, &set)| set)
                .map(|(&v, _)| v)
                .collect()
        })
        .collect()
}
