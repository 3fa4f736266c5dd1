//! Per-sample feature extraction.
//!
//! Each [`FeatureExtractor`] declares its column names for a channel list up
//! front and fills exactly that many values per sample. [`FeatureSet`] runs the
//! configured groups in a fixed order and checks that every extractor kept
//! its promise, so the assembled table always matches the declared schema.

mod bbox;
mod intensity;
mod shape;
mod texture;


use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::sample::{Sample, SampleError};
use crate::table::FeatureRecord;

pub use bbox::BBoxFeatures;
pub use intensity::{INTENSITY_VIEWS, IntensityFeatures, IntensityView};
pub use shape::{SHAPE_PROPS, ShapeFeatures, ShapeProps};
pub use texture::{GLCM_DISTANCES, GLCM_PROPS, TextureFeatures};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumString,
    Display,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Bbox,
    Shape,
    Intensity,
    Texture,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("Sample {idx} has {actual} channels, expected {expected}")]
    ChannelCount {
        idx: String,
        expected: usize,
        actual: usize,
    },
    #[error("Feature group `{group}` produced {actual} values for {expected} declared columns")]
    SchemaMismatch {
        group: FeatureGroup,
        expected: usize,
        actual: usize,
    },
}

/// Computes one group of features.
pub trait FeatureExtractor: Send + Sync {
    fn group(&self) -> FeatureGroup;

    /// Column names, in output order, for `channels`.
    fn columns(&self, channels: &[String]) -> Vec<String>;

    /// Append one value per declared column.
    fn extract(&self, sample: &Sample, out: &mut Vec<f64>);
}

/// Ordered feature column names, declared before any sample is processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// The configured extractors for one channel list.
pub struct FeatureSet {
    channels: Vec<String>,
    extractors: Vec<(Box<dyn FeatureExtractor>, usize)>,
    schema: FeatureSchema,
}

impl std::fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups: Vec<FeatureGroup> = self.extractors.iter().map(|(e, _)| e.group()).collect();
        f.debug_struct("FeatureSet")
            .field("channels", &self.channels)
            .field("groups", &groups)
            .field("columns", &self.schema.len())
            .finish()
    }
}

impl FeatureSet {
    /// Built-in extractors for `groups`, run in canonical group order.
    pub fn new(groups: &[FeatureGroup], channels: Vec<String>, max_pixel_value: f32) -> Self {
        let mut groups = groups.to_vec();
        groups.sort();
        groups.dedup();

        let extractors = groups
            .into_iter()
            .map(|group| -> Box<dyn FeatureExtractor> {
                match group {
                    FeatureGroup::Bbox => Box::new(BBoxFeatures),
                    FeatureGroup::Shape => Box::new(ShapeFeatures),
                    FeatureGroup::Intensity => Box::new(IntensityFeatures),
                    FeatureGroup::Texture => Box::new(TextureFeatures::new(max_pixel_value)),
                }
            })
            .collect();
        Self::with_extractors(extractors, channels)
    }

    pub fn with_extractors(extractors: Vec<Box<dyn FeatureExtractor>>, channels: Vec<String>) -> Self {
        let mut columns = Vec::new();
        let extractors = extractors
            .into_iter()
            .map(|extractor| {
                let declared = extractor.columns(&channels);
                let count = declared.len();
                columns.extend(declared);
                (extractor, count)
            })
            .collect();
        Self {
            channels,
            extractors,
            schema: FeatureSchema { columns },
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Feature values for one sample, in schema order.
    pub fn extract_values(&self, sample: &Sample) -> Result<Vec<f64>, FeatureError> {
        sample.validate()?;
        if sample.num_channels() != self.channels.len() {
            return Err(FeatureError::ChannelCount {
                idx: sample.idx().to_string(),
                expected: self.channels.len(),
                actual: sample.num_channels(),
            });
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for (extractor, expected) in &self.extractors {
            let before = values.len();
            extractor.extract(sample, &mut values);
            let actual = values.len() - before;
            if actual != *expected {
                return Err(FeatureError::SchemaMismatch {
                    group: extractor.group(),
                    expected: *expected,
                    actual,
                });
            }
        }
        Ok(values)
    }

    /// Feature record for one sample: identity, meta and named features.
    pub fn extract(&self, sample: &Sample) -> Result<FeatureRecord, FeatureError> {
        let values = self.extract_values(sample)?;
        let features: HashMap<String, f64> = self
            .schema
            .columns()
            .iter()
            .cloned()
            .zip(values)
            .collect();
        Ok(FeatureRecord {
            idx: sample.idx().to_string(),
            group: sample.group().to_string(),
            meta: sample.meta().clone(),
            features,
        })
    }
}

/// `{name}_{channel}` for every channel.
pub(crate) fn per_channel<'a>(
    name: &'a str,
    channels: &'a [String],
) -> impl Iterator<Item = String> + 'a {
    channels.iter().map(move |ch| format!("{name}_{ch}"))
}
