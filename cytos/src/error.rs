use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::GraphError;
use crate::features::FeatureError;
use crate::sample::SampleError;
use crate::segmentation::SegmentationError;
use crate::table::TableError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Table(#[from] TableError),
}

pub type Result<T> = std::result::Result<T, Error>;
