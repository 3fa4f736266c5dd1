//! Where frames come from.
//!
//! A [`FrameSource`] hands out frames by index. The pipeline asks for the
//! frames of a partition only when that partition's task runs.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use common::{Buffer2, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::{Frame, Meta, SampleError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to list frame files in {path}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read frame file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: common::SerdeError,
    },
    #[error("Frame {idx}: channel {channel} has a pixel count that does not match its size")]
    PixelCount { idx: String, channel: usize },
    #[error(transparent)]
    Sample(#[from] SampleError),
}

/// Indexed frames, loaded one at a time.
pub trait FrameSource: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame `index`, for `index < len()`.
    fn load(&self, index: usize) -> Result<Frame, Self::Error>;
}

impl FrameSource for Vec<Frame> {
    type Error = Infallible;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn load(&self, index: usize) -> Result<Frame, Infallible> {
        Ok(self[index].clone())
    }
}

/// On-disk layout of one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameFile {
    pub idx: String,
    #[serde(default)]
    pub group: String,
    pub pixels: Vec<Buffer2<f32>>,
    #[serde(default)]
    pub meta: Meta,
}

impl FrameFile {
    pub fn into_frame(self) -> Result<Frame, SourceError> {
        if let Some(channel) = self
            .pixels
            .iter()
            .position(|p| p.len() != p.width() * p.height())
        {
            return Err(SourceError::PixelCount {
                idx: self.idx,
                channel,
            });
        }
        let mut frame = Frame::new(self.idx, self.group, self.pixels)?;
        frame.meta = self.meta;
        Ok(frame)
    }
}

impl From<&Frame> for FrameFile {
    fn from(frame: &Frame) -> Self {
        Self {
            idx: frame.idx.clone(),
            group: frame.group.clone(),
            pixels: frame.pixels.clone(),
            meta: frame.meta.clone(),
        }
    }
}

/// Read every frame of a multi-frame file at once.
pub fn load_frame_list(path: &Path) -> Result<Vec<Frame>, SourceError> {
    let files: Vec<FrameFile> = common::load_file(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    files.into_iter().map(FrameFile::into_frame).collect()
}

/// One frame per YAML or JSON file, read when its partition runs.
#[derive(Debug, Clone, Default)]
pub struct FrameFiles {
    paths: Vec<PathBuf>,
}

impl FrameFiles {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Every `.yaml`, `.yml` and `.json` file directly in `dir`, sorted by path.
    pub fn from_dir(dir: &Path) -> Result<Self, SourceError> {
        let list_err = |source| SourceError::ListDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(list_err)? {
            let path = entry.map_err(list_err)?.path();
            if path.is_file() && FileFormat::from_path(&path).is_ok() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl FrameSource for FrameFiles {
    type Error = SourceError;

    fn len(&self) -> usize {
        self.paths.len()
    }

    fn load(&self, index: usize) -> Result<Frame, SourceError> {
        let path = &self.paths[index];
        let file: FrameFile = common::load_file(path).map_err(|source| SourceError::Read {
            path: path.clone(),
            source,
        })?;
        file.into_frame()
    }
}
