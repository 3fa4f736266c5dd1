//! Run configuration, loaded from YAML or JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureGroup;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration")]
    Load(#[from] common::SerdeError),
    #[error("No channels configured")]
    NoChannels,
    #[error("Duplicate channel name `{0}`")]
    DuplicateChannel(String),
    #[error("`{field}` refers to channel {channel}, but only {channels} channels are configured")]
    ChannelOutOfRange {
        field: &'static str,
        channel: usize,
        channels: usize,
    },
    #[error("`{field}` must be positive")]
    NotPositive { field: &'static str },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Segmentation strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SegmentationConfig {
    /// Per-channel edge-based watershed; one sample per frame.
    Watershed {
        #[serde(default)]
        noisy_channels: Vec<usize>,
        #[serde(default = "default_min_object_size")]
        min_object_size: usize,
    },
    /// Detection model on every channel, reconciled against the parent channel.
    Model {
        parent_channel: usize,
        reference_channel: usize,
        #[serde(default)]
        cell_diameter: Option<f32>,
        #[serde(default)]
        gpu_accelerated: bool,
    },
    /// Nuclear-marker-driven watershed on the reference channel.
    Nuclear {
        reference_channel: usize,
        cell_diameter: usize,
    },
}

fn default_min_object_size() -> usize {
    20
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig::Watershed {
            noisy_channels: Vec::new(),
            min_object_size: default_min_object_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Channel names, in the order planes appear in each frame.
    pub channels: Vec<String>,
    /// Largest value the acquisition can produce; used to rescale for texture.
    pub maximum_pixel_value: f32,
    pub features: Vec<FeatureGroup>,
    pub segmentation: SegmentationConfig,
    pub partition_size: usize,
    /// Worker threads; 0 uses one per available core.
    pub workers: usize,
    /// Partitions in flight at once; 0 uses twice the worker count.
    pub max_partitions_in_flight: usize,
    /// Meta keys whose values, joined with `_`, form a sample's group.
    pub group_keys: Vec<String>,
    /// Meta keys copied into the feature table.
    pub meta_keys: Vec<String>,
    /// Clamp loaded pixels to `[0, clip]`.
    pub clip: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            maximum_pixel_value: 4096.0,
            features: vec![
                FeatureGroup::Bbox,
                FeatureGroup::Shape,
                FeatureGroup::Intensity,
                FeatureGroup::Texture,
            ],
            segmentation: SegmentationConfig::default(),
            partition_size: 16,
            workers: 0,
            max_partitions_in_flight: 0,
            group_keys: Vec::new(),
            meta_keys: Vec::new(),
            clip: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: PipelineConfig = common::load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str, format: common::FileFormat) -> Result<Self> {
        let config: PipelineConfig = common::deserialize(text.as_bytes(), format)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        for (i, name) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(name) {
                return Err(ConfigError::DuplicateChannel(name.clone()));
            }
        }
        if !(self.maximum_pixel_value > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "maximum_pixel_value",
            });
        }
        if self.partition_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "partition_size",
            });
        }
        if self.clip.is_some_and(|clip| !(clip > 0.0)) {
            return Err(ConfigError::NotPositive { field: "clip" });
        }

        let channels = self.channels.len();
        let check = |field: &'static str, channel: usize| {
            if channel >= channels {
                Err(ConfigError::ChannelOutOfRange {
                    field,
                    channel,
                    channels,
                })
            } else {
                Ok(())
            }
        };
        match &self.segmentation {
            SegmentationConfig::Watershed { noisy_channels, .. } => {
                for &c in noisy_channels {
                    check("noisy_channels", c)?;
                }
            }
            SegmentationConfig::Model {
                parent_channel,
                reference_channel,
                cell_diameter,
                ..
            } => {
                check("parent_channel", *parent_channel)?;
                check("reference_channel", *reference_channel)?;
                if cell_diameter.is_some_and(|d| !(d > 0.0)) {
                    return Err(ConfigError::NotPositive {
                        field: "cell_diameter",
                    });
                }
            }
            SegmentationConfig::Nuclear {
                reference_channel,
                cell_diameter,
            } => {
                check("reference_channel", *reference_channel)?;
                if *cell_diameter == 0 {
                    return Err(ConfigError::NotPositive {
                        field: "cell_diameter",
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::FileFormat;

    use super::*;

    const YAML: &str = "
channels: [BF, DAPI, CD45]
maximum_pixel_value: 4095
features: [intensity, bbox]
segmentation:
  method: model
  parent_channel: 1
  reference_channel: 1
  cell_diameter: 25.0
partition_size: 8
group_keys: [plate, well]
clip: 4095
";

    #[test]
    fn test_parse_yaml() {
        let config = PipelineConfig::parse(YAML, FileFormat::Yaml).unwrap();
        assert_eq!(config.channels, vec!["BF", "DAPI", "CD45"]);
        assert_eq!(config.maximum_pixel_value, 4095.0);
        assert_eq!(config.features, vec![FeatureGroup::Intensity, FeatureGroup::Bbox]);
        assert_eq!(
            config.segmentation,
            SegmentationConfig::Model {
                parent_channel: 1,
                reference_channel: 1,
                cell_diameter: Some(25.0),
                gpu_accelerated: false,
            }
        );
        assert_eq!(config.partition_size, 8);
        assert_eq!(config.clip, Some(4095.0));
        // unset fields fall back to defaults
        assert_eq!(config.workers, 0);
        assert!(config.meta_keys.is_empty());
    }

    #[test]
    fn test_defaults_need_channels() {
        assert!(matches!(
            PipelineConfig::default().validate(),
            Err(ConfigError::NoChannels)
        ));
    }

    #[test]
    fn test_channel_reference_out_of_range() {
        let json = r#"{
            "channels": ["a", "b"],
            "segmentation": {"method": "nuclear", "reference_channel": 2, "cell_diameter": 10}
        }"#;
        let err = PipelineConfig::parse(json, FileFormat::Json).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ChannelOutOfRange {
                field: "reference_channel",
                channel: 2,
                channels: 2,
            }
        ));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = PipelineConfig {
            channels: vec!["a".to_string(), "a".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateChannel(_))));

        config.channels = vec!["a".to_string()];
        config.partition_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "partition_size" })
        ));

        config.partition_size = 4;
        config.segmentation = SegmentationConfig::Watershed {
            noisy_channels: vec![3],
            min_object_size: 5,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChannelOutOfRange { field: "noisy_channels", .. })
        ));
    }

    #[test]
    fn test_unknown_feature_group_is_rejected() {
        let json = r#"{"channels": ["a"], "features": ["colour"]}"#;
        assert!(matches!(
            PipelineConfig::parse(json, FileFormat::Json),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.channels.len(), 3);

        common::save_file(&config, &dir.path().join("copy.json")).unwrap();
        let copy = PipelineConfig::from_file(&dir.path().join("copy.json")).unwrap();
        assert_eq!(copy, config);
    }
}
