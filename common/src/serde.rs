use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::file_format::{FileExtensionError, FileFormat};

#[derive(Debug, thiserror::Error)]
pub enum SerdeError {
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SerdeError>;

pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> Result<String> {
    let text = match format {
        FileFormat::Yaml => serde_yml::to_string(value)?,
        FileFormat::Json => serde_json::to_string_pretty(value)?,
    };
    Ok(normalize_line_endings(text))
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: FileFormat) -> Result<T> {
    let text = std::str::from_utf8(serialized)?;
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(text)?),
        FileFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Reads and deserializes a file, picking the format from its extension.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = FileFormat::from_path(path)?;
    let bytes = std::fs::read(path).map_err(|source| SerdeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    deserialize(&bytes, format)
}

/// Serializes `value` and writes it to `path`, picking the format from its extension.
pub fn save_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let format = FileFormat::from_path(path)?;
    let text = serialize(value, format)?;
    std::fs::write(path, text).map_err(|source| SerdeError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn normalize_line_endings(text: String) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        partition_size: usize,
        channels: Vec<String>,
    }

    fn settings() -> Settings {
        Settings {
            name: "run".to_string(),
            partition_size: 16,
            channels: vec!["BF".to_string(), "DAPI".to_string()],
        }
    }

    #[test]
    fn yaml_and_json_roundtrip() {
        for format in [FileFormat::Yaml, FileFormat::Json] {
            let text = serialize(&settings(), format).unwrap();
            let parsed: Settings = deserialize(text.as_bytes(), format).unwrap();
            assert_eq!(parsed, settings());
        }
    }

    #[test]
    fn save_and_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        save_file(&settings(), &path).unwrap();
        let loaded: Settings = load_file(&path).unwrap();
        assert_eq!(loaded, settings());
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = load_file::<Settings>(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(matches!(err, SerdeError::Io { .. }));
    }
}
