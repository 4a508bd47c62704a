use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Options read on import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Palette row to prefer when a DYT container is split.
    pub dyt_index: u32,
}

/// Options read on animation export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Resample continuous channel sources at every frame before encoding.
    pub auto_bake: bool,
    /// Give every unanimated bone except the root a rest keyframe at frame 0.
    pub insert_dummy_keyframes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecOptions {
    pub import: ImportOptions,
    pub export: ExportOptions,
}

impl CodecOptions {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse codec options JSON")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Invalid options in {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize codec options")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = CodecOptions::from_json_str(r#"{ "export": { "auto_bake": true } }"#).unwrap();
        assert_eq!(options.import.dyt_index, 0);
        assert!(options.export.auto_bake);
        assert!(!options.export.insert_dummy_keyframes);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{ "import": { "dyt_index": 3 } }"#).unwrap();
        let options = CodecOptions::load(&path).unwrap();
        assert_eq!(options.import.dyt_index, 3);
    }

    #[test]
    fn bad_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ import: ").unwrap();
        let err = CodecOptions::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn serialised_options_parse_back() {
        let mut options = CodecOptions::default();
        options.import.dyt_index = 2;
        options.export.insert_dummy_keyframes = true;
        let json = options.to_json_pretty().unwrap();
        assert_eq!(CodecOptions::from_json_str(&json).unwrap(), options);
    }
}
