//! Build options and the `<manifest>.json` sidecar.

use std::path::Path;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::config::HashsigConfig;
use crate::error::{HashsigError, HashsigResult};

/// Limits and patterns for one directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Include masks matched against file names (`*` when empty).
    pub file_patterns: Vec<String>,

    /// Exclude masks.
    pub exclude_patterns: Vec<String>,

    /// Fail when more files than this are at or under the size ceiling.
    pub max_files: usize,

    /// Include dot files and dot directories.
    pub include_hidden: bool,

    /// Larger files are not part of the manifest.
    pub max_size_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            file_patterns: vec!["*".to_string()],
            exclude_patterns: Vec::new(),
            max_files: 100,
            include_hidden: false,
            max_size_bytes: 1024 * 1024,
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &HashsigConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_size_bytes: config.max_size_bytes,
            ..Self::default()
        }
    }

    /// Directory depth limit of the walk.
    pub fn max_depth(&self) -> usize {
        self.max_files.min(99)
    }

    /// Apply stored or caller options on top of these.
    pub fn apply(mut self, options: &BuildOptions) -> Self {
        if let Some(patterns) = &options.file_patterns {
            if !patterns.is_empty() {
                self.file_patterns = patterns.clone();
            }
        }
        if let Some(patterns) = &options.exclude_patterns {
            self.exclude_patterns = patterns.clone();
        }
        if let Some(max) = options.max_files_cnt {
            self.max_files = max;
        }
        if let Some(hidden) = options.get_hidden {
            self.include_hidden = hidden;
        }
        if let Some(max) = options.max_size_bytes {
            self.max_size_bytes = max;
        }
        self
    }
}

/// Persisted build options. Unset fields fall back to [`ScanOptions`]
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_patterns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,

    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_files_cnt: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_hidden: Option<bool>,

    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_size_bytes: Option<u64>,
}

impl BuildOptions {
    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Load the sidecar; `None` when the file does not exist.
    pub fn load(path: &Path) -> HashsigResult<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HashsigError::io(
                    format!("failed to read options {}", path.display()),
                    e,
                ))
            }
        };

        if content.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| HashsigError::Config {
                message: format!("invalid options file {}: {}", path.display(), e),
            })
    }

    pub fn save(&self, path: &Path) -> HashsigResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| HashsigError::Config {
            message: format!("failed to serialize options: {}", e),
        })?;
        std::fs::write(path, json)
            .map_err(|e| HashsigError::io(format!("failed to write options {}", path.display()), e))
    }

    /// `overrides` on top of `self`.
    pub fn merge(&self, overrides: &BuildOptions) -> BuildOptions {
        BuildOptions {
            file_patterns: overrides
                .file_patterns
                .clone()
                .or_else(|| self.file_patterns.clone()),
            exclude_patterns: overrides
                .exclude_patterns
                .clone()
                .or_else(|| self.exclude_patterns.clone()),
            max_files_cnt: overrides.max_files_cnt.or(self.max_files_cnt),
            get_hidden: overrides.get_hidden.or(self.get_hidden),
            max_size_bytes: overrides.max_size_bytes.or(self.max_size_bytes),
        }
    }
}

/// Integer given as JSON number or numeric string.
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| {
                de::Error::custom(format!("expected a non-negative integer, got {}", n))
            })?,
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("expected a numeric string, got {:?}", s)))?,
        Some(other) => {
            return Err(de::Error::custom(format!(
                "expected an integer, got {}",
                other
            )))
        }
    };
    T::try_from(number)
        .map(Some)
        .map_err(|_| de::Error::custom(format!("{} is out of range", number)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_keys_and_coercion() {
        let json = r#"{
            "filePatterns": ["*.txt"],
            "excludePatterns": ["tmp/*"],
            "maxFilesCnt": "250",
            "getHidden": true,
            "maxSizeBytes": 4096,
            "somethingElse": 1
        }"#;
        let options: BuildOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.file_patterns.as_deref(), Some(&["*.txt".to_string()][..]));
        assert_eq!(options.max_files_cnt, Some(250));
        assert_eq!(options.get_hidden, Some(true));
        assert_eq!(options.max_size_bytes, Some(4096));
    }

    #[test]
    fn test_non_numeric_string_rejected() {
        let result = serde_json::from_str::<BuildOptions>(r#"{"maxFilesCnt": "lots"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let stored = BuildOptions {
            file_patterns: Some(vec!["*.md".into()]),
            max_files_cnt: Some(10),
            get_hidden: Some(true),
            ..Default::default()
        };
        let overrides = BuildOptions {
            max_files_cnt: Some(20),
            ..Default::default()
        };

        let merged = stored.merge(&overrides);
        assert_eq!(merged.max_files_cnt, Some(20));
        assert_eq!(merged.file_patterns, Some(vec!["*.md".to_string()]));
        assert_eq!(merged.get_hidden, Some(true));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.hashsig.json");
        assert_eq!(BuildOptions::load(&path).unwrap(), None);

        let options = BuildOptions {
            exclude_patterns: Some(vec!["*.log".into()]),
            max_size_bytes: Some(10),
            ..Default::default()
        };
        options.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"excludePatterns\""));
        assert!(!text.contains("filePatterns"));
        assert_eq!(BuildOptions::load(&path).unwrap(), Some(options));
    }

    #[test]
    fn test_scan_options_apply() {
        let scan = ScanOptions::default().apply(&BuildOptions {
            file_patterns: Some(vec![]),
            max_files_cnt: Some(500),
            ..Default::default()
        });
        assert_eq!(scan.file_patterns, ["*"]);
        assert_eq!(scan.max_files, 500);
        assert_eq!(scan.max_depth(), 99);
        assert_eq!(ScanOptions { max_files: 3, ..Default::default() }.max_depth(), 3);
    }
}
