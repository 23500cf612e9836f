//! LeRobot `meta/info.json` parsing
//!
//! Only the fields the engine needs are typed. Everything else is kept in
//! `extra` so the record sent to the service carries the file unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::transfer::core::{Result, TransferError, UnitRole};

pub const INFO_PATH: &str = "meta/info.json";
pub const DEFAULT_CHUNKS_SIZE: u64 = 1000;

/// Episode count above which per-episode templates are checked by prefix only
pub const MAX_EXPANDED_EPISODES: u64 = 100_000;

/// Widest zero padding a placeholder may ask for; a `u64` has at most 20 digits
const MAX_PLACEHOLDER_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub dtype: String,
    #[serde(default)]
    pub shape: Vec<u64>,
    #[serde(default)]
    pub names: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Structural description of a dataset, read-only once parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebase_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_type: Option<String>,
    pub total_episodes: u64,
    pub total_frames: u64,
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tasks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_videos: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    pub features: BTreeMap<String, FeatureSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub splits: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A file or group of files the manifest says must exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredFile {
    Exact { path: String, role: UnitRole },
    /// At least one file somewhere below `prefix`
    AnyUnder { prefix: String, role: UnitRole },
}

impl DeclaredFile {
    pub fn is_satisfied_by<'a, I>(&self, mut paths: I) -> bool
    where
        I: Iterator<Item = &'a str>,
    {
        match self {
            DeclaredFile::Exact { path, .. } => paths.any(|p| p == path),
            DeclaredFile::AnyUnder { prefix, .. } => paths.any(|p| p.starts_with(prefix.as_str())),
        }
    }
}

impl std::fmt::Display for DeclaredFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclaredFile::Exact { path, .. } => write!(f, "{}", path),
            DeclaredFile::AnyUnder { prefix, .. } => write!(f, "{}*", prefix),
        }
    }
}

impl DatasetManifest {
    /// Parse and check the required fields; `source` only labels errors
    pub fn parse(source: &Path, contents: &str) -> Result<Self> {
        let manifest: DatasetManifest = serde_json::from_str(contents).map_err(|e| TransferError::InvalidDataset {
            path: source.to_path_buf(),
            reason: format!("malformed {}: {}", INFO_PATH, e),
        })?;

        if manifest.features.is_empty() {
            return Err(TransferError::InvalidDataset {
                path: source.to_path_buf(),
                reason: format!("{} declares no features", INFO_PATH),
            });
        }
        if manifest.fps.is_nan() || manifest.fps <= 0.0 {
            return Err(TransferError::InvalidDataset {
                path: source.to_path_buf(),
                reason: format!("fps must be positive, got {}", manifest.fps),
            });
        }

        Ok(manifest)
    }

    pub fn chunks_size(&self) -> u64 {
        self.chunks_size.filter(|&size| size > 0).unwrap_or(DEFAULT_CHUNKS_SIZE)
    }

    /// Feature keys stored as video files
    pub fn video_keys(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|(_, spec)| spec.dtype == "video")
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Files the layout templates promise
    ///
    /// Per-episode templates (`{episode_index}`) expand to exact paths.
    /// File-based templates (`{chunk_index}`/`{file_index}`) cannot be
    /// expanded from the counts alone, so they only require one file under
    /// the template's fixed prefix.
    pub fn declared_files(&self) -> Vec<DeclaredFile> {
        let mut declared = Vec::new();

        if self.total_frames > 0 {
            match self.data_path.as_deref() {
                Some(template) => self.expand(template, None, UnitRole::DataChunk, &mut declared),
                None => declared.push(DeclaredFile::AnyUnder {
                    prefix: "data/".to_string(),
                    role: UnitRole::DataChunk,
                }),
            }
        }

        for key in self.video_keys() {
            match self.video_path.as_deref() {
                Some(template) => self.expand(template, Some(key), UnitRole::Video, &mut declared),
                None => declared.push(DeclaredFile::AnyUnder {
                    prefix: format!("videos/{}/", key),
                    role: UnitRole::Video,
                }),
            }
        }

        declared
    }

    fn expand(&self, template: &str, video_key: Option<&str>, role: UnitRole, out: &mut Vec<DeclaredFile>) {
        let template = match video_key {
            Some(key) => template.replace("{video_key}", key),
            None => template.to_string(),
        };

        if template.contains("{episode_index") {
            match self.expand_episodes(&template, role) {
                Some(paths) => out.extend(paths),
                None => out.push(DeclaredFile::AnyUnder {
                    prefix: template_prefix(&template),
                    role,
                }),
            }
        } else if template.contains('{') {
            out.push(DeclaredFile::AnyUnder {
                prefix: template_prefix(&template),
                role,
            });
        } else {
            out.push(DeclaredFile::Exact { path: template, role });
        }
    }

    /// One exact path per episode, or `None` when the template cannot be
    /// expanded within bounds
    fn expand_episodes(&self, template: &str, role: UnitRole) -> Option<Vec<DeclaredFile>> {
        if self.total_episodes > MAX_EXPANDED_EPISODES {
            debug!(
                "{} episodes exceed the expansion limit, checking {} by prefix",
                self.total_episodes, template
            );
            return None;
        }

        let chunks_size = self.chunks_size();
        (0..self.total_episodes)
            .map(|episode| {
                let values = [("episode_index", episode), ("episode_chunk", episode / chunks_size)];
                render_template(template, &values).map(|path| DeclaredFile::Exact { path, role })
            })
            .collect()
    }
}

/// Directory part of a template before its first placeholder
fn template_prefix(template: &str) -> String {
    let fixed = template.split('{').next().unwrap_or("");
    match fixed.rfind('/') {
        Some(slash) => fixed[..=slash].to_string(),
        None => String::new(),
    }
}

/// Fill `{name}` and `{name:0Nd}` placeholders
///
/// `None` if a name is unknown, a brace is unclosed, or the width is
/// wider than any `u64` needs.
pub fn render_template(template: &str, values: &[(&str, u64)]) -> Option<String> {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let close = rest[open..].find('}')? + open;
        let placeholder = &rest[open + 1..close];
        let (name, spec) = placeholder.split_once(':').unwrap_or((placeholder, ""));
        let value = values.iter().find(|(key, _)| *key == name).map(|(_, v)| *v)?;

        let width: usize = spec.trim_end_matches('d').trim_start_matches('0').parse().unwrap_or(0);
        if width > MAX_PLACEHOLDER_WIDTH {
            return None;
        }
        out.push_str(&format!("{:0width$}", value, width = width));
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V3_INFO: &str = r#"{
        "codebase_version": "v3.0",
        "robot_type": "test_robot",
        "total_episodes": 10,
        "total_frames": 1000,
        "total_tasks": 5,
        "fps": 30,
        "chunks_size": 1000,
        "splits": {"train": "0:10"},
        "data_path": "data/chunk-{chunk_index:03d}/file-{file_index:03d}.parquet",
        "video_path": "videos/{video_key}/chunk-{chunk_index:03d}/file-{file_index:03d}.mp4",
        "features": {
            "observation.state": {"dtype": "float32", "shape": [7], "names": {"axes": ["j0"]}},
            "observation.images.top": {"dtype": "video", "shape": [480, 640, 3], "info": {"video.fps": 30}}
        },
        "custom_field": {"kept": true}
    }"#;

    #[test]
    fn test_parse_keeps_unknown_fields() {
        let manifest = DatasetManifest::parse(Path::new("ds"), V3_INFO).unwrap();
        assert_eq!(manifest.total_episodes, 10);
        assert_eq!(manifest.fps, 30.0);
        assert_eq!(manifest.video_keys(), vec!["observation.images.top"]);
        assert!(manifest.extra.contains_key("custom_field"));
        assert!(manifest.features["observation.images.top"].extra.contains_key("info"));

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["custom_field"]["kept"], Value::Bool(true));
    }

    #[test]
    fn test_missing_required_field_is_invalid_dataset() {
        let err = DatasetManifest::parse(Path::new("ds"), r#"{"total_episodes": 1, "fps": 30, "features": {"a": {"dtype": "int64"}}}"#)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDataset { ref reason, .. } if reason.contains("total_frames")));

        let err = DatasetManifest::parse(
            Path::new("ds"),
            r#"{"total_episodes": 1, "total_frames": 1, "fps": 30, "features": {}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDataset { .. }));

        let err = DatasetManifest::parse(
            Path::new("ds"),
            r#"{"total_episodes": 1, "total_frames": 1, "fps": 0, "features": {"a": {"dtype": "int64"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDataset { .. }));
    }

    #[test]
    fn test_v3_declares_prefixes() {
        let manifest = DatasetManifest::parse(Path::new("ds"), V3_INFO).unwrap();
        assert_eq!(
            manifest.declared_files(),
            vec![
                DeclaredFile::AnyUnder { prefix: "data/".into(), role: UnitRole::DataChunk },
                DeclaredFile::AnyUnder { prefix: "videos/observation.images.top/".into(), role: UnitRole::Video },
            ]
        );
    }

    #[test]
    fn test_v2_declares_every_episode() {
        let info = r#"{
            "codebase_version": "v2.1",
            "total_episodes": 3,
            "total_frames": 90,
            "fps": 30,
            "chunks_size": 2,
            "data_path": "data/chunk-{episode_chunk:03d}/episode_{episode_index:06d}.parquet",
            "video_path": "videos/chunk-{episode_chunk:03d}/{video_key}/episode_{episode_index:06d}.mp4",
            "features": {"cam": {"dtype": "video", "shape": [1]}}
        }"#;
        let manifest = DatasetManifest::parse(Path::new("ds"), info).unwrap();
        let declared: Vec<String> = manifest.declared_files().iter().map(|d| d.to_string()).collect();
        assert_eq!(
            declared,
            vec![
                "data/chunk-000/episode_000000.parquet",
                "data/chunk-000/episode_000001.parquet",
                "data/chunk-001/episode_000002.parquet",
                "videos/chunk-000/cam/episode_000000.mp4",
                "videos/chunk-000/cam/episode_000001.mp4",
                "videos/chunk-001/cam/episode_000002.mp4",
            ]
        );
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("a/{x:03d}/{y}.bin", &[("x", 7), ("y", 12)]).as_deref(),
            Some("a/007/12.bin")
        );
        assert!(render_template("a/{unknown}", &[("x", 1)]).is_none());
        assert!(render_template("a/{x", &[("x", 1)]).is_none());
        assert!(render_template("a/{x:099999999999d}", &[("x", 1)]).is_none());
        assert_eq!(render_template("a/{x:020d}", &[("x", 1)]).map(|p| p.len()), Some(22));
    }

    #[test]
    fn test_oversized_layouts_fall_back_to_prefixes() {
        let huge = r#"{
            "total_episodes": 1000000000000,
            "total_frames": 1,
            "fps": 30,
            "data_path": "data/chunk-{episode_chunk:03d}/episode_{episode_index:06d}.parquet",
            "features": {"a": {"dtype": "int64"}}
        }"#;
        let manifest = DatasetManifest::parse(Path::new("ds"), huge).unwrap();
        assert_eq!(
            manifest.declared_files(),
            vec![DeclaredFile::AnyUnder { prefix: "data/".into(), role: UnitRole::DataChunk }]
        );

        let wide = r#"{
            "total_episodes": 2,
            "total_frames": 1,
            "fps": 30,
            "data_path": "data/episode_{episode_index:099999999999d}.parquet",
            "features": {"a": {"dtype": "int64"}}
        }"#;
        let manifest = DatasetManifest::parse(Path::new("ds"), wide).unwrap();
        assert_eq!(
            manifest.declared_files(),
            vec![DeclaredFile::AnyUnder { prefix: "data/".into(), role: UnitRole::DataChunk }]
        );
    }

    #[test]
    fn test_declared_satisfaction() {
        let any = DeclaredFile::AnyUnder { prefix: "data/".into(), role: UnitRole::DataChunk };
        assert!(any.is_satisfied_by(["meta/info.json", "data/chunk-000/file-000.parquet"].into_iter()));
        assert!(!any.is_satisfied_by(["meta/info.json"].into_iter()));
        assert_eq!(any.to_string(), "data/*");
    }
}
