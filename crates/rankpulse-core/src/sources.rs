use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Remote JSON endpoint queried per event.
    Http,
    /// Rank movement of other entities in the same category, read from the snapshot store.
    Competitor,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Http => write!(f, "http"),
            SourceKind::Competitor => write!(f, "competitor"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub endpoint: Option<String>,
    /// Per-attempt timeout; falls back to `RANKPULSE_SOURCE_TIMEOUT_SECS`.
    pub timeout_secs: Option<u64>,
    /// Env var holding a bearer token for the endpoint.
    pub api_key_env: Option<String>,
    pub max_items: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

impl SourcesFile {
    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Load and validate the context source definitions from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sources(path: &Path) -> Result<SourcesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SourcesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_sources(&content)
}

/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_sources(content: &str) -> Result<SourcesFile, ConfigError> {
    let sources_file: SourcesFile = serde_yaml::from_str(content)?;
    validate_sources(&sources_file)?;
    Ok(sources_file)
}

fn validate_sources(sources_file: &SourcesFile) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in &sources_file.sources {
        let name = source.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "source name must be non-empty".to_string(),
            ));
        }

        if !seen.insert(name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name: '{}'",
                source.name
            )));
        }

        if source.kind == SourceKind::Http
            && source.endpoint.as_deref().is_none_or(|e| e.trim().is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "http source '{}' requires an endpoint",
                source.name
            )));
        }

        if source.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(format!(
                "source '{}' has a zero timeout",
                source.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_sources() {
        let yaml = r"
sources:
  - name: news
    kind: http
    endpoint: https://news.example.com/v1/mentions
    timeout_secs: 15
  - name: competitors
    kind: competitor
    max_items: 5
  - name: social
    kind: http
    endpoint: https://social.example.com/v1/posts
    enabled: false
";
        let file = parse_sources(yaml).unwrap();
        assert_eq!(file.sources.len(), 3);
        assert_eq!(file.sources[0].timeout_secs, Some(15));
        assert_eq!(file.sources[1].kind, SourceKind::Competitor);
        let enabled: Vec<&str> = file.enabled().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["news", "competitors"]);
    }

    #[test]
    fn rejects_duplicate_names_case_insensitively() {
        let yaml = r"
sources:
  - name: News
    kind: competitor
  - name: news
    kind: competitor
";
        let err = parse_sources(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn rejects_http_source_without_endpoint() {
        let yaml = r"
sources:
  - name: news
    kind: http
";
        let err = parse_sources(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("endpoint")));
    }

    #[test]
    fn rejects_unknown_kind() {
        let yaml = r"
sources:
  - name: news
    kind: carrier-pigeon
";
        assert!(matches!(
            parse_sources(yaml),
            Err(ConfigError::SourcesFileParse(_))
        ));
    }

    #[test]
    fn shipped_sources_file_is_valid() {
        let file = parse_sources(include_str!("../../../config/sources.yaml")).unwrap();
        assert!(file.enabled().count() >= 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_sources(Path::new("/nonexistent/sources.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::SourcesFileIo { .. }));
    }
}
