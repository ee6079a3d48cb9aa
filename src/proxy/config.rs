//! Proxy config documents: loading, filtering and writing them back.
//!
//! A document is a Clash-style YAML mapping (JSON works too) with a
//! `proxies` list of entries. Each entry needs at least `name` and `type`;
//! everything else is kept verbatim so saved documents can be fed to other
//! tools unchanged.

use super::RawProxyConfig;
use crate::errors::{to_speed_test_error, SpeedTestError};
use crate::results::ProxyResult;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub proxies: Vec<RawProxyConfig>,
    /// File stem of the path or URL the document was loaded from.
    #[serde(skip)]
    pub source: Option<String>,
}

impl ConfigDocument {
    /// Parse YAML, falling back to strict JSON for `{`-documents YAML
    /// rejects (tab indentation, mostly).
    pub fn parse(text: &str) -> Result<Self, SpeedTestError> {
        match Self::from_yaml(text) {
            Ok(document) => Ok(document),
            Err(e) if text.trim_start().starts_with('{') => {
                Self::from_json(text).map_err(|_| e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, SpeedTestError> {
        serde_yaml::from_str(text).map_err(|e| {
            SpeedTestError::config(format!("invalid config document: {}", e))
                .with_source(e)
        })
    }

    pub fn from_json(text: &str) -> Result<Self, SpeedTestError> {
        serde_json::from_str(text).map_err(|e| {
            SpeedTestError::config(format!("invalid config document: {}", e))
                .with_source(e)
        })
    }

    pub fn to_yaml(&self) -> Result<String, SpeedTestError> {
        serde_yaml::to_string(self).map_err(|e| {
            SpeedTestError::config(format!("cannot encode document: {}", e))
                .with_source(e)
        })
    }

    /// Document holding the raw config of every result, in order.
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a ProxyResult>,
    ) -> Self {
        Self {
            proxies: results
                .into_iter()
                .map(|result| result.proxy_config.clone())
                .collect(),
            source: None,
        }
    }

    /// Load a document from a file path or an http(s) URL.
    pub async fn load(source: &str) -> Result<Self, SpeedTestError> {
        let text = if is_remote(source) {
            debug!("Fetching config document {}", source);
            fetch(source).await?
        } else {
            tokio::fs::read_to_string(source).await.map_err(|e| {
                SpeedTestError::config(format!("cannot read {}: {}", source, e))
                    .with_source(e)
            })?
        };

        let mut document = Self::parse(&text).map_err(|e| {
            SpeedTestError::config(format!("{}: {}", source, e.message))
                .with_source(e)
        })?;
        document.source = document_stem(source);
        Ok(document)
    }

    /// Write the document as YAML.
    pub async fn save(&self, path: &Path) -> Result<(), SpeedTestError> {
        let text = self.to_yaml()?;
        tokio::fs::write(path, text).await.map_err(|e| {
            SpeedTestError::config(format!(
                "cannot write {}: {}",
                path.display(),
                e
            ))
            .with_source(e)
        })?;

        info!("Saved {} proxies to {}", self.proxies.len(), path.display());
        Ok(())
    }
}

/// `airport` for `./subs/airport.yaml` or `https://host/sub/airport.yml?t=1`.
fn document_stem(source: &str) -> Option<String> {
    let path = if is_remote(source) {
        Url::parse(source).ok()?.path().to_string()
    } else {
        source.to_string()
    };

    Path::new(&path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn fetch(url: &str) -> Result<String, SpeedTestError> {
    let response = reqwest::get(url)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| to_speed_test_error(Box::new(e), url))?;

    response.text().await.map_err(|e| to_speed_test_error(Box::new(e), url))
}

/// Expand a comma-separated list of files, directories and URLs into
/// document sources.
///
/// Directories are walked recursively for `.yaml`, `.yml` and `.json` files. Local paths that
/// start with one of the comma-separated `skip` prefixes are left out.
pub fn collect_sources(
    inputs: &str,
    skip: &str,
) -> Result<Vec<String>, SpeedTestError> {
    let skip: Vec<PathBuf> = skip
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(absolute)
        .collect();

    let mut sources = Vec::new();
    for input in inputs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if is_remote(input) {
            sources.push(input.to_string());
            continue;
        }

        let path = absolute(input);
        if !path.exists() {
            return Err(SpeedTestError::config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let mut found = Vec::new();
        if path.is_dir() {
            walk(&path, &mut found)?;
        } else {
            found.push(path);
        }

        sources.extend(
            found
                .into_iter()
                .filter(|p| !skip.iter().any(|s| p.starts_with(s)))
                .map(|p| p.display().to_string()),
        );
    }

    Ok(sources)
}

fn absolute(path: &str) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| PathBuf::from(path))
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), SpeedTestError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        SpeedTestError::config(format!("cannot list {}: {}", dir.display(), e))
            .with_source(e)
    })?;

    let mut paths: Vec<PathBuf> =
        entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_document(&path) {
            found.push(path);
        }
    }

    Ok(())
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ["yaml", "yml", "json"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Selects proxies by name: the name must match `pattern` and contain none
/// of the blocked keywords.
#[derive(Debug, Clone, Default)]
pub struct ProxyFilter {
    pattern: Option<Regex>,
    blocked: Vec<String>,
}

impl ProxyFilter {
    /// `blocked` is a `|`-separated keyword list, matched case-insensitively.
    pub fn new(pattern: &str, blocked: &str) -> Result<Self, SpeedTestError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            SpeedTestError::config(format!("invalid filter regex: {}", e))
                .with_source(e)
        })?;
        let blocked = blocked
            .split('|')
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();

        Ok(Self { pattern: Some(pattern), blocked })
    }

    pub fn matches(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.pattern.as_ref().is_none_or(|pattern| pattern.is_match(name))
            && !self.blocked.iter().any(|keyword| lowered.contains(keyword))
    }
}
