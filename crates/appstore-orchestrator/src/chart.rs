// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proxy chart materialisation and the two generated GitOps files.
//!
//! A proxy chart is the bundled `reference-chart-proxy` directory with its
//! `Chart.yaml` rewritten to carry the app store name. Its
//! `requirements.yaml` points at the real chart and `values.yaml` nests the
//! user overrides under the chart name, so Helm dependency resolution is left
//! to ArgoCD.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name of the proxy chart under the reference chart root.
pub const CHART_PROXY_TEMPLATE: &str = "reference-chart-proxy";

/// Version stamped on every generated proxy chart.
pub const PROXY_CHART_VERSION: &str = "1.0.1";

/// File name of the dependency list.
pub const REQUIREMENTS_YAML_FILE: &str = "requirements.yaml";

/// File name of the value overrides.
pub const VALUES_YAML_FILE: &str = "values.yaml";

const CHART_YAML_FILE: &str = "Chart.yaml";

/// Chart templating errors.
#[derive(Debug, Error)]
pub enum ChartError {
    /// The reference directory is not a Helm chart.
    #[error("invalid base chart: {0}")]
    InvalidBaseChart(PathBuf),

    /// Reading the reference chart failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML encoding or decoding failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One file of a chart, relative to the chart root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    /// Path relative to the chart root
    pub path: PathBuf,
    /// File bytes
    pub content: Vec<u8>,
}

/// In-memory proxy chart ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyChart {
    /// Chart name, the app store name
    pub name: String,
    /// Files sorted by path
    pub files: Vec<ChartFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMetadata {
    api_version: String,
    name: String,
    version: String,
}

/// A single Helm dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// Chart repository URL
    pub repository: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Requirements {
    dependencies: Vec<Dependency>,
}

/// Builds proxy charts from the reference chart directory.
#[derive(Debug, Clone)]
pub struct ChartTemplater {
    ref_chart_dir: PathBuf,
}

impl ChartTemplater {
    /// Create a templater rooted at `ref_chart_dir`.
    pub fn new(ref_chart_dir: impl Into<PathBuf>) -> Self {
        Self {
            ref_chart_dir: ref_chart_dir.into(),
        }
    }

    /// Path of the proxy chart template.
    pub fn template_dir(&self) -> PathBuf {
        self.ref_chart_dir.join(CHART_PROXY_TEMPLATE)
    }

    /// Copy the proxy template and stamp `Chart.yaml` with `app_store_name`.
    pub fn proxy_chart(&self, app_store_name: &str) -> Result<ProxyChart, ChartError> {
        let root = self.template_dir();
        if !root.join(CHART_YAML_FILE).is_file() {
            return Err(ChartError::InvalidBaseChart(root));
        }

        let mut files = Vec::new();
        collect_files(&root, Path::new(""), &mut files)?;

        let metadata = ChartMetadata {
            api_version: "v2".to_string(),
            name: app_store_name.to_string(),
            version: PROXY_CHART_VERSION.to_string(),
        };
        let chart_yaml = serde_yaml::to_string(&metadata)?.into_bytes();
        match files.iter_mut().find(|f| f.path == Path::new(CHART_YAML_FILE)) {
            Some(file) => file.content = chart_yaml,
            None => files.push(ChartFile {
                path: PathBuf::from(CHART_YAML_FILE),
                content: chart_yaml,
            }),
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ProxyChart {
            name: app_store_name.to_string(),
            files,
        })
    }
}

fn collect_files(root: &Path, rel: &Path, out: &mut Vec<ChartFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let rel_path = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            collect_files(root, &rel_path, out)?;
        } else {
            out.push(ChartFile {
                content: std::fs::read(entry.path())?,
                path: rel_path,
            });
        }
    }
    Ok(())
}

/// `requirements.yaml` with a single dependency.
pub fn requirements_yaml(name: &str, version: &str, repository: &str) -> Result<String, ChartError> {
    let requirements = Requirements {
        dependencies: vec![Dependency {
            name: name.to_string(),
            version: version.to_string(),
            repository: repository.to_string(),
        }],
    };
    Ok(serde_yaml::to_string(&requirements)?)
}

/// `values.yaml` whose single top-level key is `chart_name`.
///
/// Blank overrides produce an empty map under the chart name.
pub fn values_yaml(chart_name: &str, values_override_yaml: &str) -> Result<String, ChartError> {
    let overrides = values_as_json(values_override_yaml)?;
    let mut wrapped = serde_json::Map::new();
    wrapped.insert(chart_name.to_string(), overrides);
    Ok(serde_yaml::to_string(&serde_json::Value::Object(wrapped))?)
}

/// Decode a YAML document into JSON. Blank input becomes `{}`.
pub fn values_as_json(values_yaml: &str) -> Result<serde_json::Value, ChartError> {
    if values_yaml.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    let value: serde_json::Value = serde_yaml::from_str(values_yaml)?;
    Ok(match value {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    })
}
