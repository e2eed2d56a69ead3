//! Cluster engine configuration: output layout and the parsed API model

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::defaults::OUTPUT_DIR;

/// File the provisioner writes the resolved API model to
pub const APIMODEL_FILE: &str = "apimodel.json";

/// Paths describing where a cluster's engine files live
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub name: String,
    /// Input cluster definition the cluster was created from
    pub cluster_definition: PathBuf,
    /// `<cwd>/_output/<name>`
    pub output_dir: PathBuf,
    /// `<cwd>/_output/<name>/apimodel.json`
    pub cluster_definition_template: PathBuf,
}

impl EngineConfig {
    /// Kubeconfig generated for `location`
    pub fn kubeconfig_path(&self, location: &str) -> PathBuf {
        self.output_dir
            .join("kubeconfig")
            .join(format!("kubeconfig.{location}.json"))
    }
}

/// Build the engine config for cluster `name` rooted at `cwd`.
///
/// Fails if the cluster has no output directory.
pub fn parse_config(cwd: &Path, cluster_definition: &str, name: &str) -> Result<EngineConfig> {
    if name.is_empty() {
        bail!("Cluster name is empty");
    }
    let output_dir = cwd.join(OUTPUT_DIR).join(name);
    if !output_dir.is_dir() {
        bail!(
            "No output directory for cluster {name} at {}",
            output_dir.display()
        );
    }
    Ok(EngineConfig {
        name: name.to_string(),
        cluster_definition: cwd.join(cluster_definition),
        cluster_definition_template: output_dir.join(APIMODEL_FILE),
        output_dir,
    })
}

/// Read and parse an API model file
pub fn parse_input(path: &Path) -> Result<ClusterDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let definition: ClusterDefinition = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if definition.properties.orchestrator_profile.orchestrator_type.is_empty() {
        bail!("{} has no orchestratorType", path.display());
    }
    Ok(definition)
}

/// The subset of the API model the runner reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDefinition {
    #[serde(default)]
    pub api_version: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    pub orchestrator_profile: OrchestratorProfile,
    #[serde(default)]
    pub master_profile: Option<MasterProfile>,
    #[serde(default)]
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorProfile {
    #[serde(default)]
    pub orchestrator_type: String,
    #[serde(default)]
    pub orchestrator_release: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterProfile {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub dns_prefix: String,
    #[serde(default)]
    pub vm_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub vm_size: String,
}

impl ClusterDefinition {
    pub fn dns_prefix(&self) -> Option<&str> {
        self.properties
            .master_profile
            .as_ref()
            .map(|m| m.dns_prefix.as_str())
            .filter(|p| !p.is_empty())
    }
}

/// A cluster's engine config together with its parsed API model
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEngine {
    pub config: EngineConfig,
    pub definition: ClusterDefinition,
}

impl ClusterEngine {
    /// Load the engine of an existing cluster from its output directory
    pub fn load(cwd: &Path, cluster_definition: &str, name: &str) -> Result<Self> {
        let config = parse_config(cwd, cluster_definition, name)?;
        let definition = parse_input(&config.cluster_definition_template)?;
        Ok(Self { config, definition })
    }
}
