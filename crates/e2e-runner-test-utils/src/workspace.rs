//! Temporary working directories for orchestrator tests

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary working directory with the `_output` / `_logs` layout of a run.
///
/// The directory is removed when the workspace is dropped.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("_output")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.path().join("_logs")
    }

    /// Write `_output/<name>/apimodel.json` for a Kubernetes cluster
    pub fn write_apimodel(&self, name: &str) -> PathBuf {
        let dir = self.output_dir().join(name);
        std::fs::create_dir_all(&dir).expect("failed to create output dir");
        let path = dir.join("apimodel.json");
        let contents = serde_json::to_string_pretty(&sample_apimodel(name))
            .expect("failed to serialize apimodel");
        std::fs::write(&path, contents).expect("failed to write apimodel");
        path
    }

    /// Write a fake SSH key pair `_output/<name>-ssh{,.pub}`
    pub fn write_ssh_files(&self, name: &str) -> Vec<PathBuf> {
        std::fs::create_dir_all(self.output_dir()).expect("failed to create output dir");
        ["-ssh", "-ssh.pub"]
            .iter()
            .map(|suffix| {
                let path = self.output_dir().join(format!("{name}{suffix}"));
                std::fs::write(&path, "fake key").expect("failed to write ssh file");
                path
            })
            .collect()
    }

    /// Create a directory relative to the workspace root
    pub fn create_dir(&self, relative: impl AsRef<Path>) -> PathBuf {
        let path = self.path().join(relative);
        std::fs::create_dir_all(&path).expect("failed to create dir");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal Kubernetes API model with `dns_prefix` as the master DNS prefix
pub fn sample_apimodel(dns_prefix: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "vlabs",
        "properties": {
            "orchestratorProfile": {"orchestratorType": "Kubernetes"},
            "masterProfile": {"count": 1, "dnsPrefix": dns_prefix, "vmSize": "Standard_D2_v3"},
            "agentPoolProfiles": [{"name": "agentpool1", "count": 2, "vmSize": "Standard_D2_v3"}]
        }
    })
}
