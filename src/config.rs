//! Agent configuration (`agent.toml`) and the derived on-disk layout.
//!
//! Every store and record location is resolved once into `AgentPaths` and
//! passed explicitly to whatever needs it. Nothing reads a fixed relative
//! path at its use site.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AssistantError, Result};
use crate::files;

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_poll_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AgentConfig {
    pub(crate) name: String,
    pub(crate) model: String,
    pub(crate) instructions_file: String,
    #[serde(default)]
    pub(crate) file_bundles: Vec<FileBundle>,
    /// Delay between run status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    /// Ceiling on total polling time for one run before giving up.
    #[serde(default = "default_max_poll_ms")]
    pub(crate) max_poll_ms: u64,
    /// When a run ends in an unrecognized status, also delete the remote
    /// identity and its uploads. Off by default; a failed run normally
    /// should not cost the provisioned assistant.
    #[serde(default)]
    pub(crate) delete_on_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileBundle {
    pub(crate) bundle_name: String,
    pub(crate) src_dir: String,
    pub(crate) src_globs: Vec<String>,
    pub(crate) dst_ext: String,
}

impl AgentConfig {
    pub(crate) fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join("agent.toml");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AssistantError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|e| AssistantError::Config(format!("invalid {}: {e}", path.display())))
    }
}

/// On-disk layout of one agent directory. Created up-front so constructors
/// can assume the directories exist.
#[derive(Debug, Clone)]
pub(crate) struct AgentPaths {
    pub(crate) root: PathBuf,
    /// Working data not meant for editing (`<root>/.agent/`).
    pub(crate) data_dir: PathBuf,
    /// Upload artifacts such as bundle files (`<root>/.agent/files/`).
    pub(crate) files_dir: PathBuf,
    /// Conversation record holding the persistent thread id.
    pub(crate) conv_file: PathBuf,
    pub(crate) memory_db: PathBuf,
    /// JSON export of the memory log, re-uploaded as context.
    pub(crate) memory_export: PathBuf,
}

impl AgentPaths {
    pub(crate) fn new(root: &Path) -> Result<Self> {
        let data_dir = root.join(".agent");
        let files_dir = data_dir.join("files");
        files::ensure_dir(&files_dir)?;
        Ok(Self {
            root: root.to_path_buf(),
            conv_file: data_dir.join("conv.json"),
            memory_db: data_dir.join("memory.db"),
            memory_export: files_dir.join("memory.json"),
            data_dir,
            files_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_toml() {
        let raw = r#"
name = "buranya"
model = "gpt-4-1106-preview"
instructions_file = "instructions.md"

[[file_bundles]]
bundle_name = "source-code"
src_dir = "src"
src_globs = ["*.rs"]
dst_ext = "txt"
"#;
        let cfg: AgentConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.name, "buranya");
        assert_eq!(cfg.file_bundles.len(), 1);
        assert_eq!(cfg.file_bundles[0].src_globs, vec!["*.rs"]);
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.max_poll_ms, 300_000);
        assert!(!cfg.delete_on_failure);
    }

    #[test]
    fn test_paths_layout() {
        let root = std::env::temp_dir().join(format!("buranya-paths-{}", std::process::id()));
        let paths = AgentPaths::new(&root).unwrap();
        assert!(paths.files_dir.exists());
        assert_eq!(paths.conv_file, root.join(".agent").join("conv.json"));
        let _ = std::fs::remove_dir_all(&root);
    }
}
