//! Conversation and identity management: provisioning the remote assistant,
//! syncing instructions and context files, and owning the persistent
//! conversation record.

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli;
use crate::config::{AgentConfig, AgentPaths};
use crate::error::{AssistantError, Result};
use crate::files;
use crate::memory_db::MemoryDb;
use crate::msg::ExtractedMessage;
use crate::openai::OpenAiClient;
use crate::registry::CapabilityRegistry;
use crate::run;
use crate::tool_defs;

/// Conversation record tying the agent directory to a remote thread.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Conv {
    pub(crate) thread_id: String,
}

pub(crate) struct Assistant {
    pub(crate) config: AgentConfig,
    pub(crate) paths: AgentPaths,
    pub(crate) client: OpenAiClient,
    pub(crate) registry: CapabilityRegistry,
    pub(crate) asst_id: String,
    pub(crate) memory: MemoryDb,
}

fn bundle_artifact_name(agent: &str, bundle: &str, asst_id: &str, ext: &str) -> String {
    format!("{agent}-{bundle}-{asst_id}.{ext}")
}

/// Bundle artifacts are keyed by assistant id; one named for a different id
/// is left over from a previous provisioning round.
fn is_stale_artifact(file_name: &str, agent: &str, asst_id: &str) -> bool {
    file_name.starts_with(&format!("{agent}-")) && !file_name.contains(asst_id)
}

impl Assistant {
    /// Load the agent directory, provision (or re-provision) the remote
    /// identity, and sync instructions, memory export, and context files.
    pub(crate) fn init_from_dir(dir: &Path, recreate: bool) -> Result<Self> {
        let config = AgentConfig::from_dir(dir)?;
        let paths = AgentPaths::new(dir)?;
        let client = OpenAiClient::from_env()?;
        let registry = CapabilityRegistry::builtin();
        let memory = MemoryDb::open_or_create(&paths.memory_db)?;

        let asst_id = load_or_create_assistant(&client, &config, &paths, recreate)?;
        eprintln!("[agent] using assistant {} ({})", config.name, asst_id);

        let asst = Self {
            config,
            paths,
            client,
            registry,
            asst_id,
            memory,
        };

        // previous-memory context file; losing it costs recall, not the turn
        if let Err(e) = asst.upload_memory_export() {
            eprintln!("{}", cli::yellow_text(&format!("memory export skipped: {e}")));
        }
        asst.upload_instructions()?;
        asst.upload_files(recreate)?;
        Ok(asst)
    }

    fn upload_memory_export(&self) -> Result<()> {
        self.memory.export_json(&self.paths.memory_export)?;
        self.upload_file_by_name(&self.paths.memory_export, true)?;
        Ok(())
    }

    /// Push the instructions file to the remote identity. A freshly created
    /// assistant can 404 briefly, so NotFound is retried.
    pub(crate) fn upload_instructions(&self) -> Result<()> {
        let path = self.paths.root.join(&self.config.instructions_file);
        if !path.exists() {
            eprintln!(
                "{}",
                cli::yellow_text(&format!("no instructions file at {}", path.display()))
            );
            return Ok(());
        }
        let instructions = std::fs::read_to_string(&path)?;
        let mut wait = Duration::from_millis(200);
        for attempt in 0..5 {
            match self.client.update_instructions(&self.asst_id, &instructions) {
                Ok(()) => {
                    eprintln!("[agent] instructions uploaded");
                    return Ok(());
                }
                Err(AssistantError::NotFound(_)) if attempt < 4 => {
                    thread::sleep(wait);
                    wait *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        Err(AssistantError::NotFound(format!("assistant {}", self.asst_id)))
    }

    /// Sync context files to the assistant. `force` re-uploads files that
    /// are already attached.
    pub(crate) fn upload_files(&self, force: bool) -> Result<()> {
        self.remove_stale_artifacts()?;
        for bundle in &self.config.file_bundles {
            let src_dir = self.paths.root.join(&bundle.src_dir);
            let matched = files::list_files(&src_dir, &bundle.src_globs, &[]);
            if bundle.bundle_name == "source-code" {
                let artifact = self.paths.files_dir.join(bundle_artifact_name(
                    &self.config.name,
                    &bundle.bundle_name,
                    &self.asst_id,
                    &bundle.dst_ext,
                ));
                files::bundle_to_file(&matched, &artifact)?;
                // the bundle content drifts with every edit, always re-push
                self.upload_file_by_name(&artifact, true)?;
            } else {
                for path in matched {
                    if path.file_name().is_some_and(|n| n == "conv.json") {
                        continue;
                    }
                    self.upload_file_by_name(&path, force)?;
                }
            }
        }
        Ok(())
    }

    fn remove_stale_artifacts(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.paths.files_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if is_stale_artifact(&name, &self.config.name, &self.asst_id) {
                eprintln!("[agent] removing stale artifact {name}");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Upload one file and attach it, deduplicating on file name. Returns
    /// the remote file id (if any) and whether an upload happened. Upload
    /// failures are warnings; the next sync pass retries them.
    pub(crate) fn upload_file_by_name(
        &self,
        path: &Path,
        force: bool,
    ) -> Result<(Option<String>, bool)> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let attached = self.client.assistant_file_map(&self.asst_id)?;
        if let Some(existing) = attached.get(&file_name) {
            if !force {
                eprintln!(
                    "{}",
                    cli::yellow_text(&format!("{file_name} already uploaded, skipping"))
                );
                return Ok((Some(existing.clone()), false));
            }
            self.client.detach_file(&self.asst_id, existing)?;
            if let Err(e) = self.client.delete_file(existing) {
                eprintln!(
                    "{}",
                    cli::yellow_text(&format!("could not delete stale {file_name}: {e}"))
                );
            }
        }
        match self.client.upload_file(path) {
            Ok(file) => {
                self.client.attach_file(&self.asst_id, &file.id)?;
                eprintln!("[agent] uploaded {file_name} as {}", file.id);
                Ok((Some(file.id), true))
            }
            Err(e) => {
                eprintln!(
                    "{}",
                    cli::red_text(&format!("upload of {file_name} failed: {e}"))
                );
                Ok((None, false))
            }
        }
    }

    /// Load the conversation record, creating a fresh thread when the record
    /// is missing, unreadable, or points at a thread the service no longer
    /// recognizes.
    pub(crate) fn load_or_create_conv(&self, recreate: bool) -> Result<Conv> {
        if !recreate {
            if let Ok(conv) = files::load_json::<Conv>(&self.paths.conv_file) {
                match self.client.get_thread(&conv.thread_id) {
                    Ok(_) => return Ok(conv),
                    Err(AssistantError::NotFound(_)) => {
                        eprintln!(
                            "{}",
                            cli::yellow_text(&format!(
                                "thread {} is gone, starting a new conversation",
                                conv.thread_id
                            ))
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        let thread_id = self.client.create_thread()?;
        let conv = Conv { thread_id };
        files::save_json(&self.paths.conv_file, &conv)?;
        eprintln!("[agent] new conversation on thread {}", conv.thread_id);
        Ok(conv)
    }

    /// One conversational turn against the persistent thread.
    pub(crate) fn chat(&self, conv: &Conv, message: &str) -> Result<ExtractedMessage> {
        let result = run::run_thread_message(
            &self.client,
            &self.registry,
            &self.memory,
            &self.config,
            &self.asst_id,
            &conv.thread_id,
            message,
        );
        if let Err(AssistantError::UnexpectedRunStatus(_)) = &result {
            if self.config.delete_on_failure {
                eprintln!(
                    "{}",
                    cli::red_text("run failed and delete_on_failure is set, removing assistant")
                );
                self.delete_remote(false)?;
            }
        }
        result
    }

    /// Tear down the remote identity and its uploads. `wipe` also removes
    /// the local memory database.
    pub(crate) fn delete_remote(&self, wipe: bool) -> Result<()> {
        delete_assistant_remote(&self.client, &self.asst_id)?;
        for entry in std::fs::read_dir(&self.paths.files_dir)? {
            let entry = entry?;
            std::fs::remove_file(entry.path())?;
        }
        if wipe {
            MemoryDb::wipe(&self.paths.memory_db)?;
        }
        Ok(())
    }
}

fn delete_assistant_remote(client: &OpenAiClient, asst_id: &str) -> Result<()> {
    match client.list_assistant_files(asst_id) {
        Ok(attached) => {
            for file in attached {
                let _ = client.detach_file(asst_id, &file.id);
                if let Err(e) = client.delete_file(&file.id) {
                    eprintln!("[agent] could not delete remote file {}: {e}", file.id);
                }
            }
        }
        Err(e) => eprintln!("[agent] could not list files for cleanup: {e}"),
    }
    client.delete_assistant(asst_id)?;
    eprintln!("[agent] deleted assistant {asst_id}");
    Ok(())
}

/// Find the assistant by configured name, or create it with the declared
/// tool set. `recreate` tears an existing one down first.
fn load_or_create_assistant(
    client: &OpenAiClient,
    config: &AgentConfig,
    paths: &AgentPaths,
    recreate: bool,
) -> Result<String> {
    let existing = client
        .list_assistants()?
        .into_iter()
        .find(|a| a.name.as_deref() == Some(config.name.as_str()));

    if let Some(found) = existing {
        if recreate {
            eprintln!("[agent] recreating assistant {}", config.name);
            delete_assistant_remote(client, &found.id)?;
            for entry in std::fs::read_dir(&paths.files_dir)? {
                std::fs::remove_file(entry?.path())?;
            }
        } else {
            return Ok(found.id);
        }
    }

    let tools = tool_defs::tool_definitions_json();
    let created = client.create_assistant(&config.name, &config.model, &tools)?;
    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsrv;

    fn stub_assistant(srv: &testsrv::StubService, root: &Path) -> Assistant {
        let paths = AgentPaths::new(root).unwrap();
        let config: AgentConfig = toml::from_str(
            "name = \"t\"\nmodel = \"m\"\ninstructions_file = \"i.md\"\n",
        )
        .unwrap();
        let memory = MemoryDb::open_or_create(&paths.memory_db).unwrap();
        Assistant {
            config,
            client: OpenAiClient::new("test-key", &srv.base_url, 5).unwrap(),
            registry: CapabilityRegistry::builtin(),
            asst_id: "asst_t".into(),
            memory,
            paths,
        }
    }

    #[test]
    fn test_conv_created_once_then_reloaded() {
        let srv = testsrv::start(Box::new(|method, path, seq| match (method, path) {
            ("POST", "/threads") => {
                let id = if seq == 0 { "thread_new1" } else { "thread_new2" };
                (200, format!(r#"{{"id":"{id}"}}"#))
            }
            ("GET", "/threads/thread_new1") => (200, r#"{"id":"thread_new1"}"#.into()),
            _ => (500, format!(r#"{{"error":"unexpected {method} {path}"}}"#)),
        }));
        let root = std::env::temp_dir().join(format!("buranya-conv-reload-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let asst = stub_assistant(&srv, &root);

        // fresh state: creates a thread and persists it
        let first = asst.load_or_create_conv(false).unwrap();
        assert_eq!(first.thread_id, "thread_new1");
        let on_disk: Conv = files::load_json(&asst.paths.conv_file).unwrap();
        assert_eq!(on_disk.thread_id, "thread_new1");

        // second call reuses the persisted thread, no new create
        let second = asst.load_or_create_conv(false).unwrap();
        assert_eq!(second.thread_id, "thread_new1");
        assert_eq!(srv.count("POST /threads"), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_conv_record_round_trip() {
        let dir = std::env::temp_dir().join(format!("buranya-conv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("conv.json");
        files::save_json(&path, &Conv { thread_id: "thread_x1".into() }).unwrap();
        let got: Conv = files::load_json(&path).unwrap();
        assert_eq!(got.thread_id, "thread_x1");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bundle_artifact_naming() {
        let name = bundle_artifact_name("buranya", "source-code", "asst_42", "txt");
        assert_eq!(name, "buranya-source-code-asst_42.txt");
    }

    #[test]
    fn test_stale_artifact_detection() {
        assert!(is_stale_artifact("buranya-source-code-asst_old.txt", "buranya", "asst_new"));
        assert!(!is_stale_artifact("buranya-source-code-asst_new.txt", "buranya", "asst_new"));
        // unrelated uploads are never treated as stale
        assert!(!is_stale_artifact("memory.json", "buranya", "asst_new"));
    }
}
