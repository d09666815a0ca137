//! Blocking client for the remote assistants service.
//!
//! JSON endpoints go through `ureq` with a shared retry loop; file upload is
//! the one multipart surface and uses the blocking `reqwest` client. All
//! calls carry the assistants beta header.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AssistantError, Result};
use crate::util;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const BETA_HEADER: &str = "assistants=v1";

const MAX_RETRIES: u32 = 5;
const BACKOFF_BASE_SECS: f64 = 0.5;
const BACKOFF_MAX_SECS: f64 = 4.0;
const BACKOFF_JITTER: f64 = 0.2;

fn is_retryable(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504 | 529)
}

pub(crate) struct OpenAiClient {
    agent: ureq::Agent,
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssistantObject {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Run {
    pub(crate) id: String,
    pub(crate) status: String,
    pub(crate) required_action: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileObject {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) filename: String,
}

impl OpenAiClient {
    pub(crate) fn new(api_key: &str, base_url: &str, timeout_secs: u64) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .build();
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(120)))
            .build()
            .map_err(|e| AssistantError::Api(format!("http client: {e}")))?;
        Ok(Self {
            agent,
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn from_env() -> Result<Self> {
        let api_key = util::env_required("OPENAI_API_KEY")?;
        let base_url = util::env_optional("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(&api_key, &base_url, util::env_u64("OPENAI_TIMEOUT", 60))
    }

    /// One JSON request with retry on transient failures. `body` of `None`
    /// sends no payload (GET/DELETE).
    fn call(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = BACKOFF_BASE_SECS;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = self
                .agent
                .request(method, &url)
                .set("authorization", &format!("Bearer {}", self.api_key))
                .set("openai-beta", BETA_HEADER)
                .set("content-type", "application/json");
            let result = match body {
                Some(b) => req.send_json(b.clone()),
                None => req.call(),
            };
            match result {
                Ok(resp) => {
                    let text = resp
                        .into_string()
                        .map_err(|e| AssistantError::Api(format!("reading response: {e}")))?;
                    if text.is_empty() {
                        return Ok(Value::Null);
                    }
                    return Ok(serde_json::from_str(&text)?);
                }
                Err(ureq::Error::Status(404, _)) => {
                    return Err(AssistantError::NotFound(format!("{method} {path}")));
                }
                Err(ureq::Error::Status(code, resp)) if is_retryable(code) && attempt <= MAX_RETRIES => {
                    let wait = util::parse_retry_after(&resp).unwrap_or(backoff);
                    let jittered = wait * (1.0 + BACKOFF_JITTER * util::jitter_ratio());
                    eprintln!(
                        "[openai] {method} {path} returned {code}, retry {attempt}/{MAX_RETRIES} in {jittered:.1}s"
                    );
                    thread::sleep(Duration::from_secs_f64(jittered.max(0.05)));
                    backoff = (backoff * 2.0).min(BACKOFF_MAX_SECS);
                }
                Err(ureq::Error::Status(code, resp)) => {
                    let body = resp.into_string().unwrap_or_default();
                    return Err(AssistantError::Api(format!("{method} {path} -> {code}: {body}")));
                }
                Err(ureq::Error::Transport(t)) if attempt <= MAX_RETRIES => {
                    let jittered = backoff * (1.0 + BACKOFF_JITTER * util::jitter_ratio());
                    eprintln!(
                        "[openai] {method} {path} transport error ({t}), retry {attempt}/{MAX_RETRIES} in {jittered:.1}s"
                    );
                    thread::sleep(Duration::from_secs_f64(jittered.max(0.05)));
                    backoff = (backoff * 2.0).min(BACKOFF_MAX_SECS);
                }
                Err(e) => return Err(AssistantError::Api(format!("{method} {path}: {e}"))),
            }
        }
    }

    // ---- assistants ----

    pub(crate) fn create_assistant(
        &self,
        name: &str,
        model: &str,
        tools: &[Value],
    ) -> Result<AssistantObject> {
        let body = json!({ "name": name, "model": model, "tools": tools });
        let v = self.call("POST", "/assistants", Some(&body))?;
        Ok(serde_json::from_value(v)?)
    }

    pub(crate) fn list_assistants(&self) -> Result<Vec<AssistantObject>> {
        let v = self.call("GET", "/assistants?limit=100", None)?;
        let data = v.get("data").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(data)?)
    }

    pub(crate) fn update_instructions(&self, asst_id: &str, instructions: &str) -> Result<()> {
        let body = json!({ "instructions": instructions });
        self.call("POST", &format!("/assistants/{asst_id}"), Some(&body))?;
        Ok(())
    }

    pub(crate) fn delete_assistant(&self, asst_id: &str) -> Result<()> {
        self.call("DELETE", &format!("/assistants/{asst_id}"), None)?;
        Ok(())
    }

    // ---- threads and messages ----

    pub(crate) fn create_thread(&self) -> Result<String> {
        let v = self.call("POST", "/threads", Some(&json!({})))?;
        v.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AssistantError::Api("thread create returned no id".into()))
    }

    pub(crate) fn get_thread(&self, thread_id: &str) -> Result<Value> {
        self.call("GET", &format!("/threads/{thread_id}"), None)
    }

    pub(crate) fn create_message(&self, thread_id: &str, role: &str, content: &str) -> Result<()> {
        let body = json!({ "role": role, "content": content });
        self.call("POST", &format!("/threads/{thread_id}/messages"), Some(&body))?;
        Ok(())
    }

    /// Most recent message on the thread.
    pub(crate) fn latest_message(&self, thread_id: &str) -> Result<Value> {
        let v = self.call(
            "GET",
            &format!("/threads/{thread_id}/messages?order=desc&limit=1"),
            None,
        )?;
        v.get("data")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .cloned()
            .ok_or_else(|| AssistantError::NotFound(format!("messages on thread {thread_id}")))
    }

    // ---- runs ----

    pub(crate) fn create_run(
        &self,
        thread_id: &str,
        asst_id: &str,
        additional_instructions: &str,
    ) -> Result<Run> {
        let body = json!({
            "assistant_id": asst_id,
            "additional_instructions": additional_instructions,
        });
        let v = self.call("POST", &format!("/threads/{thread_id}/runs"), Some(&body))?;
        Ok(serde_json::from_value(v)?)
    }

    pub(crate) fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let v = self.call("GET", &format!("/threads/{thread_id}/runs/{run_id}"), None)?;
        Ok(serde_json::from_value(v)?)
    }

    pub(crate) fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &Value,
    ) -> Result<()> {
        let body = json!({ "tool_outputs": outputs });
        self.call(
            "POST",
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            Some(&body),
        )?;
        Ok(())
    }

    // ---- files ----

    pub(crate) fn upload_file(&self, path: &Path) -> Result<FileObject> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("purpose", "assistants")
            .file("file", path)
            .map_err(|e| AssistantError::Api(format!("multipart for {}: {e}", path.display())))?;
        let resp = self
            .http
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .header("openai-beta", BETA_HEADER)
            .multipart(form)
            .send()
            .map_err(|e| AssistantError::Api(format!("upload {}: {e}", path.display())))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .map_err(|e| AssistantError::Api(format!("upload response: {e}")))?;
        if !status.is_success() {
            return Err(AssistantError::Api(format!("upload -> {status}: {body}")));
        }
        Ok(serde_json::from_value(body)?)
    }

    pub(crate) fn delete_file(&self, file_id: &str) -> Result<()> {
        self.call("DELETE", &format!("/files/{file_id}"), None)?;
        Ok(())
    }

    pub(crate) fn retrieve_file(&self, file_id: &str) -> Result<FileObject> {
        let v = self.call("GET", &format!("/files/{file_id}"), None)?;
        Ok(serde_json::from_value(v)?)
    }

    pub(crate) fn file_content(&self, file_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .agent
            .get(&format!("{}/files/{file_id}/content", self.base_url))
            .set("authorization", &format!("Bearer {}", self.api_key))
            .set("openai-beta", BETA_HEADER)
            .call()
            .map_err(|e| AssistantError::Api(format!("file content {file_id}: {e}")))?;
        let mut buf = Vec::new();
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(AssistantError::Io)?;
        Ok(buf)
    }

    // ---- assistant file attachments ----

    pub(crate) fn attach_file(&self, asst_id: &str, file_id: &str) -> Result<()> {
        let body = json!({ "file_id": file_id });
        self.call("POST", &format!("/assistants/{asst_id}/files"), Some(&body))?;
        Ok(())
    }

    pub(crate) fn detach_file(&self, asst_id: &str, file_id: &str) -> Result<()> {
        self.call("DELETE", &format!("/assistants/{asst_id}/files/{file_id}"), None)?;
        Ok(())
    }

    pub(crate) fn list_assistant_files(&self, asst_id: &str) -> Result<Vec<FileObject>> {
        let v = self.call("GET", &format!("/assistants/{asst_id}/files?limit=100"), None)?;
        let data = v.get("data").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(data)?)
    }

    /// filename -> file id for everything attached to the assistant.
    /// Attachment records do not carry filenames, so each one is resolved
    /// through the file endpoint.
    pub(crate) fn assistant_file_map(&self, asst_id: &str) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for attached in self.list_assistant_files(asst_id)? {
            let file = self.retrieve_file(&attached.id)?;
            map.insert(file.filename, file.id);
        }
        Ok(map)
    }
}
