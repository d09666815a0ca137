//! Run lifecycle: create, poll, dispatch tool batches, and extract the final
//! reply. The status vocabulary tolerates every spelling the remote service
//! has used over time.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::error::{AssistantError, Result};
use crate::memory_db::{MemoryDb, Role};
use crate::msg::{self, ExtractedMessage};
use crate::openai::OpenAiClient;
use crate::registry::CapabilityRegistry;
use crate::tool_exec::{self, ToolContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunState {
    Polling,
    Completed,
    RequiresAction,
    Failed(String),
}

/// Map a raw status string to a state. Case-insensitive; unknown statuses
/// are failures carrying the original spelling.
pub(crate) fn classify_status(status: &str) -> RunState {
    match status.to_lowercase().as_str() {
        "queued" | "in_progress" | "run_in_progress" | "inprogress" | "pending" => {
            RunState::Polling
        }
        "requires_action" | "requires_input" | "requiresaction" | "requiresinput" => {
            RunState::RequiresAction
        }
        "completed" => RunState::Completed,
        other => RunState::Failed(other.to_string()),
    }
}

/// Scan an error body for an embedded run id (`run_` followed by
/// alphanumerics). Used to recover the active run when a create collides
/// with one already in flight.
pub(crate) fn extract_run_id(text: &str) -> Option<String> {
    let mut search = text;
    while let Some(at) = search.find("run_") {
        let tail = &search[at + 4..];
        let len = tail
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_alphanumeric())
            .count();
        if len > 0 {
            return Some(format!("run_{}", &tail[..len]));
        }
        search = tail;
    }
    None
}

/// Standing guidance attached to every run, steering the model toward the
/// declared capabilities.
pub(crate) const ADDITIONAL_INSTRUCTIONS: &str = "\
When the user mentions a URL, use the web_* tools to read the page instead of guessing. \
For factual or computational questions, use web_query with a keyword-style query. \
Always call draft_calendar_event and show the draft before save_calendar_event, \
and always call draft_email and show the draft before send_email. \
When the user names a person as a recipient, resolve the address with get_contacts. \
When the user refers to an uploaded file by name, resolve it with find_file.";

/// Drive one conversational turn: post the message, run the thread, answer
/// tool calls until the run settles, and return the extracted reply. Both
/// sides of the exchange are appended to the memory log.
///
/// If the remote side rejects the turn because a run is already active, the
/// embedded run id is recovered and that run becomes this turn's run; the
/// message is not re-posted.
pub(crate) fn run_thread_message(
    client: &OpenAiClient,
    registry: &CapabilityRegistry,
    memory: &MemoryDb,
    config: &AgentConfig,
    asst_id: &str,
    thread_id: &str,
    message: &str,
) -> Result<ExtractedMessage> {
    let run_id = match start_run(client, asst_id, thread_id, message) {
        Ok(id) => id,
        Err(AssistantError::Api(body)) => match extract_run_id(&body) {
            Some(id) => {
                eprintln!("[run] thread already has active run {id}, resuming it");
                id
            }
            None => return Err(AssistantError::Api(body)),
        },
        Err(e) => return Err(e),
    };
    memory.append(Role::User, message)?;

    poll_to_completion(client, registry, config, asst_id, thread_id, &run_id)?;

    let raw = client.latest_message(thread_id)?;
    let extracted = msg::extract_text(client, &raw)?;
    memory.append(Role::Assistant, &extracted.text)?;
    Ok(extracted)
}

fn start_run(
    client: &OpenAiClient,
    asst_id: &str,
    thread_id: &str,
    message: &str,
) -> Result<String> {
    client.create_message(thread_id, "user", message)?;
    let run = client.create_run(thread_id, asst_id, ADDITIONAL_INSTRUCTIONS)?;
    Ok(run.id)
}

fn poll_to_completion(
    client: &OpenAiClient,
    registry: &CapabilityRegistry,
    config: &AgentConfig,
    asst_id: &str,
    thread_id: &str,
    run_id: &str,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(config.max_poll_ms);
    loop {
        let run = client.get_run(thread_id, run_id)?;
        match classify_status(&run.status) {
            RunState::Completed => return Ok(()),
            RunState::RequiresAction => {
                let required = run.required_action.ok_or_else(|| {
                    AssistantError::Decode("run requires action but carries none".into())
                })?;
                let ctx = ToolContext { client, asst_id };
                tool_exec::dispatch_required_action(
                    client, thread_id, run_id, registry, &ctx, &required,
                )?;
            }
            RunState::Polling => {
                if Instant::now() >= deadline {
                    return Err(AssistantError::PollTimeout(config.max_poll_ms));
                }
                thread::sleep(Duration::from_millis(config.poll_interval_ms));
            }
            RunState::Failed(status) => {
                return Err(AssistantError::UnexpectedRunStatus(status));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityRegistry;
    use crate::testsrv;

    fn harness(
        name: &str,
        respond: testsrv::Responder,
    ) -> (testsrv::StubService, OpenAiClient, MemoryDb, AgentConfig) {
        let srv = testsrv::start(respond);
        let client = OpenAiClient::new("test-key", &srv.base_url, 5).unwrap();
        let db_path = std::env::temp_dir().join(format!(
            "buranya-run-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&db_path);
        let memory = MemoryDb::open_or_create(&db_path).unwrap();
        let config: AgentConfig = toml::from_str(
            "name = \"t\"\nmodel = \"m\"\ninstructions_file = \"i.md\"\n\
             poll_interval_ms = 1\nmax_poll_ms = 2000\n",
        )
        .unwrap();
        (srv, client, memory, config)
    }

    fn reply_body(text: &str) -> String {
        format!(
            r#"{{"data":[{{"content":[{{"type":"text","text":{{"value":"{text}","annotations":[]}}}}]}}]}}"#
        )
    }

    #[test]
    fn test_three_polls_append_one_assistant_record() {
        let (srv, client, memory, config) = harness(
            "three-polls",
            Box::new(|method, path, seq| match (method, path) {
                ("POST", "/threads/t1/messages") => (200, r#"{"id":"msg_1"}"#.into()),
                ("POST", "/threads/t1/runs") => (200, r#"{"id":"run_1","status":"queued"}"#.into()),
                ("GET", "/threads/t1/runs/run_1") => {
                    let status = match seq {
                        0 => "queued",
                        1 => "in_progress",
                        _ => "completed",
                    };
                    (200, format!(r#"{{"id":"run_1","status":"{status}"}}"#))
                }
                ("GET", "/threads/t1/messages?order=desc&limit=1") => (200, reply_body("the reply")),
                _ => (500, format!(r#"{{"error":"unexpected {method} {path}"}}"#)),
            }),
        );
        let registry = CapabilityRegistry::builtin();

        let got =
            run_thread_message(&client, &registry, &memory, &config, "asst_t", "t1", "hi").unwrap();
        assert_eq!(got.text, "the reply");

        assert_eq!(srv.count("GET /threads/t1/runs/run_1"), 3);
        let turns = memory.turns().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].0.as_str(), turns[0].2.as_str()), ("user", "hi"));
        assert_eq!(
            (turns[1].0.as_str(), turns[1].2.as_str()),
            ("assistant", "the reply")
        );
    }

    #[test]
    fn test_requires_action_dispatches_once_then_polls_on() {
        let (srv, client, memory, config) = harness(
            "requires-action",
            Box::new(|method, path, seq| match (method, path) {
                ("POST", "/threads/t2/messages") => (200, r#"{"id":"msg_1"}"#.into()),
                ("POST", "/threads/t2/runs") => (200, r#"{"id":"run_2","status":"queued"}"#.into()),
                ("GET", "/threads/t2/runs/run_2") => match seq {
                    0 => (
                        200,
                        r#"{"id":"run_2","status":"requires_action","required_action":
                            {"submit_tool_outputs":{"tool_calls":[
                                {"id":"call_1","function":{"name":"get_date","arguments":"{}"}}
                            ]}}}"#
                            .into(),
                    ),
                    1 => (200, r#"{"id":"run_2","status":"in_progress"}"#.into()),
                    _ => (200, r#"{"id":"run_2","status":"completed"}"#.into()),
                },
                ("POST", "/threads/t2/runs/run_2/submit_tool_outputs") => (200, "{}".into()),
                ("GET", "/threads/t2/messages?order=desc&limit=1") => (200, reply_body("done")),
                _ => (500, format!(r#"{{"error":"unexpected {method} {path}"}}"#)),
            }),
        );
        let registry = CapabilityRegistry::builtin();

        let got =
            run_thread_message(&client, &registry, &memory, &config, "asst_t", "t2", "date?")
                .unwrap();
        assert_eq!(got.text, "done");
        assert_eq!(srv.count("POST /threads/t2/runs/run_2/submit_tool_outputs"), 1);
        assert_eq!(srv.count("GET /threads/t2/runs/run_2"), 3);
    }

    #[test]
    fn test_create_conflict_resumes_embedded_run() {
        let (srv, client, memory, config) = harness(
            "conflict",
            Box::new(|method, path, _seq| match (method, path) {
                ("POST", "/threads/t3/messages") => (
                    400,
                    r#"{"error":{"message":"Thread t3 already has an active run run_live9."}}"#
                        .into(),
                ),
                ("GET", "/threads/t3/runs/run_live9") => {
                    (200, r#"{"id":"run_live9","status":"completed"}"#.into())
                }
                ("GET", "/threads/t3/messages?order=desc&limit=1") => {
                    (200, reply_body("resumed answer"))
                }
                _ => (500, format!(r#"{{"error":"unexpected {method} {path}"}}"#)),
            }),
        );
        let registry = CapabilityRegistry::builtin();

        let got =
            run_thread_message(&client, &registry, &memory, &config, "asst_t", "t3", "again")
                .unwrap();
        assert_eq!(got.text, "resumed answer");

        // the recovered run is the turn's run: no new run, no message retry
        assert_eq!(srv.count("POST /threads/t3/runs"), 0);
        assert_eq!(srv.count("POST /threads/t3/messages"), 1);
        let turns = memory.turns().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].2, "resumed answer");
    }

    #[test]
    fn test_classify_status_table() {
        for s in ["queued", "in_progress", "run_in_progress", "inprogress", "pending", "QUEUED"] {
            assert_eq!(classify_status(s), RunState::Polling, "{s}");
        }
        for s in ["requires_action", "requires_input", "requiresaction", "RequiresInput"] {
            assert_eq!(classify_status(s), RunState::RequiresAction, "{s}");
        }
        assert_eq!(classify_status("completed"), RunState::Completed);
        assert_eq!(classify_status("Completed"), RunState::Completed);
        assert_eq!(
            classify_status("cancelled"),
            RunState::Failed("cancelled".into())
        );
        assert_eq!(classify_status(""), RunState::Failed(String::new()));
    }

    #[test]
    fn test_extract_run_id_from_error_body() {
        let body = r#"{"error": {"message": "Thread already has an active run run_Abc123XYZ."}}"#;
        assert_eq!(extract_run_id(body), Some("run_Abc123XYZ".into()));
        assert_eq!(extract_run_id("no id here"), None);
        assert_eq!(extract_run_id("run_ (empty)"), None);
        assert_eq!(
            extract_run_id("first run_one then run_two"),
            Some("run_one".into())
        );
    }
}
