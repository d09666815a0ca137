//! Tool dispatcher and the capability implementations behind it.
//!
//! Handlers return `Result<ToolOutput, String>`: a failed capability is a
//! reportable outcome, not a crash, and its error text is submitted back to
//! the run so the model can react. An unknown capability is different: the
//! whole batch aborts with a typed error before anything executes.

use base64::Engine;
use serde_json::{json, Map, Value};

use crate::cli;
use crate::error::Result;
use crate::msg;
use crate::openai::OpenAiClient;
use crate::registry::{CapabilityRegistry, ToolOutput};
use crate::tool_args::filter_args;
use crate::util;

/// Shared state a handler may need. Only the file-aware capabilities touch
/// the remote client.
pub(crate) struct ToolContext<'a> {
    pub(crate) client: &'a OpenAiClient,
    pub(crate) asst_id: &'a str,
}

#[derive(Debug, PartialEq)]
pub(crate) struct ToolOutputEntry {
    pub(crate) tool_call_id: String,
    pub(crate) output: String,
}

#[derive(Debug)]
pub(crate) struct RawToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) args: Map<String, Value>,
}

/// Pull the tool calls out of a run's `required_action` payload. The
/// `arguments` field arrives as a JSON string but an already-parsed object
/// is tolerated too.
pub(crate) fn parse_tool_calls(required_action: &Value) -> Result<Vec<RawToolCall>> {
    let calls = required_action
        .pointer("/submit_tool_outputs/tool_calls")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            crate::error::AssistantError::Decode("required_action has no tool_calls".into())
        })?;
    let mut out = Vec::new();
    for call in calls {
        let id = call
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let function = call.get("function").cloned().unwrap_or_default();
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = match function.get("arguments") {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        out.push(RawToolCall { id, name, args });
    }
    Ok(out)
}

/// Resolve every requested action into an output entry. Capabilities are
/// looked up for the whole batch before any handler runs, so an unknown
/// name aborts with nothing executed and nothing submitted.
pub(crate) fn resolve_required_action(
    registry: &CapabilityRegistry,
    ctx: &ToolContext<'_>,
    required_action: &Value,
) -> Result<Vec<ToolOutputEntry>> {
    let calls = parse_tool_calls(required_action)?;
    let mut resolved = Vec::with_capacity(calls.len());
    for call in &calls {
        resolved.push(registry.lookup(&call.name)?);
    }

    let mut outputs = Vec::with_capacity(calls.len());
    for (call, entry) in calls.iter().zip(resolved) {
        let filtered = filter_args(entry.schema, &call.args);
        if !filtered.missing.is_empty() {
            eprintln!(
                "{}",
                cli::yellow_text(&format!(
                    "{} called without required argument(s): {}",
                    call.name,
                    filtered.missing.join(", ")
                ))
            );
        }
        let output = match (entry.handler)(ctx, &filtered.args) {
            Ok(ToolOutput::Text(t)) => t,
            Ok(ToolOutput::Bytes(b)) => msg::encode_bytes(&b),
            Err(e) => format!("error: {e}"),
        };
        outputs.push(ToolOutputEntry {
            tool_call_id: call.id.clone(),
            output,
        });
    }
    Ok(outputs)
}

/// Resolve and submit one batch of tool outputs for a waiting run.
pub(crate) fn dispatch_required_action(
    client: &OpenAiClient,
    thread_id: &str,
    run_id: &str,
    registry: &CapabilityRegistry,
    ctx: &ToolContext<'_>,
    required_action: &Value,
) -> Result<()> {
    let outputs = resolve_required_action(registry, ctx, required_action)?;
    let payload: Vec<Value> = outputs
        .iter()
        .map(|o| json!({ "tool_call_id": o.tool_call_id, "output": o.output }))
        .collect();
    client.submit_tool_outputs(thread_id, run_id, &json!(payload))
}

// ---- argument helpers ----

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn arg_or<'a>(args: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    arg_str(args, key).unwrap_or(default)
}

// ---- outbound HTTP helpers ----

fn fetch_json(url: &str) -> std::result::Result<Value, String> {
    ureq::get(url)
        .set("user-agent", "buranya-assistant")
        .call()
        .map_err(|e| format!("request to {url} failed: {e}"))?
        .into_json()
        .map_err(|e| format!("bad json from {url}: {e}"))
}

fn fetch_text(url: &str) -> std::result::Result<String, String> {
    ureq::get(url)
        .set("user-agent", "buranya-assistant")
        .call()
        .map_err(|e| format!("request to {url} failed: {e}"))?
        .into_string()
        .map_err(|e| format!("unreadable body from {url}: {e}"))
}

fn graph_token() -> std::result::Result<String, String> {
    util::env_optional("MS_GRAPH_TOKEN").ok_or_else(|| "MS_GRAPH_TOKEN is not set".to_string())
}

fn graph_get(path: &str) -> std::result::Result<Value, String> {
    let token = graph_token()?;
    ureq::get(&format!("https://graph.microsoft.com/v1.0{path}"))
        .set("authorization", &format!("Bearer {token}"))
        .call()
        .map_err(|e| format!("graph request failed: {e}"))?
        .into_json()
        .map_err(|e| format!("bad json from graph: {e}"))
}

fn graph_post(path: &str, body: Value) -> std::result::Result<Value, String> {
    let token = graph_token()?;
    let resp = ureq::post(&format!("https://graph.microsoft.com/v1.0{path}"))
        .set("authorization", &format!("Bearer {token}"))
        .send_json(body)
        .map_err(|e| format!("graph request failed: {e}"))?;
    let text = resp.into_string().unwrap_or_default();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| format!("bad json from graph: {e}"))
}

// ---- capabilities ----

pub(crate) fn get_weather(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let api_key = util::env_optional("OPENWEATHER_API_KEY")
        .ok_or_else(|| "OPENWEATHER_API_KEY is not set".to_string())?;

    let (lat, lon, place) = match arg_str(args, "location") {
        Some(location) => {
            let url = format!(
                "https://nominatim.openstreetmap.org/search?q={}&format=json&limit=1",
                urlencoding::encode(location)
            );
            let results = fetch_json(&url)?;
            let hit = results
                .as_array()
                .and_then(|a| a.first())
                .ok_or_else(|| format!("no such place: {location}"))?;
            let lat = hit["lat"].as_str().unwrap_or_default().to_string();
            let lon = hit["lon"].as_str().unwrap_or_default().to_string();
            (lat, lon, location.to_string())
        }
        None => {
            let here = fetch_json("http://ip-api.com/json")?;
            (
                here["lat"].to_string(),
                here["lon"].to_string(),
                here["city"].as_str().unwrap_or("current location").to_string(),
            )
        }
    };

    let forecast = fetch_json(&format!(
        "https://api.openweathermap.org/data/2.5/forecast?lat={lat}&lon={lon}&appid={api_key}"
    ))?;
    let entries = forecast["list"]
        .as_array()
        .ok_or_else(|| "forecast response has no entries".to_string())?;

    let target = arg_str(args, "when")
        .and_then(|w| chrono::DateTime::parse_from_rfc3339(w).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let closest = entries
        .iter()
        .min_by_key(|e| (e["dt"].as_i64().unwrap_or(0) - target).abs())
        .ok_or_else(|| "forecast response is empty".to_string())?;

    let kelvin = closest["main"]["temp"].as_f64().unwrap_or(0.0);
    let celsius = kelvin - 273.15;
    let description = closest["weather"][0]["description"]
        .as_str()
        .unwrap_or("unknown");
    let when = closest["dt_txt"].as_str().unwrap_or("now");
    Ok(ToolOutput::Text(format!(
        "Weather in {place} at {when}: {description}, {celsius:.1} C"
    )))
}

pub(crate) fn get_location(
    _ctx: &ToolContext<'_>,
    _args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let here = fetch_json("http://ip-api.com/json")?;
    Ok(ToolOutput::Text(format!(
        "{}, {}, {}",
        here["city"].as_str().unwrap_or("?"),
        here["regionName"].as_str().unwrap_or("?"),
        here["country"].as_str().unwrap_or("?"),
    )))
}

pub(crate) fn get_date(
    _ctx: &ToolContext<'_>,
    _args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    Ok(ToolOutput::Text(
        chrono::Local::now().format("%d/%m/%Y, %H:%M:%S").to_string(),
    ))
}

pub(crate) fn get_calendar(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let start = arg_or(args, "start", "");
    let end = arg_or(args, "end", "");
    let events = graph_get(&format!(
        "/me/calendarview?startDateTime={}&endDateTime={}",
        urlencoding::encode(start),
        urlencoding::encode(end)
    ))?;
    let mut lines = Vec::new();
    for ev in events["value"].as_array().unwrap_or(&Vec::new()) {
        lines.push(format!(
            "{} | {} -> {} | {}",
            ev["subject"].as_str().unwrap_or("(no subject)"),
            ev["start"]["dateTime"].as_str().unwrap_or("?"),
            ev["end"]["dateTime"].as_str().unwrap_or("?"),
            ev["location"]["displayName"].as_str().unwrap_or(""),
        ));
    }
    if lines.is_empty() {
        return Ok(ToolOutput::Text("No events in that range.".into()));
    }
    Ok(ToolOutput::Text(lines.join("\n")))
}

pub(crate) fn draft_calendar_event(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    Ok(ToolOutput::Text(format!(
        "Draft event for review:\nsubject: {}\nstart: {}\nend: {}\nlocation: {}\nattendees: {}\nbody: {}\nAsk the user to confirm before saving.",
        arg_or(args, "subject", "(none)"),
        arg_or(args, "start", "(none)"),
        arg_or(args, "end", "(none)"),
        arg_or(args, "location", ""),
        arg_or(args, "attendees", ""),
        arg_or(args, "body", ""),
    )))
}

pub(crate) fn save_calendar_event(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let attendees: Vec<Value> = arg_or(args, "attendees", "")
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|addr| json!({ "emailAddress": { "address": addr }, "type": "required" }))
        .collect();
    let body = json!({
        "subject": arg_or(args, "subject", ""),
        "start": { "dateTime": arg_or(args, "start", ""), "timeZone": "UTC" },
        "end": { "dateTime": arg_or(args, "end", ""), "timeZone": "UTC" },
        "location": { "displayName": arg_or(args, "location", "") },
        "body": { "contentType": "text", "content": arg_or(args, "body", "") },
        "attendees": attendees,
    });
    graph_post("/me/events", body)?;
    Ok(ToolOutput::Text("Event saved to the calendar.".into()))
}

pub(crate) fn read_email(
    _ctx: &ToolContext<'_>,
    _args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let inbox = graph_get("/me/mailFolders/inbox/messages?$top=5")?;
    let mut out = Vec::new();
    for mail in inbox["value"].as_array().unwrap_or(&Vec::new()) {
        let from = mail["from"]["emailAddress"]["address"]
            .as_str()
            .unwrap_or("?");
        let subject = mail["subject"].as_str().unwrap_or("(no subject)");
        let body = mail["body"]["content"].as_str().unwrap_or("");
        out.push(format!(
            "From: {from}\nSubject: {subject}\n{}\n",
            util::html_to_text(body)
        ));
    }
    if out.is_empty() {
        return Ok(ToolOutput::Text("Inbox is empty.".into()));
    }
    Ok(ToolOutput::Text(out.join("\n---\n")))
}

pub(crate) fn draft_email(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    Ok(ToolOutput::Text(format!(
        "Draft email for review:\nto: {}\nsubject: {}\nattachment: {}\n\n{}\nAsk the user to confirm before sending.",
        arg_or(args, "to", "(none)"),
        arg_or(args, "subject", "(none)"),
        arg_or(args, "attachment", "none"),
        arg_or(args, "body", ""),
    )))
}

pub(crate) fn send_email(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let mut message = json!({
        "subject": arg_or(args, "subject", ""),
        "body": { "contentType": "text", "content": arg_or(args, "body", "") },
        "toRecipients": [{ "emailAddress": { "address": arg_or(args, "to", "") } }],
    });
    if let (Some(name), Some(bytes)) = (
        arg_str(args, "attachment_name"),
        arg_str(args, "attachment_bytes"),
    ) {
        // validate before handing it to the mail service
        base64::engine::general_purpose::STANDARD
            .decode(bytes)
            .map_err(|e| format!("attachment is not valid base64: {e}"))?;
        message["attachments"] = json!([{
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": name,
            "contentBytes": bytes,
        }]);
    }
    graph_post("/me/sendMail", json!({ "message": message }))?;
    Ok(ToolOutput::Text("Email sent.".into()))
}

const CONTACT_MATCH_THRESHOLD: u32 = 80;

pub(crate) fn get_contacts(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let wanted = arg_or(args, "name", "");
    let contacts = graph_get("/me/contacts?$top=100")?;
    let mut matches = Vec::new();
    for contact in contacts["value"].as_array().unwrap_or(&Vec::new()) {
        let display = contact["displayName"].as_str().unwrap_or("");
        let score = util::fuzzy_ratio(wanted, display);
        if score >= CONTACT_MATCH_THRESHOLD {
            let email = contact["emailAddresses"][0]["address"]
                .as_str()
                .unwrap_or("(no address)");
            matches.push((score, format!("{display} <{email}> (match {score}%)")));
        }
    }
    if matches.is_empty() {
        return Ok(ToolOutput::Text(format!("No contact matching '{wanted}'.")));
    }
    matches.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(ToolOutput::Text(
        matches
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n"),
    ))
}

pub(crate) fn find_file(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let filename = arg_or(args, "filename", "");
    let map = ctx
        .client
        .assistant_file_map(ctx.asst_id)
        .map_err(|e| e.to_string())?;
    match map.get(filename) {
        Some(id) => Ok(ToolOutput::Text(id.clone())),
        None => Ok(ToolOutput::Text(format!("File not found: {filename}"))),
    }
}

/// Fetch the content of an uploaded file. The dispatcher wraps the bytes
/// into the `[bytes]` side channel so they reach the user as an attachment.
pub(crate) fn get_file(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let filename = arg_or(args, "filename", "");
    let map = ctx
        .client
        .assistant_file_map(ctx.asst_id)
        .map_err(|e| e.to_string())?;
    let id = map
        .get(filename)
        .ok_or_else(|| format!("no uploaded file named {filename}"))?;
    let bytes = ctx.client.file_content(id).map_err(|e| e.to_string())?;
    Ok(ToolOutput::Bytes(bytes))
}

// ---- web capabilities ----

fn url_arg(args: &Map<String, Value>) -> std::result::Result<String, String> {
    let raw = arg_str(args, "url").ok_or_else(|| "no url given".to_string())?;
    url::Url::parse(raw)
        .map(|u| u.to_string())
        .map_err(|e| format!("invalid url '{raw}': {e}"))
}

pub(crate) fn web_text(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    Ok(ToolOutput::Text(util::html_to_text(&html)))
}

pub(crate) fn web_menus(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    let mut sections = util::collect_tag_texts(&html, "nav", None);
    sections.extend(util::collect_tag_texts(&html, "ul", Some(&["menu", "nav"])));
    if sections.is_empty() {
        return Ok(ToolOutput::Text("No menus found on the page.".into()));
    }
    Ok(ToolOutput::Text(sections.join("\n---\n")))
}

pub(crate) fn web_links(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    Ok(ToolOutput::Text(
        util::collect_attr_values(&html, "a", "href").join("\n"),
    ))
}

pub(crate) fn web_images(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    Ok(ToolOutput::Text(
        util::collect_attr_values(&html, "img", "src").join("\n"),
    ))
}

pub(crate) fn web_tables(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    let tables = util::collect_tag_texts(&html, "table", None);
    if tables.is_empty() {
        return Ok(ToolOutput::Text("No tables found on the page.".into()));
    }
    Ok(ToolOutput::Text(tables.join("\n---\n")))
}

pub(crate) fn web_forms(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let html = fetch_text(&url_arg(args)?)?;
    Ok(ToolOutput::Text(
        util::collect_attr_values(&html, "form", "action").join("\n"),
    ))
}

pub(crate) fn web_query(
    _ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> std::result::Result<ToolOutput, String> {
    let app_id = util::env_optional("WOLFRAM_APP_ID")
        .ok_or_else(|| "WOLFRAM_APP_ID is not set".to_string())?;
    let query = arg_or(args, "query", "");
    let url = format!(
        "https://www.wolframalpha.com/api/v1/llm-api?input={}&appid={}",
        urlencoding::encode(query),
        app_id
    );
    Ok(ToolOutput::Text(fetch_text(&url)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use serde_json::json;

    fn test_ctx() -> (&'static OpenAiClient, &'static str) {
        // nothing here talks to the network, the address is never dialed
        let client =
            Box::leak(Box::new(OpenAiClient::new("test-key", "http://127.0.0.1:9", 1).unwrap()));
        (client, "asst_test")
    }

    fn required_action(calls: Value) -> Value {
        json!({ "submit_tool_outputs": { "tool_calls": calls } })
    }

    #[test]
    fn test_parse_tool_calls_string_and_object_arguments() {
        let ra = required_action(json!([
            {
                "id": "call_1",
                "function": { "name": "get_weather", "arguments": "{\"location\": \"Turin\"}" }
            },
            {
                "id": "call_2",
                "function": { "name": "web_text", "arguments": { "url": "https://example.com" } }
            },
        ]));
        let calls = parse_tool_calls(&ra).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args["location"], "Turin");
        assert_eq!(calls[1].args["url"], "https://example.com");
    }

    #[test]
    fn test_missing_tool_calls_is_decode_error() {
        let err = parse_tool_calls(&json!({ "type": "submit_tool_outputs" })).unwrap_err();
        assert!(matches!(err, AssistantError::Decode(_)));
    }

    #[test]
    fn test_unknown_capability_aborts_whole_batch() {
        let (client, asst_id) = test_ctx();
        let ctx = ToolContext { client, asst_id };
        let registry = CapabilityRegistry::builtin();
        let ra = required_action(json!([
            { "id": "call_1", "function": { "name": "get_date", "arguments": "{}" } },
            { "id": "call_2", "function": { "name": "summon_demon", "arguments": "{}" } },
        ]));
        let err = resolve_required_action(&registry, &ctx, &ra).unwrap_err();
        assert!(matches!(err, AssistantError::UnknownTool(n) if n == "summon_demon"));
    }

    #[test]
    fn test_batch_resolves_in_order_with_failures_included() {
        let (client, asst_id) = test_ctx();
        let ctx = ToolContext { client, asst_id };
        let registry = CapabilityRegistry::builtin();
        let ra = required_action(json!([
            { "id": "call_1", "function": { "name": "get_date", "arguments": "{}" } },
            {
                "id": "call_2",
                "function": {
                    "name": "draft_email",
                    "arguments": "{\"to\": \"a@b.c\", \"subject\": \"hi\", \"body\": \"text\"}"
                }
            },
            // no WOLFRAM_APP_ID in the test env, so this one reports an error
            { "id": "call_3", "function": { "name": "web_query", "arguments": "{\"query\": \"2+2\"}" } },
        ]));
        std::env::remove_var("WOLFRAM_APP_ID");
        let outputs = resolve_required_action(&registry, &ctx, &ra).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].tool_call_id, "call_1");
        assert!(outputs[1].output.contains("a@b.c"));
        assert!(outputs[2].output.starts_with("error: "));
    }
}
