//! Tool declarations uploaded with the assistant. One JSON object per
//! capability, in the remote service's function-tool format. Keep the names
//! in lockstep with `Capability::name`.

use serde_json::{json, Value};

fn function(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}

pub(crate) fn tool_definitions_json() -> Vec<Value> {
    vec![
        function(
            "get_weather",
            "Weather forecast for a location at a point in time. Defaults to the user's current location and now.",
            json!({
                "location": { "type": "string", "description": "City or place name" },
                "when": { "type": "string", "description": "ISO 8601 date-time the forecast should cover" },
            }),
            &[],
        ),
        function(
            "get_location",
            "The user's current approximate location, resolved from their network address.",
            json!({}),
            &[],
        ),
        function(
            "get_date",
            "The current local date and time.",
            json!({}),
            &[],
        ),
        function(
            "get_calendar",
            "Calendar events between two date-times.",
            json!({
                "start": { "type": "string", "description": "ISO 8601 range start" },
                "end": { "type": "string", "description": "ISO 8601 range end" },
            }),
            &["start", "end"],
        ),
        function(
            "draft_calendar_event",
            "Draft a calendar event for the user to review. Always call this before save_calendar_event.",
            json!({
                "subject": { "type": "string" },
                "start": { "type": "string", "description": "ISO 8601 start" },
                "end": { "type": "string", "description": "ISO 8601 end" },
                "location": { "type": "string" },
                "body": { "type": "string" },
                "attendees": { "type": "string", "description": "Comma-separated email addresses" },
            }),
            &["subject", "start", "end"],
        ),
        function(
            "save_calendar_event",
            "Save a previously drafted event to the user's calendar.",
            json!({
                "subject": { "type": "string" },
                "start": { "type": "string", "description": "ISO 8601 start" },
                "end": { "type": "string", "description": "ISO 8601 end" },
                "location": { "type": "string" },
                "body": { "type": "string" },
                "attendees": { "type": "string", "description": "Comma-separated email addresses" },
            }),
            &["subject", "start", "end"],
        ),
        function(
            "read_email",
            "The most recent messages in the user's inbox, as plain text.",
            json!({}),
            &[],
        ),
        function(
            "draft_email",
            "Draft an email for the user to review. Always call this before send_email.",
            json!({
                "to": { "type": "string", "description": "Recipient email address" },
                "subject": { "type": "string" },
                "body": { "type": "string" },
                "attachment": { "type": "string", "description": "Name of an uploaded file to attach" },
            }),
            &["to", "subject", "body"],
        ),
        function(
            "send_email",
            "Send a previously drafted email.",
            json!({
                "to": { "type": "string", "description": "Recipient email address" },
                "subject": { "type": "string" },
                "body": { "type": "string" },
                "attachment_name": { "type": "string", "description": "File name for the attachment" },
                "attachment_bytes": { "type": "string", "description": "Base64 content of the attachment" },
            }),
            &["to", "subject", "body"],
        ),
        function(
            "get_contacts",
            "Look up the user's contacts by name. The match is fuzzy; use this to resolve names to email addresses.",
            json!({
                "name": { "type": "string", "description": "Full or partial contact name" },
            }),
            &["name"],
        ),
        function(
            "find_file",
            "The remote file id of an uploaded file, looked up by file name.",
            json!({
                "filename": { "type": "string" },
            }),
            &["filename"],
        ),
        function(
            "get_file",
            "The raw content of an uploaded file, returned to the user as an attachment.",
            json!({
                "filename": { "type": "string" },
            }),
            &["filename"],
        ),
        function(
            "web_text",
            "Visible text content of a web page.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_menus",
            "Navigation and menu entries of a web page.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_links",
            "Hyperlink targets on a web page.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_images",
            "Image sources on a web page.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_tables",
            "Table contents of a web page, as text.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_forms",
            "Form targets on a web page.",
            json!({ "url": { "type": "string" } }),
            &["url"],
        ),
        function(
            "web_query",
            "Answer a computational or factual query. Phrase the query in keywords, not prose.",
            json!({ "query": { "type": "string" } }),
            &["query"],
        ),
    ]
}
