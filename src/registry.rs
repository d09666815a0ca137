//! Capability registry: the closed set of tools the assistant may call.
//!
//! Capabilities are an enumerated tag type rather than bare strings, so the
//! dispatcher matches exhaustively and an unrecognized wire name surfaces as
//! a typed `UnknownTool` error before any output is produced.

use serde_json::{Map, Value};

use crate::error::{AssistantError, Result};
use crate::tool_args::{opt, req, ParamSpec};
use crate::tool_exec::{self, ToolContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Capability {
    GetWeather,
    GetLocation,
    GetDate,
    GetCalendar,
    DraftCalendarEvent,
    SaveCalendarEvent,
    ReadEmail,
    DraftEmail,
    SendEmail,
    GetContacts,
    FindFile,
    GetFile,
    WebText,
    WebMenus,
    WebLinks,
    WebImages,
    WebTables,
    WebForms,
    WebQuery,
}

impl Capability {
    pub(crate) const ALL: &'static [Capability] = &[
        Capability::GetWeather,
        Capability::GetLocation,
        Capability::GetDate,
        Capability::GetCalendar,
        Capability::DraftCalendarEvent,
        Capability::SaveCalendarEvent,
        Capability::ReadEmail,
        Capability::DraftEmail,
        Capability::SendEmail,
        Capability::GetContacts,
        Capability::FindFile,
        Capability::GetFile,
        Capability::WebText,
        Capability::WebMenus,
        Capability::WebLinks,
        Capability::WebImages,
        Capability::WebTables,
        Capability::WebForms,
        Capability::WebQuery,
    ];

    /// Wire name as declared to the remote service.
    pub(crate) fn name(self) -> &'static str {
        match self {
            Capability::GetWeather => "get_weather",
            Capability::GetLocation => "get_location",
            Capability::GetDate => "get_date",
            Capability::GetCalendar => "get_calendar",
            Capability::DraftCalendarEvent => "draft_calendar_event",
            Capability::SaveCalendarEvent => "save_calendar_event",
            Capability::ReadEmail => "read_email",
            Capability::DraftEmail => "draft_email",
            Capability::SendEmail => "send_email",
            Capability::GetContacts => "get_contacts",
            Capability::FindFile => "find_file",
            Capability::GetFile => "get_file",
            Capability::WebText => "web_text",
            Capability::WebMenus => "web_menus",
            Capability::WebLinks => "web_links",
            Capability::WebImages => "web_images",
            Capability::WebTables => "web_tables",
            Capability::WebForms => "web_forms",
            Capability::WebQuery => "web_query",
        }
    }

    pub(crate) fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

/// What a handler hands back to the dispatcher. `Bytes` is wrapped into the
/// `[bytes]` side channel before submission.
pub(crate) enum ToolOutput {
    Text(String),
    Bytes(Vec<u8>),
}

pub(crate) type ToolHandler =
    fn(&ToolContext<'_>, &Map<String, Value>) -> std::result::Result<ToolOutput, String>;

#[derive(Debug)]
pub(crate) struct CapabilityEntry {
    pub(crate) capability: Capability,
    pub(crate) schema: &'static [ParamSpec],
    pub(crate) handler: ToolHandler,
}

pub(crate) struct CapabilityRegistry {
    entries: Vec<CapabilityEntry>,
}

pub(crate) const WEATHER_SCHEMA: &[ParamSpec] = &[opt("location"), opt("when")];
pub(crate) const NO_PARAMS: &[ParamSpec] = &[];
pub(crate) const CALENDAR_RANGE_SCHEMA: &[ParamSpec] = &[req("start"), req("end")];
pub(crate) const CALENDAR_EVENT_SCHEMA: &[ParamSpec] = &[
    req("subject"),
    req("start"),
    req("end"),
    opt("location"),
    opt("body"),
    opt("attendees"),
];
pub(crate) const DRAFT_EMAIL_SCHEMA: &[ParamSpec] =
    &[req("to"), req("subject"), req("body"), opt("attachment")];
pub(crate) const SEND_EMAIL_SCHEMA: &[ParamSpec] =
    &[req("to"), req("subject"), req("body"), opt("attachment_name"), opt("attachment_bytes")];
pub(crate) const CONTACTS_SCHEMA: &[ParamSpec] = &[req("name")];
pub(crate) const FIND_FILE_SCHEMA: &[ParamSpec] = &[req("filename")];
pub(crate) const WEB_URL_SCHEMA: &[ParamSpec] = &[req("url")];
pub(crate) const WEB_QUERY_SCHEMA: &[ParamSpec] = &[req("query")];

impl CapabilityRegistry {
    /// The fixed built-in table. Built once at startup and shared.
    pub(crate) fn builtin() -> Self {
        let entries = vec![
            CapabilityEntry {
                capability: Capability::GetWeather,
                schema: WEATHER_SCHEMA,
                handler: tool_exec::get_weather,
            },
            CapabilityEntry {
                capability: Capability::GetLocation,
                schema: NO_PARAMS,
                handler: tool_exec::get_location,
            },
            CapabilityEntry {
                capability: Capability::GetDate,
                schema: NO_PARAMS,
                handler: tool_exec::get_date,
            },
            CapabilityEntry {
                capability: Capability::GetCalendar,
                schema: CALENDAR_RANGE_SCHEMA,
                handler: tool_exec::get_calendar,
            },
            CapabilityEntry {
                capability: Capability::DraftCalendarEvent,
                schema: CALENDAR_EVENT_SCHEMA,
                handler: tool_exec::draft_calendar_event,
            },
            CapabilityEntry {
                capability: Capability::SaveCalendarEvent,
                schema: CALENDAR_EVENT_SCHEMA,
                handler: tool_exec::save_calendar_event,
            },
            CapabilityEntry {
                capability: Capability::ReadEmail,
                schema: NO_PARAMS,
                handler: tool_exec::read_email,
            },
            CapabilityEntry {
                capability: Capability::DraftEmail,
                schema: DRAFT_EMAIL_SCHEMA,
                handler: tool_exec::draft_email,
            },
            CapabilityEntry {
                capability: Capability::SendEmail,
                schema: SEND_EMAIL_SCHEMA,
                handler: tool_exec::send_email,
            },
            CapabilityEntry {
                capability: Capability::GetContacts,
                schema: CONTACTS_SCHEMA,
                handler: tool_exec::get_contacts,
            },
            CapabilityEntry {
                capability: Capability::FindFile,
                schema: FIND_FILE_SCHEMA,
                handler: tool_exec::find_file,
            },
            CapabilityEntry {
                capability: Capability::GetFile,
                schema: FIND_FILE_SCHEMA,
                handler: tool_exec::get_file,
            },
            CapabilityEntry {
                capability: Capability::WebText,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_text,
            },
            CapabilityEntry {
                capability: Capability::WebMenus,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_menus,
            },
            CapabilityEntry {
                capability: Capability::WebLinks,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_links,
            },
            CapabilityEntry {
                capability: Capability::WebImages,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_images,
            },
            CapabilityEntry {
                capability: Capability::WebTables,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_tables,
            },
            CapabilityEntry {
                capability: Capability::WebForms,
                schema: WEB_URL_SCHEMA,
                handler: tool_exec::web_forms,
            },
            CapabilityEntry {
                capability: Capability::WebQuery,
                schema: WEB_QUERY_SCHEMA,
                handler: tool_exec::web_query,
            },
        ];
        Self { entries }
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<&CapabilityEntry> {
        let cap = Capability::parse(name)
            .ok_or_else(|| AssistantError::UnknownTool(name.to_string()))?;
        self.entries
            .iter()
            .find(|e| e.capability == cap)
            .ok_or_else(|| AssistantError::UnknownTool(name.to_string()))
    }
}
