use thiserror::Error;

/// Error taxonomy for the assistant shell.
///
/// The classes matter more than the messages: `NotFound` on an identity or
/// thread triggers a create, `NotFound` on a capability aborts the dispatch
/// batch, `UnexpectedRunStatus` is fatal to the current turn only.
#[derive(Debug, Error)]
pub(crate) enum AssistantError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The run requested a capability that is not in the registry.
    #[error("unknown tool '{0}' requested by the run")]
    UnknownTool(String),

    /// The run reached a terminal-like state we do not recognize. Carries
    /// the raw status string from the remote side.
    #[error("unexpected run status '{0}'")]
    UnexpectedRunStatus(String),

    #[error("run did not reach a terminal state within {0}ms")]
    PollTimeout(u64),

    /// Malformed or unsupported message content.
    #[error("could not decode message content: {0}")]
    Decode(String),

    /// Remote API request failed (non-2xx after retries, or transport).
    /// Carries the response body so callers can reconcile embedded state
    /// such as an active run id.
    #[error("api request failed: {0}")]
    Api(String),

    #[error("config: {0}")]
    Config(String),

    #[error("memory store: {0}")]
    Memory(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AssistantError>;
