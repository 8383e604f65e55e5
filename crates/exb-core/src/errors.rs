/// Core error type for the expense bot.
///
/// Adapter crates map their specific errors into this type so the conversation
/// handler can turn any failure into one of the fixed user-facing replies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model or ledger backend unreachable, timed out, or answered with an error status.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Model answered, but not with the expected JSON object.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    #[error("category not allowed: {0}")]
    CategoryNotAllowed(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub const NOT_UNDERSTOOD_REPLY: &str =
    "❌ Sorry, I couldn't understand that expense. Try something like 'Coffee 120'.";
pub const GENERIC_FAILURE_REPLY: &str =
    "❌ Something went wrong while saving your expense. Please try again later.";

impl Error {
    /// Fixed reply shown to the chat user. Never includes upstream error text.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::MalformedModelOutput(_) | Error::CategoryNotAllowed(_) => NOT_UNDERSTOOD_REPLY,
            _ => GENERIC_FAILURE_REPLY,
        }
    }
}
