use serenity::model::id::ChannelId;

/// Failures surfaced by the coordination core.
///
/// Lookups inside the core return `Option`; these variants are what a command
/// boundary turns into a user-visible rejection or a log line.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("that command can only be used in <#{}>", .valid.0)]
    WrongChannel { valid: ChannelId },

    #[error("could not resolve a playable track for `{0}`")]
    ResolutionFailure(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external call failed: {0}")]
    External(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<serenity::Error> for Error {
    fn from(error: serenity::Error) -> Self {
        Error::External(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
