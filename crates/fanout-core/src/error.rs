use thiserror::Error;

/// Errors returned when parsing a channel path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelIdError {
    /// Channel path was empty or only `/`.
    #[error("channel id must not be empty")]
    Empty,
    /// Channel path did not begin with `/`.
    #[error("channel id must start with '/': {0}")]
    MissingLeadingSlash(String),
    /// Channel path contained `//` or a trailing `/`.
    #[error("channel id contains an empty segment: {0}")]
    EmptySegment(String),
    /// A `*` or `**` segment appeared before the last position.
    #[error("wildcard segment must be last: {0}")]
    MisplacedWildcard(String),
}

/// Errors a session may report when handed a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(String),
    #[error("session send failed: {0}")]
    Send(String),
}
