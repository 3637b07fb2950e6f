use std::fmt;

/// Why a stream stopped being usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokenReason {
    /// Network or request execution failure (including timeouts).
    Transport,
    /// Non-success HTTP status without a more specific server signal.
    Http(u16),
    /// The server expired the stream's baton; a new connection is required.
    StreamExpired,
    /// The message-channel handshake was rejected or cut short.
    Handshake,
    /// The server answered with something that is not a protocol message.
    Protocol,
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Http(status) => write!(f, "http {status}"),
            Self::StreamExpired => f.write_str("stream expired"),
            Self::Handshake => f.write_str("handshake"),
            Self::Protocol => f.write_str("protocol"),
        }
    }
}

/// Response-shape violations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A stream result carried neither a response nor an error.
    #[error("no response received for request {request_index}")]
    NoResponse { request_index: usize },
    /// A stream result or response had an unexpected `type`.
    #[error("unknown response type at request {request_index}: expected {expected}")]
    UnknownResponseType {
        request_index: usize,
        expected: &'static str,
    },
    /// The server answered a different number of requests than were sent.
    #[error("result count mismatch: expected {expected}, got {actual}")]
    ResultCount { expected: usize, actual: usize },
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HranaError {
    /// Named placeholder with an unsupported prefix, or a malformed argument list.
    #[error("malformed parameter: {0}")]
    MalformedParameter(String),
    /// A statement references more positional values than remain.
    #[error("missing positional parameters: statement needs {needed}, {available} left")]
    MissingParameters { needed: usize, available: usize },
    /// A single statement was required.
    #[error("expected exactly one statement, got {0}")]
    StatementCount(usize),
    /// A batch has more steps than a condition can address.
    #[error("batch of {0} steps is too large")]
    BatchTooLarge(usize),
    /// A value that has no Hrana representation.
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),
    /// Response decoding error (bad integer text, bad base64, bad JSON).
    #[error("decode error: {0}")]
    Decode(String),
    /// Response-shape violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// SQL or stream error returned by the server.
    #[error("server error: {message}")]
    Server {
        /// Error message text from the server.
        message: String,
        /// Optional engine-specific error code.
        code: Option<String>,
    },
    /// The stream is closed; this connection must not be reused.
    #[error("stream is closed")]
    StreamClosed,
    /// The exchange failed and the stream is now closed.
    #[error("connection broken ({reason}): {message}")]
    ConnectionBroken { reason: BrokenReason, message: String },
    /// Any of the above, raised while executing `sql`.
    #[error("failed to execute SQL: {sql}\n{source}")]
    Sql {
        sql: String,
        #[source]
        source: Box<HranaError>,
    },
}

impl HranaError {
    pub(crate) fn broken(reason: BrokenReason, message: impl Into<String>) -> Self {
        Self::ConnectionBroken {
            reason,
            message: message.into(),
        }
    }

    pub(crate) fn with_sql(self, sql: &str) -> Self {
        match self {
            already @ Self::Sql { .. } => already,
            other => Self::Sql {
                sql: sql.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the error with any statement context removed.
    pub fn root(&self) -> &HranaError {
        match self {
            Self::Sql { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the connection can no longer be used.
    pub fn is_bad_connection(&self) -> bool {
        matches!(
            self.root(),
            Self::StreamClosed | Self::ConnectionBroken { .. }
        )
    }

    /// True when the server expired the stream and a new logical connection
    /// must be opened instead of retrying on this one.
    pub fn is_stream_expired(&self) -> bool {
        matches!(
            self.root(),
            Self::ConnectionBroken {
                reason: BrokenReason::StreamExpired,
                ..
            }
        )
    }
}
