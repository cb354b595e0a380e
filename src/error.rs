//! Error types for zero-pgstream.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::types::Oid;

/// Result type for zero-pgstream operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of an ErrorResponse or NoticeResponse.
///
/// Each field is tagged on the wire by a single byte, noted in brackets.
/// Fields the server did not send stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// `S`: ERROR, FATAL or PANIC for errors, a notice level otherwise. May be localized.
    pub severity: Option<String>,
    /// `V`: the severity, never localized
    pub severity_non_localized: Option<String>,
    /// `C`: SQLSTATE
    pub code: Option<String>,
    /// `M`
    pub message: Option<String>,
    /// `D`
    pub detail: Option<String>,
    /// `H`
    pub hint: Option<String>,
    /// `P`: 1-based character offset into the query text
    pub position: Option<u32>,
    /// `p`: like `position`, but into `internal_query`
    pub internal_position: Option<u32>,
    /// `q`: text of an internally generated command that failed
    pub internal_query: Option<String>,
    /// `W`: call stack context, one entry per line
    pub where_: Option<String>,
    /// `s`
    pub schema: Option<String>,
    /// `t`
    pub table: Option<String>,
    /// `c`
    pub column: Option<String>,
    /// `d`
    pub data_type: Option<String>,
    /// `n`
    pub constraint: Option<String>,
    /// `F`: server source file reporting the error
    pub file: Option<String>,
    /// `L`
    pub line: Option<u32>,
    /// `R`
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized variant.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = self.severity.as_deref().map(|s| format!("{s}: "));
        write!(
            f,
            "{}{}",
            severity.unwrap_or_default(),
            self.message.as_deref().unwrap_or_default()
        )?;
        if let Some(code) = self.code.as_deref() {
            write!(f, " (SQLSTATE {code})")?;
        }
        for (label, value) in [("DETAIL", &self.detail), ("HINT", &self.hint)] {
            if let Some(value) = value {
                write!(f, "\n{label}: {value}")?;
            }
        }
        Ok(())
    }
}

/// Error type for zero-pgstream.
///
/// Cloneable so one failure can be handed to the current task and to every
/// task recorded in a [`CleanupContext`](crate::state::CleanupContext).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// ErrorResponse from the server
    #[error("server error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, bad framing, etc.)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A backend message arrived that is not valid in the current state
    #[error("unexpected backend message {message} while {state}")]
    UnexpectedMessage {
        /// Name of the offending backend message
        message: &'static str,
        /// Connection state at the time it arrived
        state: &'static str,
    },

    /// Value conversion failed
    #[error("decode error: {0}")]
    Decode(String),

    /// The element type has no registered array type
    #[error("no array type registered for element type {0}")]
    NoArrayType(Oid),

    /// Valid on the wire but not handled by this crate
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The row stream was cancelled by its consumer
    #[error("query cancelled")]
    QueryCancelled,

    /// The connection is closed or closing and cannot run the task
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport failure
    #[error("io: {0}")]
    Io(Arc<std::io::Error>),

    /// Rejected configuration or misuse of the API
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Whether the connection must be torn down after this error.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Server(fields) => {
                if matches!(fields.severity(), Some("FATAL") | Some("PANIC")) {
                    return true;
                }
                // connection exception, operator intervention, system error, internal error
                matches!(
                    fields.code.as_deref().and_then(|c| c.get(..2)),
                    Some("08") | Some("58") | Some("XX")
                ) || fields.code.as_deref().is_some_and(|c| c.starts_with("57P"))
            }
            Error::QueryCancelled | Error::Decode(_) | Error::InvalidUsage(_) => false,
            Error::NoArrayType(_) | Error::Unsupported(_) => false,
            Error::Protocol(_)
            | Error::UnexpectedMessage { .. }
            | Error::ConnectionClosed
            | Error::Io(_) => true,
        }
    }

    /// SQLSTATE of a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("malformed fixed-size field: {err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(severity: &str, code: &str) -> Error {
        Error::Server(ErrorFields {
            severity: Some(severity.into()),
            code: Some(code.into()),
            message: Some("boom".into()),
            ..Default::default()
        })
    }

    #[test]
    fn query_errors_keep_connection() {
        assert!(!server("ERROR", "42601").is_connection_broken());
        assert!(!Error::QueryCancelled.is_connection_broken());
    }

    #[test]
    fn fatal_errors_break_connection() {
        assert!(server("FATAL", "28P01").is_connection_broken());
        assert!(server("ERROR", "08006").is_connection_broken());
        assert!(server("ERROR", "57P01").is_connection_broken());
        assert!(
            Error::UnexpectedMessage {
                message: "DataRow",
                state: "ready for query"
            }
            .is_connection_broken()
        );
    }

    #[test]
    fn display_server_error() {
        let err = server("ERROR", "42601");
        assert_eq!(err.to_string(), "server error: ERROR: boom (SQLSTATE 42601)");
        assert_eq!(err.sqlstate(), Some("42601"));
    }
}
