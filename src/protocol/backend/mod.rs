//! PostgreSQL backend (server → client) messages.
//!
//! Frames are split off the read buffer with [`split_message`] and parsed
//! into an owned [`BackendMessage`], which is what the connection state
//! machine consumes. Owned values let rows outlive the read buffer while they
//! wait in the row buffer.

pub mod auth;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{Authentication, BackendKeyData, Notification, ParameterStatus, ReadyForQuery};
pub use error::{ErrorResponse, NoticeResponse};
pub use extended::ParameterDescription;
pub use query::{ColumnDescription, CommandComplete, DataRow, DataRowIter, RowDescription};

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::read_i32;
use crate::protocol::types::TransactionStatus;

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
}

/// Size of the type byte plus the length field.
pub const HEADER_LEN: usize = 5;

/// Raw message from the PostgreSQL server.
///
/// This is a thin wrapper around the message type byte and payload.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    /// Message type byte
    pub type_byte: u8,
    /// Message payload (after length field)
    pub payload: &'a [u8],
}

impl<'a> RawMessage<'a> {
    /// Create a new RawMessage.
    pub fn new(type_byte: u8, payload: &'a [u8]) -> Self {
        Self { type_byte, payload }
    }

    /// Check if a type byte represents an async message (can arrive at any time).
    pub fn is_async_type(type_byte: u8) -> bool {
        matches!(
            type_byte,
            msg_type::NOTICE_RESPONSE
                | msg_type::NOTIFICATION_RESPONSE
                | msg_type::PARAMETER_STATUS
        )
    }

    /// Parse into an owned [`BackendMessage`].
    pub fn parse(&self) -> Result<BackendMessage> {
        BackendMessage::parse(self.type_byte, self.payload)
    }
}

/// Split one complete frame off the front of `buf`.
///
/// Returns the message and the number of bytes it occupies, or `None` if the
/// buffer does not hold a complete frame yet.
pub fn split_message(buf: &[u8], max_message_size: usize) -> Result<Option<(RawMessage<'_>, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let type_byte = buf[0];
    let (len, _) = read_i32(&buf[1..HEADER_LEN])?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len >= 4)
        .ok_or_else(|| Error::Protocol(format!("invalid message length {len}")))?;
    if len > max_message_size {
        return Err(Error::Protocol(format!(
            "message length {len} exceeds limit {max_message_size}"
        )));
    }
    let total = 1 + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((RawMessage::new(type_byte, &buf[HEADER_LEN..total]), total)))
}

/// Owned backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete,
    CloseComplete,
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoData,
    NoticeResponse(ErrorFields),
    NotificationResponse(Notification),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete,
    PortalSuspended,
    ReadyForQuery(TransactionStatus),
    RowDescription(RowDescription),
}

impl BackendMessage {
    /// Parse a message from its type byte and payload.
    pub fn parse(type_byte: u8, payload: &[u8]) -> Result<Self> {
        let message = match type_byte {
            msg_type::AUTHENTICATION => Self::Authentication(Authentication::parse(payload)?),
            msg_type::BACKEND_KEY_DATA => Self::BackendKeyData(BackendKeyData::parse(payload)?),
            msg_type::BIND_COMPLETE => Self::BindComplete,
            msg_type::CLOSE_COMPLETE => Self::CloseComplete,
            msg_type::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete::parse(payload)?),
            msg_type::DATA_ROW => Self::DataRow(DataRow::parse(payload)?),
            msg_type::EMPTY_QUERY_RESPONSE => Self::EmptyQueryResponse,
            msg_type::ERROR_RESPONSE => Self::ErrorResponse(ErrorResponse::parse(payload)?.fields),
            msg_type::NO_DATA => Self::NoData,
            msg_type::NOTICE_RESPONSE => {
                Self::NoticeResponse(NoticeResponse::parse(payload)?.fields)
            }
            msg_type::NOTIFICATION_RESPONSE => {
                Self::NotificationResponse(Notification::parse(payload)?)
            }
            msg_type::PARAMETER_DESCRIPTION => {
                Self::ParameterDescription(ParameterDescription::parse(payload)?)
            }
            msg_type::PARAMETER_STATUS => Self::ParameterStatus(ParameterStatus::parse(payload)?),
            msg_type::PARSE_COMPLETE => Self::ParseComplete,
            msg_type::PORTAL_SUSPENDED => Self::PortalSuspended,
            msg_type::READY_FOR_QUERY => {
                Self::ReadyForQuery(ReadyForQuery::parse(payload)?.transaction_status()?)
            }
            msg_type::ROW_DESCRIPTION => Self::RowDescription(RowDescription::parse(payload)?),
            _ => {
                return Err(Error::Protocol(format!(
                    "unknown backend message type '{}'",
                    type_byte as char
                )));
            }
        };
        Ok(message)
    }

    /// Message name, as used in protocol documentation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::BindComplete => "BindComplete",
            Self::CloseComplete => "CloseComplete",
            Self::CommandComplete(_) => "CommandComplete",
            Self::DataRow(_) => "DataRow",
            Self::EmptyQueryResponse => "EmptyQueryResponse",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::NoData => "NoData",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::NotificationResponse(_) => "NotificationResponse",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ParseComplete => "ParseComplete",
            Self::PortalSuspended => "PortalSuspended",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::RowDescription(_) => "RowDescription",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_waits_for_complete_frame() {
        let frame = [b'Z', 0, 0, 0, 5, b'I'];
        assert!(split_message(&frame[..3], 1024).unwrap().is_none());
        assert!(split_message(&frame[..5], 1024).unwrap().is_none());

        let (msg, used) = split_message(&frame, 1024).unwrap().unwrap();
        assert_eq!(used, 6);
        assert_eq!(
            msg.parse().unwrap(),
            BackendMessage::ReadyForQuery(TransactionStatus::Idle)
        );
    }

    #[test]
    fn split_rejects_bad_lengths() {
        assert!(split_message(&[b'Z', 0, 0, 0, 3], 1024).is_err());
        assert!(split_message(&[b'D', 0, 0, 8, 0], 1024).is_err());
    }

    #[test]
    fn parse_empty_messages() {
        assert_eq!(
            BackendMessage::parse(msg_type::PARSE_COMPLETE, &[]).unwrap(),
            BackendMessage::ParseComplete
        );
        assert_eq!(
            BackendMessage::parse(msg_type::NO_DATA, &[]).unwrap().name(),
            "NoData"
        );
        assert!(BackendMessage::parse(b'?', &[]).is_err());
    }
}
