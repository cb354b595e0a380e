//! ErrorResponse and NoticeResponse messages.
//!
//! Both carry the same body: a sequence of `(code byte, cstring)` fields
//! ended by a zero byte.

use crate::error::{ErrorFields, Result};
use crate::protocol::codec::read_cstr;

fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let text = || Some(value.to_string());
        match code {
            b'S' => fields.severity = text(),
            b'V' => fields.severity_non_localized = text(),
            b'C' => fields.code = text(),
            b'M' => fields.message = text(),
            b'D' => fields.detail = text(),
            b'H' => fields.hint = text(),
            b'P' => fields.position = value.parse().ok(),
            b'p' => fields.internal_position = value.parse().ok(),
            b'q' => fields.internal_query = text(),
            b'W' => fields.where_ = text(),
            b's' => fields.schema = text(),
            b't' => fields.table = text(),
            b'c' => fields.column = text(),
            b'd' => fields.data_type = text(),
            b'n' => fields.constraint = text(),
            b'F' => fields.file = text(),
            b'L' => fields.line = value.parse().ok(),
            b'R' => fields.routine = text(),
            // Unknown codes are reserved for future use and must be skipped.
            _ => tracing::trace!(code = %(code as char), "skipping error field"),
        }
    }

    Ok(fields)
}

/// ErrorResponse - the server rejected the current query.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(|fields| Self { fields })
    }
}

/// NoticeResponse - a warning or informational message.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(|fields| Self { fields })
    }
}
