//! Authentication and session-level backend messages.
//!
//! None of these drive the extended query exchange; the connection state
//! machine only needs them to recognise (and reject, or ignore) messages
//! that arrive outside of the startup phase.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication request from the server.
///
/// Authentication belongs to connection startup. After startup the message
/// is only recognised so it can be rejected, so the method-specific data is
/// kept raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// Method code (0 = ok, 3 = cleartext, 5 = MD5, 10 = SASL, ...)
    pub method: i32,
    /// Method-specific data
    pub data: Vec<u8>,
}

impl Authentication {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (method, rest) = read_i32(payload)?;
        Ok(Self {
            method,
            data: rest.to_vec(),
        })
    }

    /// Returns true for AuthenticationOk.
    pub fn is_ok(&self) -> bool {
        self.method == 0
    }
}

/// BackendKeyData message - process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub process_id: u32,
    /// Secret key for cancellation
    pub secret_key: u32,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (process_id, rest) = read_u32(payload)?;
        let (secret_key, _) = read_u32(rest)?;
        Ok(Self {
            process_id,
            secret_key,
        })
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: String,
}

impl ParameterStatus {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// ReadyForQuery message - indicates server is ready for a new query.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload).map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    /// Get the transaction status.
    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        let status = self.status;
        TransactionStatus::from_byte(status).ok_or_else(|| {
            Error::Protocol(format!("ReadyForQuery: unknown status '{}'", status as char))
        })
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

impl Notification {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel: channel.to_string(),
            payload: payload_str.to_string(),
        })
    }
}
