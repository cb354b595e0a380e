//! PostgreSQL frontend (client → server) messages.

pub mod extended;

pub use extended::{
    write_bind, write_describe_statement, write_execute, write_extended_query, write_parse,
    write_sync,
};

use crate::protocol::codec::MessageBuilder;

/// Frontend message type bytes.
pub mod msg_type {
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Write a Terminate message.
///
/// Sent before closing the connection; the server sends no response.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, msg_type::TERMINATE);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}
