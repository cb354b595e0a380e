//! PostgreSQL wire protocol.
//!
//! - [`backend`]: server messages, framed with
//!   [`split_message`](backend::split_message) and parsed into owned
//!   [`BackendMessage`] values
//! - [`frontend`]: encoders for the extended query messages and Terminate
//! - [`codec`]: big-endian primitives and the message builder
//! - [`types`]: OIDs, the element/array type table, format codes and
//!   transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::{BackendMessage, RawMessage};
pub use types::{FormatCode, Oid, TransactionStatus};
