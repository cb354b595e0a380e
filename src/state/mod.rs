//! Sans-I/O state machines for the extended query protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! Every event fed into them yields one [`ConnectionAction`] telling the
//! driver what to do next.

pub mod action;
pub mod connection;
pub mod extended;
pub mod row_buffer;

pub use action::{CleanupAction, CleanupContext, CloseNotification, ConnectionAction};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::{ExtendedQueryStateMachine, QueryPhase};
pub use row_buffer::RowBuffer;
