//! Client side of the PostgreSQL extended query protocol.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: the [`state`] module decides what to send,
//!   when to read and how to resolve each query, without touching a socket
//! - **Backpressured row streaming**: rows are read from the server only as
//!   fast as the consumer of the [`RowStream`] asks for them
//! - **Binary array codec**: one-dimensional arrays in the binary wire format,
//!   with the array type derived from the element type
//! - **Tokio driver**: a single connection task over any
//!   `AsyncRead + AsyncWrite` transport
//!
//! # Example
//!
//! ```no_run
//! use zero_pgstream::{Opts, QueryOutcome};
//!
//! async fn run(socket: tokio::io::DuplexStream) -> zero_pgstream::Result<()> {
//!     let (client, connection) = zero_pgstream::tokio::connect(socket, Opts::default())?;
//!     tokio::spawn(connection.run());
//!
//!     let pending = client.query("SELECT id FROM users WHERE age > $1", (30i32,)).await?;
//!     if let QueryOutcome::Rows(mut rows) = pending.outcome().await? {
//!         while let Some(row) = rows.next().await {
//!             let row = row?;
//!             println!("{:?}", row.get(0));
//!         }
//!     }
//!
//!     client.close().await
//! }
//! ```

pub mod conversion;
pub mod error;
pub mod opts;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod task;
pub mod tokio;
pub mod value;

pub use conversion::{FromWireValue, ToParams, ToWireValue};
pub use error::{Error, ErrorFields, Result};
pub use opts::Opts;
pub use protocol::backend::{ColumnDescription, DataRow};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use stream::RowStream;
pub use task::{ExtendedQueryTask, PendingQuery, QueryOutcome, Task};
pub use value::Value;
