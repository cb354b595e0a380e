//! Asynchronous driver using Tokio.

mod conn;

pub use conn::{Client, Connection, connect};
