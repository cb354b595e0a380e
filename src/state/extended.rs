//! Extended query protocol state machine.
//!
//! Tracks one task through
//! `ParseComplete → ParameterDescription → RowDescription | NoData →
//! BindComplete → DataRow* → CommandComplete | EmptyQueryResponse →
//! ReadyForQuery`. The connection state machine owns it for the lifetime of
//! the task and turns its `Err` returns into connection teardown.

use std::sync::Arc;

use tracing::{Span, debug, trace};

use crate::error::{Error, Result};
use crate::protocol::backend::{ColumnDescription, DataRow, ParameterDescription, RowDescription};
use crate::protocol::types::{FormatCode, Oid};
use crate::task::ExtendedQueryTask;

use super::action::{CleanupContext, ConnectionAction};
use super::row_buffer::RowBuffer;

/// Phase of the in-flight query, as reported by
/// [`ConnectionState::QueryIn`](super::ConnectionState::QueryIn).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Waiting for ParseComplete
    Parsing,
    /// Waiting for ParameterDescription
    ParameterDescription,
    /// Waiting for RowDescription or NoData
    Describing,
    /// Waiting for BindComplete, or for the result of a statement without rows
    Binding,
    /// Delivering rows
    Streaming,
    /// Result resolved; consuming the rest of the query's messages
    Draining,
}

#[derive(Debug)]
enum State {
    ParseSent,
    ParseComplete,
    ParameterDescribed,
    RowsDescribed(Arc<[ColumnDescription]>),
    NoDataDescribed,
    BindCompleteNoRows,
    Streaming {
        columns: Arc<[ColumnDescription]>,
        buffer: RowBuffer,
    },
    /// Stream cancelled; rows are discarded.
    Drain(Arc<[ColumnDescription]>),
    CommandComplete,
    EmptyQuery,
    Failed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ParseSent => "waiting for ParseComplete",
            State::ParseComplete => "waiting for ParameterDescription",
            State::ParameterDescribed => "waiting for RowDescription or NoData",
            State::RowsDescribed(_) | State::NoDataDescribed => "waiting for BindComplete",
            State::BindCompleteNoRows => "waiting for CommandComplete",
            State::Streaming { .. } => "streaming rows",
            State::Drain(_) => "draining a cancelled stream",
            State::CommandComplete | State::EmptyQuery | State::Failed => {
                "waiting for ReadyForQuery"
            }
        }
    }
}

/// State of one extended query.
#[derive(Debug)]
pub struct ExtendedQueryStateMachine {
    state: State,
    /// Present until the task's result has been handed out.
    task: Option<ExtendedQueryTask>,
    parameter_types: Vec<Oid>,
    span: Span,
}

impl ExtendedQueryStateMachine {
    /// Start a task. Returns the machine and the encoded message sequence.
    pub fn start(mut task: ExtendedQueryTask) -> (Self, Vec<u8>) {
        let buf = task.take_message();
        let span = task.span().clone();
        debug!(parent: &span, params = task.params().len(), "sending extended query");
        let machine = Self {
            state: State::ParseSent,
            task: Some(task),
            parameter_types: Vec::new(),
            span,
        };
        (machine, buf)
    }

    /// Current phase.
    pub fn phase(&self) -> QueryPhase {
        match self.state {
            State::ParseSent => QueryPhase::Parsing,
            State::ParseComplete => QueryPhase::ParameterDescription,
            State::ParameterDescribed => QueryPhase::Describing,
            State::RowsDescribed(_) | State::NoDataDescribed | State::BindCompleteNoRows => {
                QueryPhase::Binding
            }
            State::Streaming { .. } => QueryPhase::Streaming,
            State::Drain(_) | State::CommandComplete | State::EmptyQuery | State::Failed => {
                QueryPhase::Draining
            }
        }
    }

    /// Parameter types reported by the server.
    pub fn parameter_types(&self) -> &[Oid] {
        &self.parameter_types
    }

    fn unexpected(&self, message: &'static str) -> Error {
        Error::UnexpectedMessage {
            message,
            state: self.state.name(),
        }
    }

    pub fn parse_complete_received(&mut self) -> Result<ConnectionAction> {
        match self.state {
            State::ParseSent => {
                self.state = State::ParseComplete;
                Ok(ConnectionAction::Wait)
            }
            _ => Err(self.unexpected("ParseComplete")),
        }
    }

    pub fn parameter_description_received(
        &mut self,
        description: ParameterDescription,
    ) -> Result<ConnectionAction> {
        match self.state {
            State::ParseComplete => {
                self.parameter_types = description.into_oids();
                trace!(parent: &self.span, parameter_types = ?self.parameter_types, "parameters described");
                self.state = State::ParameterDescribed;
                Ok(ConnectionAction::Wait)
            }
            _ => Err(self.unexpected("ParameterDescription")),
        }
    }

    /// Results are always bound in binary format, so every column is
    /// reported as binary whatever the server's description says.
    pub fn row_description_received(
        &mut self,
        description: RowDescription,
    ) -> Result<ConnectionAction> {
        match self.state {
            State::ParameterDescribed => {
                let columns: Arc<[ColumnDescription]> = description
                    .into_columns()
                    .into_iter()
                    .map(|column| ColumnDescription {
                        format: FormatCode::Binary,
                        ..column
                    })
                    .collect();
                self.state = State::RowsDescribed(columns);
                Ok(ConnectionAction::Wait)
            }
            _ => Err(self.unexpected("RowDescription")),
        }
    }

    pub fn no_data_received(&mut self) -> Result<ConnectionAction> {
        match self.state {
            State::ParameterDescribed => {
                self.state = State::NoDataDescribed;
                Ok(ConnectionAction::Wait)
            }
            _ => Err(self.unexpected("NoData")),
        }
    }

    pub fn bind_complete_received(&mut self) -> Result<ConnectionAction> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::RowsDescribed(columns) => match self.task.take() {
                Some(task) => {
                    self.state = State::Streaming {
                        columns: Arc::clone(&columns),
                        buffer: RowBuffer::new(),
                    };
                    Ok(ConnectionAction::SucceedQuery { task, columns })
                }
                // Cancelled before the stream existed.
                None => {
                    self.state = State::Drain(columns);
                    Ok(ConnectionAction::Wait)
                }
            },
            State::NoDataDescribed => {
                self.state = State::BindCompleteNoRows;
                Ok(ConnectionAction::Wait)
            }
            state => {
                self.state = state;
                Err(self.unexpected("BindComplete"))
            }
        }
    }

    pub fn data_row_received(&mut self, row: DataRow) -> Result<ConnectionAction> {
        let columns = match &self.state {
            State::Streaming { columns, .. } | State::Drain(columns) => columns.len(),
            _ => return Err(self.unexpected("DataRow")),
        };
        if row.len() != columns {
            debug!(parent: &self.span, expected = columns, received = row.len(), "column count mismatch");
            return Err(self.unexpected("DataRow"));
        }
        if let State::Streaming { buffer, .. } = &mut self.state {
            buffer.received_row(row);
        }
        Ok(ConnectionAction::Wait)
    }

    pub fn command_completed_received(&mut self, command_tag: String) -> Result<ConnectionAction> {
        match std::mem::replace(&mut self.state, State::CommandComplete) {
            State::BindCompleteNoRows => Ok(match self.task.take() {
                Some(task) => ConnectionAction::SucceedQueryNoRows { task, command_tag },
                None => ConnectionAction::Wait,
            }),
            State::Streaming { buffer, .. } => {
                debug!(parent: &self.span, %command_tag, "stream complete");
                Ok(ConnectionAction::ForwardStreamComplete {
                    rows: buffer.end(),
                    command_tag,
                })
            }
            State::Drain(_) => Ok(ConnectionAction::Wait),
            state => {
                self.state = state;
                Err(self.unexpected("CommandComplete"))
            }
        }
    }

    pub fn empty_query_received(&mut self) -> Result<ConnectionAction> {
        match self.state {
            State::BindCompleteNoRows => {
                self.state = State::EmptyQuery;
                Ok(match self.task.take() {
                    Some(task) => ConnectionAction::SucceedQueryNoRows {
                        task,
                        command_tag: String::new(),
                    },
                    None => ConnectionAction::Wait,
                })
            }
            _ => Err(self.unexpected("EmptyQueryResponse")),
        }
    }

    /// ErrorResponse that leaves the connection usable.
    pub fn error_received(&mut self, error: Error) -> ConnectionAction {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Streaming { buffer, .. } => ConnectionAction::ForwardStreamError {
                error,
                read: buffer.fail(),
                cleanup: None,
            },
            _ => match self.task.take() {
                Some(task) => ConnectionAction::FailQuery {
                    task,
                    error,
                    cleanup: None,
                },
                None => {
                    debug!(parent: &self.span, %error, "error after the result was resolved");
                    ConnectionAction::Wait
                }
            },
        }
    }

    /// The consumer cancelled. Row delivery stops; the remaining messages of
    /// the query are still consumed.
    pub fn cancel_query_stream(&mut self) -> ConnectionAction {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Streaming { columns, buffer } => {
                debug!(parent: &self.span, discarded = buffer.len(), "stream cancelled");
                self.state = State::Drain(columns);
                ConnectionAction::ForwardStreamError {
                    error: Error::QueryCancelled,
                    read: buffer.fail(),
                    cleanup: None,
                }
            }
            state => {
                self.state = state;
                match self.task.take() {
                    Some(task) => ConnectionAction::FailQuery {
                        task,
                        error: Error::QueryCancelled,
                        cleanup: None,
                    },
                    None => ConnectionAction::Wait,
                }
            }
        }
    }

    pub fn channel_read_complete(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::Streaming { buffer, .. } => match buffer.channel_read_complete() {
                Some(rows) => ConnectionAction::ForwardRows(rows),
                None => ConnectionAction::Wait,
            },
            _ => ConnectionAction::Wait,
        }
    }

    pub fn read_event_caught(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::Streaming { buffer, .. } => {
                if buffer.read_event_caught() {
                    ConnectionAction::Read
                } else {
                    ConnectionAction::Wait
                }
            }
            _ => ConnectionAction::Read,
        }
    }

    pub fn request_query_rows(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::Streaming { buffer, .. } => {
                if buffer.demand() {
                    ConnectionAction::Read
                } else {
                    ConnectionAction::Wait
                }
            }
            _ => ConnectionAction::Wait,
        }
    }

    /// ReadyForQuery ends the query. Valid only once its result is complete.
    pub fn ready_for_query_received(&mut self) -> Result<()> {
        match self.state {
            State::CommandComplete | State::EmptyQuery | State::Failed => Ok(()),
            _ => Err(self.unexpected("ReadyForQuery")),
        }
    }

    /// Fail whatever is still owed a result and attach the cleanup context.
    pub fn fail_with_cleanup(mut self, error: Error, cleanup: CleanupContext) -> ConnectionAction {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Streaming { buffer, .. } => ConnectionAction::ForwardStreamError {
                error,
                read: buffer.fail(),
                cleanup: Some(cleanup),
            },
            _ => match self.task.take() {
                Some(task) => ConnectionAction::FailQuery {
                    task,
                    error,
                    cleanup: Some(cleanup),
                },
                None => ConnectionAction::CloseConnectionAndCleanup(cleanup),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::value::Value;

    fn streaming() -> ExtendedQueryStateMachine {
        let params = vec![Value::binary(oid::INT4, 7_i32.to_be_bytes())];
        let (task, _pending) = ExtendedQueryTask::new("SELECT $1", params).unwrap();
        let (mut query, bytes) = ExtendedQueryStateMachine::start(task);
        assert_eq!(bytes.first(), Some(&b'P'));

        query.parse_complete_received().unwrap();
        query
            .parameter_description_received(vec![oid::INT4].into())
            .unwrap();
        let column = ColumnDescription {
            name: "n".into(),
            table_oid: 0,
            column_attribute_number: 0,
            data_type: oid::INT4,
            data_type_size: 4,
            data_type_modifier: -1,
            format: FormatCode::Text,
        };
        query
            .row_description_received(vec![column].into())
            .unwrap();
        match query.bind_complete_received().unwrap() {
            ConnectionAction::SucceedQuery { columns, .. } => {
                assert_eq!(columns[0].format, FormatCode::Binary);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(query.parameter_types(), [oid::INT4]);
        query
    }

    fn row(n: u8) -> DataRow {
        DataRow::from_columns([Some(&[0, 0, 0, n][..])]).unwrap()
    }

    #[test]
    fn read_and_demand_while_streaming() {
        let mut query = streaming();
        assert_eq!(query.phase(), QueryPhase::Streaming);

        // First batch is implicitly demanded.
        assert!(matches!(query.read_event_caught(), ConnectionAction::Read));
        query.data_row_received(row(1)).unwrap();
        assert!(matches!(
            query.channel_read_complete(),
            ConnectionAction::ForwardRows(rows) if rows == [row(1)]
        ));

        // Held back until the consumer asks again.
        assert!(matches!(query.read_event_caught(), ConnectionAction::Wait));
        assert!(matches!(query.request_query_rows(), ConnectionAction::Read));
        assert!(matches!(query.request_query_rows(), ConnectionAction::Wait));
        assert!(matches!(query.read_event_caught(), ConnectionAction::Read));
    }

    #[test]
    fn read_and_demand_outside_streaming() {
        let params = Vec::new();
        let (task, _pending) = ExtendedQueryTask::new("SELECT 1", params).unwrap();
        let (mut query, _) = ExtendedQueryStateMachine::start(task);
        assert!(matches!(query.read_event_caught(), ConnectionAction::Read));
        assert!(matches!(query.request_query_rows(), ConnectionAction::Wait));
    }
}
