//! Connection-level state machine.
//!
//! Accepts tasks, runs one extended query at a time, routes every backend
//! message and transport event to the right place, and decides when the
//! connection has to be torn down. All operations return a single
//! [`ConnectionAction`] for the driver to perform.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{
    BackendMessage, DataRow, Notification, ParameterDescription, ParameterStatus, RowDescription,
};
use crate::protocol::types::TransactionStatus;
use crate::task::Task;

use super::action::{CleanupAction, CleanupContext, CloseNotification, ConnectionAction};
use super::extended::{ExtendedQueryStateMachine, QueryPhase};

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle, ready for a task
    ReadyForQuery,
    /// Running a task
    QueryIn(QueryPhase),
    /// Torn down after an error; waiting for the transport to close
    ErrorDraining,
    /// Terminate sent; waiting for the transport to close
    Closing,
    /// Closed
    Closed,
}

#[derive(Debug)]
enum State {
    ReadyForQuery,
    ExtendedQuery(ExtendedQueryStateMachine),
    ErrorDraining,
    Closing,
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ReadyForQuery => "ready for query",
            State::ExtendedQuery(_) => "running an extended query",
            State::ErrorDraining => "draining after an error",
            State::Closing => "closing",
            State::Closed => "closed",
        }
    }
}

/// Connection state machine.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: State,
    /// Tasks waiting for the in-flight one to finish
    queue: VecDeque<Task>,
    close_requested: bool,
    close_notification: Option<CloseNotification>,
    transaction_status: TransactionStatus,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// A machine for an established, idle connection.
    pub fn new() -> Self {
        Self {
            state: State::ReadyForQuery,
            queue: VecDeque::new(),
            close_requested: false,
            close_notification: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        match &self.state {
            State::ReadyForQuery => ConnectionState::ReadyForQuery,
            State::ExtendedQuery(query) => ConnectionState::QueryIn(query.phase()),
            State::ErrorDraining => ConnectionState::ErrorDraining,
            State::Closing => ConnectionState::Closing,
            State::Closed => ConnectionState::Closed,
        }
    }

    /// Transaction status from the latest ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Number of tasks waiting behind the in-flight one.
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    // === Caller operations ===

    /// Submit a task.
    ///
    /// Starts it when idle. While another task is in flight it is queued and
    /// started after the next ReadyForQuery. A closing or closed connection
    /// fails it right away.
    pub fn enqueue(&mut self, task: Task) -> ConnectionAction {
        if self.close_requested {
            return fail_closed(task);
        }
        match self.state {
            State::ReadyForQuery => self.start(task),
            State::ExtendedQuery(_) => {
                self.queue.push_back(task);
                ConnectionAction::Wait
            }
            State::ErrorDraining | State::Closing | State::Closed => fail_closed(task),
        }
    }

    /// The consumer wants more rows from the current stream.
    pub fn request_query_rows(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::ExtendedQuery(query) => query.request_query_rows(),
            _ => ConnectionAction::Wait,
        }
    }

    /// The consumer abandoned the current query.
    pub fn cancel_query_stream(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::ExtendedQuery(query) => query.cancel_query_stream(),
            _ => ConnectionAction::Wait,
        }
    }

    /// Close the connection once the in-flight task and the queue are done.
    pub fn close(&mut self, notification: Option<CloseNotification>) -> ConnectionAction {
        match self.state {
            State::ReadyForQuery => {
                self.state = State::Closing;
                ConnectionAction::CloseConnection(notification)
            }
            State::ExtendedQuery(_) | State::ErrorDraining | State::Closing => {
                self.close_requested = true;
                if notification.is_some() {
                    self.close_notification = notification;
                }
                ConnectionAction::Wait
            }
            State::Closed => {
                if let Some(notification) = notification {
                    let _ = notification.send(());
                }
                ConnectionAction::Wait
            }
        }
    }

    // === Transport events ===

    /// The transport is about to wait for bytes.
    pub fn read_event_caught(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::ExtendedQuery(query) => query.read_event_caught(),
            State::ReadyForQuery | State::ErrorDraining | State::Closing => ConnectionAction::Read,
            State::Closed => ConnectionAction::Wait,
        }
    }

    /// A batch of reads has been fully delivered.
    pub fn channel_read_complete(&mut self) -> ConnectionAction {
        match &mut self.state {
            State::ExtendedQuery(query) => query.channel_read_complete(),
            _ => ConnectionAction::Wait,
        }
    }

    /// The transport failed.
    pub fn error_caught(&mut self, error: Error) -> ConnectionAction {
        match self.state {
            State::ReadyForQuery | State::ExtendedQuery(_) => {
                self.teardown(error, CleanupAction::Close)
            }
            State::ErrorDraining | State::Closing | State::Closed => {
                debug!(%error, "transport error while closing");
                ConnectionAction::Wait
            }
        }
    }

    /// The transport is closed.
    pub fn closed(&mut self) -> ConnectionAction {
        match self.state {
            State::ErrorDraining | State::Closing => {
                self.state = State::Closed;
                ConnectionAction::FireChannelInactive(self.close_notification.take())
            }
            State::ReadyForQuery | State::ExtendedQuery(_) => {
                self.teardown(Error::ConnectionClosed, CleanupAction::None)
            }
            State::Closed => ConnectionAction::Wait,
        }
    }

    // === Backend messages ===

    /// Route a backend message to its handler.
    pub fn message_received(&mut self, message: BackendMessage) -> ConnectionAction {
        match message {
            BackendMessage::ParseComplete => self.parse_complete_received(),
            BackendMessage::ParameterDescription(description) => {
                self.parameter_description_received(description)
            }
            BackendMessage::RowDescription(description) => {
                self.row_description_received(description)
            }
            BackendMessage::NoData => self.no_data_received(),
            BackendMessage::BindComplete => self.bind_complete_received(),
            BackendMessage::DataRow(row) => self.data_row_received(row),
            BackendMessage::CommandComplete(complete) => {
                self.command_completed_received(complete.tag)
            }
            BackendMessage::EmptyQueryResponse => self.empty_query_received(),
            BackendMessage::ErrorResponse(fields) => self.error_received(fields),
            BackendMessage::ReadyForQuery(status) => self.ready_for_query_received(status),
            BackendMessage::NoticeResponse(fields) => self.notice_received(fields),
            BackendMessage::ParameterStatus(status) => self.parameter_status_received(status),
            BackendMessage::NotificationResponse(notification) => {
                self.notification_received(notification)
            }
            BackendMessage::Authentication(_)
            | BackendMessage::BackendKeyData(_)
            | BackendMessage::CloseComplete
            | BackendMessage::PortalSuspended => self.unexpected_message(message.name()),
        }
    }

    pub fn parse_complete_received(&mut self) -> ConnectionAction {
        self.with_query("ParseComplete", |query| query.parse_complete_received())
    }

    pub fn parameter_description_received(
        &mut self,
        description: ParameterDescription,
    ) -> ConnectionAction {
        self.with_query("ParameterDescription", |query| {
            query.parameter_description_received(description)
        })
    }

    pub fn row_description_received(&mut self, description: RowDescription) -> ConnectionAction {
        self.with_query("RowDescription", |query| {
            query.row_description_received(description)
        })
    }

    pub fn no_data_received(&mut self) -> ConnectionAction {
        self.with_query("NoData", |query| query.no_data_received())
    }

    pub fn bind_complete_received(&mut self) -> ConnectionAction {
        self.with_query("BindComplete", |query| query.bind_complete_received())
    }

    pub fn data_row_received(&mut self, row: DataRow) -> ConnectionAction {
        self.with_query("DataRow", |query| query.data_row_received(row))
    }

    pub fn command_completed_received(&mut self, command_tag: String) -> ConnectionAction {
        self.with_query("CommandComplete", |query| {
            query.command_completed_received(command_tag)
        })
    }

    pub fn empty_query_received(&mut self) -> ConnectionAction {
        self.with_query("EmptyQueryResponse", |query| query.empty_query_received())
    }

    /// ErrorResponse. Fails the current task or stream; errors that leave the
    /// connection unusable also tear it down.
    pub fn error_received(&mut self, fields: ErrorFields) -> ConnectionAction {
        let error = Error::Server(fields);
        let broken = error.is_connection_broken();
        match &mut self.state {
            State::ErrorDraining | State::Closing | State::Closed => {
                debug!(%error, "server error while closing");
                ConnectionAction::Wait
            }
            State::ExtendedQuery(query) if !broken => query.error_received(error),
            State::ReadyForQuery | State::ExtendedQuery(_) => {
                self.teardown(error, CleanupAction::Close)
            }
        }
    }

    pub fn ready_for_query_received(&mut self, status: TransactionStatus) -> ConnectionAction {
        let state = self.state.name();
        let finished = match &mut self.state {
            State::ExtendedQuery(query) => query.ready_for_query_received(),
            State::ReadyForQuery => Err(Error::UnexpectedMessage {
                message: "ReadyForQuery",
                state,
            }),
            State::ErrorDraining | State::Closing | State::Closed => {
                return ConnectionAction::Wait;
            }
        };
        if let Err(error) = finished {
            return self.teardown(error, CleanupAction::Close);
        }
        self.transaction_status = status;
        self.state = State::ReadyForQuery;
        self.next_task()
    }

    pub fn notice_received(&mut self, fields: ErrorFields) -> ConnectionAction {
        debug!(notice = %fields, "server notice");
        ConnectionAction::Wait
    }

    pub fn parameter_status_received(&mut self, status: ParameterStatus) -> ConnectionAction {
        debug!(name = %status.name, value = %status.value, "server parameter");
        ConnectionAction::Wait
    }

    pub fn notification_received(&mut self, notification: Notification) -> ConnectionAction {
        debug!(
            pid = notification.pid,
            channel = %notification.channel,
            "notification"
        );
        ConnectionAction::Wait
    }

    /// A backend message that has no place in the extended query flow.
    pub fn unexpected_message(&mut self, message: &'static str) -> ConnectionAction {
        match self.state {
            State::ErrorDraining | State::Closing | State::Closed => ConnectionAction::Wait,
            _ => {
                let error = Error::UnexpectedMessage {
                    message,
                    state: self.state.name(),
                };
                self.teardown(error, CleanupAction::Close)
            }
        }
    }

    // === Internals ===

    fn start(&mut self, task: Task) -> ConnectionAction {
        match task {
            Task::ExtendedQuery(task) => {
                let (query, bytes) = ExtendedQueryStateMachine::start(task);
                self.state = State::ExtendedQuery(query);
                ConnectionAction::SendParseDescribeBindExecuteSync(bytes)
            }
        }
    }

    fn next_task(&mut self) -> ConnectionAction {
        if let Some(task) = self.queue.pop_front() {
            return self.start(task);
        }
        if self.close_requested {
            self.state = State::Closing;
            return ConnectionAction::CloseConnection(self.close_notification.take());
        }
        ConnectionAction::FireReadyForQuery
    }

    fn with_query(
        &mut self,
        message: &'static str,
        step: impl FnOnce(&mut ExtendedQueryStateMachine) -> Result<ConnectionAction>,
    ) -> ConnectionAction {
        let state = self.state.name();
        let result = match &mut self.state {
            State::ExtendedQuery(query) => step(query),
            State::ReadyForQuery => Err(Error::UnexpectedMessage { message, state }),
            State::ErrorDraining | State::Closing | State::Closed => Ok(ConnectionAction::Wait),
        };
        result.unwrap_or_else(|error| self.teardown(error, CleanupAction::Close))
    }

    fn teardown(&mut self, error: Error, action: CleanupAction) -> ConnectionAction {
        warn!(%error, state = self.state.name(), "tearing down connection");
        let cleanup = CleanupContext {
            action,
            pending_tasks: self.queue.drain(..).collect(),
            error: error.clone(),
            close_notification: self.close_notification.take(),
        };
        let next = match action {
            CleanupAction::Close => State::ErrorDraining,
            CleanupAction::None => State::Closed,
        };
        match std::mem::replace(&mut self.state, next) {
            State::ExtendedQuery(query) => query.fail_with_cleanup(error, cleanup),
            _ => ConnectionAction::CloseConnectionAndCleanup(cleanup),
        }
    }
}

fn fail_closed(task: Task) -> ConnectionAction {
    match task {
        Task::ExtendedQuery(task) => ConnectionAction::FailQuery {
            task,
            error: Error::ConnectionClosed,
            cleanup: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::{Authentication, ColumnDescription, CommandComplete};
    use crate::protocol::types::{FormatCode, oid};
    use crate::task::{ExtendedQueryTask, PendingQuery, QueryOutcome};
    use crate::value::Value;

    fn task(sql: &str) -> (Task, PendingQuery) {
        let params = vec![Value::binary(oid::INT4, 1i32.to_be_bytes())];
        let (task, pending) = ExtendedQueryTask::new(sql, params).unwrap();
        (task.into(), pending)
    }

    fn column(name: &str) -> ColumnDescription {
        ColumnDescription {
            name: name.into(),
            table_oid: 0,
            column_attribute_number: 0,
            data_type: oid::INT4,
            data_type_size: 4,
            data_type_modifier: -1,
            format: FormatCode::Text,
        }
    }

    fn row(n: i32) -> DataRow {
        DataRow::from_columns([Some(&n.to_be_bytes()[..])]).unwrap()
    }

    fn complete(tag: &str) -> BackendMessage {
        BackendMessage::CommandComplete(CommandComplete { tag: tag.into() })
    }

    fn server_error(severity: &str, code: &str) -> ErrorFields {
        ErrorFields {
            severity: Some(severity.into()),
            code: Some(code.into()),
            message: Some("boom".into()),
            ..Default::default()
        }
    }

    fn assert_wait(action: ConnectionAction) {
        assert!(action.is_wait(), "expected Wait, got {action:?}");
    }

    /// Start a task and feed it up to BindComplete, with `columns` result columns.
    fn start_streaming(m: &mut ConnectionStateMachine, columns: usize) -> PendingQuery {
        let (task, mut pending) = task("SELECT $1");
        assert!(matches!(
            m.enqueue(task),
            ConnectionAction::SendParseDescribeBindExecuteSync(_)
        ));
        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        let description = (0..columns).map(|i| column(&format!("c{i}"))).collect::<Vec<_>>();
        assert_wait(m.message_received(BackendMessage::RowDescription(description.into())));
        match m.message_received(BackendMessage::BindComplete) {
            ConnectionAction::SucceedQuery { task, columns: cols } => {
                assert_eq!(cols.len(), columns);
                assert!(cols.iter().all(|c| c.format == FormatCode::Binary));
                drop(task);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(pending.try_outcome(), Some(Err(Error::ConnectionClosed))));
        pending
    }

    #[test]
    fn query_without_rows() {
        let mut m = ConnectionStateMachine::new();
        let (task, mut pending) = task("DELETE FROM t WHERE id = $1");
        match m.enqueue(task) {
            ConnectionAction::SendParseDescribeBindExecuteSync(bytes) => assert_eq!(bytes[0], b'P'),
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Parsing));

        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        assert_wait(m.message_received(BackendMessage::NoData));
        assert_wait(m.message_received(BackendMessage::BindComplete));
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Binding));

        match m.message_received(complete("DELETE 1")) {
            ConnectionAction::SucceedQueryNoRows { task, command_tag } => {
                assert_eq!(command_tag, "DELETE 1");
                task.succeed_no_rows(command_tag);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            pending.try_outcome(),
            Some(Ok(QueryOutcome::NoRows { command_tag })) if command_tag == "DELETE 1"
        ));

        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
        assert_eq!(m.state(), ConnectionState::ReadyForQuery);
    }

    #[test]
    fn rows_follow_demand() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Streaming));

        assert_wait(m.message_received(BackendMessage::DataRow(row(1))));
        match m.channel_read_complete() {
            ConnectionAction::ForwardRows(rows) => assert_eq!(rows, vec![row(1)]),
            other => panic!("unexpected action {other:?}"),
        }
        assert_wait(m.read_event_caught());
        assert!(matches!(m.request_query_rows(), ConnectionAction::Read));

        assert_wait(m.message_received(BackendMessage::DataRow(row(2))));
        assert_wait(m.message_received(BackendMessage::DataRow(row(3))));
        match m.channel_read_complete() {
            ConnectionAction::ForwardRows(rows) => assert_eq!(rows, vec![row(2), row(3)]),
            other => panic!("unexpected action {other:?}"),
        }
        assert_wait(m.request_query_rows());
        assert!(matches!(m.read_event_caught(), ConnectionAction::Read));

        assert_wait(m.message_received(BackendMessage::DataRow(row(4))));
        match m.message_received(complete("SELECT 4")) {
            ConnectionAction::ForwardStreamComplete { rows, command_tag } => {
                assert_eq!(rows, vec![row(4)]);
                assert_eq!(command_tag, "SELECT 4");
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(m.read_event_caught(), ConnectionAction::Read));
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
    }

    #[test]
    fn authentication_during_query_closes_connection() {
        let mut m = ConnectionStateMachine::new();
        let (task, _pending) = task("SELECT $1");
        m.enqueue(task);
        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        match m.message_received(BackendMessage::Authentication(Authentication {
            method: 0,
            data: Vec::new(),
        })) {
            ConnectionAction::FailQuery {
                error: Error::UnexpectedMessage { message, .. },
                cleanup: Some(cleanup),
                ..
            } => {
                assert_eq!(message, "Authentication");
                assert_eq!(cleanup.action, CleanupAction::Close);
                assert!(cleanup.pending_tasks.is_empty());
                assert!(cleanup.close_notification.is_none());
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(m.state(), ConnectionState::ErrorDraining);
        assert!(matches!(m.closed(), ConnectionAction::FireChannelInactive(None)));
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn cancel_right_after_bind_drains_query() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);

        assert!(matches!(
            m.cancel_query_stream(),
            ConnectionAction::ForwardStreamError {
                error: Error::QueryCancelled,
                read: false,
                cleanup: None,
            }
        ));
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Draining));
        assert_wait(m.message_received(BackendMessage::DataRow(row(1))));
        assert_wait(m.channel_read_complete());
        assert!(matches!(m.read_event_caught(), ConnectionAction::Read));
        assert_wait(m.message_received(complete("SELECT 1")));
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
    }

    #[test]
    fn cancel_while_holding_back_reads() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);
        assert_wait(m.message_received(BackendMessage::DataRow(row(1))));
        assert!(matches!(m.channel_read_complete(), ConnectionAction::ForwardRows(_)));
        assert_wait(m.read_event_caught());

        assert!(matches!(
            m.cancel_query_stream(),
            ConnectionAction::ForwardStreamError {
                error: Error::QueryCancelled,
                read: true,
                cleanup: None,
            }
        ));
    }

    #[test]
    fn cancel_before_result_fails_task() {
        let mut m = ConnectionStateMachine::new();
        let (task, _pending) = task("SELECT $1");
        m.enqueue(task);
        assert!(matches!(
            m.cancel_query_stream(),
            ConnectionAction::FailQuery {
                error: Error::QueryCancelled,
                cleanup: None,
                ..
            }
        ));
        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        assert_wait(m.message_received(BackendMessage::RowDescription(
            vec![column("id")].into(),
        )));
        assert_wait(m.message_received(BackendMessage::BindComplete));
        assert_wait(m.message_received(BackendMessage::DataRow(row(1))));
        assert_wait(m.message_received(complete("SELECT 1")));
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
    }

    #[test]
    fn server_error_fails_query_and_keeps_connection() {
        let mut m = ConnectionStateMachine::new();
        let (task, _pending) = task("SELEC 1");
        m.enqueue(task);
        match m.message_received(BackendMessage::ErrorResponse(server_error("ERROR", "42601"))) {
            ConnectionAction::FailQuery {
                error,
                cleanup: None,
                ..
            } => assert_eq!(error.sqlstate(), Some("42601")),
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
    }

    #[test]
    fn server_error_while_streaming_fails_stream() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);
        assert_wait(m.message_received(BackendMessage::DataRow(row(1))));
        match m.message_received(BackendMessage::ErrorResponse(server_error("ERROR", "22012"))) {
            ConnectionAction::ForwardStreamError {
                error,
                read: false,
                cleanup: None,
            } => assert_eq!(error.sqlstate(), Some("22012")),
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Failed)),
            ConnectionAction::FireReadyForQuery
        ));
        assert_eq!(m.transaction_status(), TransactionStatus::Failed);
    }

    #[test]
    fn fatal_error_fails_queued_tasks() {
        let mut m = ConnectionStateMachine::new();
        let (first, _first) = task("SELECT $1");
        let (second, mut second_pending) = task("SELECT $1");
        m.enqueue(first);
        assert_wait(m.enqueue(second));

        match m.message_received(BackendMessage::ErrorResponse(server_error("FATAL", "57P01"))) {
            ConnectionAction::FailQuery {
                cleanup: Some(cleanup),
                ..
            } => {
                assert_eq!(cleanup.pending_tasks.len(), 1);
                assert!(cleanup.fail_pending_tasks().is_none());
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            second_pending.try_outcome(),
            Some(Err(Error::Server(fields))) if fields.code.as_deref() == Some("57P01")
        ));
        assert_eq!(m.state(), ConnectionState::ErrorDraining);
    }

    #[test]
    fn queued_task_starts_after_ready_for_query() {
        let mut m = ConnectionStateMachine::new();
        let (first, _first) = task("DELETE FROM t");
        let (second, _second) = task("DELETE FROM u");
        m.enqueue(first);
        assert_wait(m.enqueue(second));
        assert_eq!(m.queued_tasks(), 1);

        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        assert_wait(m.message_received(BackendMessage::NoData));
        assert_wait(m.message_received(BackendMessage::BindComplete));
        assert!(matches!(
            m.message_received(complete("DELETE 0")),
            ConnectionAction::SucceedQueryNoRows { .. }
        ));
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::SendParseDescribeBindExecuteSync(_)
        ));
        assert_eq!(m.queued_tasks(), 0);
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Parsing));
    }

    #[test]
    fn enqueue_after_close_fails() {
        let mut m = ConnectionStateMachine::new();
        match m.closed() {
            ConnectionAction::CloseConnectionAndCleanup(cleanup) => {
                assert_eq!(cleanup.action, CleanupAction::None);
                assert!(matches!(cleanup.error, Error::ConnectionClosed));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(m.state(), ConnectionState::Closed);

        let (task, _pending) = task("SELECT 1");
        assert!(matches!(
            m.enqueue(task),
            ConnectionAction::FailQuery {
                error: Error::ConnectionClosed,
                cleanup: None,
                ..
            }
        ));
    }

    #[test]
    fn column_count_mismatch_closes_connection() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);
        let wide = DataRow::from_columns([Some(&b"a"[..]), None]).unwrap();
        match m.message_received(BackendMessage::DataRow(wide)) {
            ConnectionAction::ForwardStreamError {
                error: Error::UnexpectedMessage { message: "DataRow", .. },
                cleanup: Some(cleanup),
                ..
            } => assert_eq!(cleanup.action, CleanupAction::Close),
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(m.state(), ConnectionState::ErrorDraining);
        assert_wait(m.message_received(BackendMessage::DataRow(row(2))));
    }

    #[test]
    fn empty_query() {
        let mut m = ConnectionStateMachine::new();
        let (task, _pending) = task("");
        m.enqueue(task);
        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            Vec::new().into(),
        )));
        assert_wait(m.message_received(BackendMessage::NoData));
        assert_wait(m.message_received(BackendMessage::BindComplete));
        assert!(matches!(
            m.message_received(BackendMessage::EmptyQueryResponse),
            ConnectionAction::SucceedQueryNoRows { command_tag, .. } if command_tag.is_empty()
        ));
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::FireReadyForQuery
        ));
    }

    #[test]
    fn close_waits_for_running_query() {
        let mut m = ConnectionStateMachine::new();
        let (task, _pending) = task("DELETE FROM t");
        m.enqueue(task);
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        assert_wait(m.close(Some(tx)));

        let (late, _late) = self::task("SELECT 1");
        assert!(matches!(
            m.enqueue(late),
            ConnectionAction::FailQuery {
                error: Error::ConnectionClosed,
                ..
            }
        ));

        assert_wait(m.message_received(BackendMessage::ParseComplete));
        assert_wait(m.message_received(BackendMessage::ParameterDescription(
            vec![oid::INT4].into(),
        )));
        assert_wait(m.message_received(BackendMessage::NoData));
        assert_wait(m.message_received(BackendMessage::BindComplete));
        assert!(matches!(
            m.message_received(complete("DELETE 3")),
            ConnectionAction::SucceedQueryNoRows { .. }
        ));
        match m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)) {
            ConnectionAction::CloseConnection(Some(notify)) => notify.send(()).unwrap(),
            other => panic!("unexpected action {other:?}"),
        }
        assert!(rx.try_recv().is_ok());
        assert_eq!(m.state(), ConnectionState::Closing);
        assert!(matches!(m.closed(), ConnectionAction::FireChannelInactive(None)));
    }

    #[test]
    fn ready_for_query_while_idle_is_unexpected() {
        let mut m = ConnectionStateMachine::new();
        assert!(matches!(
            m.message_received(BackendMessage::ReadyForQuery(TransactionStatus::Idle)),
            ConnectionAction::CloseConnectionAndCleanup(CleanupContext {
                error: Error::UnexpectedMessage { message: "ReadyForQuery", .. },
                ..
            })
        ));
    }

    #[test]
    fn async_messages_are_ignored() {
        let mut m = ConnectionStateMachine::new();
        start_streaming(&mut m, 1);
        assert_wait(m.message_received(BackendMessage::NoticeResponse(server_error(
            "NOTICE", "00000",
        ))));
        assert_wait(m.message_received(BackendMessage::ParameterStatus(ParameterStatus {
            name: "TimeZone".into(),
            value: "UTC".into(),
        })));
        assert_eq!(m.state(), ConnectionState::QueryIn(QueryPhase::Streaming));
    }
}
