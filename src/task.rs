//! Work submitted to a connection.
//!
//! A task is owned by the connection state machine until it reaches an
//! outcome; the outcome is then handed to the submitter through a one-shot
//! channel. Every task resolves exactly once: if it is dropped unresolved
//! (for example because the driver went away) the submitter sees
//! [`Error::ConnectionClosed`].

use tokio::sync::oneshot;
use tracing::{Span, debug, warn};

use crate::error::{Error, Result};
use crate::protocol::frontend::write_extended_query;
use crate::stream::RowStream;
use crate::value::Value;

/// Successful outcome of an extended query.
#[derive(Debug)]
pub enum QueryOutcome {
    /// The statement returned no result columns.
    NoRows {
        /// Command tag, e.g. `"DELETE 1"` (empty for an empty query)
        command_tag: String,
    },
    /// The statement returns rows; they arrive through the stream.
    Rows(RowStream),
}

impl QueryOutcome {
    /// Returns the row stream, if the statement returns rows.
    pub fn into_rows(self) -> Option<RowStream> {
        match self {
            QueryOutcome::Rows(stream) => Some(stream),
            QueryOutcome::NoRows { .. } => None,
        }
    }
}

/// Receiving end of a task's result channel.
#[derive(Debug)]
pub struct PendingQuery {
    rx: oneshot::Receiver<Result<QueryOutcome>>,
}

impl PendingQuery {
    /// Wait for the query outcome.
    pub async fn outcome(self) -> Result<QueryOutcome> {
        self.rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Take the outcome if it has already been delivered.
    pub fn try_outcome(&mut self) -> Option<Result<QueryOutcome>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::ConnectionClosed)),
        }
    }
}

/// A unit of work for the connection.
#[derive(Debug)]
pub enum Task {
    /// Parameterized query over the extended query protocol.
    ExtendedQuery(ExtendedQueryTask),
}

impl Task {
    /// Resolve the task with a failure.
    pub fn fail(self, error: Error) {
        match self {
            Task::ExtendedQuery(task) => task.fail(error),
        }
    }
}

impl From<ExtendedQueryTask> for Task {
    fn from(task: ExtendedQueryTask) -> Self {
        Task::ExtendedQuery(task)
    }
}

/// One parameterized query and the channel its outcome is delivered on.
#[derive(Debug)]
pub struct ExtendedQueryTask {
    query: String,
    params: Vec<Value>,
    /// Parse through Sync, encoded up front so oversized input fails here.
    message: Vec<u8>,
    result: Option<oneshot::Sender<Result<QueryOutcome>>>,
    span: Span,
}

impl ExtendedQueryTask {
    /// Create a task and the handle its outcome is delivered to.
    ///
    /// Fails with [`Error::InvalidUsage`] if the parameters cannot be encoded
    /// into a Bind message.
    pub fn new(query: impl Into<String>, params: Vec<Value>) -> Result<(Self, PendingQuery)> {
        let query = query.into();
        let mut message = Vec::new();
        write_extended_query(&mut message, &query, &params)?;
        let (tx, rx) = oneshot::channel();
        let span = tracing::debug_span!("extended_query", query = %query);
        let task = Self {
            query,
            params,
            message,
            result: Some(tx),
            span,
        };
        Ok((task, PendingQuery { rx }))
    }

    /// Log this task's events under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// SQL text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bound parameters.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Hand out the encoded message sequence. Empty on a second call.
    pub(crate) fn take_message(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.message)
    }

    /// Span task events are logged under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Resolve with "succeeded, no rows".
    pub fn succeed_no_rows(mut self, command_tag: String) {
        debug!(parent: &self.span, %command_tag, "query succeeded without rows");
        self.complete(Ok(QueryOutcome::NoRows { command_tag }));
    }

    /// Resolve with a row stream.
    pub fn succeed_with_stream(mut self, stream: RowStream) {
        debug!(parent: &self.span, columns = stream.columns().len(), "query streaming rows");
        self.complete(Ok(QueryOutcome::Rows(stream)));
    }

    /// Resolve with a failure.
    pub fn fail(mut self, error: Error) {
        debug!(parent: &self.span, %error, "query failed");
        self.complete(Err(error));
    }

    fn complete(&mut self, outcome: Result<QueryOutcome>) {
        if let Some(tx) = self.result.take() {
            // The submitter may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for ExtendedQueryTask {
    fn drop(&mut self) {
        if self.result.is_some() {
            warn!(parent: &self.span, "query task dropped without an outcome");
            self.complete(Err(Error::ConnectionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exactly_once() {
        let (task, mut pending) = ExtendedQueryTask::new("DELETE FROM t", vec![]).unwrap();
        assert!(pending.try_outcome().is_none());
        task.succeed_no_rows("DELETE 1".into());
        match pending.try_outcome() {
            Some(Ok(QueryOutcome::NoRows { command_tag })) => assert_eq!(command_tag, "DELETE 1"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn dropped_task_reports_closed_connection() {
        let (task, mut pending) = ExtendedQueryTask::new("SELECT 1", vec![]).unwrap();
        drop(Task::from(task));
        assert!(matches!(pending.try_outcome(), Some(Err(Error::ConnectionClosed))));
    }

    #[test]
    fn failure_is_delivered() {
        let (task, mut pending) = ExtendedQueryTask::new("SELECT 1", vec![]).unwrap();
        Task::from(task).fail(Error::QueryCancelled);
        assert!(matches!(pending.try_outcome(), Some(Err(Error::QueryCancelled))));
    }

    #[test]
    fn unencodable_parameters_are_rejected_up_front() {
        let params = vec![Value::null(crate::protocol::types::oid::TEXT); usize::from(u16::MAX)];
        assert!(matches!(
            ExtendedQueryTask::new("SELECT 1", params),
            Err(Error::InvalidUsage(_))
        ));
    }
}
