//! Action types for state machine I/O requests.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::protocol::backend::{ColumnDescription, DataRow};
use crate::task::{ExtendedQueryTask, Task};

/// Notified once the connection has been closed.
pub type CloseNotification = oneshot::Sender<()>;

/// What to do with the transport when tearing the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Close the transport.
    Close,
    /// The transport is already gone.
    None,
}

/// Everything needed to fail outstanding work and tear the connection down.
#[derive(Debug)]
pub struct CleanupContext {
    /// Transport action to take
    pub action: CleanupAction,
    /// Tasks that were queued but never started; each is owed a result
    pub pending_tasks: Vec<Task>,
    /// Cause of the teardown
    pub error: Error,
    /// Notified once the connection is closed
    pub close_notification: Option<CloseNotification>,
}

impl CleanupContext {
    /// Fail every pending task with the teardown cause and return the close
    /// notification for the caller to fire once the transport is closed.
    pub fn fail_pending_tasks(self) -> Option<CloseNotification> {
        for task in self.pending_tasks {
            task.fail(self.error.clone());
        }
        self.close_notification
    }
}

/// Action requested by the connection state machine.
///
/// Every operation of the machine returns exactly one action; the driver
/// performs it and feeds the next event back in.
#[derive(Debug)]
pub enum ConnectionAction {
    /// Nothing to do until the next event.
    Wait,
    /// Read more bytes from the transport.
    Read,
    /// Write the encoded Parse, Describe, Bind, Execute, Sync sequence.
    SendParseDescribeBindExecuteSync(Vec<u8>),
    /// The connection is idle and may accept new work.
    FireReadyForQuery,
    /// Resolve the task with a row stream over `columns`.
    SucceedQuery {
        task: ExtendedQueryTask,
        columns: Arc<[ColumnDescription]>,
    },
    /// Resolve the task with "succeeded, no rows".
    SucceedQueryNoRows {
        task: ExtendedQueryTask,
        command_tag: String,
    },
    /// Resolve the task with a failure, then clean up if a context is given.
    FailQuery {
        task: ExtendedQueryTask,
        error: Error,
        cleanup: Option<CleanupContext>,
    },
    /// Deliver a batch of rows to the current stream.
    ForwardRows(Vec<DataRow>),
    /// Deliver the final rows and complete the current stream.
    ForwardStreamComplete {
        rows: Vec<DataRow>,
        command_tag: String,
    },
    /// Fail the current stream. `read` tells whether a read must still be
    /// issued to keep draining the connection.
    ForwardStreamError {
        error: Error,
        read: bool,
        cleanup: Option<CleanupContext>,
    },
    /// Tear the connection down.
    CloseConnectionAndCleanup(CleanupContext),
    /// Gracefully close: send Terminate, close the transport, then notify.
    CloseConnection(Option<CloseNotification>),
    /// The transport is closed; nothing more will happen on this connection.
    FireChannelInactive(Option<CloseNotification>),
}

impl ConnectionAction {
    /// Returns true for [`ConnectionAction::Wait`].
    pub fn is_wait(&self) -> bool {
        matches!(self, ConnectionAction::Wait)
    }
}
