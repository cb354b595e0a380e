//! Asynchronous connection driver.
//!
//! [`Connection`] is a single task that owns the transport and the
//! [`ConnectionStateMachine`]. It serialises three event sources: requests
//! from [`Client`] handles, demand and cancel signals from row streams, and
//! bytes from the server. Every event is fed to the state machine and the
//! returned action is performed before the next event is looked at.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::split_message;
use crate::protocol::frontend::write_terminate;
use crate::state::{
    CleanupAction, CleanupContext, CloseNotification, ConnectionAction, ConnectionState,
    ConnectionStateMachine,
};
use crate::stream::{RowStream, RowStreamSink, StreamControl, StreamId};
use crate::task::{ExtendedQueryTask, PendingQuery, Task};

/// Request from a [`Client`] to its [`Connection`].
#[derive(Debug)]
enum Request {
    Enqueue(Task),
    Close(CloseNotification),
}

/// Wrap an established, authenticated transport.
///
/// Returns the client handle and the connection task. The connection does
/// nothing until [`Connection::run`] is polled, typically on its own task.
pub fn connect<S>(stream: S, opts: Opts) -> Result<(Client, Connection<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    opts.validate()?;
    let (requests_tx, requests_rx) = mpsc::channel(opts.request_queue_depth);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let connection = Connection {
        stream,
        read_buf: Vec::with_capacity(opts.read_buffer_size),
        machine: ConnectionStateMachine::new(),
        requests: requests_rx,
        requests_open: true,
        control_tx,
        control_rx,
        reading: false,
        next_stream_id: 1,
        sink: None,
        close_waiters: Vec::new(),
        failure: None,
        opts,
    };
    Ok((
        Client {
            requests: requests_tx,
        },
        connection,
    ))
}

/// Cloneable handle for submitting queries to a [`Connection`].
#[derive(Debug, Clone)]
pub struct Client {
    requests: mpsc::Sender<Request>,
}

impl Client {
    /// Submit a parameterized query.
    ///
    /// Resolves once the query is accepted by the connection task; the
    /// returned [`PendingQuery`] yields the outcome.
    pub async fn query<P: ToParams>(&self, sql: &str, params: P) -> Result<PendingQuery> {
        let (task, pending) = ExtendedQueryTask::new(sql, params.to_values()?)?;
        self.submit(task.into()).await?;
        Ok(pending)
    }

    /// Submit a prepared task, e.g. one carrying a caller-supplied span.
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.requests
            .send(Request::Enqueue(task))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Close the connection once all submitted work has finished.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Close(tx)).await.is_err() {
            return Ok(());
        }
        // A dropped notification means the connection task is gone, which is closed too.
        let _ = rx.await;
        Ok(())
    }

    /// Returns true once the connection task has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// Connection task driving one transport.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    read_buf: Vec<u8>,
    machine: ConnectionStateMachine,
    requests: mpsc::Receiver<Request>,
    requests_open: bool,
    control_tx: mpsc::UnboundedSender<StreamControl>,
    control_rx: mpsc::UnboundedReceiver<StreamControl>,
    /// The state machine allows reading from the transport.
    reading: bool,
    next_stream_id: StreamId,
    /// Sink of the stream currently receiving rows
    sink: Option<RowStreamSink>,
    close_waiters: Vec<CloseNotification>,
    /// Cause of an abnormal teardown
    failure: Option<Error>,
    opts: Opts,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Drive the connection until it is closed.
    ///
    /// Returns `Ok` after a graceful close and the teardown cause otherwise.
    pub async fn run(mut self) -> Result<()> {
        let action = self.machine.read_event_caught();
        self.handle(action).await;

        while self.machine.state() != ConnectionState::Closed {
            if self.read_buf.len() == self.read_buf.capacity() {
                self.read_buf.reserve(self.opts.read_buffer_size);
            }
            tokio::select! {
                request = self.requests.recv(), if self.requests_open => {
                    let action = match request {
                        Some(Request::Enqueue(task)) => self.machine.enqueue(task),
                        Some(Request::Close(notify)) => self.machine.close(Some(notify)),
                        None => {
                            debug!("all clients dropped, closing");
                            self.requests_open = false;
                            self.machine.close(None)
                        }
                    };
                    self.handle(action).await;
                }
                Some(control) = self.control_rx.recv() => {
                    self.stream_control(control).await;
                }
                read = self.stream.read_buf(&mut self.read_buf), if self.reading => {
                    match read {
                        Ok(0) => {
                            debug!("server closed the connection");
                            let action = self.machine.closed();
                            self.handle(action).await;
                        }
                        Ok(n) => {
                            trace!(bytes = n, "read");
                            self.process_read().await;
                        }
                        Err(error) => {
                            let action = self.machine.error_caught(error.into());
                            self.handle(action).await;
                        }
                    }
                }
                else => break,
            }
        }

        if let Some(sink) = self.sink.take() {
            sink.fail(Error::ConnectionClosed);
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
        match self.failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Feed every complete frame in the read buffer to the state machine,
    /// then report the read boundary.
    async fn process_read(&mut self) {
        let mut consumed = 0;
        loop {
            let frame = split_message(&self.read_buf[consumed..], self.opts.max_message_size)
                .and_then(|frame| match frame {
                    Some((raw, used)) => Ok(Some((raw.parse()?, used))),
                    None => Ok(None),
                });
            match frame {
                Ok(Some((message, used))) => {
                    consumed += used;
                    trace!(message = message.name(), "received");
                    let action = self.machine.message_received(message);
                    self.handle(action).await;
                }
                Ok(None) => break,
                Err(error) => {
                    let action = self.machine.error_caught(error);
                    self.handle(action).await;
                    break;
                }
            }
        }
        self.read_buf.drain(..consumed);

        let action = self.machine.channel_read_complete();
        self.handle(action).await;
        self.reading = false;
        let action = self.machine.read_event_caught();
        self.handle(action).await;
    }

    async fn stream_control(&mut self, control: StreamControl) {
        if self.sink.as_ref().map(RowStreamSink::id) != Some(control.stream_id()) {
            trace!(?control, "stale stream signal");
            return;
        }
        let action = match control {
            StreamControl::Demand(_) => self.machine.request_query_rows(),
            StreamControl::Cancel(_) => self.machine.cancel_query_stream(),
        };
        self.handle(action).await;
    }

    /// Perform an action and everything it leads to.
    async fn handle(&mut self, action: ConnectionAction) {
        let mut next = Some(action);
        while let Some(action) = next.take() {
            next = match self.perform(action).await {
                Ok(follow_up) => follow_up,
                Err(error) => Some(self.machine.error_caught(error)),
            };
        }
    }

    async fn perform(&mut self, action: ConnectionAction) -> Result<Option<ConnectionAction>> {
        match action {
            ConnectionAction::Wait => {}
            ConnectionAction::Read => self.reading = true,
            ConnectionAction::SendParseDescribeBindExecuteSync(bytes) => {
                self.stream.write_all(&bytes).await?;
                self.stream.flush().await?;
            }
            ConnectionAction::FireReadyForQuery => {
                trace!(status = ?self.machine.transaction_status(), "ready for query");
            }
            ConnectionAction::SucceedQuery { task, columns } => {
                let id = self.next_stream_id;
                self.next_stream_id += 1;
                let (stream, sink) = RowStream::channel(id, columns, self.control_tx.clone());
                self.sink = Some(sink);
                task.succeed_with_stream(stream);
            }
            ConnectionAction::SucceedQueryNoRows { task, command_tag } => {
                task.succeed_no_rows(command_tag);
            }
            ConnectionAction::FailQuery {
                task,
                error,
                cleanup,
            } => {
                task.fail(error);
                if let Some(cleanup) = cleanup {
                    return Ok(self.cleanup(cleanup).await);
                }
            }
            ConnectionAction::ForwardRows(rows) => {
                if let Some(sink) = &self.sink {
                    sink.forward_rows(rows);
                }
            }
            ConnectionAction::ForwardStreamComplete { rows, command_tag } => {
                if let Some(sink) = self.sink.take() {
                    sink.complete(rows, command_tag);
                }
            }
            ConnectionAction::ForwardStreamError {
                error,
                read,
                cleanup,
            } => {
                if let Some(sink) = self.sink.take() {
                    sink.fail(error);
                }
                if let Some(cleanup) = cleanup {
                    return Ok(self.cleanup(cleanup).await);
                }
                if read {
                    self.reading = true;
                }
            }
            ConnectionAction::CloseConnectionAndCleanup(cleanup) => {
                return Ok(self.cleanup(cleanup).await);
            }
            ConnectionAction::CloseConnection(notify) => {
                debug!("closing connection");
                self.close_waiters.extend(notify);
                let mut buf = Vec::new();
                write_terminate(&mut buf);
                self.stream.write_all(&buf).await?;
                self.stream.flush().await?;
                self.shutdown().await;
                return Ok(Some(self.machine.closed()));
            }
            ConnectionAction::FireChannelInactive(notify) => {
                self.close_waiters.extend(notify);
                for waiter in self.close_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
        Ok(None)
    }

    /// Fail outstanding work and, if needed, close the transport.
    async fn cleanup(&mut self, cleanup: CleanupContext) -> Option<ConnectionAction> {
        let action = cleanup.action;
        warn!(error = %cleanup.error, pending = cleanup.pending_tasks.len(), "connection failed");
        if self.failure.is_none() {
            self.failure = Some(cleanup.error.clone());
        }
        self.close_waiters.extend(cleanup.fail_pending_tasks());
        match action {
            CleanupAction::Close => {
                self.shutdown().await;
                Some(self.machine.closed())
            }
            CleanupAction::None => {
                for waiter in self.close_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                None
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(error) = self.stream.shutdown().await {
            debug!(%error, "transport shutdown failed");
        }
        self.reading = false;
    }
}
