//! Row stream handed to the caller of a row-returning query.
//!
//! The driver holds the [`RowStreamSink`] and pushes row batches, completion
//! or failure into it. The consumer side, [`RowStream`], signals demand for
//! the next batch and cancellation back to the driver as [`StreamControl`]
//! messages.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::backend::{ColumnDescription, DataRow};

/// Identifies one row stream on a connection.
pub type StreamId = u64;

/// Consumer-to-driver signal for a row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// The consumer has drained its rows and wants the next batch.
    Demand(StreamId),
    /// The consumer abandoned the stream.
    Cancel(StreamId),
}

impl StreamControl {
    /// Stream the signal refers to.
    pub fn stream_id(self) -> StreamId {
        match self {
            StreamControl::Demand(id) | StreamControl::Cancel(id) => id,
        }
    }
}

#[derive(Debug)]
enum StreamEvent {
    Rows(Vec<DataRow>),
    Complete { command_tag: String },
    Failed(Error),
}

/// Driver-side handle feeding a [`RowStream`].
#[derive(Debug)]
pub struct RowStreamSink {
    id: StreamId,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl RowStreamSink {
    /// Stream this sink feeds.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Deliver a batch of rows.
    pub fn forward_rows(&self, rows: Vec<DataRow>) {
        // A closed receiver means the stream was dropped; its Cancel is on the way.
        let _ = self.events.send(StreamEvent::Rows(rows));
    }

    /// Deliver the final rows and the command tag.
    pub fn complete(self, rows: Vec<DataRow>, command_tag: String) {
        if !rows.is_empty() {
            let _ = self.events.send(StreamEvent::Rows(rows));
        }
        let _ = self.events.send(StreamEvent::Complete { command_tag });
    }

    /// End the stream with an error.
    pub fn fail(self, error: Error) {
        let _ = self.events.send(StreamEvent::Failed(error));
    }
}

/// Rows of one query, delivered in batches under consumer demand.
///
/// The first batch is implicitly demanded. Every further batch is requested
/// once the previously received rows have been consumed. Dropping the stream
/// before it finishes cancels the query's row delivery.
#[derive(Debug)]
pub struct RowStream {
    id: StreamId,
    columns: Arc<[ColumnDescription]>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    control: mpsc::UnboundedSender<StreamControl>,
    buffered: VecDeque<DataRow>,
    demanded: bool,
    finished: bool,
    command_tag: Option<String>,
}

impl RowStream {
    /// Create a stream and the sink that feeds it.
    pub fn channel(
        id: StreamId,
        columns: Arc<[ColumnDescription]>,
        control: mpsc::UnboundedSender<StreamControl>,
    ) -> (RowStream, RowStreamSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = RowStream {
            id,
            columns,
            events: rx,
            control,
            buffered: VecDeque::new(),
            demanded: true,
            finished: false,
            command_tag: None,
        };
        (stream, RowStreamSink { id, events: tx })
    }

    /// Stream identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Result columns. Every column is delivered in binary format.
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    /// Command tag, once the stream has completed.
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// Next row, `None` once the stream has completed.
    pub async fn next(&mut self) -> Option<Result<DataRow>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }
            let event = match self.events.try_recv() {
                Ok(event) => Some(event),
                Err(mpsc::error::TryRecvError::Disconnected) => None,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if !self.demanded {
                        self.demanded = true;
                        if self.control.send(StreamControl::Demand(self.id)).is_err() {
                            self.finished = true;
                            return Some(Err(Error::ConnectionClosed));
                        }
                    }
                    self.events.recv().await
                }
            };
            match event {
                Some(StreamEvent::Rows(rows)) => {
                    self.demanded = false;
                    self.buffered.extend(rows);
                }
                Some(StreamEvent::Complete { command_tag }) => {
                    self.finished = true;
                    self.command_tag = Some(command_tag);
                }
                Some(StreamEvent::Failed(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                None => {
                    self.finished = true;
                    return Some(Err(Error::ConnectionClosed));
                }
            }
        }
    }

    /// Consume the stream, collecting all rows.
    pub async fn collect(mut self) -> Result<Vec<DataRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Stop row delivery. Rows already buffered are discarded.
    pub fn cancel(mut self) {
        self.cancel_if_running();
    }

    fn cancel_if_running(&mut self) {
        if !self.finished {
            self.finished = true;
            self.buffered.clear();
            let _ = self.control.send(StreamControl::Cancel(self.id));
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.cancel_if_running();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &[u8]) -> DataRow {
        DataRow::from_columns([Some(v)]).unwrap()
    }

    #[tokio::test]
    async fn demands_after_each_batch() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (mut stream, sink) = RowStream::channel(7, Arc::from(Vec::new()), control_tx);

        sink.forward_rows(vec![row(b"1"), row(b"2")]);
        assert_eq!(stream.next().await.unwrap().unwrap(), row(b"1"));
        assert_eq!(stream.next().await.unwrap().unwrap(), row(b"2"));
        assert!(control_rx.try_recv().is_err());

        let next = tokio::spawn(async move {
            let row = stream.next().await;
            (stream, row)
        });
        assert_eq!(control_rx.recv().await, Some(StreamControl::Demand(7)));
        sink.complete(vec![row(b"3")], "SELECT 3".into());
        let (mut stream, next_row) = next.await.unwrap();
        assert_eq!(next_row.unwrap().unwrap(), row(b"3"));
        assert!(stream.next().await.is_none());
        assert!(control_rx.try_recv().is_err());
        assert_eq!(stream.command_tag(), Some("SELECT 3"));

        drop(stream);
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_cancels_unfinished_stream() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (stream, _sink) = RowStream::channel(3, Arc::from(Vec::new()), control_tx);
        drop(stream);
        assert_eq!(control_rx.try_recv().unwrap(), StreamControl::Cancel(3));
    }

    #[tokio::test]
    async fn failure_ends_stream() {
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        let (stream, sink) = RowStream::channel(1, Arc::from(Vec::new()), control_tx);
        sink.fail(Error::QueryCancelled);
        assert!(matches!(stream.collect().await, Err(Error::QueryCancelled)));
    }
}
