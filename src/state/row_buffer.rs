//! Row buffer with consumer demand tracking.
//!
//! Rows received from the server are held here until the transport reports a
//! read boundary. Whether they are forwarded at that point, and whether the
//! transport may read more bytes, depends on two facts tracked together: has
//! the consumer asked for more rows, and has the transport been asked to read.
//!
//! | state                 | consumer demand | read issued |
//! |-----------------------|-----------------|-------------|
//! | `WaitingForRows`      | yes             | yes         |
//! | `WaitingForReadOrDemand` | no           | no          |
//! | `WaitingForRead`      | yes             | no          |
//! | `WaitingForDemand`    | no              | yes         |

use crate::protocol::backend::DataRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Demand {
    /// Rows are wanted and a read is outstanding.
    WaitingForRows,
    /// A batch was just forwarded; neither a new demand nor a read yet.
    WaitingForReadOrDemand,
    /// The consumer asked for more; the next read will fetch them.
    WaitingForRead,
    /// A read is outstanding but the consumer has not asked for more.
    WaitingForDemand,
}

/// Ordered buffer of rows awaiting delivery to the consumer.
#[derive(Debug)]
pub struct RowBuffer {
    demand: Demand,
    rows: Vec<DataRow>,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RowBuffer {
    /// A fresh buffer. The first batch is implicitly demanded.
    pub fn new() -> Self {
        Self {
            demand: Demand::WaitingForRows,
            rows: Vec::new(),
        }
    }

    /// Number of buffered rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows are buffered.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row received from the server.
    pub fn received_row(&mut self, row: DataRow) {
        self.rows.push(row);
        if self.demand == Demand::WaitingForRead {
            self.demand = Demand::WaitingForRows;
        }
    }

    /// Read boundary: returns the rows to forward, if any may be forwarded.
    pub fn channel_read_complete(&mut self) -> Option<Vec<DataRow>> {
        match self.demand {
            Demand::WaitingForRows if self.rows.is_empty() => {
                self.demand = Demand::WaitingForRead;
                None
            }
            Demand::WaitingForRows => {
                self.demand = Demand::WaitingForReadOrDemand;
                Some(std::mem::take(&mut self.rows))
            }
            Demand::WaitingForReadOrDemand | Demand::WaitingForRead | Demand::WaitingForDemand => {
                None
            }
        }
    }

    /// The consumer wants more rows. Returns true if a read should be issued.
    pub fn demand(&mut self) -> bool {
        match self.demand {
            Demand::WaitingForDemand => {
                self.demand = Demand::WaitingForRows;
                true
            }
            Demand::WaitingForReadOrDemand => {
                self.demand = Demand::WaitingForRead;
                false
            }
            Demand::WaitingForRows | Demand::WaitingForRead => false,
        }
    }

    /// The transport is about to wait for bytes. Returns true if it should
    /// read, false to hold back until the consumer catches up.
    pub fn read_event_caught(&mut self) -> bool {
        match self.demand {
            Demand::WaitingForRows => true,
            Demand::WaitingForReadOrDemand => {
                self.demand = Demand::WaitingForDemand;
                false
            }
            Demand::WaitingForRead => {
                self.demand = Demand::WaitingForRows;
                true
            }
            Demand::WaitingForDemand => false,
        }
    }

    /// Abandon the buffer. Returns true if a read must still be issued to
    /// keep draining the connection.
    pub fn fail(self) -> bool {
        self.demand == Demand::WaitingForDemand
    }

    /// The stream completed; returns the rows not yet forwarded.
    pub fn end(self) -> Vec<DataRow> {
        self.rows
    }
}
