//! Driver options.

use crate::error::{Error, Result};

/// Options for [`Connection`](crate::tokio::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Initial capacity of the socket read buffer.
    ///
    /// Default: `8192`
    pub read_buffer_size: usize,

    /// Number of client requests that may wait for the connection task
    /// before [`Client`](crate::tokio::Client) calls start to wait.
    ///
    /// Default: `32`
    pub request_queue_depth: usize,

    /// Largest backend message accepted. A frame announcing a larger length
    /// is a protocol error and closes the connection.
    ///
    /// Default: `1 GiB`
    pub max_message_size: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            request_queue_depth: 32,
            max_message_size: 1 << 30,
        }
    }
}

impl Opts {
    /// Check that every size is usable.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidUsage("read_buffer_size must be positive".into()));
        }
        if self.request_queue_depth == 0 {
            return Err(Error::InvalidUsage(
                "request_queue_depth must be positive".into(),
            ));
        }
        if self.max_message_size < 4 {
            return Err(Error::InvalidUsage(format!(
                "max_message_size {} cannot hold a message length",
                self.max_message_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Opts::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_sizes() {
        let opts = Opts {
            request_queue_depth: 0,
            ..Opts::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidUsage(_))));

        let opts = Opts {
            max_message_size: 0,
            ..Opts::default()
        };
        assert!(opts.validate().is_err());
    }
}
