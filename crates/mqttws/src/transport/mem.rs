//! In-memory transport for tests.

use tokio::io::DuplexStream;

const PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-memory byte pipe carrying MQTT packets.
pub struct InMemoryTransport {
    stream: DuplexStream,
}

impl InMemoryTransport {
    /// Creates a connected pair. Packets written to one end are read from the
    /// other.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        (Self { stream: a }, Self { stream: b })
    }

    pub(crate) fn into_stream(self) -> DuplexStream {
        self.stream
    }
}
