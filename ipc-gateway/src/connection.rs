//! A single accepted connection's read/write halves, framed with the same
//! length-prefixed layout as [`ipc_core::framing`] via `tokio_util`'s
//! `LengthDelimitedCodec` (default settings: 4-byte big-endian length field
//! covering only the payload — exactly spec §4.1's wire layout).
//!
//! The two halves are split so a connection can have one task reading
//! inbound frames while another drains an outbox channel and writes
//! outbound ones — routing a CALL/RESPONSE to a *different* connection only
//! ever touches that connection's outbox sender, never its socket directly.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use ipc_core::{CodecKind, IpcError, Message, Result};

pub type FrameSink = SplitSink<Framed<UnixStream, LengthDelimitedCodec>, bytes::Bytes>;
pub type FrameStream = SplitStream<Framed<UnixStream, LengthDelimitedCodec>>;

/// Splits an accepted socket into an independent reader and writer, both
/// still speaking the same length-delimited wire framing.
pub fn split(stream: UnixStream) -> (FrameReader, FrameWriter) {
    let (sink, stream) = Framed::new(stream, LengthDelimitedCodec::new()).split();
    (FrameReader { stream }, FrameWriter { sink })
}

pub struct FrameReader {
    stream: FrameStream,
}

impl FrameReader {
    /// Reads the next frame and decodes it with `codec`. `Ok(None)` means the
    /// peer closed the connection cleanly. A decode error is returned rather
    /// than panicking; per spec §4.1 the connection is then treated as
    /// poisoned by the caller.
    pub async fn read_message(&mut self, codec: CodecKind) -> Result<Option<Message>> {
        match self.stream.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(IpcError::Io(err)),
            Some(Ok(bytes)) => codec.decode(&bytes).map(Some),
        }
    }
}

pub struct FrameWriter {
    sink: FrameSink,
}

impl FrameWriter {
    pub async fn write_message(&mut self, codec: CodecKind, message: &Message) -> Result<()> {
        let bytes = codec.encode(message)?;
        self.sink.send(bytes.into()).await.map_err(IpcError::Io)
    }
}
