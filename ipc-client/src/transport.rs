//! Per-connection framing over a Unix domain socket (spec §6). Mirrors
//! `ipc-gateway`'s `connection` module: the two halves are split so a reader
//! task and a writer task can run independently, and `register` performs
//! the REGISTER/REGISTER_ACK handshake before handing the connection off to
//! its owner.

use std::path::Path;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use ipc_core::{CodecKind, ErrorCode, IpcError, Message, Register, RemoteError, Result};

pub type FrameSink = SplitSink<Framed<UnixStream, LengthDelimitedCodec>, bytes::Bytes>;
pub type FrameStream = SplitStream<Framed<UnixStream, LengthDelimitedCodec>>;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FrameReader {
    stream: FrameStream,
}

impl FrameReader {
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

/// Connects to `socket_path`, sends REGISTER (with `pool_index` if this
/// connection is a pool member), and awaits REGISTER_ACK within
/// [`REGISTRATION_TIMEOUT`]. Returns the connection already split into its
/// reader/writer halves, ready to be handed to their respective tasks.
pub async fn connect_and_register(
    socket_path: &Path,
    codec: CodecKind,
    service_name: &str,
    methods: &[String],
    pool_index: Option<usize>,
) -> Result<(FrameReader, FrameWriter)> {
    let stream = UnixStream::connect(socket_path).await.map_err(|err| {
        IpcError::Remote(RemoteError::new(
            ErrorCode::ConnectionFailed,
            format!("failed to connect to {}: {err}", socket_path.display()),
        ))
    })?;
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut stream) = framed.split();

    let metadata = pool_index.map(|idx| {
        let mut m = std::collections::HashMap::new();
        m.insert("poolIndex".to_string(), serde_json::json!(idx));
        m
    });
    let register = Message::Register(Register {
        service_name: service_name.to_string(),
        methods: methods.to_vec(),
        version: None,
        metadata,
    });
    let bytes = codec.encode(&register)?;
    sink.send(bytes.into()).await.map_err(IpcError::Io)?;

    let ack = tokio::time::timeout(REGISTRATION_TIMEOUT, stream.next())
        .await
        .map_err(|_| {
            IpcError::Remote(RemoteError::new(ErrorCode::ConnectionFailed, "registration timed out"))
        })?;
    match ack {
        Some(Ok(bytes)) => match codec.decode(&bytes)? {
            Message::RegisterAck => {}
            Message::Error { error, .. } => return Err(IpcError::Remote(error)),
            other => {
                return Err(IpcError::Remote(RemoteError::new(
                    ErrorCode::ConnectionFailed,
                    format!("expected REGISTER_ACK, got {}", other.kind()),
                )))
            }
        },
        Some(Err(err)) => return Err(IpcError::Io(err)),
        None => {
            return Err(IpcError::Remote(RemoteError::new(
                ErrorCode::ConnectionFailed,
                "connection closed during registration",
            )))
        }
    }

    Ok((FrameReader { stream }, FrameWriter { sink }))
}
