//! Per-connection read and write loops shared by both endpoints.

use std::{future::Future, time::Duration};

use peerlink_core::{ClientId, EventLabel, EventSink, Message};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{mpsc, watch},
};

use crate::protocol;

/// Why a read loop ended.
#[derive(Debug)]
pub(crate) enum ReadEnd {
    /// The peer closed the connection.
    Eof,
    /// Local shutdown or kick.
    Stopped,
    /// The socket failed.
    Failed(std::io::Error),
}

impl ReadEnd {
    pub(crate) fn reason(&self) -> String {
        match self {
            Self::Eof => "closed by peer".to_string(),
            Self::Stopped => "closed locally".to_string(),
            Self::Failed(e) => e.to_string(),
        }
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Read frames until EOF, error, or `stop` resolves, emitting `MessageReceived`.
///
/// Undecodable and oversize frames are logged and skipped; the connection
/// stays up.
pub(crate) async fn read_loop<R, F>(
    reader: R,
    sink: &EventSink,
    client: Option<ClientId>,
    stop: F,
) -> ReadEnd
where
    R: AsyncRead + Unpin,
    F: Future<Output = ()>,
{
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::new();
    tokio::pin!(stop);

    loop {
        frame.clear();
        let read = tokio::select! {
            () = &mut stop => return ReadEnd::Stopped,
            read = read_frame(&mut reader, &mut frame) => read,
        };

        match read {
            Ok(Frame::Line) if frame.trim_ascii().is_empty() => {}
            Ok(Frame::Line) => match protocol::decode(&frame) {
                Ok(message) => sink.message(EventLabel::MessageReceived, message, client),
                Err(e) => tracing::warn!(?client, "Dropping frame: {e}"),
            },
            Ok(Frame::TooLarge) => tracing::warn!(
                ?client,
                max = protocol::MAX_FRAME_BYTES,
                "Dropping oversize frame"
            ),
            Ok(Frame::Eof) => return ReadEnd::Eof,
            Err(e) => return ReadEnd::Failed(e),
        }
    }
}

/// Outcome of reading one newline-delimited frame.
enum Frame {
    /// `buf` holds a frame, newline included unless the stream ended.
    Line,
    /// The frame exceeded the size cap and was discarded through its newline.
    TooLarge,
    Eof,
}

/// Read one frame into `buf`, never buffering more than the frame cap.
async fn read_frame<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    // Room for the largest frame plus its "\r\n".
    const LIMIT: usize = protocol::MAX_FRAME_BYTES + 2;
    let read = (&mut *reader)
        .take(LIMIT as u64)
        .read_until(b'\n', buf)
        .await?;

    if read == 0 {
        Ok(Frame::Eof)
    } else if buf.last() == Some(&b'\n') || read < LIMIT {
        Ok(Frame::Line)
    } else {
        buf.clear();
        skip_line(reader).await?;
        Ok(Frame::TooLarge)
    }
}

/// Discard input up to and including the next newline, or to EOF.
async fn skip_line<R>(reader: &mut BufReader<R>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(newline) = available.iter().position(|b| *b == b'\n') {
            reader.consume(newline + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

/// Write queued messages in order, emitting `MessageSent` or `MessageSentFailed`.
///
/// Runs until every sender for `outbound` is dropped.
pub(crate) async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    sink: EventSink,
    client: Option<ClientId>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let written = match protocol::encode(&message) {
            Ok(frame) => writer.write_all(&frame).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match written {
            Ok(()) => sink.message(EventLabel::MessageSent, message, client),
            Err(error) => {
                tracing::warn!(?client, verb = ?message.verb, "Send failed: {error}");
                sink.send_failed(message, client, &error);
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Write `bytes`, close our side, then discard input until the peer closes
/// or `linger` elapses.
///
/// Closing with unread input makes the kernel reset the connection, which
/// can cost the peer the bytes we just wrote.
pub(crate) async fn write_and_close(
    stream: &mut TcpStream,
    bytes: &[u8],
    linger: Duration,
) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.shutdown().await?;

    let mut discard = [0u8; 512];
    let _ = tokio::time::timeout(linger, async {
        while stream.read(&mut discard).await? > 0 {}
        Ok::<(), std::io::Error>(())
    })
    .await;
    Ok(())
}
