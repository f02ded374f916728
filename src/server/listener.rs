//! Connection handling.
//!
//! Each connection runs one task owning both halves of the socket. Inbound
//! lines are framed on `\n`, decoded and dispatched to the executor without
//! waiting for the result; responses come back through the connection's
//! outbound queue and are written with the delimiter fixed by the first
//! line.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clients::{ClientRegistry, ConnectionId};
use super::executor::CommandExecutor;
use super::protocol::{Delimiter, LineAction, LineDecoder, Response, MAX_LINE_LENGTH};

/// State shared by every connection task
pub(crate) struct ConnectionContext {
    pub executor: Arc<CommandExecutor>,
    pub clients: Arc<ClientRegistry>,
    /// Stop reading new commands
    pub shutdown: CancellationToken,
    /// Every outstanding command has answered
    pub drained: CancellationToken,
}

fn line_codec() -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH)
}

/// Serve one client until it leaves, misbehaves or the server drains.
pub(crate) async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    let (conn, mut outbound) = ctx.clients.register();
    info!(conn = %conn, peer = %peer, "Client connected");

    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, line_codec());
    let mut decoder = LineDecoder::new();
    let mut reading = true;

    loop {
        tokio::select! {
            frame = frames.next(), if reading => match frame {
                Some(Ok(line)) => match decoder.decode(conn, &line) {
                    LineAction::Dispatch(command) => ctx.executor.dispatch(conn, command),
                    LineAction::Skip => {}
                    LineAction::Exit => {
                        info!(conn = %conn, "Client asked to exit");
                        break;
                    }
                },
                Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                    warn!(conn = %conn, limit = MAX_LINE_LENGTH, "Line too long, closing connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(conn = %conn, error = %e, "Read error");
                    break;
                }
                None => {
                    debug!(conn = %conn, "Client closed its side");
                    break;
                }
            },
            response = outbound.recv() => match response {
                Some(response) => {
                    if let Err(e) = write_response(&mut write_half, &response, decoder.delimiter()).await {
                        warn!(conn = %conn, error = %e, "Write failed, closing connection");
                        break;
                    }
                }
                None => break,
            },
            _ = ctx.shutdown.cancelled(), if reading => {
                debug!(conn = %conn, "Server shutting down, no longer reading");
                reading = false;
            }
            _ = ctx.drained.cancelled() => {
                flush_pending(conn, &mut write_half, &mut outbound, decoder.delimiter()).await;
                break;
            }
        }
    }

    ctx.clients.unregister(conn);
    if let Err(e) = write_half.shutdown().await {
        debug!(conn = %conn, error = %e, "Error closing socket");
    }
    info!(conn = %conn, peer = %peer, "Client disconnected");
}

/// Write whatever is already queued, without waiting for more.
async fn flush_pending(
    conn: ConnectionId,
    write_half: &mut OwnedWriteHalf,
    outbound: &mut tokio::sync::mpsc::Receiver<Response>,
    delimiter: Option<Delimiter>,
) {
    while let Ok(response) = outbound.try_recv() {
        if let Err(e) = write_response(write_half, &response, delimiter).await {
            warn!(conn = %conn, error = %e, "Write failed while draining");
            return;
        }
    }
}

async fn write_response(
    write_half: &mut OwnedWriteHalf,
    response: &Response,
    delimiter: Option<Delimiter>,
) -> std::io::Result<()> {
    // A response always follows a decoded line, so the delimiter is known
    let delimiter = delimiter.unwrap_or(Delimiter::Newline);
    write_half.write_all(response.encode(delimiter).as_bytes()).await
}
