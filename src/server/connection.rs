//! Glue between a TCP stream and a [`Chatter`].
//!
//! Each connection runs three tasks: a reader turning frames into
//! [`Inbound`] items, a writer draining the session's outbound queue, and
//! the chatter itself.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::session::Chatter;
use crate::peer::{wire, Inbound, Outbound, Outbox, PeerInfo, Request};
use crate::service::ChatService;
use crate::Result;

/// Inbound frames buffered ahead of the chatter.
const INBOX_CAPACITY: usize = 64;

/// Serve one client connection until it closes.
pub async fn serve_connection(stream: TcpStream, service: Arc<ChatService>) -> Result<()> {
    let peer = PeerInfo {
        remote: stream.peer_addr()?,
        local: stream.local_addr()?,
    };
    let (read_half, write_half) = stream.into_split();

    let (outbox, frames) = Outbox::channel(service.outbound_queue);
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);

    let writer = tokio::spawn(write_loop(BufWriter::new(write_half), frames));
    let reader = tokio::spawn(read_loop(BufReader::new(read_half), inbox_tx));

    let result = match Chatter::connect(service, peer, outbox).await {
        Ok(chatter) => chatter.run(inbox_rx).await,
        Err(e) => Err(e),
    };

    reader.abort();
    match writer.await {
        Ok(Err(e)) => debug!(remote = %peer.remote, "Writer stopped: {}", e),
        Err(e) => debug!(remote = %peer.remote, "Writer task failed: {}", e),
        Ok(Ok(())) => {}
    }

    result
}

/// Decode frames into `inbox` until the stream ends.
///
/// A frame whose body is not a known request becomes [`Inbound::Malformed`];
/// a framing error closes the link.
pub(crate) async fn read_loop<R>(mut reader: R, inbox: mpsc::Sender<Inbound>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let inbound = match wire::read_frame::<_, serde_json::Value>(&mut reader).await {
            Ok(Some((envelope, payload))) => {
                let id = envelope.id;
                match serde_json::from_value::<Request>(envelope.body) {
                    Ok(Request::Call(call)) => Inbound::Call { id, call, payload },
                    Ok(Request::Chunk) => Inbound::Chunk { id, data: payload },
                    Err(e) => Inbound::Malformed {
                        id,
                        reason: format!("unrecognized request: {e}"),
                    },
                }
            }
            Ok(None) => {
                let _ = inbox.send(Inbound::Closed(None)).await;
                return;
            }
            Err(e) => {
                let _ = inbox.send(Inbound::Closed(Some(e.to_string()))).await;
                return;
            }
        };

        if inbox.send(inbound).await.is_err() {
            return;
        }
    }
}

/// Encode queued frames until every [`Outbox`] for the session is dropped.
pub(crate) async fn write_loop<W>(mut writer: W, mut frames: mpsc::Receiver<Outbound>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        wire::write_frame(&mut writer, frame.id, &frame.body, &frame.payload).await?;
        if frames.is_empty() {
            writer.flush().await?;
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}
