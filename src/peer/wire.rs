//! Frame codec.
//!
//! A frame is one JSON header line followed by a raw payload:
//!
//! ```text
//! {"id":7,"len":5,"body":{"type":"call","op":"say","msg_id":0}}\n
//! hello
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{CallId, Envelope};
use crate::{LoungeError, Result};

/// Longest accepted header line, newline included.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Largest accepted payload.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Write one frame. The caller decides when to flush.
pub async fn write_frame<W, B>(writer: &mut W, id: CallId, body: &B, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
    B: Serialize,
{
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(LoungeError::Protocol(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }

    let envelope = Envelope {
        id,
        len: payload.len(),
        body,
    };
    let mut line = serde_json::to_vec(&envelope)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames. Blank lines
/// between frames are skipped.
pub async fn read_frame<R, B>(reader: &mut R) -> Result<Option<(Envelope<B>, Vec<u8>)>>
where
    R: AsyncBufRead + Unpin,
    B: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_HEADER_LEN as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            if line.len() >= MAX_HEADER_LEN {
                return Err(LoungeError::Protocol(format!(
                    "frame header longer than {MAX_HEADER_LEN} bytes"
                )));
            }
            return Err(LoungeError::Disconnected(
                "connection closed inside a frame header".to_string(),
            ));
        }
        if line.iter().any(|b| !b.is_ascii_whitespace()) {
            break;
        }
    }

    let envelope: Envelope<B> = serde_json::from_slice(&line)?;
    if envelope.len > MAX_PAYLOAD_LEN {
        return Err(LoungeError::Protocol(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
            envelope.len
        )));
    }

    let mut payload = vec![0u8; envelope.len];
    if let Err(e) = reader.read_exact(&mut payload).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(LoungeError::Disconnected(format!(
                "connection closed inside a {} byte payload",
                envelope.len
            )));
        }
        return Err(e.into());
    }

    Ok(Some((envelope, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Call, Event, Request, Response};
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_frame_round_trip_with_payload() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            7,
            &Request::Call(Call::Say { msg_id: 2 }),
            b"hello",
        )
        .await
        .unwrap();
        write_frame(&mut buf, 8, &Request::Chunk, &[0u8, 10, 255])
            .await
            .unwrap();

        let mut reader = BufReader::new(&buf[..]);
        let (env, payload) = read_frame::<_, Request>(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.id, 7);
        assert_eq!(env.len, 5);
        assert_eq!(env.body, Request::Call(Call::Say { msg_id: 2 }));
        assert_eq!(payload, b"hello");

        let (env, payload) = read_frame::<_, Request>(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.id, 8);
        assert_eq!(env.body, Request::Chunk);
        assert_eq!(payload, vec![0u8, 10, 255]);

        assert!(read_frame::<_, Request>(&mut reader)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_header_is_single_line() {
        let mut buf = Vec::new();
        let body = Response::Event(Event::Notice {
            text: "two\nlines".to_string(),
        });
        write_frame(&mut buf, 0, &body, &[]).await.unwrap();

        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(buf.last(), Some(&b'\n'));
    }

    #[tokio::test]
    async fn test_skips_blank_lines() {
        let data = b"\n  \n{\"id\":1,\"len\":0,\"body\":{\"type\":\"chunk\"}}\n";
        let mut reader = BufReader::new(&data[..]);
        let (env, payload) = read_frame::<_, Request>(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.id, 1);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_disconnect() {
        let data = b"{\"id\":1,\"len\":10,\"body\":{\"type\":\"chunk\"}}\nabc";
        let mut reader = BufReader::new(&data[..]);
        let result = read_frame::<_, Request>(&mut reader).await;
        assert!(matches!(result, Err(LoungeError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_truncated_header_is_disconnect() {
        let data = b"{\"id\":1,\"len\"";
        let mut reader = BufReader::new(&data[..]);
        let result = read_frame::<_, Request>(&mut reader).await;
        assert!(matches!(result, Err(LoungeError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let header = format!(
            "{{\"id\":1,\"len\":{},\"body\":{{\"type\":\"chunk\"}}}}\n",
            MAX_PAYLOAD_LEN + 1
        );
        let mut reader = BufReader::new(header.as_bytes());
        let result = read_frame::<_, Request>(&mut reader).await;
        assert!(matches!(result, Err(LoungeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let data = vec![b'x'; MAX_HEADER_LEN + 10];
        let mut reader = BufReader::new(&data[..]);
        let result = read_frame::<_, Request>(&mut reader).await;
        assert!(matches!(result, Err(LoungeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_garbage_header_is_protocol_error() {
        let data = b"not json\n";
        let mut reader = BufReader::new(&data[..]);
        let result = read_frame::<_, Request>(&mut reader).await;
        assert!(matches!(result, Err(LoungeError::Protocol(_))));
    }
}
