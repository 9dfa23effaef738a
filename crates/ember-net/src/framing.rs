//! Wire framing for TCP streams.
//!
//! The framer only finds frame boundaries; it never looks inside a payload.
//! Two strategies are supported and one is chosen at startup for every
//! connection of a server:
//!
//! ```text
//! LengthPrefixed:
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//!
//! Delimited:
//! +--------------------+-----------+
//! |   payload          | delimiter |
//! |   (any length)     |  (1 byte) |
//! +--------------------+-----------+
//! ```
//!
//! For length-prefixed frames the length does **not** include the prefix
//! itself, and a zero length is a valid empty frame.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default frame delimiter for [`FramingStrategy::Delimited`].
pub const DEFAULT_DELIMITER: u8 = 0xFF;

/// Default maximum frame size in bytes (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// How frames are delimited on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingStrategy {
    /// Each frame carries a little-endian `u32` length prefix.
    LengthPrefixed {
        /// Maximum accepted payload size.
        max_frame_size: usize,
    },
    /// Frames are terminated by a single delimiter byte.
    Delimited {
        /// Terminator byte. Must not appear inside a payload.
        delimiter: u8,
        /// Maximum accepted payload size, excluding the delimiter.
        max_frame_size: usize,
    },
}

impl FramingStrategy {
    /// Length-prefixed framing with the default size limit.
    pub fn length_prefixed() -> Self {
        Self::LengthPrefixed {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Delimiter-based framing with the default size limit.
    pub fn delimited(delimiter: u8) -> Self {
        Self::Delimited {
            delimiter,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Maximum payload size accepted in either direction.
    pub fn max_frame_size(&self) -> usize {
        match self {
            Self::LengthPrefixed { max_frame_size } | Self::Delimited { max_frame_size, .. } => {
                *max_frame_size
            }
        }
    }
}

impl Default for FramingStrategy {
    fn default() -> Self {
        Self::length_prefixed()
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },

    /// An outbound payload contains the frame delimiter.
    #[error("payload contains the frame delimiter 0x{0:02X}")]
    DelimiterInPayload(u8),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a single frame from the stream.
///
/// Blocks until the full frame is available. Returns
/// [`FrameError::ConnectionClosed`] if the peer closes the connection before
/// the frame is complete, including a trailing partial delimited frame.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    strategy: &FramingStrategy,
) -> Result<Vec<u8>, FrameError> {
    match strategy {
        FramingStrategy::LengthPrefixed { max_frame_size } => {
            read_length_prefixed(reader, *max_frame_size).await
        }
        FramingStrategy::Delimited {
            delimiter,
            max_frame_size,
        } => read_delimited(reader, *delimiter, *max_frame_size).await,
    }
}

async fn read_length_prefixed<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;

    let size = u32::from_le_bytes(len_buf) as usize;
    if size > max {
        return Err(FrameError::PayloadTooLarge { size, max });
    }

    let mut payload = vec![0u8; size];
    if size > 0 {
        reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    }

    Ok(payload)
}

async fn read_delimited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    delimiter: u8,
    max: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::new();
    loop {
        let (complete, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(FrameError::ConnectionClosed);
            }
            match available.iter().position(|&b| b == delimiter) {
                Some(end) => {
                    frame.extend_from_slice(&available[..end]);
                    (true, end + 1)
                }
                None => {
                    frame.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);

        if frame.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: frame.len(),
                max,
            });
        }
        if complete {
            return Ok(frame);
        }
    }
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Write a single frame to the stream and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    strategy: &FramingStrategy,
) -> Result<(), FrameError> {
    let max = strategy.max_frame_size();
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    match strategy {
        FramingStrategy::LengthPrefixed { .. } => {
            let len = payload.len() as u32;
            writer.write_all(&len.to_le_bytes()).await?;
            if !payload.is_empty() {
                writer.write_all(payload).await?;
            }
        }
        FramingStrategy::Delimited { delimiter, .. } => {
            if payload.contains(delimiter) {
                return Err(FrameError::DelimiterInPayload(*delimiter));
            }
            writer.write_all(payload).await?;
            writer.write_all(&[*delimiter]).await?;
        }
    }
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{BufReader, duplex};

    #[tokio::test]
    async fn test_single_message_roundtrip() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::length_prefixed();

        write_frame(&mut client, b"hello world", &strategy)
            .await
            .unwrap();
        let received = read_frame(&mut server, &strategy).await.unwrap();
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        // A tiny duplex buffer forces partial writes and reads.
        let (mut client, server) = duplex(8);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::length_prefixed();
        let payload = b"this message is larger than the buffer";

        let write_strategy = strategy.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, payload, &write_strategy)
                .await
                .unwrap();
        });

        let received = read_frame(&mut server, &strategy).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected_on_read() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::LengthPrefixed { max_frame_size: 16 };

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &strategy).await;
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let strategy = FramingStrategy::LengthPrefixed { max_frame_size: 16 };

        let result = write_frame(&mut client, &[0u8; 1024], &strategy).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_zero_length_frame_handled() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::length_prefixed();

        write_frame(&mut client, &[], &strategy).await.unwrap();
        let received = read_frame(&mut server, &strategy).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_during_length_read() {
        let (client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        drop(client);

        let result = read_frame(&mut server, &FramingStrategy::length_prefixed()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);

        client.write_all(&5u32.to_le_bytes()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();

        let received = read_frame(&mut server, &FramingStrategy::length_prefixed())
            .await
            .unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn test_delimited_frames_split_on_delimiter() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::delimited(DEFAULT_DELIMITER);

        // Two frames arriving in a single write must not merge.
        client
            .write_all(b"1 walk 10 12\xFF2 say hi\xFF")
            .await
            .unwrap();

        let first = read_frame(&mut server, &strategy).await.unwrap();
        let second = read_frame(&mut server, &strategy).await.unwrap();
        assert_eq!(first, b"1 walk 10 12");
        assert_eq!(second, b"2 say hi");
    }

    #[tokio::test]
    async fn test_delimited_frame_spanning_reads() {
        let (mut client, server) = duplex(4);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::delimited(b'\n');

        let write_task = tokio::spawn(async move {
            client.write_all(b"a longer line of text\n").await.unwrap();
        });

        let frame = read_frame(&mut server, &strategy).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(frame, b"a longer line of text");
    }

    #[tokio::test]
    async fn test_delimited_partial_frame_at_eof_is_closed() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        client.write_all(b"no terminator").await.unwrap();
        drop(client);

        let result = read_frame(&mut server, &FramingStrategy::delimited(b'\n')).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_delimited_oversized_frame_rejected() {
        let (mut client, server) = duplex(8192);
        let mut server = BufReader::new(server);
        let strategy = FramingStrategy::Delimited {
            delimiter: b'\n',
            max_frame_size: 8,
        };
        client.write_all(b"far too long for the limit\n").await.unwrap();

        let result = read_frame(&mut server, &strategy).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_delimiter_inside_payload_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let strategy = FramingStrategy::delimited(b'\n');

        let result = write_frame(&mut client, b"two\nlines", &strategy).await;
        assert!(matches!(result, Err(FrameError::DelimiterInPayload(b'\n'))));
    }

    #[tokio::test]
    async fn test_delimited_write_appends_terminator() {
        let (mut client, mut server) = duplex(8192);
        let strategy = FramingStrategy::delimited(DEFAULT_DELIMITER);

        write_frame(&mut client, b"ok", &strategy).await.unwrap();
        drop(client);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, b"ok\xFF");
    }
}
