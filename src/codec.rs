//! Line framing: newline-delimited JSON text, one frame per line. Realized
//! with `tokio_util::codec::{FramedRead, FramedWrite, LinesCodec}`, the
//! natural `tokio-util` tool for a split `AsyncRead`/`AsyncWrite` pair, used
//! here because a TCP stream is split into owned read/write halves up
//! front.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::error::{PeerError, Result};

/// The result of reading one frame: a decoded line, or a corrupt frame
/// (bad UTF-8, or a line over the length limit) that the caller should log
/// and skip without tearing down the connection.
pub enum Frame {
    Line(String),
    Corrupt(String),
}

/// One half of the line-framed transport: the reading side.
pub struct FrameReader<R> {
    inner: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, LinesCodec::new()),
        }
    }

    /// Read the next frame, or `None` on clean EOF.
    ///
    /// `LinesCodec` reports both over-length lines and invalid UTF-8 within
    /// a line as an error; neither indicates a broken transport, so both
    /// come back as `Ok(Some(Frame::Corrupt(..)))` for the caller to log and
    /// skip. A genuine I/O failure on the underlying stream is the only case
    /// that surfaces as `Err` and should end the read loop.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.inner.next().await {
            Some(Ok(line)) => Ok(Some(Frame::Line(line))),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                Ok(Some(Frame::Corrupt("line exceeded maximum length".to_string())))
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Corrupt(e.to_string())))
            }
            Some(Err(LinesCodecError::Io(e))) => Err(PeerError::Transport(e.to_string()).into()),
            None => Ok(None),
        }
    }
}

/// The writing side: appends a newline per frame.
pub struct FrameWriter<W> {
    inner: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, LinesCodec::new()),
        }
    }

    pub async fn write_frame(&mut self, line: &str) -> Result<()> {
        self.inner
            .send(line)
            .await
            .map_err(|e| PeerError::Transport(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_reads_one_line() {
        let (a, b) = tokio::io::duplex(4096);
        let (read_half, _write_half) = tokio::io::split(a);
        let (_other_read, write_half) = tokio::io::split(b);

        let mut writer = FrameWriter::new(write_half);
        let mut reader = FrameReader::new(read_half);

        writer.write_frame(r#"{"jsonrpc":"2.0","method":"PING"}"#).await.unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        match frame {
            Frame::Line(line) => assert_eq!(line, r#"{"jsonrpc":"2.0","method":"PING"}"#),
            Frame::Corrupt(msg) => panic!("unexpected corrupt frame: {msg}"),
        }
    }

    #[tokio::test]
    async fn eof_yields_none() {
        let (a, b) = tokio::io::duplex(4096);
        drop(b);
        let mut reader = FrameReader::new(a);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_corrupt_frame_not_a_transport_error() {
        use tokio::io::AsyncWriteExt;

        let (a, mut b) = tokio::io::duplex(4096);
        let (read_half, _write_half) = tokio::io::split(a);
        let mut reader = FrameReader::new(read_half);

        b.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        b.write_all(br#"{"jsonrpc":"2.0","method":"PING"}"#).await.unwrap();
        b.write_all(b"\n").await.unwrap();

        match reader.read_frame().await.unwrap().unwrap() {
            Frame::Corrupt(_) => {}
            Frame::Line(line) => panic!("expected a corrupt frame, got line: {line}"),
        }

        match reader.read_frame().await.unwrap().unwrap() {
            Frame::Line(line) => assert_eq!(line, r#"{"jsonrpc":"2.0","method":"PING"}"#),
            Frame::Corrupt(msg) => panic!("unexpected corrupt frame: {msg}"),
        }
    }
}
