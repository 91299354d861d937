use async_trait::async_trait;
use std::{
    collections::VecDeque,
    io::{Error as IoError, ErrorKind, Result as IoResult},
};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A sequential reader of encoded Opus packets.
///
/// Each call to `read` should place exactly one Opus packet into `buf`. A return
/// of `Ok(0)` marks the end of the source. Sources are disposed of by dropping them.
#[async_trait]
pub trait AudioSource: Send {
    /// Reads the next Opus packet into `buf`, returning its length.
    async fn read(&mut self, buf: &mut [u8]) -> IoResult<usize>;
}

/// A source of pre-encoded packets held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Vec<u8>>,
}

impl MemorySource {
    /// Creates a source which yields each of `frames` in order.
    pub fn new<I: IntoIterator<Item = Vec<u8>>>(frames: I) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Number of frames left to read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns whether every frame has been read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    async fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(0);
        };

        if frame.len() > buf.len() {
            return Err(oversized(frame.len(), buf.len()));
        }

        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

/// Reads Opus packets framed by little-endian `i16` length prefixes, as found in
/// the audio section of a DCA file.
///
/// The source ends cleanly at end-of-stream or on a negative length.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R> FrameReader<R> {
    /// Wraps a reader positioned at the first length prefix.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AudioSource for FrameReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let len = match self.inner.read_i16_le().await {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(0),
            Err(e) => return Err(e),
        };

        let Ok(len) = usize::try_from(len) else {
            return Ok(0);
        };

        if len > buf.len() {
            return Err(oversized(len, buf.len()));
        }

        self.inner.read_exact(&mut buf[..len]).await?;
        Ok(len)
    }
}

fn oversized(frame: usize, buf: usize) -> IoError {
    IoError::new(
        ErrorKind::InvalidData,
        format!("Opus frame of {frame}B exceeds {buf}B buffer"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_yields_frames_then_ends() {
        let mut src = MemorySource::new(vec![vec![1, 2, 3], vec![4]]);
        let mut buf = [0u8; 8];

        assert_eq!(src.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(src.read(&mut buf).await.unwrap(), 1);
        assert_eq!(src.read(&mut buf).await.unwrap(), 0);
        assert!(src.is_empty());
    }

    #[tokio::test]
    async fn frame_reader_follows_length_prefixes() {
        let bytes: Vec<u8> = vec![3, 0, 0xf8, 0xff, 0xfe, 1, 0, 9];
        let mut src = FrameReader::new(&bytes[..]);
        let mut buf = [0u8; 8];

        assert_eq!(src.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[0xf8, 0xff, 0xfe]);
        assert_eq!(src.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 9);
        assert_eq!(src.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn frame_reader_stops_on_negative_length_and_rejects_huge_frames() {
        let negative: Vec<u8> = (-1i16).to_le_bytes().to_vec();
        let mut src = FrameReader::new(&negative[..]);
        assert_eq!(src.read(&mut [0u8; 4]).await.unwrap(), 0);

        let huge: Vec<u8> = vec![100, 0];
        let mut src = FrameReader::new(&huge[..]);
        let err = src.read(&mut [0u8; 4]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
