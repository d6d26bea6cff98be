//! Multiplexed output stream framing.
//!
//! An attached container writes stdout and stderr over one byte stream as a
//! sequence of frames:
//!
//! ```text
//! +--------+---------+-----------------+----------------+
//! | stream | 0, 0, 0 | length (u32 BE) | payload ...    |
//! +--------+---------+-----------------+----------------+
//!    1 B       3 B          4 B            length B
//! ```
//!
//! Stream `0` is stdin echoed back and is treated as stdout, `1` is stdout and
//! `2` is stderr. The decoder is incremental: feed it whatever each read
//! returned and it yields every frame completed so far.

use crate::error::{SandboxError, SandboxResult};

/// Header length.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted in one frame.
pub const MAX_FRAME_PAYLOAD: usize = 4 * 1024 * 1024;

/// Which output a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 | 1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source stream.
    pub stream: StreamKind,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Encode one frame.
///
/// # Errors
///
/// [`SandboxError::Frame`] if `payload` exceeds [`MAX_FRAME_PAYLOAD`].
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> SandboxResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(SandboxError::Frame(format!(
            "payload of {} bytes exceeds the {MAX_FRAME_PAYLOAD} byte frame limit",
            payload.len()
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| SandboxError::Frame("payload length overflows u32".to_owned()))?;
    let mut out = Vec::with_capacity(HEADER_LEN.saturating_add(payload.len()));
    out.push(stream.to_byte());
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every frame now complete.
    ///
    /// # Errors
    ///
    /// [`SandboxError::Frame`] on an unknown stream id, non-zero padding, or
    /// an oversize length. The decoder is unusable afterwards.
    pub fn push(&mut self, bytes: &[u8]) -> SandboxResult<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut consumed = 0usize;

        loop {
            let rest = self.buf.get(consumed..).unwrap_or_default();
            let Some(header) = rest.get(..HEADER_LEN) else {
                break;
            };
            let stream = StreamKind::from_byte(header[0]).ok_or_else(|| {
                SandboxError::Frame(format!("unknown stream id {}", header[0]))
            })?;
            if header[1..4] != [0, 0, 0] {
                return Err(SandboxError::Frame("non-zero header padding".to_owned()));
            }
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let len = usize::try_from(len)
                .map_err(|_| SandboxError::Frame("frame length overflows usize".to_owned()))?;
            if len > MAX_FRAME_PAYLOAD {
                return Err(SandboxError::Frame(format!(
                    "frame of {len} bytes exceeds the {MAX_FRAME_PAYLOAD} byte limit"
                )));
            }
            let end = HEADER_LEN.saturating_add(len);
            let Some(payload) = rest.get(HEADER_LEN..end) else {
                break;
            };
            frames.push(Frame {
                stream,
                payload: payload.to_vec(),
            });
            consumed = consumed.saturating_add(end);
        }

        self.buf.drain(..consumed);
        Ok(frames)
    }

    /// Bytes buffered towards an incomplete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Finish decoding at end of stream.
    ///
    /// # Errors
    ///
    /// [`SandboxError::Frame`] if a partial frame is left over.
    pub fn finish(self) -> SandboxResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::Frame(format!(
                "stream ended inside a frame ({} trailing bytes)",
                self.buf.len()
            )))
        }
    }
}

/// Splits a framed stream into capped stdout and stderr buffers.
#[derive(Debug)]
pub struct Demuxer {
    decoder: FrameDecoder,
    limit: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl Demuxer {
    /// Keep at most `limit` bytes per stream.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            limit,
            stdout: Vec::new(),
            stderr: Vec::new(),
            truncated: false,
        }
    }

    /// Feed raw stream bytes.
    ///
    /// # Errors
    ///
    /// Decoder errors from [`FrameDecoder::push`].
    pub fn push(&mut self, bytes: &[u8]) -> SandboxResult<()> {
        for frame in self.decoder.push(bytes)? {
            let sink = match frame.stream {
                StreamKind::Stdout => &mut self.stdout,
                StreamKind::Stderr => &mut self.stderr,
            };
            let room = self.limit.saturating_sub(sink.len());
            if frame.payload.len() > room {
                self.truncated = true;
            }
            sink.extend_from_slice(&frame.payload[..frame.payload.len().min(room)]);
        }
        Ok(())
    }

    /// Whether any output was dropped at the cap.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Stdout captured so far, lossily decoded.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr captured so far, lossily decoded.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Check the stream ended on a frame boundary.
    ///
    /// # Errors
    ///
    /// [`SandboxError::Frame`] if a partial frame is left over.
    pub fn finish(&mut self) -> SandboxResult<()> {
        std::mem::take(&mut self.decoder).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_decodes_interleaved_frames() {
        let mut bytes = frame(1, b"hello ");
        bytes.extend(frame(2, b"oops"));
        bytes.extend(frame(1, b"world"));

        let frames = FrameDecoder::new().push(&bytes).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].stream, StreamKind::Stderr);
        assert_eq!(frames[2].payload, b"world");
    }

    #[test]
    fn test_handles_partial_reads_byte_by_byte() {
        let mut bytes = frame(1, b"abc");
        bytes.extend(frame(2, b""));
        bytes.extend(frame(2, b"xyz"));

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in &bytes {
            frames.extend(decoder.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(decoder.buffered(), 0);
        decoder.finish().unwrap();
        assert_eq!(
            frames,
            vec![
                Frame { stream: StreamKind::Stdout, payload: b"abc".to_vec() },
                Frame { stream: StreamKind::Stderr, payload: Vec::new() },
                Frame { stream: StreamKind::Stderr, payload: b"xyz".to_vec() },
            ]
        );
    }

    #[test]
    fn test_stream_zero_is_stdout() {
        let frames = FrameDecoder::new().push(&frame(0, b"echo")).unwrap();
        assert_eq!(frames[0].stream, StreamKind::Stdout);
    }

    #[test]
    fn test_rejects_unknown_stream() {
        let err = FrameDecoder::new().push(&frame(3, b"x")).unwrap_err();
        assert!(err.to_string().contains("unknown stream id 3"));
    }

    #[test]
    fn test_rejects_nonzero_padding() {
        let mut bytes = frame(1, b"x");
        bytes[2] = 7;
        assert!(FrameDecoder::new().push(&bytes).is_err());
    }

    #[test]
    fn test_rejects_oversize_length_from_header_alone() {
        let mut header = vec![1, 0, 0, 0];
        let len = u32::try_from(MAX_FRAME_PAYLOAD + 1).unwrap();
        header.extend_from_slice(&len.to_be_bytes());
        assert!(FrameDecoder::new().push(&header).is_err());
    }

    #[test]
    fn test_finish_rejects_trailing_partial_frame() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame(1, b"truncated");
        decoder.push(&bytes[..bytes.len() - 2]).unwrap();
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_encode_matches_decoder() {
        let encoded = encode_frame(StreamKind::Stderr, b"boom").unwrap();
        assert_eq!(encoded, frame(2, b"boom"));
        assert!(encode_frame(StreamKind::Stdout, &vec![0; MAX_FRAME_PAYLOAD + 1]).is_err());
    }

    #[test]
    fn test_demuxer_caps_each_stream() {
        let mut demux = Demuxer::new(4);
        let mut bytes = frame(1, b"abcdef");
        bytes.extend(frame(2, b"12"));
        bytes.extend(frame(2, b"345"));
        demux.push(&bytes).unwrap();
        demux.finish().unwrap();

        assert_eq!(demux.stdout_lossy(), "abcd");
        assert_eq!(demux.stderr_lossy(), "1234");
        assert!(demux.truncated());
    }

    #[test]
    fn test_demuxer_under_cap_not_truncated() {
        let mut demux = Demuxer::new(1024);
        demux.push(&frame(1, b"ok\n")).unwrap();
        assert_eq!(demux.stdout_lossy(), "ok\n");
        assert!(!demux.truncated());
    }
}
