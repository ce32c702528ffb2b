//! Per-connection message framing: TLS bytes in, zlib-inflated rencode
//! documents out, and the symmetric path back. Grows a single read buffer
//! and keeps feeding it to a streaming inflater until a complete deflate
//! stream has been consumed, then strips exactly those bytes and tries
//! again before touching the socket a second time (pipelining).

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};
use flate2::{Compress, Compression, FlushCompress};
use log::{debug, warn};
use thiserror::Error;

use crate::rencode::{self, DecodeError, Token};

/// Initial and post-drain capacity of a connection's read buffer.
const INITIAL_CAPACITY: usize = 2048;
/// Default ceiling on how large the read buffer may grow while waiting for a
/// complete message, and default per-message token cap. Both are overridable
/// per `DaemonConfig`.
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;
pub const DEFAULT_MAX_TOKENS: usize = 200;
/// Refill the socket once fewer than this many spare bytes remain at the
/// tail of the read buffer.
const LOW_WATERMARK: usize = 512;
/// Output buffer is sized as a multiple of the compressed input length; most
/// rencode documents compress several-fold, so this rarely needs a retry.
const INFLATE_EXPANSION_FACTOR: usize = 10;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("zlib inflate error")]
    Inflate,
    #[error("zlib deflate error")]
    Deflate,
    #[error("read buffer exceeded {0} byte cap")]
    BufferCapExceeded(usize),
    #[error("decoded message failed rencode parsing: {0}")]
    Decode(#[from] DecodeError),
}

/// One decoded rencode document plus the inflated byte buffer its string
/// tokens borrow from. The two travel together because `Token::string`
/// indexes into `buf` by (offset, length); neither is useful without the
/// other once the two cross a function boundary.
pub struct DecodedMessage {
    pub buf: Vec<u8>,
    pub tokens: Vec<Token>,
}

/// Owns the growable read buffer and inflater state for one connection.
/// Call `read_message` to block for (and return) the next decoded document;
/// it transparently serves pipelined messages already sitting in the buffer
/// before touching the socket again.
pub struct FrameReader {
    buf: BytesMut,
    max_buffer: usize,
    max_tokens: usize,
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader::with_limits(DEFAULT_MAX_BUFFER, DEFAULT_MAX_TOKENS)
    }

    pub fn with_limits(max_buffer: usize, max_tokens: usize) -> FrameReader {
        FrameReader {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_buffer,
            max_tokens,
        }
    }

    /// Reads and decodes the next rencode document from `stream`, growing
    /// the internal buffer and refilling from the socket as needed. Returns
    /// `Ok(None)` on a clean EOF with no partial message pending.
    pub fn read_message<S: Read>(
        &mut self,
        stream: &mut S,
    ) -> Result<Option<DecodedMessage>, TransportError> {
        loop {
            if !self.buf.is_empty() {
                if let Some((consumed, message)) = try_inflate_decode(&self.buf, self.max_tokens)? {
                    self.buf.advance(consumed);
                    if self.buf.is_empty() {
                        self.buf = BytesMut::with_capacity(INITIAL_CAPACITY);
                    }
                    return Ok(Some(message));
                }
            }

            if self.buf.capacity() - self.buf.len() < LOW_WATERMARK {
                if self.buf.len() >= self.max_buffer {
                    return Err(TransportError::BufferCapExceeded(self.max_buffer));
                }
                let grow_to = (self.buf.capacity() * 2).min(self.max_buffer).max(INITIAL_CAPACITY);
                self.buf.reserve(grow_to.saturating_sub(self.buf.capacity()));
            }

            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-message",
                )));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Default for FrameReader {
    fn default() -> FrameReader {
        FrameReader::new()
    }
}

/// Attempts to inflate and decode one message from the front of `input`.
/// Returns `None` when the stream is merely incomplete (more bytes needed);
/// returns `Err` for a genuine zlib protocol violation.
fn try_inflate_decode(
    input: &[u8],
    max_tokens: usize,
) -> Result<Option<(usize, DecodedMessage)>, TransportError> {
    let mut out = vec![0u8; (input.len() * INFLATE_EXPANSION_FACTOR).max(256)];
    let mut decompress = Decompress::new(true);
    loop {
        let out_len = out.len();
        let status = decompress
            .decompress(
                &input[decompress.total_in() as usize..],
                &mut out[decompress.total_out() as usize..out_len],
                FlushDecompress::None,
            )
            .map_err(|_| TransportError::Inflate)?;
        match status {
            Status::StreamEnd => {
                let produced = decompress.total_out() as usize;
                out.truncate(produced);
                let mut tokens = vec![Token::default(); max_tokens];
                let n = rencode::decode(&out, &mut tokens)?;
                tokens.truncate(n);
                let consumed = decompress.total_in() as usize;
                return Ok(Some((consumed, DecodedMessage { buf: out, tokens })));
            }
            Status::BufError => return Ok(None),
            Status::Ok => {
                if (decompress.total_in() as usize) < input.len() {
                    // Output buffer filled before the input did; grow and
                    // keep draining the same input.
                    out.resize(out_len * 2, 0);
                    continue;
                }
                // Consumed everything we have without reaching the end of
                // the zlib stream: the message is still incomplete.
                return Ok(None);
            }
        }
    }
}

/// Encodes, deflates (level 9, single-shot finish) and writes one message.
/// Flushes the stream afterward so the client sees the reply promptly.
pub fn write_message<S: Write>(stream: &mut S, payload: &[u8]) -> Result<(), TransportError> {
    let mut compress = Compress::new(Compression::best(), true);
    let mut out = vec![0u8; (payload.len() + 64).max(256)];
    loop {
        let out_len = out.len();
        let status = compress
            .compress(
                &payload[compress.total_in() as usize..],
                &mut out[compress.total_out() as usize..out_len],
                FlushCompress::Finish,
            )
            .map_err(|_| TransportError::Deflate)?;
        match status {
            Status::StreamEnd => {
                out.truncate(compress.total_out() as usize);
                break;
            }
            Status::Ok | Status::BufError => {
                out.resize(out_len * 2, 0);
            }
        }
    }
    stream.write_all(&out)?;
    stream.flush()?;
    Ok(())
}

/// Logs and swallows a transport error at the boundary that owns the
/// socket; transport failures are never surfaced past the connection loop.
pub fn log_and_close(peer: &str, err: &TransportError) {
    match err {
        TransportError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("{peer}: connection closed mid-message");
        }
        _ => warn!("{peer}: closing connection after transport error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rencode::Encoder;
    use std::io::Cursor;

    fn deflate_all(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_message(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn round_trips_a_single_message() {
        let mut enc = Encoder::new();
        enc.append_list(2);
        enc.append_int(1);
        enc.append_string(b"hello");
        let compressed = deflate_all(enc.data());

        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(compressed);
        let message = reader.read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(message.tokens[0].num_items, 2);
    }

    #[test]
    fn serves_pipelined_messages_without_rereading_socket() {
        let mut enc1 = Encoder::new();
        enc1.append_int(1);
        let mut enc2 = Encoder::new();
        enc2.append_int(2);

        let mut combined = deflate_all(enc1.data());
        combined.extend_from_slice(&deflate_all(enc2.data()));

        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(combined);
        let first = reader.read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(first.tokens[0].int_value, 1);
        let second = reader.read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(second.tokens[0].int_value, 2);
    }

    #[test]
    fn clean_eof_with_no_partial_message_is_none() {
        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(reader.read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_stream_is_an_error_not_a_panic() {
        let mut enc = Encoder::new();
        enc.append_string(b"a message long enough to actually compress");
        let compressed = deflate_all(enc.data());
        let truncated = &compressed[..compressed.len() / 2];

        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(truncated.to_vec());
        assert!(reader.read_message(&mut cursor).is_err());
    }

    #[test]
    fn oversize_buffer_closes_the_connection() {
        use rand::RngCore;
        // Incompressible payload bigger than the cap: random bytes barely
        // shrink under deflate, so the compressed stream itself exceeds
        // `DEFAULT_MAX_BUFFER` before it ever completes.
        let mut payload = vec![0u8; DEFAULT_MAX_BUFFER + (DEFAULT_MAX_BUFFER / 2)];
        rand::thread_rng().fill_bytes(&mut payload);
        let mut enc = Encoder::new();
        enc.append_string(&payload);
        let compressed = deflate_all(enc.data());
        let partial = &compressed[..compressed.len() - 1];

        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(partial.to_vec());
        let err = reader.read_message(&mut cursor).unwrap_err();
        assert!(matches!(err, TransportError::BufferCapExceeded(_)));
    }

    #[test]
    fn token_count_beyond_the_cap_is_rejected() {
        let mut enc = Encoder::new();
        enc.append_list(201);
        for i in 0..201 {
            enc.append_int(i);
        }
        let compressed = deflate_all(enc.data());

        let mut reader = FrameReader::with_limits(DEFAULT_MAX_BUFFER, 200);
        let mut cursor = Cursor::new(compressed);
        let err = reader.read_message(&mut cursor).unwrap_err();
        assert!(matches!(err, TransportError::Decode(DecodeError::TokenCapacityExceeded(200))));
    }
}
