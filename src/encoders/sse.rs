use std::io::{self, Read, Seek, SeekFrom};

/// Formats one chunk of raw bytes as a server-sent event: `id: <offset+n>`
/// followed by one `data: <line>` per newline-delimited line in the chunk,
/// terminated by a blank line. Mirrors `encoders/sse.go`'s `format`.
pub fn format(pos: u64, chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(chunk.len() + 32);
    buf.extend_from_slice(format!("id: {}\n", pos + chunk.len() as u64).as_bytes());
    for line in chunk.split(|&b| b == b'\n') {
        buf.extend_from_slice(b"data: ");
        buf.extend_from_slice(line);
        buf.push(b'\n');
    }
    buf.push(b'\n');
    buf
}

/// Server-sent-event encoder. Reads are bounded to at most half of the
/// caller's buffer, since framing at worst doubles the length; if framing
/// still overflows the caller's buffer this returns `BufferTooSmall`.
pub struct SseEncoder<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> SseEncoder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Read for SseEncoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut scratch = vec![0u8; buf.len() / 2];
        let n = self.inner.read(&mut scratch)?;
        if n == 0 {
            return Ok(0);
        }

        let framed = format(self.offset, &scratch[..n]);
        if framed.len() > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                crate::error::Error::BufferTooSmall,
            ));
        }

        self.offset += n as u64;
        buf[..framed.len()].copy_from_slice(&framed);
        Ok(framed.len())
    }
}

impl<R: Read> Seek for SseEncoder<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(offset) => {
                self.offset = offset;
                Ok(self.offset)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only SeekFrom::Start is supported",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn single_line_chunk_frames_correctly() {
        let out = format(0, b"hello");
        assert_eq!(out, b"id: 5\ndata: hello\n\n");
    }

    #[test]
    fn multi_line_chunk_emits_one_data_line_each() {
        let out = format(10, b"a\nb\nc");
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "id: 15\ndata: a\ndata: b\ndata: c\n\n");
    }

    #[test]
    fn offset_advances_by_bytes_consumed_not_framed_size() {
        let mut enc = SseEncoder::new(Cursor::new(b"hello".to_vec()));
        let mut out = [0u8; 64];
        let n = enc.read(&mut out).unwrap();
        assert!(n > 0);
        assert_eq!(enc.offset(), 5);
    }

    #[test]
    fn buffer_too_small_is_reported() {
        let mut enc = SseEncoder::new(Cursor::new(b"hello world this is long".to_vec()));
        let mut out = [0u8; 4];
        let err = enc.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
