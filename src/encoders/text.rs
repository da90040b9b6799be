use std::io::{self, Read, Seek, SeekFrom};

/// Plain passthrough encoder. Tracks a logical offset only for tooling —
/// the bytes themselves are never touched.
pub struct TextEncoder<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> TextEncoder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Read for TextEncoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for TextEncoder<R> {
    /// Only `SeekFrom::Start` is meaningful here: the underlying stream
    /// supply is not randomly addressable, so seeking is a logical offset
    /// advance, matching the Go original's fallback path for a
    /// non-seekable reader.
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
    fn passthrough_tracks_offset() {
        let mut enc = TextEncoder::new(Cursor::new(b"hello world".to_vec()));
        let mut buf = [0u8; 5];
        let n = enc.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(enc.offset(), 5);
    }

    #[test]
    fn seek_start_advances_logical_offset() {
        let mut enc = TextEncoder::new(Cursor::new(b"abcdef".to_vec()));
        enc.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(enc.offset(), 3);
    }
}
