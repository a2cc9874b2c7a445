//! Finds `PK` section markers in a forward-only stream.
//!
//! Every ZIP record starts with the bytes `P K`,
//! followed by two more bytes saying which record it is.
//! We don't trust any offsets in the archive, so we just look for the next `PK`.
//! This is only sound if every record decoder consumes exactly the number
//! of bytes its length fields declare; markers inside a payload are skipped
//! because the decoder already read past them.

use std::io::{self, prelude::*};

use memchr::memmem;

/// The two bytes that start every ZIP section
pub const MARKER: [u8; 2] = [b'P', b'K'];

/// Wraps a buffered reader, counting how many bytes have been consumed
/// so that records can report where they were found.
pub struct MarkerScanner<R> {
    inner: R,
    position: u64,
}

impl<R: BufRead> MarkerScanner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// The number of bytes consumed from the stream so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Consumes bytes through the next `PK` marker,
    /// returning the offset of the `P`.
    ///
    /// Returns `Ok(None)` if the stream ends first,
    /// which is how a well-formed scan finishes.
    pub fn find_marker(&mut self) -> io::Result<Option<u64>> {
        // The last byte of the previous buffer,
        // in case the marker straddles two of them.
        let mut previous = 0u8;
        loop {
            let (consumed, found) = {
                let buf = match self.inner.fill_buf() {
                    Ok(buf) => buf,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if buf.is_empty() {
                    return Ok(None);
                }
                if previous == MARKER[0] && buf[0] == MARKER[1] {
                    (1, true)
                } else if let Some(i) = memmem::find(buf, &MARKER) {
                    (i + MARKER.len(), true)
                } else {
                    previous = buf[buf.len() - 1];
                    (buf.len(), false)
                }
            };
            self.consume(consumed);
            if found {
                return Ok(Some(self.position - MARKER.len() as u64));
            }
        }
    }

    /// Reads the two bytes following a marker.
    ///
    /// Returns `Ok(None)` if the stream ends immediately after the marker.
    /// A single trailing byte is an `UnexpectedEof` error.
    pub fn read_discriminator(&mut self) -> io::Result<Option<[u8; 2]>> {
        let mut discriminator = [0u8; 2];
        let mut filled = 0;
        while filled < discriminator.len() {
            match self.read(&mut discriminator[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Some(discriminator))
    }
}

impl<R: BufRead> Read for MarkerScanner<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<R: BufRead> BufRead for MarkerScanner<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.position += amt as u64;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn empty_stream() {
        let mut scanner = MarkerScanner::new(&b""[..]);
        assert_eq!(scanner.find_marker().unwrap(), None);
    }

    #[test]
    fn no_marker() {
        let mut scanner = MarkerScanner::new(&b"PPPPkKP"[..]);
        assert_eq!(scanner.find_marker().unwrap(), None);
        assert_eq!(scanner.position(), 7);
    }

    #[test]
    fn finds_markers_in_order() {
        let mut scanner = MarkerScanner::new(&b"junkPK\x03\x04PPK"[..]);
        assert_eq!(scanner.find_marker().unwrap(), Some(4));
        assert_eq!(scanner.read_discriminator().unwrap(), Some([3, 4]));
        assert_eq!(scanner.find_marker().unwrap(), Some(9));
        assert_eq!(scanner.position(), 11);
        // Nothing after the last marker
        assert_eq!(scanner.read_discriminator().unwrap(), None);
    }

    #[test]
    fn marker_split_across_buffers() {
        // A one-byte buffer forces every comparison across a refill.
        let reader = BufReader::with_capacity(1, &b"xxPxPK\x01\x02"[..]);
        let mut scanner = MarkerScanner::new(reader);
        assert_eq!(scanner.find_marker().unwrap(), Some(4));
        assert_eq!(scanner.read_discriminator().unwrap(), Some([1, 2]));
    }

    #[test]
    fn consumed_marker_bytes_dont_pair_up() {
        // "PK" then "K": the second K has no P of its own.
        let reader = BufReader::with_capacity(2, &b"PKK"[..]);
        let mut scanner = MarkerScanner::new(reader);
        assert_eq!(scanner.find_marker().unwrap(), Some(0));
        assert_eq!(scanner.find_marker().unwrap(), None);
    }

    #[test]
    fn half_a_discriminator() {
        let mut scanner = MarkerScanner::new(&b"PK\x05"[..]);
        assert_eq!(scanner.find_marker().unwrap(), Some(0));
        let err = scanner.read_discriminator().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
