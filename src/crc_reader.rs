//! Helper module to check a file's CRC-32 as it's read

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

use crate::result::ZipError;

/// Reader that validates the CRC32 when it reaches the EOF.
///
/// A mismatch is reported as an [`io::ErrorKind::InvalidData`] error
/// wrapping [`ZipError::ChecksumMismatch`], once per read at EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn check(&self) -> io::Result<()> {
        let actual = self.hasher.clone().finalize();
        if actual == self.expected {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ZipError::ChecksumMismatch {
                    expected: self.expected,
                    actual,
                },
            ))
        }
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.check()?;
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_contents() {
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(&b""[..], 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(&b""[..], 1);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        match err.into_inner().map(|e| e.downcast::<ZipError>()) {
            Some(Ok(e)) => assert!(matches!(
                *e,
                ZipError::ChecksumMismatch {
                    expected: 1,
                    actual: 0
                }
            )),
            other => panic!("Expected a checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn read_to_end_checks() {
        let mut contents = Vec::new();
        Crc32Reader::new(&b"1234"[..], 0x9be3e0a3)
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"1234");

        let mut contents = Vec::new();
        assert!(Crc32Reader::new(&b"1235"[..], 0x9be3e0a3)
            .read_to_end(&mut contents)
            .is_err());
    }

    #[test]
    fn zero_length_reads_dont_check() {
        let mut buf = [0; 5];
        let mut reader = Crc32Reader::new(&b"1234"[..], 0x9be3e0a3);
        assert_eq!(reader.read(&mut buf[..0]).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
