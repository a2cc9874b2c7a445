//! Tools for reading a ZIP archive.
//!
//! Unlike readers that seek to the end of the archive and trust its
//! central directory, we make a single forward pass:
//! find a `PK` marker, decode the record it introduces, repeat.
//! This works on anything that implements [`BufRead`],
//! including pipes and sockets that can't seek,
//! and keeps going over junk between records.
//!
//! Use [`Archive::read()`] to collect everything at once,
//! or [`Sections`] to handle records as they're decoded.
//!
//! [`BufRead`]: https://doc.rust-lang.org/std/io/trait.BufRead.html
//! [`Archive::read()`]: struct.Archive.html#method.read
//! [`Sections`]: struct.Sections.html

use std::fmt;
use std::io::{self, BufRead};

use flate2::read::DeflateDecoder;
use log::*;

use crate::crc_reader::Crc32Reader;
use crate::marker::MarkerScanner;
use crate::result::*;
use crate::spec::{self, CentralDirectoryEntry, EndOfCentralDirectory, LocalFileRecord};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// The kinds of records we know how to decode
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SectionKind {
    LocalFile,
    CentralDirectory,
    EndOfCentralDirectory,
}

impl SectionKind {
    /// Maps the two bytes after a `PK` marker to a record kind.
    pub fn from_discriminator(discriminator: [u8; 2]) -> Option<Self> {
        match discriminator {
            spec::LOCAL_FILE_HEADER_DISCRIMINATOR => Some(SectionKind::LocalFile),
            spec::CENTRAL_DIRECTORY_DISCRIMINATOR => Some(SectionKind::CentralDirectory),
            spec::EOCDR_DISCRIMINATOR => Some(SectionKind::EndOfCentralDirectory),
            _ => None,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionKind::LocalFile => "local file record",
            SectionKind::CentralDirectory => "central directory entry",
            SectionKind::EndOfCentralDirectory => "end of central directory record",
        })
    }
}

/// A marker followed by a section type we don't know how to decode.
///
/// Scanning just moves on to the next marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnrecognizedSection {
    /// Position of the `PK` marker in the stream
    pub offset: u64,
    pub discriminator: [u8; 2],
}

/// One decoded record from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    LocalFile(LocalFileRecord),
    CentralDirectory(CentralDirectoryEntry),
    EndOfCentralDirectory(EndOfCentralDirectory),
    Unrecognized(UnrecognizedSection),
}

/// Iterates over the records of a ZIP archive as they're found in a stream.
///
/// Yields an error at most once; the iterator is done after that,
/// since there's no telling where a broken record ends.
pub struct Sections<R> {
    scanner: MarkerScanner<R>,
    done: bool,
}

impl<R: BufRead> Sections<R> {
    pub fn new(reader: R) -> Self {
        Self {
            scanner: MarkerScanner::new(reader),
            done: false,
        }
    }

    /// The number of bytes consumed from the stream so far
    pub fn position(&self) -> u64 {
        self.scanner.position()
    }

    fn next_section(&mut self) -> ZipResult<Option<Section>> {
        let offset = match self.scanner.find_marker()? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let discriminator = match self.scanner.read_discriminator() {
            Ok(Some(d)) => d,
            Ok(None) => {
                debug!("Stream ended right after the marker at offset {}", offset);
                return Ok(None);
            }
            Err(source) => return Err(ZipError::Discriminator { offset, source }),
        };

        let section = match SectionKind::from_discriminator(discriminator) {
            Some(SectionKind::LocalFile) => {
                Section::LocalFile(LocalFileRecord::decode(&mut self.scanner, offset)?)
            }
            Some(SectionKind::CentralDirectory) => Section::CentralDirectory(
                CentralDirectoryEntry::decode(&mut self.scanner, offset)?,
            ),
            Some(SectionKind::EndOfCentralDirectory) => Section::EndOfCentralDirectory(
                EndOfCentralDirectory::decode(&mut self.scanner, offset)?,
            ),
            None => {
                if cfg!(feature = "strict-sections") {
                    return Err(ZipError::UnrecognizedSection {
                        offset,
                        discriminator,
                    });
                }
                warn!(
                    "Unrecognized section type {:02x?} at offset {}",
                    discriminator, offset
                );
                Section::Unrecognized(UnrecognizedSection {
                    offset,
                    discriminator,
                })
            }
        };
        trace!("{:?}", section);
        Ok(Some(section))
    }
}

impl<R: BufRead> Iterator for Sections<R> {
    type Item = ZipResult<Section>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_section().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

/// Everything decoded from a ZIP archive, in the order it was found
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Archive {
    local_files: Vec<LocalFileRecord>,
    central_directory: Vec<CentralDirectoryEntry>,
    end_of_central_directory: Option<EndOfCentralDirectory>,
    unrecognized: Vec<UnrecognizedSection>,
}

impl Archive {
    /// Scans a ZIP archive from start to finish.
    ///
    /// ```no_run
    /// # use std::fs::File;
    /// # use std::io::BufReader;
    /// # use zipscan::*;
    /// let archive = Archive::read(BufReader::new(File::open("foo.zip")?))?;
    /// for local in archive.local_files() {
    ///     println!("{}", local.file_name()?);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// Either the whole stream decodes or we return the first error;
    /// use [`Sections`] directly to keep what was decoded before a failure.
    ///
    /// [`Sections`]: struct.Sections.html
    pub fn read<R: BufRead>(reader: R) -> ZipResult<Self> {
        let mut archive = Self::default();
        let mut sections = Sections::new(reader);
        for section in sections.by_ref() {
            archive.push(section?);
        }
        debug!(
            "Scanned {} bytes: {} local files, {} central directory entries, {} end records, {} unrecognized sections",
            sections.position(),
            archive.local_files.len(),
            archive.central_directory.len(),
            archive.end_of_central_directory.iter().count(),
            archive.unrecognized.len(),
        );
        Ok(archive)
    }

    /// Scans a ZIP archive already in memory (or memory-mapped).
    pub fn from_bytes(bytes: &[u8]) -> ZipResult<Self> {
        Self::read(bytes)
    }

    fn push(&mut self, section: Section) {
        match section {
            Section::LocalFile(local) => self.local_files.push(local),
            Section::CentralDirectory(entry) => self.central_directory.push(entry),
            Section::EndOfCentralDirectory(eocdr) => {
                if let Some(previous) = &self.end_of_central_directory {
                    debug!(
                        "End of central directory at offset {} replaces the one at {}",
                        eocdr.offset, previous.offset
                    );
                }
                self.end_of_central_directory = Some(eocdr);
            }
            Section::Unrecognized(unknown) => self.unrecognized.push(unknown),
        }
    }

    pub fn local_files(&self) -> &[LocalFileRecord] {
        &self.local_files
    }

    pub fn central_directory(&self) -> &[CentralDirectoryEntry] {
        &self.central_directory
    }

    /// The last end of central directory record in the stream, if any
    pub fn end_of_central_directory(&self) -> Option<&EndOfCentralDirectory> {
        self.end_of_central_directory.as_ref()
    }

    /// Markers we skipped over because we didn't know their section type
    pub fn unrecognized_sections(&self) -> &[UnrecognizedSection] {
        &self.unrecognized
    }

    /// Finds the local file record a central directory entry points to.
    ///
    /// Offsets are only meaningful if nothing was prepended to the archive,
    /// so this returns `None` for self-extracting archives and the like.
    pub fn local_file_for(&self, entry: &CentralDirectoryEntry) -> Option<&LocalFileRecord> {
        let wanted = u64::from(entry.header_offset);
        self.local_files
            .binary_search_by_key(&wanted, |local| local.offset)
            .ok()
            .map(|i| &self.local_files[i])
    }
}

impl LocalFileRecord {
    /// Returns a reader of the decompressed file contents.
    ///
    /// The stored CRC-32 is checked when the reader hits EOF.
    /// Neither happens during the scan itself; this is for callers.
    pub fn contents(&self) -> ZipResult<Box<dyn io::Read + Send + '_>> {
        if self.is_encrypted() {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                String::from_utf8_lossy(&self.path)
            )));
        }
        make_reader(self.compression_method(), self.crc32, &self.body[..])
    }
}

/// Returns a boxed read trait for a compressed file,
/// given its compression method and expected CRC.
fn make_reader<'a, R: io::Read + Send + 'a>(
    compression_method: CompressionMethod,
    crc32: u32,
    reader: R,
) -> ZipResult<Box<dyn io::Read + Send + 'a>> {
    match compression_method {
        CompressionMethod::None => Ok(Box::new(Crc32Reader::new(reader, crc32))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32)))
        }
        CompressionMethod::Unsupported(method) => Err(ZipError::UnsupportedArchive(format!(
            "Compression method {} not supported",
            method
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn eocdr_bytes(comment: &[u8]) -> Vec<u8> {
        let mut bytes = b"PK\x05\x06".to_vec();
        bytes.extend_from_slice(&[0; 16]);
        bytes.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(comment);
        bytes
    }

    #[test]
    fn discriminators() {
        assert_eq!(
            SectionKind::from_discriminator([3, 4]),
            Some(SectionKind::LocalFile)
        );
        assert_eq!(
            SectionKind::from_discriminator([1, 2]),
            Some(SectionKind::CentralDirectory)
        );
        assert_eq!(
            SectionKind::from_discriminator([5, 6]),
            Some(SectionKind::EndOfCentralDirectory)
        );
        assert_eq!(SectionKind::from_discriminator([7, 8]), None);
        assert_eq!(SectionKind::from_discriminator([4, 3]), None);
    }

    #[test]
    fn empty_stream_is_an_empty_archive() {
        let archive = Archive::from_bytes(b"").unwrap();
        assert_eq!(archive, Archive::default());
    }

    #[test]
    fn later_end_record_wins() {
        let mut bytes = eocdr_bytes(b"first");
        bytes.extend(eocdr_bytes(b"second"));
        let archive = Archive::from_bytes(&bytes).unwrap();
        let eocdr = archive.end_of_central_directory().unwrap();
        assert_eq!(eocdr.file_comment, b"second");
        assert_eq!(eocdr.offset, 27);
    }

    #[test]
    fn marker_inside_comment_is_skipped() {
        // A comment that looks like the start of another end record
        let bytes = eocdr_bytes(b"PK\x05\x06");
        let archive = Archive::from_bytes(&bytes).unwrap();
        assert_eq!(
            archive.end_of_central_directory().unwrap().file_comment,
            b"PK\x05\x06"
        );
        assert!(archive.unrecognized_sections().is_empty());
    }

    #[test]
    fn iterator_stops_after_an_error() {
        let mut sections = Sections::new(&b"PK\x05\x06\x00"[..]);
        assert!(matches!(sections.next(), Some(Err(ZipError::Section { .. }))));
        assert!(sections.next().is_none());
    }

    #[test]
    fn unsupported_compression() {
        assert!(matches!(
            make_reader(CompressionMethod::Unsupported(12), 0, &b""[..]),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }
}
