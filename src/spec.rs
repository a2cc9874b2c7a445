//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! Each decoder is handed a reader positioned just past the four-byte
//! signature, reads the fixed-size header in one go,
//! then reads each variable-length field using the lengths it just decoded.
//! Reading too few or too many bytes would throw off the search
//! for every following marker, so short reads are always errors.
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;
use std::io::{self, prelude::*};

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;

use crate::read::{CompressionMethod, SectionKind};
use crate::result::*;

// Section types: the two bytes following a "PK" marker

/// Local file header section type
pub const LOCAL_FILE_HEADER_DISCRIMINATOR: [u8; 2] = [3, 4];
/// Central directory section type
pub const CENTRAL_DIRECTORY_DISCRIMINATOR: [u8; 2] = [1, 2];
/// End of central directory section type
pub const EOCDR_DISCRIMINATOR: [u8; 2] = [5, 6];

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.  If the external file attributes
        // are compatible with MS-DOS and can be read by PKZIP for
        // DOS version 2.04g then this value will be zero.  If these
        // attributes are not compatible, then this value will
        // identify the host system on which the attributes are
        // compatible.
        //
        // 4.4.2.2 The current mappings are:
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  (and a few dozen others we don't care about)
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Reads a fixed-size header from the stream.
fn read_header<R: Read, const N: usize>(
    reader: &mut R,
    section: SectionKind,
    offset: u64,
) -> ZipResult<[u8; N]> {
    let mut header = [0u8; N];
    reader
        .read_exact(&mut header)
        .map_err(|source| ZipError::Section {
            section,
            field: "header",
            offset,
            source,
        })?;
    Ok(header)
}

/// Reads exactly `length` bytes of a variable-length field.
///
/// Lengths come straight from the archive, so we don't allocate them up front;
/// a bogus 4 GB length on a short stream fails once the stream runs out.
fn read_field<R: Read>(
    reader: &mut R,
    length: u64,
    section: SectionKind,
    field: &'static str,
    offset: u64,
) -> ZipResult<Vec<u8>> {
    let to_error = |source| ZipError::Section {
        section,
        field,
        offset,
        source,
    };
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(length)
        .read_to_end(&mut bytes)
        .map_err(to_error)?;
    if bytes.len() as u64 != length {
        return Err(to_error(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(bytes)
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Decodes a name or comment as UTF-8 or CP437, depending on the flags.
fn decode_text(flags: u16, text: &[u8]) -> ZipResult<Cow<'_, str>> {
    if is_utf8(flags) {
        let utf8 = std::str::from_utf8(text).map_err(ZipError::Encoding)?;
        Ok(Cow::Borrowed(utf8))
    } else {
        Ok(Cow::borrow_from_cp437(text, &CP437_CONTROL))
    }
}

/// Converts an MS-DOS time and date into a `NaiveDateTime`,
/// or `None` if they don't describe a real moment (e.g., month 0).
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// A local file header and the (still compressed) file contents that follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    /// Position of the record's `PK` marker in the stream
    pub offset: u64,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub body: Vec<u8>,
}

impl LocalFileRecord {
    /// Size of the header between the signature and the file name
    pub const HEADER_SIZE: usize = 26;

    /// Decodes a local file record from a reader positioned
    /// just past its signature.
    pub fn decode<R: Read>(reader: &mut R, offset: u64) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        //
        // 4.3.8  File data
        //
        // Immediately following the local header for a file
        // SHOULD be placed the compressed or stored data for the file.
        const SECTION: SectionKind = SectionKind::LocalFile;
        let header: [u8; Self::HEADER_SIZE] = read_header(reader, SECTION, offset)?;
        let mut header = &header[..];
        let minimum_extract_version = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let path_length = read_u16(&mut header);
        let extra_field_length = read_u16(&mut header);

        let path = read_field(reader, path_length.into(), SECTION, "file name", offset)?;
        let extra_field = read_field(
            reader,
            extra_field_length.into(),
            SECTION,
            "extra field",
            offset,
        )?;
        let body = read_field(reader, compressed_size.into(), SECTION, "body", offset)?;

        Ok(Self {
            offset,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
            body,
        })
    }

    /// The file's path, decoded per the UTF-8 flag
    pub fn file_name(&self) -> ZipResult<Cow<'_, str>> {
        decode_text(self.flags, &self.path)
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.compression_method)
    }

    /// True if the file is encrypted (decryption is unsupported)
    pub fn is_encrypted(&self) -> bool {
        is_encrypted(self.flags)
    }

    /// True if names and comments are flagged as UTF-8 (otherwise CP437)
    pub fn is_utf8(&self) -> bool {
        is_utf8(self.flags)
    }

    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        parse_msdos(self.last_modified_time, self.last_modified_date)
    }

    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.uncompressed_size == 0 && self.path.ends_with(b"/")
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive. Its contents live in a [`LocalFileRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    /// Position of the record's `PK` marker in the stream
    pub offset: u64,
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    /// Offset of the matching local file header, as the archive claims
    pub header_offset: u32,
    pub path: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// Size of the header between the signature and the file name
    pub const HEADER_SIZE: usize = 42;

    pub fn decode<R: Read>(reader: &mut R, offset: u64) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        const SECTION: SectionKind = SectionKind::CentralDirectory;
        let header: [u8; Self::HEADER_SIZE] = read_header(reader, SECTION, offset)?;
        let mut entry = &header[..];
        let source_version = read_u16(&mut entry);
        let minimum_extract_version = read_u16(&mut entry);
        let flags = read_u16(&mut entry);
        let compression_method = read_u16(&mut entry);
        let last_modified_time = read_u16(&mut entry);
        let last_modified_date = read_u16(&mut entry);
        let crc32 = read_u32(&mut entry);
        let compressed_size = read_u32(&mut entry);
        let uncompressed_size = read_u32(&mut entry);
        let path_length = read_u16(&mut entry);
        let extra_field_length = read_u16(&mut entry);
        let file_comment_length = read_u16(&mut entry);
        let disk_number = read_u16(&mut entry);
        let internal_file_attributes = read_u16(&mut entry);
        let external_file_attributes = read_u32(&mut entry);
        let header_offset = read_u32(&mut entry);

        let path = read_field(reader, path_length.into(), SECTION, "file name", offset)?;
        let extra_field = read_field(
            reader,
            extra_field_length.into(),
            SECTION,
            "extra field",
            offset,
        )?;
        let file_comment = read_field(
            reader,
            file_comment_length.into(),
            SECTION,
            "comment",
            offset,
        )?;

        Ok(Self {
            offset,
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }

    pub fn file_name(&self) -> ZipResult<Cow<'_, str>> {
        decode_text(self.flags, &self.path)
    }

    pub fn comment(&self) -> ZipResult<Cow<'_, str>> {
        decode_text(self.flags, &self.file_comment)
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.compression_method)
    }

    pub fn is_encrypted(&self) -> bool {
        is_encrypted(self.flags)
    }

    pub fn is_utf8(&self) -> bool {
        is_utf8(self.flags)
    }

    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        parse_msdos(self.last_modified_time, self.last_modified_date)
    }

    pub fn is_dir(&self) -> bool {
        self.uncompressed_size == 0 && self.path.ends_with(b"/")
    }

    /// The system whose file attributes this entry carries
    pub fn system(&self) -> System {
        System::from_source_version(self.source_version)
    }

    /// Unix mode bits, if the file was archived in a Unix OS.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits.
    pub fn unix_mode(&self) -> Option<u16> {
        match self.system() {
            // Unix archivers stash st_mode in the upper half.
            System::Unix => Some((self.external_file_attributes >> 16) as u16),
            _ => None,
        }
    }
}

/// Data from the End of central directory record
///
/// Provides offsets for finding the central directory,
/// along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    /// Position of the record's `PK` marker in the stream
    pub offset: u64,
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Size of the record between the signature and the comment
    pub const HEADER_SIZE: usize = 18;

    pub fn decode<R: Read>(reader: &mut R, offset: u64) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // .ZIP file comment length        2 bytes
        // .ZIP file comment       (variable size)
        const SECTION: SectionKind = SectionKind::EndOfCentralDirectory;
        let header: [u8; Self::HEADER_SIZE] = read_header(reader, SECTION, offset)?;
        let mut eocdr = &header[..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr);
        let file_comment = read_field(reader, comment_length.into(), SECTION, "comment", offset)?;

        Ok(Self {
            offset,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// The archive comment.
    ///
    /// There's no flag to say it's UTF-8, so it's always read as CP437.
    pub fn comment(&self) -> Cow<'_, str> {
        Cow::borrow_from_cp437(&self.file_comment, &CP437_CONTROL)
    }

    /// True if the central directory claims to span several disks
    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != self.disk_with_central_directory
            || self.entries != self.entries_on_this_disk
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_bits() {
        assert!(is_encrypted(0x0001));
        assert!(!is_encrypted(0x0800));
        assert!(is_utf8(0x0800));
        assert!(!is_utf8(0x0001));
    }

    #[test]
    fn msdos_timestamps() {
        // 2020-06-15 13:45:30
        let date = ((2020 - 1980) << 9) | (6 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | (30 / 2);
        let expected = NaiveDate::from_ymd_opt(2020, 6, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        assert_eq!(parse_msdos(time, date), Some(expected));

        // Month zero isn't a date.
        assert_eq!(parse_msdos(0, 0), None);
    }

    #[test]
    fn cp437_and_utf8_names() {
        // 0x82 is "é" in CP437
        assert_eq!(decode_text(0, b"caf\x82").unwrap(), "café");
        assert_eq!(decode_text(1 << 11, "café".as_bytes()).unwrap(), "café");
        assert!(matches!(
            decode_text(1 << 11, b"caf\x82"),
            Err(ZipError::Encoding(_))
        ));
    }

    #[test]
    fn eocdr_with_comment() {
        let mut bytes = vec![0, 0, 0, 0, 2, 0, 2, 0];
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&2000u32.to_le_bytes());
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(b"hello");
        bytes.extend_from_slice(b"trailing");

        let mut reader = &bytes[..];
        let eocdr = EndOfCentralDirectory::decode(&mut reader, 42).unwrap();
        assert_eq!(eocdr.offset, 42);
        assert_eq!(eocdr.entries, 2);
        assert_eq!(eocdr.central_directory_size, 100);
        assert_eq!(eocdr.central_directory_offset, 2000);
        assert_eq!(eocdr.comment(), "hello");
        assert!(!eocdr.is_multi_disk());
        // Exactly the declared comment length was consumed.
        assert_eq!(reader, b"trailing");
    }

    #[test]
    fn eocdr_field_order() {
        let mut bytes = Vec::new();
        for field in [1u16, 2, 3, 4] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let eocdr = EndOfCentralDirectory::decode(&mut &bytes[..], 0).unwrap();
        assert_eq!(eocdr.disk_number, 1);
        assert_eq!(eocdr.disk_with_central_directory, 2);
        assert_eq!(eocdr.entries_on_this_disk, 3);
        assert_eq!(eocdr.entries, 4);
        assert_eq!(eocdr.central_directory_size, 5);
        assert_eq!(eocdr.central_directory_offset, 6);
        assert!(eocdr.file_comment.is_empty());
        assert!(eocdr.is_multi_disk());
    }

    #[test]
    fn central_directory_variable_field_order() {
        let mut bytes = vec![0u8; CentralDirectoryEntry::HEADER_SIZE];
        bytes[24..26].copy_from_slice(&1u16.to_le_bytes());
        bytes[26..28].copy_from_slice(&2u16.to_le_bytes());
        bytes[28..30].copy_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(b"nEEccc");
        bytes.extend_from_slice(b"PK");

        let mut reader = &bytes[..];
        let entry = CentralDirectoryEntry::decode(&mut reader, 0).unwrap();
        assert_eq!(entry.path, b"n");
        assert_eq!(entry.extra_field, b"EE");
        assert_eq!(entry.file_comment, b"ccc");
        assert_eq!(reader, b"PK");
    }

    #[test]
    fn short_comment_is_an_error() {
        let mut bytes = vec![0; 16];
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(b"short");

        match EndOfCentralDirectory::decode(&mut &bytes[..], 0) {
            Err(ZipError::Section {
                section: SectionKind::EndOfCentralDirectory,
                field: "comment",
                source,
                ..
            }) => assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected a truncated comment, got {:?}", other),
        }
    }

    #[test]
    fn unix_mode_from_external_attributes() {
        let mut header = vec![0u8; CentralDirectoryEntry::HEADER_SIZE];
        // version made by: 3.0 on Unix
        header[0] = 30;
        header[1] = 3;
        // external attributes: 0o100644 in the upper half
        header[34..38].copy_from_slice(&(0o100644u32 << 16).to_le_bytes());

        let entry = CentralDirectoryEntry::decode(&mut &header[..], 0).unwrap();
        assert_eq!(entry.system(), System::Unix);
        assert_eq!(entry.unix_mode(), Some(0o100644));
        assert!(entry.path.is_empty());
        assert!(entry.file_comment.is_empty());
    }
}
