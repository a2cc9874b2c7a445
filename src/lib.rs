//! zipscan decodes ZIP archives in a single forward pass over any byte stream:
//!
//! ```no_run
//! # use std::fs;
//! # use zipscan::*;
//! let bytes = fs::read("foo.zip")?;
//! let archive = Archive::from_bytes(&bytes)?;
//! for entry in archive.central_directory() {
//!     println!("{} ({} bytes)", entry.file_name()?, entry.uncompressed_size);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Streams that can't seek work just as well,
//! and records can be handled as they arrive:
//! ```no_run
//! # use std::io::{self, BufReader};
//! # use zipscan::*;
//! for section in Sections::new(BufReader::new(io::stdin())) {
//!     if let Section::LocalFile(local) = section? {
//!         let mut reader = local.contents()?;
//!         io::copy(&mut reader, &mut io::sink())?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every record in a ZIP archive starts with the bytes `PK`
//! and two more bytes saying what kind of record it is:
//! a local file header followed by that file's (compressed) contents,
//! a central directory entry describing a file,
//! or the end of central directory record.
//! Rather than seeking to the end of the archive and trusting the offsets
//! there, we look for each marker in turn and decode whatever follows.
//! Each record says exactly how long its variable-length fields are,
//! so a `PK` that happens to appear inside a file's contents is skipped
//! along with the rest of them.
//!
//! Decompression and checksum validation aren't part of the scan.
//! [`LocalFileRecord::contents()`] provides both for callers who want them.
//!
//! [`LocalFileRecord::contents()`]: spec/struct.LocalFileRecord.html#method.contents

pub mod read;
pub mod result;
pub mod spec;

pub use read::{
    Archive, CompressionMethod, Section, SectionKind, Sections, UnrecognizedSection,
};
pub use result::{ZipError, ZipResult};
pub use spec::{CentralDirectoryEntry, EndOfCentralDirectory, LocalFileRecord, System};

mod crc_reader;
mod marker;
