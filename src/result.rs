//! Error types and the related `Result<T>`

use std::io;

use thiserror::Error;

use crate::read::SectionKind;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O while searching for the next marker
    #[error("I/O Error while searching for a section marker")]
    Io(#[from] io::Error),

    /// The two bytes identifying a section couldn't be read after its marker.
    #[error("Couldn't read the section type after the marker at offset {offset}")]
    Discriminator {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A record decoder failed partway through a record.
    ///
    /// A stream that ends early shows up here with
    /// [`io::ErrorKind::UnexpectedEof`] as the source.
    #[error("Couldn't read the {field} of the {section} at offset {offset}")]
    Section {
        section: SectionKind,
        field: &'static str,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A marker was followed by a section type we don't know.
    /// Only fatal with the `strict-sections` feature.
    #[error("Unrecognized section type {discriminator:02x?} at offset {offset}")]
    UnrecognizedSection { offset: u64, discriminator: [u8; 2] },

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A file's contents didn't match the CRC-32 stored in its header.
    #[error("Invalid checksum: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),
}

impl ZipError {
    /// Returns the kind of record being decoded when the error occurred, if any.
    pub fn section(&self) -> Option<SectionKind> {
        match self {
            ZipError::Section { section, .. } => Some(*section),
            _ => None,
        }
    }
}
