use std::path::{Path, PathBuf};
use std::{error, fmt, io, result};

/// Reasons a stream can fail fatally.
///
/// Soft per-field conversion failures never surface here; they are
/// counted by [`CsvFileStats`](crate::CsvFileStats) instead.
#[derive(Debug)]
pub enum ErrorKind {
    PathRejected {
        path: String,
    },
    FileOpen {
        path: PathBuf,
        source: io::Error,
    },
    MapFailed {
        path: PathBuf,
        source: io::Error,
    },
    MetadataMissingKind {
        index: usize,
        entry: String,
    },
    MetadataUnknownKind {
        index: usize,
        name: String,
        type_name: String,
    },
    MetadataNotString {
        name: String,
    },
    BufferTooSmall {
        document_size: usize,
        buffer_size: usize,
    },
    StringTooLarge {
        offset: usize,
        len: usize,
    },
}

#[derive(Debug)]
pub struct Error(ErrorKind);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub(crate) fn path_rejected(path: &str) -> Self {
        Self(ErrorKind::PathRejected {
            path: path.to_string(),
        })
    }

    pub(crate) fn file_open(path: &Path, source: io::Error) -> Self {
        Self(ErrorKind::FileOpen {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn map_failed(path: &Path, source: io::Error) -> Self {
        Self(ErrorKind::MapFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn metadata_missing_kind(index: usize, entry: &[u8]) -> Self {
        Self(ErrorKind::MetadataMissingKind {
            index,
            entry: String::from_utf8_lossy(entry).into_owned(),
        })
    }

    pub(crate) fn metadata_unknown_kind(index: usize, name: &str, type_name: &str) -> Self {
        Self(ErrorKind::MetadataUnknownKind {
            index,
            name: name.to_string(),
            type_name: type_name.to_string(),
        })
    }

    pub(crate) fn metadata_not_string(name: &str) -> Self {
        Self(ErrorKind::MetadataNotString {
            name: name.to_string(),
        })
    }

    pub(crate) fn buffer_too_small(document_size: usize, buffer_size: usize) -> Self {
        Self(ErrorKind::BufferTooSmall {
            document_size,
            buffer_size,
        })
    }

    pub(crate) fn string_too_large(offset: usize, len: usize) -> Self {
        Self(ErrorKind::StringTooLarge { offset, len })
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            ErrorKind::PathRejected { path } => {
                write!(f, "file path must not include '..' but {} does", path)
            }
            ErrorKind::FileOpen { path, source } => {
                write!(f, "failed to open {}: {}", path.display(), source)
            }
            ErrorKind::MapFailed { path, source } => {
                write!(f, "failed to memory map {}: {}", path.display(), source)
            }
            ErrorKind::MetadataMissingKind { index, entry } => {
                write!(
                    f,
                    "metadata field {} '{}' does not specify a type name",
                    index, entry
                )
            }
            ErrorKind::MetadataUnknownKind {
                index,
                name,
                type_name,
            } => {
                write!(
                    f,
                    "'{}' type is not supported at field {}: {}",
                    type_name, index, name
                )
            }
            ErrorKind::MetadataNotString { name } => {
                write!(
                    f,
                    "expected a string type name for metadata field '{}'",
                    name
                )
            }
            ErrorKind::BufferTooSmall {
                document_size,
                buffer_size,
            } => {
                write!(
                    f,
                    "buffer of {} bytes is too small to contain a {} byte document",
                    buffer_size, document_size
                )
            }
            ErrorKind::StringTooLarge { offset, len } => {
                write!(
                    f,
                    "string field of {} bytes at offset {} exceeds the 65536 byte limit",
                    len, offset
                )
            }
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
