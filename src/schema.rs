use std::fs;
use std::ops::Index;
use std::path::Path;
use std::slice;

use bson::{Bson, Document};
use memchr::memchr;

use crate::error::{Error, Result};
use crate::splitter;

/// The seven value kinds a field can be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int32,
    Int64,
    Double,
    Date,
    Oid,
    String,
}

impl FieldKind {
    /// Maps a metadata kind text to its kind. `int` and `int32` are
    /// synonyms, as are `int64` and `long`.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "int" | "int32" => Self::Int32,
            "int64" | "long" => Self::Int64,
            "double" => Self::Double,
            "bool" => Self::Bool,
            "oid" => Self::Oid,
            "date" => Self::Date,
            "string" => Self::String,
            _ => return None,
        })
    }
}

/// One schema entry: the output field name and the kind its CSV field
/// is coerced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
}

/// An ordered sequence of schema entries. The i-th CSV field maps to
/// the i-th entry; names need not be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldInfo>,
}

impl Schema {
    /// Loads the schema from the first line of a metadata sidecar
    /// file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|err| Error::file_open(path, err))?;
        Self::parse_header(first_line(&bytes))
    }

    /// Parses a metadata header line: comma-separated `NAME/KIND-TEXT`
    /// entries, split at the first `/`, no whitespace trimming.
    pub fn parse_header(line: &[u8]) -> Result<Self> {
        let mut bounds = Vec::new();
        splitter::split_record(line, &mut bounds);

        let mut fields = Vec::with_capacity(bounds.len());

        for (index, &(start, end)) in bounds.iter().enumerate() {
            let entry = &line[start..end];

            let (name, type_name) = match memchr(b'/', entry) {
                Some(sep) if sep + 1 < entry.len() => (&entry[..sep], &entry[sep + 1..]),
                _ => return Err(Error::metadata_missing_kind(index, entry)),
            };

            let name = String::from_utf8_lossy(name).into_owned();
            let type_name = String::from_utf8_lossy(type_name);
            let kind = FieldKind::from_type_name(&type_name)
                .ok_or_else(|| Error::metadata_unknown_kind(index, &name, &type_name))?;

            fields.push(FieldInfo { name, kind });
        }

        Ok(Self { fields })
    }

    /// Builds the schema from an already-parsed metadata document
    /// mapping field name to kind text. Schema order is the document's
    /// insertion order.
    pub fn from_document(metadata: &Document) -> Result<Self> {
        let mut fields = Vec::with_capacity(metadata.len());

        for (index, (name, value)) in metadata.iter().enumerate() {
            let Bson::String(type_name) = value else {
                return Err(Error::metadata_not_string(name));
            };

            let kind = FieldKind::from_type_name(type_name)
                .ok_or_else(|| Error::metadata_unknown_kind(index, name, type_name))?;

            fields.push(FieldInfo {
                name: name.clone(),
                kind,
            });
        }

        Ok(Self { fields })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&FieldInfo> {
        self.fields.get(index)
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, FieldInfo> {
        self.fields.iter()
    }
}

impl Index<usize> for Schema {
    type Output = FieldInfo;

    #[inline]
    fn index(&self, index: usize) -> &FieldInfo {
        &self.fields[index]
    }
}

impl<'s> IntoIterator for &'s Schema {
    type IntoIter = slice::Iter<'s, FieldInfo>;
    type Item = &'s FieldInfo;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Bytes up to the first `\n`, with a single trailing `\r` stripped.
fn first_line(bytes: &[u8]) -> &[u8] {
    let end = memchr(b'\n', bytes).unwrap_or(bytes.len());
    let line = &bytes[..end];
    line.strip_suffix(b"\r").unwrap_or(line)
}
