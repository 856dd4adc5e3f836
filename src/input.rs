use std::fs::File;
use std::path::{Path, PathBuf};

use bson::raw::RawDocumentBuf;
use bson::Document;
use memmap2::Mmap;
use tracing::warn;

use crate::convert;
use crate::error::{Error, Result};
use crate::record::{self, RecordRead};
use crate::schema::Schema;
use crate::splitter;
use crate::stats::CsvFileStats;

#[derive(Debug)]
enum SchemaSource {
    Sidecar(PathBuf),
    Document(Schema),
}

/// A streaming input over a CSV data file and its metadata sidecar.
///
/// `open` maps the whole data file read-only and loads the schema;
/// each `read` then pulls one record, coerces its fields in schema
/// order, and copies exactly one encoded BSON document into the
/// caller's buffer. A `read` returning 0 means end of stream.
///
/// The stream is single-threaded and pull-based. Dropping it releases
/// the mapping and file handle.
#[derive(Debug)]
pub struct CsvFileInput {
    file_path: PathBuf,
    schema_source: SchemaSource,
    schema: Schema,
    file: Option<File>,
    map: Option<Mmap>,
    map_failed: bool,
    offset: usize,
    stats: CsvFileStats,
    scratch: Vec<u8>,
    bounds: Vec<(usize, usize)>,
}

impl CsvFileInput {
    /// Creates a stream reading `data_path` with the schema in the
    /// first line of `metadata_path`, both relative to `dir`.
    ///
    /// Relative paths containing `..` are rejected before any I/O.
    pub fn new(
        dir: impl AsRef<Path>,
        data_path: &str,
        metadata_path: &str,
    ) -> Result<Self> {
        reject_parent_traversal(data_path)?;
        reject_parent_traversal(metadata_path)?;

        Ok(Self::with_schema_source(
            dir.as_ref().join(data_path),
            SchemaSource::Sidecar(dir.as_ref().join(metadata_path)),
        ))
    }

    /// Creates a stream reading `data_path` relative to `dir`, with
    /// the schema given as an already-parsed metadata document mapping
    /// field name to kind text, in insertion order.
    pub fn with_schema(
        dir: impl AsRef<Path>,
        data_path: &str,
        metadata: &Document,
    ) -> Result<Self> {
        reject_parent_traversal(data_path)?;

        Ok(Self::with_schema_source(
            dir.as_ref().join(data_path),
            SchemaSource::Document(Schema::from_document(metadata)?),
        ))
    }

    fn with_schema_source(file_path: PathBuf, schema_source: SchemaSource) -> Self {
        Self {
            file_path,
            schema_source,
            schema: Schema::default(),
            file: None,
            map: None,
            map_failed: false,
            offset: 0,
            stats: CsvFileStats::default(),
            scratch: Vec::new(),
            bounds: Vec::new(),
        }
    }

    /// The absolute path of the data file.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads the schema, opens the data file read-only, and maps its
    /// entire length. The cursor starts at 0.
    pub fn open(&mut self) -> Result<()> {
        self.schema = match &self.schema_source {
            SchemaSource::Sidecar(path) => Schema::load(path)?,
            SchemaSource::Document(schema) => schema.clone(),
        };

        let file =
            File::open(&self.file_path).map_err(|err| Error::file_open(&self.file_path, err))?;

        let map = match unsafe { Mmap::map(&file) } {
            Ok(map) => map,
            Err(err) => {
                self.map_failed = true;
                return Err(Error::map_failed(&self.file_path, err));
            }
        };

        self.file = Some(file);
        self.map = Some(map);
        self.map_failed = false;
        self.offset = 0;

        Ok(())
    }

    /// Unmaps and closes. Idempotent.
    pub fn close(&mut self) {
        self.map = None;
        self.file = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some() && self.map.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.map_failed
    }

    pub fn is_eof(&self) -> bool {
        match &self.map {
            Some(map) => self.offset >= map.len(),
            None => false,
        }
    }

    pub fn is_good(&self) -> bool {
        !self.is_failed() && !self.is_eof()
    }

    /// Copies the next encoded document into `buf`, returning its
    /// size, or 0 at end of stream. Fails if `buf` cannot hold the
    /// whole document; partial documents are never written.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(document) = self.read_document()? else {
            return Ok(0);
        };

        self.stats.records_returned += 1;

        let bytes = document.as_bytes();
        if bytes.len() > buf.len() {
            return Err(Error::buffer_too_small(bytes.len(), buf.len()));
        }

        self.stats.output_size += bytes.len() as i64;
        buf[..bytes.len()].copy_from_slice(bytes);

        Ok(bytes.len())
    }

    /// Borrows the live counters without resetting them.
    pub fn stats(&self) -> &CsvFileStats {
        &self.stats
    }

    /// Copies the counters out and resets the live aggregate.
    pub fn snapshot_stats(&mut self) -> CsvFileStats {
        std::mem::take(&mut self.stats)
    }

    /// Consumes the stream, releasing the mapping, and moves the
    /// counter aggregate out.
    pub fn into_stats(self) -> CsvFileStats {
        self.stats
    }

    fn read_document(&mut self) -> Result<Option<RawDocumentBuf>> {
        if !self.is_good() {
            return Ok(None);
        }

        let Some(map) = &self.map else {
            return Ok(None);
        };
        let data: &[u8] = map;

        // Empty lines produce no document; keep pulling until a real
        // record or the end of the image.
        let record = loop {
            match record::next_record(data, &mut self.offset, &mut self.stats) {
                RecordRead::Eof => return Ok(None),
                RecordRead::Corrupt { at } => {
                    warn!(
                        file = %self.file_path.display(),
                        offset = at,
                        "csv data violates RFC 4180 quoting; skipping the rest of the file",
                    );
                    return Ok(None);
                }
                RecordRead::Record(record) if record.is_empty() => continue,
                RecordRead::Record(record) => break record,
            }
        };

        self.stats.input_size += record.len() as i64;

        splitter::split_record(record, &mut self.bounds);
        if self.bounds.len() != self.schema.len() {
            self.stats.inc_non_compliant_with_metadata();
        }

        // A record/schema length mismatch is not fatal: process as
        // many fields as both sides have.
        let count = self.bounds.len().min(self.schema.len());
        let mut builder = RawDocumentBuf::new();

        for index in 0..count {
            let (start, end) = self.bounds[index];
            let info = &self.schema[index];

            convert::append_field(
                &mut builder,
                &info.name,
                info.kind,
                &record[start..end],
                self.offset,
                &mut self.scratch,
                &mut self.stats,
            )?;
        }

        Ok(Some(builder))
    }
}

fn reject_parent_traversal(path: &str) -> Result<()> {
    if path.contains("..") {
        return Err(Error::path_rejected(path));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use bson::oid::ObjectId;
    use bson::raw::RawDocument;
    use bson::{doc, Bson};
    use tempfile::TempDir;

    use crate::error::ErrorKind;

    fn fixture(data: &[u8], metadata: &[u8]) -> (TempDir, CsvFileInput) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.csv"), data).unwrap();
        fs::write(dir.path().join("data.txt"), metadata).unwrap();

        let input = CsvFileInput::new(dir.path(), "data.csv", "data.txt").unwrap();

        (dir, input)
    }

    fn read_doc(input: &mut CsvFileInput) -> Option<Document> {
        let mut buf = [0u8; 4096];
        let n = input.read(&mut buf).unwrap();

        if n == 0 {
            return None;
        }

        let raw = RawDocument::from_bytes(&buf[..n]).unwrap();
        Some(Document::try_from(raw).unwrap())
    }

    fn read_all(input: &mut CsvFileInput) -> Vec<Document> {
        let mut documents = Vec::new();
        while let Some(document) = read_doc(input) {
            documents.push(document);
        }
        documents
    }

    #[test]
    fn test_basic_read_unix() {
        let (_dir, mut input) = fixture(b"1,hello\n2,\"wo\"\"rld\"\n", b"a/int32,b/string");

        input.open().unwrap();
        assert!(input.is_open());
        assert!(input.is_good());

        let documents = read_all(&mut input);
        assert_eq!(
            documents,
            vec![
                doc! { "a": 1_i32, "b": "hello" },
                doc! { "a": 2_i32, "b": "wo\"rld" },
            ],
        );

        assert!(input.is_eof());
        input.close();
        assert!(!input.is_open());

        let stats = input.into_stats();
        assert_eq!(stats.unix_fmt, 2);
        assert_eq!(stats.dos_fmt, 0);
        assert_eq!(stats.records_returned, 2);
        assert_eq!(stats.total_errors, 0);
    }

    #[test]
    fn test_basic_read_dos() {
        let (_dir, mut input) = fixture(b"1,x\r\n2,y\r\n", b"a/int32,b/string");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(
            documents,
            vec![doc! { "a": 1_i32, "b": "x" }, doc! { "a": 2_i32, "b": "y" }],
        );

        let stats = input.into_stats();
        assert_eq!(stats.dos_fmt, 2);
        assert_eq!(stats.unix_fmt, 0);
    }

    #[test]
    fn test_newline_equivalence() {
        let metadata = b"a/int32,b/string";
        let (_dir, mut unix) = fixture(b"1,x\n2,\"y,z\"\n", metadata);
        let (_dir2, mut dos) = fixture(b"1,x\r\n2,\"y,z\"\r\n", metadata);

        unix.open().unwrap();
        dos.open().unwrap();

        let mut unix_buf = [0u8; 256];
        let mut dos_buf = [0u8; 256];

        loop {
            let n_unix = unix.read(&mut unix_buf).unwrap();
            let n_dos = dos.read(&mut dos_buf).unwrap();

            assert_eq!(n_unix, n_dos);
            assert_eq!(&unix_buf[..n_unix], &dos_buf[..n_dos]);

            if n_unix == 0 {
                break;
            }
        }

        let unix_stats = unix.into_stats();
        let dos_stats = dos.into_stats();
        assert_eq!(unix_stats.unix_fmt, 2);
        assert_eq!(unix_stats.dos_fmt, 0);
        assert_eq!(dos_stats.unix_fmt, 0);
        assert_eq!(dos_stats.dos_fmt, 2);
        assert_eq!(unix_stats.output_size, dos_stats.output_size);
    }

    #[test]
    fn test_soft_failures_emit_nulls() {
        let (_dir, mut input) = fixture(
            b"abc,maybe,ZZZZZZZZZZZZZZZZZZZZZZZ\n",
            b"a/int32,b/bool,c/oid",
        );

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(
            documents,
            vec![doc! { "a": Bson::Null, "b": Bson::Null, "c": Bson::Null }],
        );

        let stats = input.into_stats();
        assert_eq!(stats.invalid_int32, 1);
        assert_eq!(stats.invalid_bool, 1);
        assert_eq!(stats.invalid_oid, 1);
        assert_eq!(stats.total_errors, 3);
    }

    #[test]
    fn test_field_count_mismatch() {
        let (_dir, mut input) = fixture(b"1,2\n", b"a/int32,b/int32,c/int32");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32, "b": 2_i32 }]);

        let stats = input.into_stats();
        assert_eq!(stats.non_compliant_with_metadata, 1);
        assert_eq!(stats.total_errors, 1);
    }

    #[test]
    fn test_extra_fields_are_dropped() {
        let (_dir, mut input) = fixture(b"1,2,3\n", b"a/int32,b/int32");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32, "b": 2_i32 }]);
        assert_eq!(input.stats().non_compliant_with_metadata, 1);
    }

    #[test]
    fn test_corruption_forces_eof() {
        let (_dir, mut input) = fixture(b"\"aaa\"bbb\n\"ok\",1\n", b"a/string,b/int32");

        input.open().unwrap();

        let mut buf = [0u8; 256];
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert!(input.is_eof());
        assert_eq!(input.read(&mut buf).unwrap(), 0);

        let stats = input.into_stats();
        assert_eq!(stats.records_returned, 0);
        assert_eq!(stats.non_compliant_with_rfc, 1);
        assert_eq!(stats.unix_fmt, 0);
        assert_eq!(stats.dos_fmt, 0);
        assert_eq!(stats.total_errors, 1);
    }

    #[test]
    fn test_unterminated_quote_on_final_record() {
        let (_dir, mut input) = fixture(b"1,ok\n2,\"drained to the end", b"a/int32,b/string");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32, "b": "ok" }]);

        let stats = input.into_stats();
        assert_eq!(stats.unix_fmt, 1);
        assert_eq!(stats.dos_fmt, 0);
        assert_eq!(stats.non_compliant_with_rfc, 1);
    }

    #[test]
    fn test_oid_surface_forms_agree() {
        let hex = "66075df233ce5deb424257fb";
        let data = format!("{hex}\n\"\"\"{hex}\"\"\"\n\"objectId(\"\"{hex}\"\")\"\n");
        let (_dir, mut input) = fixture(data.as_bytes(), b"x/oid");

        input.open().unwrap();
        let documents = read_all(&mut input);

        let expected = doc! { "x": ObjectId::parse_str(hex).unwrap() };
        assert_eq!(documents, vec![expected.clone(), expected.clone(), expected]);
        assert_eq!(input.stats().invalid_oid, 0);
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let (_dir, mut input) = fixture(b"1\n\n\n2\n\n", b"a/int32");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32 }, doc! { "a": 2_i32 }]);

        let stats = input.into_stats();
        assert_eq!(stats.records_returned, 2);
        assert_eq!(stats.unix_fmt, 5);
    }

    #[test]
    fn test_quoted_newline_within_record() {
        let (_dir, mut input) = fixture(b"\"a\nb\",1\n", b"s/string,n/int32");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "s": "a\nb", "n": 1_i32 }]);
    }

    #[test]
    fn test_empty_fields_become_nulls() {
        let (_dir, mut input) = fixture(b",,\n", b"a/int32,b/string,c/date");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(
            documents,
            vec![doc! { "a": Bson::Null, "b": Bson::Null, "c": Bson::Null }],
        );
        assert_eq!(input.stats().total_errors, 0);
    }

    #[test]
    fn test_input_and_output_sizes() {
        let (_dir, mut input) = fixture(b"1,ab\n2,cd\n", b"a/int32,b/string");

        input.open().unwrap();

        let mut buf = [0u8; 256];
        let mut copied = 0;
        loop {
            let n = input.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            copied += n as i64;
        }

        let stats = input.into_stats();
        assert_eq!(stats.input_size, 8);
        assert_eq!(stats.output_size, copied);
        assert_eq!(stats.records_returned, 2);
    }

    #[test]
    fn test_buffer_too_small_is_fatal() {
        let (_dir, mut input) = fixture(b"1,hello\n", b"a/int32,b/string");

        input.open().unwrap();

        let mut buf = [0u8; 4];
        let err = input.read(&mut buf).unwrap_err();

        assert!(matches!(
            err.kind(),
            ErrorKind::BufferTooSmall { buffer_size: 4, .. },
        ));
    }

    #[test]
    fn test_read_succeeds_leaves_tail_untouched() {
        let (_dir, mut input) = fixture(b"7\n", b"a/int32");

        input.open().unwrap();

        let mut buf = [0xAAu8; 64];
        let n = input.read(&mut buf).unwrap();

        assert!(n > 0);
        assert!(buf[n..].iter().all(|&byte| byte == 0xAA));
    }

    #[test]
    fn test_schema_document_constructor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.csv"), b"1,yes\n").unwrap();

        let metadata = doc! { "a": "int32", "b": "bool" };
        let mut input = CsvFileInput::with_schema(dir.path(), "data.csv", &metadata).unwrap();

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32, "b": true }]);
    }

    #[test]
    fn test_path_with_parent_component_is_rejected() {
        let err = CsvFileInput::new("/tmp", "../data.csv", "data.txt").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PathRejected { .. }));

        let err = CsvFileInput::new("/tmp", "data.csv", "../data.txt").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PathRejected { .. }));

        let metadata = doc! { "a": "int32" };
        let err = CsvFileInput::with_schema("/tmp", "a/../b.csv", &metadata).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PathRejected { .. }));
    }

    #[test]
    fn test_missing_files_fail_open() {
        let dir = tempfile::tempdir().unwrap();

        let mut input = CsvFileInput::new(dir.path(), "absent.csv", "absent.txt").unwrap();
        let err = input.open().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::FileOpen { .. }));
        assert!(!input.is_open());

        // Metadata present, data absent.
        fs::write(dir.path().join("absent.txt"), b"a/int32").unwrap();
        let err = input.open().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::FileOpen { .. }));
    }

    #[test]
    fn test_bad_metadata_fails_open() {
        let (_dir, mut input) = fixture(b"1\n", b"a/float");

        let err = input.open().unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::MetadataUnknownKind { index: 0, .. },
        ));
        assert!(!input.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, mut input) = fixture(b"1\n", b"a/int32");

        input.open().unwrap();
        input.close();
        assert!(!input.is_open());
        input.close();
        assert!(!input.is_open());
    }

    #[test]
    fn test_reopen_after_close_restarts() {
        let (_dir, mut input) = fixture(b"1\n2\n", b"a/int32");

        input.open().unwrap();
        assert_eq!(read_all(&mut input).len(), 2);
        input.close();

        input.open().unwrap();
        let documents = read_all(&mut input);
        assert_eq!(documents, vec![doc! { "a": 1_i32 }, doc! { "a": 2_i32 }]);
    }

    #[test]
    fn test_snapshot_resets_counters() {
        let (_dir, mut input) = fixture(b"x\n", b"a/int32");

        input.open().unwrap();
        read_all(&mut input);

        let snapshot = input.snapshot_stats();
        assert_eq!(snapshot.invalid_int32, 1);
        assert_eq!(snapshot.records_returned, 1);

        assert_eq!(*input.stats(), CsvFileStats::default());
    }

    #[test]
    fn test_empty_file_is_immediate_eof() {
        let (_dir, mut input) = fixture(b"", b"a/int32");

        input.open().unwrap();
        assert!(input.is_eof());

        let mut buf = [0u8; 16];
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.into_stats().records_returned, 0);
    }

    #[test]
    fn test_final_record_without_newline() {
        let (_dir, mut input) = fixture(b"1\n2", b"a/int32");

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(documents, vec![doc! { "a": 1_i32 }, doc! { "a": 2_i32 }]);
        assert_eq!(input.stats().unix_fmt, 2);
    }

    #[test]
    fn test_mixed_kinds_end_to_end() {
        let data = b"12,true,3.5,hello,66075df233ce5deb424257fb,2013-07-23T11:42:14.072Z,150000000000\n";
        let metadata = b"i/int32,b/bool,d/double,s/string,o/oid,t/date,l/int64";
        let (_dir, mut input) = fixture(data, metadata);

        input.open().unwrap();
        let documents = read_all(&mut input);

        assert_eq!(
            documents,
            vec![doc! {
                "i": 12_i32,
                "b": true,
                "d": 3.5_f64,
                "s": "hello",
                "o": ObjectId::parse_str("66075df233ce5deb424257fb").unwrap(),
                "t": bson::DateTime::parse_rfc3339_str("2013-07-23T11:42:14.072Z").unwrap(),
                "l": 150_000_000_000_i64,
            }],
        );
        assert_eq!(input.stats().total_errors, 0);
    }
}
