use std::ops::{Add, AddAssign};

use bson::{doc, Document};

/// Counters accumulated while reading one CSV stream.
///
/// Every counter is monotonic between resets. Incrementing any error
/// counter also increments `total_errors`; the line-format and
/// throughput counters do not contribute to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CsvFileStats {
    pub incomplete_numeric: i64,
    pub invalid_int32: i64,
    pub invalid_int64: i64,
    pub invalid_double: i64,
    pub invalid_bool: i64,
    pub invalid_date: i64,
    pub invalid_oid: i64,
    pub out_of_range: i64,
    pub non_compliant_with_metadata: i64,
    pub non_compliant_with_rfc: i64,
    pub unix_fmt: i64,
    pub dos_fmt: i64,
    pub total_errors: i64,
    pub input_size: i64,
    pub output_size: i64,
    pub records_returned: i64,
}

impl CsvFileStats {
    pub(crate) fn inc_incomplete_numeric(&mut self) {
        self.incomplete_numeric += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_int32(&mut self) {
        self.invalid_int32 += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_int64(&mut self) {
        self.invalid_int64 += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_double(&mut self) {
        self.invalid_double += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_bool(&mut self) {
        self.invalid_bool += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_date(&mut self) {
        self.invalid_date += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_invalid_oid(&mut self) {
        self.invalid_oid += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_out_of_range(&mut self) {
        self.out_of_range += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_non_compliant_with_metadata(&mut self) {
        self.non_compliant_with_metadata += 1;
        self.total_errors += 1;
    }

    pub(crate) fn inc_non_compliant_with_rfc(&mut self) {
        self.non_compliant_with_rfc += 1;
        self.total_errors += 1;
    }

    // A line in either format is not an error.
    pub(crate) fn inc_unix_fmt(&mut self) {
        self.unix_fmt += 1;
    }

    pub(crate) fn inc_dos_fmt(&mut self) {
        self.dos_fmt += 1;
    }

    /// Serializes the counters as a report document under a `csv`
    /// sub-document.
    pub fn to_document(&self) -> Document {
        doc! {
            "csv": {
                "incomplete_numeric": self.incomplete_numeric,
                "invalid_int32": self.invalid_int32,
                "invalid_int64": self.invalid_int64,
                "invalid_double": self.invalid_double,
                "invalid_bool": self.invalid_bool,
                "invalid_date": self.invalid_date,
                "invalid_oid": self.invalid_oid,
                "out_of_range": self.out_of_range,
                "non_compliant_with_metadata": self.non_compliant_with_metadata,
                "non_compliant_with_rfc": self.non_compliant_with_rfc,
                "unix_fmt": self.unix_fmt,
                "dos_fmt": self.dos_fmt,
                "total_errors": self.total_errors,
                "input_size": self.input_size,
                "output_size": self.output_size,
                "records_returned": self.records_returned,
            }
        }
    }
}

impl AddAssign for CsvFileStats {
    fn add_assign(&mut self, other: Self) {
        self.incomplete_numeric += other.incomplete_numeric;
        self.invalid_int32 += other.invalid_int32;
        self.invalid_int64 += other.invalid_int64;
        self.invalid_double += other.invalid_double;
        self.invalid_bool += other.invalid_bool;
        self.invalid_date += other.invalid_date;
        self.invalid_oid += other.invalid_oid;
        self.out_of_range += other.out_of_range;
        self.non_compliant_with_metadata += other.non_compliant_with_metadata;
        self.non_compliant_with_rfc += other.non_compliant_with_rfc;
        self.unix_fmt += other.unix_fmt;
        self.dos_fmt += other.dos_fmt;
        self.total_errors += other.total_errors;
        self.input_size += other.input_size;
        self.output_size += other.output_size;
        self.records_returned += other.records_returned;
    }
}

impl Add for CsvFileStats {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}
