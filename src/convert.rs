use std::num::{IntErrorKind, ParseIntError};
use std::str::FromStr;

use bson::oid::ObjectId;
use bson::raw::{RawBson, RawDocumentBuf};
use memchr::memchr;

use crate::error::{Error, Result};
use crate::schema::FieldKind;
use crate::stats::CsvFileStats;

/// Hard cap on one string field, collapsed or not.
pub(crate) const MAX_STRING_LEN: usize = 65536;

const OID_HEX_LEN: usize = 24;
const OID_CALL_PREFIX: &[u8] = b"objectid(\"\"";
const OID_CALL_SUFFIX_LEN: usize = 3;

const TRUTHY: &[&[u8]] = &[b"true", b"t", b"yes", b"y", b"1"];
const FALSY: &[&[u8]] = &[b"false", b"f", b"no", b"n", b"0"];

/// Coerces one field to its schema kind and appends exactly one value
/// (the typed value or null) to the document under `name`.
///
/// Soft failures increment the matching counter and append null. The
/// only fatal outcome is a string field above [`MAX_STRING_LEN`];
/// `offset` is the stream cursor, reported in that error.
pub(crate) fn append_field(
    builder: &mut RawDocumentBuf,
    name: &str,
    kind: FieldKind,
    field: &[u8],
    offset: usize,
    scratch: &mut Vec<u8>,
    stats: &mut CsvFileStats,
) -> Result<()> {
    if field.is_empty() {
        builder.append(name, RawBson::Null);
        return Ok(());
    }

    match kind {
        FieldKind::Bool => append_bool(builder, name, field, stats),
        FieldKind::Int32 => append_int32(builder, name, field, stats),
        FieldKind::Int64 => append_int64(builder, name, field, stats),
        FieldKind::Double => append_double(builder, name, field, stats),
        FieldKind::Date => append_date(builder, name, field, stats),
        FieldKind::Oid => append_oid(builder, name, field, stats),
        FieldKind::String => return append_string(builder, name, field, offset, scratch),
    }

    Ok(())
}

enum IntParse<T> {
    Value { value: T, complete: bool },
    OutOfRange,
    Invalid,
}

/// Parses the leading `[-]digits` run of the field, reporting whether
/// it covered the whole field. A leading `+` is not accepted.
fn parse_int<T>(field: &[u8]) -> IntParse<T>
where
    T: FromStr<Err = ParseIntError>,
{
    let digits_start = usize::from(field.first() == Some(&b'-'));
    let mut end = digits_start;
    while field.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }

    if end == digits_start {
        return IntParse::Invalid;
    }

    let Ok(text) = std::str::from_utf8(&field[..end]) else {
        return IntParse::Invalid;
    };

    match text.parse::<T>() {
        Ok(value) => IntParse::Value {
            value,
            complete: end == field.len(),
        },
        Err(err) if matches!(err.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            IntParse::OutOfRange
        }
        Err(_) => IntParse::Invalid,
    }
}

fn append_int32(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    match parse_int::<i32>(field) {
        IntParse::Value { value, complete } => {
            if !complete {
                stats.inc_incomplete_numeric();
            }
            builder.append(name, RawBson::Int32(value));
        }
        IntParse::OutOfRange => {
            stats.inc_out_of_range();
            builder.append(name, RawBson::Null);
        }
        IntParse::Invalid => {
            stats.inc_invalid_int32();
            builder.append(name, RawBson::Null);
        }
    }
}

fn append_int64(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    match parse_int::<i64>(field) {
        IntParse::Value { value, complete } => {
            if !complete {
                stats.inc_incomplete_numeric();
            }
            builder.append(name, RawBson::Int64(value));
        }
        IntParse::OutOfRange => {
            stats.inc_out_of_range();
            builder.append(name, RawBson::Null);
        }
        IntParse::Invalid => {
            stats.inc_invalid_int64();
            builder.append(name, RawBson::Null);
        }
    }
}

fn digit_run(field: &[u8], start: usize) -> usize {
    let mut i = start;
    while field.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    i - start
}

fn has_prefix_ignore_case(field: &[u8], prefix: &[u8]) -> bool {
    field.len() >= prefix.len() && field[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Length of the longest leading run of `field` that reads as a
/// double: an optional `-`, then `inf`, `infinity`, `nan`, or a
/// decimal mantissa with an optional exponent. Zero means no double
/// at all.
fn double_prefix_len(field: &[u8]) -> usize {
    let start = usize::from(field.first() == Some(&b'-'));
    let rest = &field[start..];

    if has_prefix_ignore_case(rest, b"infinity") {
        return start + 8;
    }
    if has_prefix_ignore_case(rest, b"inf") || has_prefix_ignore_case(rest, b"nan") {
        return start + 3;
    }

    let int_digits = digit_run(field, start);
    let mut end = start + int_digits;
    let mut frac_digits = 0;

    if field.get(end) == Some(&b'.') {
        frac_digits = digit_run(field, end + 1);
        end += 1 + frac_digits;
    }

    if int_digits + frac_digits == 0 {
        return 0;
    }

    if matches!(field.get(end).copied(), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(field.get(exp).copied(), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_digits = digit_run(field, exp);
        if exp_digits > 0 {
            end = exp + exp_digits;
        }
    }

    end
}

fn is_infinity_literal(prefix: &[u8]) -> bool {
    let start = usize::from(prefix.first() == Some(&b'-'));
    prefix
        .get(start)
        .is_some_and(|byte| byte.eq_ignore_ascii_case(&b'i'))
}

fn append_double(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    let prefix_len = double_prefix_len(field);
    if prefix_len == 0 {
        stats.inc_invalid_double();
        builder.append(name, RawBson::Null);
        return;
    }

    let prefix = &field[..prefix_len];
    let parsed = std::str::from_utf8(prefix)
        .ok()
        .and_then(|text| text.parse::<f64>().ok());

    match parsed {
        // A finite literal that lands on an infinity overflowed f64.
        Some(value) if value.is_infinite() && !is_infinity_literal(prefix) => {
            stats.inc_out_of_range();
            builder.append(name, RawBson::Null);
        }
        Some(value) => builder.append(name, RawBson::Double(value)),
        None => {
            stats.inc_invalid_double();
            builder.append(name, RawBson::Null);
        }
    }
}

fn append_bool(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    if TRUTHY.iter().any(|word| field.eq_ignore_ascii_case(word)) {
        builder.append(name, RawBson::Boolean(true));
    } else if FALSY.iter().any(|word| field.eq_ignore_ascii_case(word)) {
        builder.append(name, RawBson::Boolean(false));
    } else {
        stats.inc_invalid_bool();
        builder.append(name, RawBson::Null);
    }
}

fn append_date(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    let parsed = std::str::from_utf8(field)
        .ok()
        .and_then(|text| bson::DateTime::parse_rfc3339_str(text).ok());

    match parsed {
        Some(date) => builder.append(name, RawBson::DateTime(date)),
        None => {
            stats.inc_invalid_date();
            builder.append(name, RawBson::Null);
        }
    }
}

/// Accepts the bare 24-hex identifier, the quoted form whose view
/// still carries one doubled quote on each side (`""H""` in the raw
/// record), and the `objectid(""H"")` call form, case-insensitive.
fn append_oid(builder: &mut RawDocumentBuf, name: &str, field: &[u8], stats: &mut CsvFileStats) {
    let len = field.len();

    let hex = if len >= OID_CALL_PREFIX.len() + OID_CALL_SUFFIX_LEN
        && has_prefix_ignore_case(field, OID_CALL_PREFIX)
        && field[len - 1] == b')'
    {
        &field[OID_CALL_PREFIX.len()..len - OID_CALL_SUFFIX_LEN]
    } else if len >= 4 && field[0] == b'"' && field[len - 1] == b'"' {
        &field[2..len - 2]
    } else {
        field
    };

    let oid = (hex.len() == OID_HEX_LEN)
        .then(|| std::str::from_utf8(hex).ok())
        .flatten()
        .and_then(|text| ObjectId::parse_str(text).ok());

    match oid {
        Some(oid) => builder.append(name, RawBson::ObjectId(oid)),
        None => {
            stats.inc_invalid_oid();
            builder.append(name, RawBson::Null);
        }
    }
}

fn append_string(
    builder: &mut RawDocumentBuf,
    name: &str,
    field: &[u8],
    offset: usize,
    scratch: &mut Vec<u8>,
) -> Result<()> {
    if field.len() > MAX_STRING_LEN {
        return Err(Error::string_too_large(offset, field.len()));
    }

    let payload: &[u8] = match memchr(b'"', field) {
        None => field,
        Some(_) => {
            collapse_quotes(field, scratch);
            scratch
        }
    };

    builder.append(
        name,
        RawBson::String(String::from_utf8_lossy(payload).into_owned()),
    );

    Ok(())
}

/// Rewrites `field` into `out` with every doubled quote collapsed to
/// one: copy through each quote, then skip its twin.
fn collapse_quotes(field: &[u8], out: &mut Vec<u8>) {
    out.clear();

    let mut pos = 0;
    while let Some(found) = memchr(b'"', &field[pos..]) {
        let end = pos + found + 1;
        out.extend_from_slice(&field[pos..end]);
        pos = end + usize::from(field.get(end) == Some(&b'"'));
    }

    out.extend_from_slice(&field[pos..]);
}
