use memchr::{memchr, memchr2};

use crate::stats::CsvFileStats;

/// Outcome of advancing the cursor across one logical record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecordRead<'a> {
    /// One record payload, stripped of its line terminator.
    Record(&'a [u8]),
    /// The quoting state machine went out of sync at byte `at`. The
    /// cursor has been forced to the end of the image; no local
    /// recovery is safe once this happens.
    Corrupt { at: usize },
    Eof,
}

/// Advances `offset` across exactly one RFC-4180 logical record of
/// `data`, returning the record payload without its terminating
/// newline (and without a single preceding carriage return, if any).
///
/// A `"` is significant only at a field boundary: it opens a field
/// when preceded by `,` or the record start, and inside an open field
/// it either closes it (next byte is `,`, `\r`, `\n`, or end of
/// image) or doubles as an escape. Anything else is a violation and
/// ends the stream for good.
///
/// Increments `unix_fmt` or `dos_fmt` once per returned record and
/// `non_compliant_with_rfc` once on violation.
pub(crate) fn next_record<'a>(
    data: &'a [u8],
    offset: &mut usize,
    stats: &mut CsvFileStats,
) -> RecordRead<'a> {
    let len = data.len();

    if *offset >= len {
        return RecordRead::Eof;
    }

    let start = *offset;
    let mut pos = start;
    let mut quote_open = data[pos] == b'"';
    if quote_open {
        pos += 1;
    }

    let newline = loop {
        if quote_open {
            // Inside an open quote only the next quote matters.
            let Some(found) = memchr(b'"', &data[pos..]) else {
                stats.inc_non_compliant_with_rfc();
                *offset = len;
                return RecordRead::Corrupt { at: len };
            };

            let quote = pos + found;
            let next = quote + 1;

            if next >= len || matches!(data[next], b',' | b'\r' | b'\n') {
                quote_open = false;
                pos = next;
            } else if data[next] == b'"' {
                pos = next + 1;
            } else {
                stats.inc_non_compliant_with_rfc();
                *offset = len;
                return RecordRead::Corrupt { at: quote };
            }
        } else {
            let Some(found) = memchr2(b'"', b'\n', &data[pos..]) else {
                break None;
            };

            let hit = pos + found;

            if data[hit] == b'\n' {
                break Some(hit);
            }

            // A quote mid-record is only legal at a field start.
            if data[hit - 1] == b',' {
                quote_open = true;
                pos = hit + 1;
            } else {
                stats.inc_non_compliant_with_rfc();
                *offset = len;
                return RecordRead::Corrupt { at: hit };
            }
        }
    };

    let end = newline.unwrap_or(len);
    let dos = end > start && data[end - 1] == b'\r';

    if dos {
        stats.inc_dos_fmt();
    } else {
        stats.inc_unix_fmt();
    }

    *offset = match newline {
        Some(nl) => nl + 1,
        None => len,
    };

    RecordRead::Record(&data[start..end - usize::from(dos)])
}
