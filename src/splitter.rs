#[derive(Debug, Clone, Copy)]
enum SplitState {
    NotQuoted,
    Quoted,
    CheckEscape,
}

/// Splits one validated record into field bounds.
///
/// `bounds` is cleared and then receives one `(start, end)` pair per
/// field, in record order, indexing into `record`. A quoted field's
/// bounds exclude its outer quotes but keep any doubled quotes inside;
/// collapsing those is the string coercer's job.
///
/// The record reader has already rejected RFC-violating quoting, so no
/// error checking happens here: a `"` inside a quoted field is either
/// the closing quote or the first half of a doubled quote.
pub(crate) fn split_record(record: &[u8], bounds: &mut Vec<(usize, usize)>) {
    use SplitState::*;

    bounds.clear();

    let len = record.len();
    let mut state = NotQuoted;
    let mut left = 0;
    let mut i = 0;

    // The record is scanned with one virtual terminator after the last
    // byte, so the final field is emitted without a trailing comma.
    while i <= len {
        let byte = record.get(i).copied();

        match state {
            NotQuoted => {
                if i == len || byte == Some(b',') {
                    bounds.push((left, i));
                    left = i + 1;
                } else if byte == Some(b'"') {
                    state = Quoted;
                }
            }
            Quoted => {
                if byte == Some(b'"') {
                    state = CheckEscape;
                }
            }
            CheckEscape => {
                if byte == Some(b'"') {
                    state = Quoted;
                } else {
                    bounds.push((left + 1, i - 1));
                    state = NotQuoted;
                    left = i + 1;
                }
            }
        }

        i += 1;
    }
}
