//! Result payload codec in the engine's quoted CSV dialect.
//!
//! Every value is written double-quoted with embedded quotes doubled. An
//! unquoted empty field is a null, so `,` is two nulls while `"",""` is two
//! empty strings. Every row, including the last, ends with `\n`.
//!
//! A payload holds the column names, then the column types, then one line
//! per data row. A result set without columns is written as lines holding a
//! single null.
//!
//! Decoding streams its input in fixed-size chunks; only the value being
//! assembled grows with the input.

use std::io::{self, Read, Write};
use std::mem;

use quarry_core::{ResultSet, Row};
use quarry_storage::StorageError;

use crate::CacheError;

/// Bytes requested from the underlying reader per refill.
const CHUNK_SIZE: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Writes one CSV row.
pub fn write_row<W, I, S>(out: &mut W, values: I) -> io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    for (index, value) in values.into_iter().enumerate() {
        if index > 0 {
            out.write_all(b",")?;
        }
        if let Some(value) = value {
            out.write_all(b"\"")?;
            out.write_all(value.as_ref().replace('"', "\"\"").as_bytes())?;
            out.write_all(b"\"")?;
        }
    }
    out.write_all(b"\n")
}

/// Serializes a result set: names, types, then data rows.
pub fn encode_results<W: Write + ?Sized>(results: &ResultSet, out: &mut W) -> Result<(), CacheError> {
    write_row(out, results.column_names().iter().map(Some)).map_err(StorageError::from)?;
    write_row(out, results.column_types().iter().map(Some)).map_err(StorageError::from)?;
    for row in results.rows() {
        write_row(out, row.iter().map(Option::as_deref)).map_err(StorageError::from)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Deserializes a result set written by [`encode_results`].
///
/// # Errors
///
/// Returns [`CacheError::Format`] for malformed CSV, missing or null header
/// values, or rows whose arity does not match the header.
pub fn decode_results<R: Read>(input: R) -> Result<ResultSet, CacheError> {
    let mut reader = CsvReader::new(input);

    let names = reader
        .next()
        .transpose()?
        .ok_or_else(|| CacheError::Format("missing column names".to_string()))?;
    let types = reader
        .next()
        .transpose()?
        .ok_or_else(|| CacheError::Format("missing column types".to_string()))?;

    // A single null in the header means the result has no columns.
    let no_columns = names == [None];
    let column_names = header_values(names, no_columns, "column name")?;
    let column_types = header_values(types, no_columns, "column type")?;

    let mut rows = Vec::new();
    for row in reader {
        let row = row?;
        rows.push(if no_columns && row == [None] { Vec::new() } else { row });
    }

    ResultSet::new(column_names, column_types, rows).map_err(|e| CacheError::Format(e.to_string()))
}

fn header_values(row: Row, no_columns: bool, what: &str) -> Result<Vec<String>, CacheError> {
    if no_columns && row == [None] {
        return Ok(Vec::new());
    }
    row.into_iter()
        .enumerate()
        .map(|(index, value)| {
            value.ok_or_else(|| CacheError::Format(format!("missing {what} at position {index}")))
        })
        .collect()
}

/// Separator that ended a raw token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Comma,
    Newline,
    End,
}

/// Streaming reader yielding CSV rows.
///
/// Iteration stops at the first error.
pub struct CsvReader<R> {
    inner: R,
    chunk: Box<[u8]>,
    pos: usize,
    len: usize,
    value: Vec<u8>,
    quoted: bool,
    done: bool,
}

impl<R: Read> CsvReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk: vec![0; CHUNK_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            value: Vec::new(),
            quoted: false,
            done: false,
        }
    }

    /// Returns the next raw value, quotes included, and what ended it.
    fn next_token(&mut self) -> Result<(Vec<u8>, Control), CacheError> {
        loop {
            if self.pos >= self.len {
                self.len = self.refill()?;
                self.pos = 0;
                if self.len == 0 {
                    if self.quoted {
                        return Err(CacheError::Format("unterminated quoted value".to_string()));
                    }
                    return Ok((mem::take(&mut self.value), Control::End));
                }
            }

            let window = &self.chunk[self.pos..self.len];
            let found = if self.quoted {
                window.iter().position(|&b| b == b'"')
            } else {
                window.iter().position(|&b| matches!(b, b'"' | b',' | b'\n'))
            };

            let Some(offset) = found else {
                self.value.extend_from_slice(window);
                self.pos = self.len;
                continue;
            };

            let control = window[offset];
            self.value.extend_from_slice(&window[..offset]);
            self.pos += offset + 1;
            match control {
                b'"' => {
                    self.value.push(b'"');
                    self.quoted = !self.quoted;
                }
                b',' => return Ok((mem::take(&mut self.value), Control::Comma)),
                _ => return Ok((mem::take(&mut self.value), Control::Newline)),
            }
        }
    }

    fn refill(&mut self) -> Result<usize, CacheError> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StorageError::from(e).into()),
            }
        }
    }

    fn read_row(&mut self) -> Result<Option<Row>, CacheError> {
        let mut row = Vec::new();
        loop {
            let (raw, control) = self.next_token()?;
            match control {
                Control::Comma => row.push(decode_value(&raw)?),
                Control::Newline => {
                    row.push(decode_value(&raw)?);
                    return Ok(Some(row));
                }
                Control::End => {
                    if !row.is_empty() || !raw.is_empty() {
                        return Err(CacheError::Format("missing trailing newline".to_string()));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl<R: Read> Iterator for CsvReader<R> {
    type Item = Result<Row, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes one raw token: empty is null, otherwise a fully quoted string.
fn decode_value(raw: &[u8]) -> Result<Option<String>, CacheError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let invalid = || CacheError::Format(format!("invalid value: {}", String::from_utf8_lossy(raw)));

    let inner = raw
        .strip_prefix(b"\"")
        .and_then(|rest| rest.strip_suffix(b"\""))
        .ok_or_else(invalid)?;

    let mut bytes = Vec::with_capacity(inner.len());
    let mut iter = inner.iter().copied();
    while let Some(b) = iter.next() {
        if b == b'"' && iter.next() != Some(b'"') {
            return Err(invalid());
        }
        bytes.push(b);
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| CacheError::Format(format!("invalid UTF-8 in value: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn read(input: &str) -> Result<Vec<Row>, CacheError> {
        CsvReader::new(input.as_bytes()).collect()
    }

    fn write(rows: &[Vec<Option<&str>>]) -> String {
        let mut out = Vec::new();
        for row in rows {
            write_row(&mut out, row.iter().copied()).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn read_empty_stream() {
        assert!(read("").unwrap().is_empty());
    }

    #[test]
    fn read_single_values() {
        let cases = [
            ("", None),
            ("\"\"", s("")),
            ("\"1\"", s("1")),
            ("\"abc\"", s("abc")),
            ("\"\"\"\"", s("\"")),
            ("\"foo=\"\"bar\"\"\"", s("foo=\"bar\"")),
        ];
        for (raw, value) in cases {
            assert_eq!(read(&format!("{raw}\n")).unwrap(), vec![vec![value]], "{raw}");
        }
    }

    #[test]
    fn read_invalid_values() {
        for raw in ["1", "\"", "\"x", "\"\"x", "x\"\"", "\"a\"b\""] {
            assert!(
                matches!(read(&format!("{raw}\n")), Err(CacheError::Format(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn read_columns_and_rows() {
        assert_eq!(read("\"foo\",\"bar\"\n").unwrap(), vec![vec![s("foo"), s("bar")]]);
        assert_eq!(read(",\n").unwrap(), vec![vec![None, None]]);
        assert_eq!(read("\"foo\"\n\"bar\"\n").unwrap(), vec![vec![s("foo")], vec![s("bar")]]);
        assert_eq!(read("\n\n").unwrap(), vec![vec![None], vec![None]]);
    }

    #[test]
    fn read_separators_inside_quotes() {
        assert_eq!(
            read("\"a,b\",\"c\nd\"\n").unwrap(),
            vec![vec![s("a,b"), s("c\nd")]]
        );
    }

    #[test]
    fn read_values_longer_than_a_chunk() {
        let value = "abc".repeat(10_000);
        assert_eq!(read(&format!("\"{value}\"\n")).unwrap(), vec![vec![s(&value)]]);
        assert_eq!(
            read(&format!("\"{value}\",\n")).unwrap(),
            vec![vec![s(&value), None]]
        );
    }

    #[test]
    fn read_quote_split_across_chunks() {
        // The doubled quote straddles the chunk boundary.
        let head = "x".repeat(CHUNK_SIZE - 2);
        let input = format!("\"{head}\"\"y\"\n");
        assert_eq!(read(&input).unwrap(), vec![vec![s(&format!("{head}\"y"))]]);
    }

    #[test]
    fn read_missing_trailing_newline() {
        assert!(read("\"foo\",\"bar\"").is_err());
        assert!(read(",").is_err());
        assert!(read("\"foo\"").is_err());
    }

    #[test]
    fn read_stops_after_error() {
        let mut reader = CsvReader::new("1\n\"ok\"\n".as_bytes());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn write_values() {
        assert_eq!(write(&[]), "");
        assert_eq!(write(&[vec![None]]), "\n");
        assert_eq!(write(&[vec![Some("")]]), "\"\"\n");
        assert_eq!(write(&[vec![Some("foo=\"bar\"")]]), "\"foo=\"\"bar\"\"\"\n");
        assert_eq!(write(&[vec![Some("foo"), Some("bar")]]), "\"foo\",\"bar\"\n");
        assert_eq!(write(&[vec![None, None]]), ",\n");
        assert_eq!(write(&[vec![Some("foo")], vec![Some("bar")]]), "\"foo\"\n\"bar\"\n");
    }

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["id".into(), "name".into(), "note".into()],
            vec!["integer".into(), "varchar".into(), "varchar".into()],
            vec![
                vec![s("1"), s("alice"), None],
                vec![s("2"), s(""), s("say \"hi\", then\nleave")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn encode_layout() {
        let mut out = Vec::new();
        encode_results(&sample(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\"id\",\"name\",\"note\"\n\
             \"integer\",\"varchar\",\"varchar\"\n\
             \"1\",\"alice\",\n\
             \"2\",\"\",\"say \"\"hi\"\", then\nleave\"\n"
        );
    }

    #[test]
    fn results_survive_roundtrip() {
        let results = sample();
        let mut out = Vec::new();
        encode_results(&results, &mut out).unwrap();
        assert_eq!(decode_results(out.as_slice()).unwrap(), results);
    }

    #[test]
    fn empty_and_columnless_results_survive_roundtrip() {
        let empty = ResultSet::new(vec!["x".into()], vec!["integer".into()], vec![]).unwrap();
        let columnless = ResultSet::new(vec![], vec![], vec![vec![], vec![]]).unwrap();
        for results in [empty, columnless, ResultSet::default()] {
            let mut out = Vec::new();
            encode_results(&results, &mut out).unwrap();
            assert_eq!(decode_results(out.as_slice()).unwrap(), results);
        }
    }

    #[test]
    fn decode_rejects_missing_header() {
        assert!(matches!(decode_results("".as_bytes()), Err(CacheError::Format(_))));
        assert!(matches!(decode_results("\"x\"\n".as_bytes()), Err(CacheError::Format(_))));
    }

    #[test]
    fn decode_rejects_null_header_values() {
        assert!(decode_results("\"a\",\n\"t\",\"t\"\n".as_bytes()).is_err());
        assert!(decode_results("\"a\"\n\n".as_bytes()).is_err());
    }

    #[test]
    fn decode_rejects_arity_mismatch() {
        let input = "\"a\",\"b\"\n\"t\",\"t\"\n\"1\"\n";
        assert!(matches!(decode_results(input.as_bytes()), Err(CacheError::Format(_))));
    }
}
