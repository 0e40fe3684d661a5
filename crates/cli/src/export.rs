//! Tabular export of the run results.
//!
//! Semicolon-delimited CSV, one file for the analysis rows and one for the
//! requirement digests. The column order comes from the records' flat-row
//! projection; this module only owns file format and escaping.

use std::io;
use std::path::Path;

use pipeline::artifact::{RequirementDigest, TaraRecord};

/// Writes the analysis rows. An empty run produces an empty file.
pub fn write_rows(path: &Path, rows: &[TaraRecord]) -> io::Result<()> {
    let mut out = String::new();
    if let Some(first) = rows.first() {
        push_line(&mut out, first.flat_row().iter().map(|(key, _)| *key));
        for row in rows {
            push_line(&mut out, row.flat_row().into_iter().map(|(_, value)| value));
        }
    }
    std::fs::write(path, out)
}

/// Writes the requirement digests. An empty run produces an empty file.
pub fn write_digests(path: &Path, digests: &[RequirementDigest]) -> io::Result<()> {
    let mut out = String::new();
    if let Some(first) = digests.first() {
        push_line(&mut out, first.flat_row().iter().map(|(key, _)| *key));
        for digest in digests {
            push_line(
                &mut out,
                digest.flat_row().into_iter().map(|(_, value)| value),
            );
        }
    }
    std::fs::write(path, out)
}

fn push_line<I, S>(out: &mut String, fields: I)
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let mut first = true;
    for field in fields {
        if !first {
            out.push(';');
        }
        first = false;
        out.push_str(&escape(field.as_ref()));
    }
    out.push('\n');
}

fn escape(field: &str) -> String {
    if field.contains([';', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}
