//! Parser for the fixed-width patch table embedded in the index page.
//!
//! The upstream `<pre>` block contains free-form prose with a table like
//!
//! ```text
//!   SIZE  NAME     FIXES
//!   1234  7.4.001  fix foo
//!   5678  7.4.002  fix bar
//! ```
//!
//! The table starts after the `SIZE NAME FIXES` header and runs until the
//! first line that does not begin with whitespace and a digit.

use crate::model::ListingRow;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+SIZE\s+NAME\s+FIXES$").expect("valid header regex"));
static DATA_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+\d").expect("valid data line regex"));
static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+\d+\s+(\S+)\s+(.*)$").expect("valid row regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("patch table header not found")]
    HeaderNotFound,
    #[error("patch table has no terminating line after header at line {header}")]
    TerminatorNotFound { header: usize },
    #[error("malformed patch row at line {line}: {text:?}")]
    MalformedRow { line: usize, text: String },
}

/// Parse every data row of the patch table in `text`, in source order.
pub fn parse_listing(text: &str) -> Result<Vec<ListingRow>, TableError> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let (start, end) = table_bounds(&lines)?;

    lines[start + 1..end]
        .iter()
        .enumerate()
        .map(|(offset, line)| parse_row(start + 1 + offset, line))
        .collect()
}

/// Index of the header line and of the first non-data line after it.
fn table_bounds(lines: &[&str]) -> Result<(usize, usize), TableError> {
    let start = lines
        .iter()
        .position(|line| HEADER_RE.is_match(line))
        .ok_or(TableError::HeaderNotFound)?;
    let end = lines[start + 1..]
        .iter()
        .position(|line| !DATA_LINE_RE.is_match(line))
        .map(|rel| start + 1 + rel)
        .ok_or(TableError::TerminatorNotFound { header: start })?;
    Ok((start, end))
}

fn parse_row(line_no: usize, line: &str) -> Result<ListingRow, TableError> {
    let caps = ROW_RE
        .captures(line)
        .ok_or_else(|| TableError::MalformedRow {
            line: line_no,
            text: line.to_string(),
        })?;
    Ok(ListingRow::new(&caps[1], &caps[2]))
}
