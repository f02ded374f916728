//! CSV output of labeled reports.

use std::io::{self, Write};

use super::report::{SmartReport, STATUS};

const LINE_TERMINATOR: &str = "\r\n";

/// Ordered union of every report's field names, with `Status` last.
pub fn header(reports: &[SmartReport]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for report in reports {
        for (key, _) in report.fields() {
            if key != STATUS && !columns.iter().any(|c| c == key) {
                columns.push(key.to_string());
            }
        }
    }
    columns.push(STATUS.to_string());
    columns
}

/// Write a header row and one row per report. Missing fields are empty cells.
pub fn write_csv<W: Write>(out: &mut W, reports: &[SmartReport]) -> io::Result<()> {
    let columns = header(reports);
    write_row(out, columns.iter().map(String::as_str))?;
    for report in reports {
        write_row(
            out,
            columns
                .iter()
                .map(|column| report.get(column).unwrap_or_default()),
        )?;
    }
    out.flush()
}

fn write_row<'a, W: Write>(out: &mut W, cells: impl Iterator<Item = &'a str>) -> io::Result<()> {
    let row: Vec<String> = cells.map(quote).collect();
    write!(out, "{}{}", row.join(","), LINE_TERMINATOR)
}

/// Quote only cells that need it, doubling embedded quotes.
fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
