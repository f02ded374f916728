//! Offline classification of saved `smartctl` reports.
//!
//! An operator reviews each report, labels the disk OK, OLD or FAIL, and the
//! labeled attributes are written to a CSV file.

pub mod csv;
pub mod report;
pub mod session;

pub use csv::{header, write_csv};
pub use report::SmartReport;
pub use session::{Classifier, Label, Outcome, RunSummary};
