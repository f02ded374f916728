//! Interactive labeling session.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::report::{SmartReport, STATUS};
use crate::error::Result;

const PROMPT: &str = "Is it OK, OLD, FAIL or discard? [K,O,F,X] ";

/// Operator verdict for one disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Ok,
    Old,
    Fail,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Ok => "OK",
            Label::Old => "OLD",
            Label::Fail => "FAIL",
        }
    }
}

/// What happened to one report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Labeled(Label),
    Discarded,
    /// Serial number already seen in this session
    Duplicate,
    /// Input ended before an answer was given
    EndOfInput,
}

/// Totals of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub unique_disks: usize,
    pub labeled: usize,
    /// Paths that were neither a file nor a directory
    pub invalid_paths: Vec<PathBuf>,
}

/// Shows each report and asks the operator for a label.
pub struct Classifier<R, W> {
    input: R,
    output: W,
    serials: HashSet<String>,
    labeled: Vec<SmartReport>,
}

impl<R: BufRead, W: Write> Classifier<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            serials: HashSet::new(),
            labeled: Vec::new(),
        }
    }

    /// Reports labeled so far, each with its `Status` field set
    pub fn labeled(&self) -> &[SmartReport] {
        &self.labeled
    }

    pub fn into_labeled(self) -> Vec<SmartReport> {
        self.labeled
    }

    /// Classify every report under `paths`. Directories are read one level
    /// deep, in name order. Stops early when input ends.
    pub fn run(&mut self, paths: &[PathBuf]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        'paths: for path in paths {
            let files = if path.is_dir() {
                list_dir(path)?
            } else if path.is_file() {
                vec![path.clone()]
            } else {
                writeln!(self.output, "{} is not a file nor a directory", path.display())?;
                summary.invalid_paths.push(path.clone());
                continue;
            };

            for file in files {
                if self.classify_file(&file)? == Outcome::EndOfInput {
                    break 'paths;
                }
            }
        }

        summary.unique_disks = self.serials.len();
        summary.labeled = self.labeled.len();
        writeln!(
            self.output,
            "{} unique disks parsed, {} labeled",
            summary.unique_disks, summary.labeled
        )?;
        Ok(summary)
    }

    pub fn classify_file(&mut self, file: &Path) -> Result<Outcome> {
        let bytes = fs::read(file)?;
        let report = SmartReport::parse(&String::from_utf8_lossy(&bytes));
        self.classify(&file.display().to_string(), report)
    }

    /// Show `report` and record the operator's answer.
    pub fn classify(&mut self, name: &str, mut report: SmartReport) -> Result<Outcome> {
        if let Some(serial) = report.serial() {
            if !self.serials.insert(serial.to_string()) {
                writeln!(self.output, "Skipping {} in {}", serial, name)?;
                return Ok(Outcome::Duplicate);
            }
        }

        for line in report.summary() {
            writeln!(self.output, "{}", line)?;
        }
        writeln!(self.output, "File is {}", name)?;

        let outcome = loop {
            write!(self.output, "{}", PROMPT)?;
            self.output.flush()?;

            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                break Outcome::EndOfInput;
            }
            match answer.trim().to_lowercase().as_str() {
                "k" => break Outcome::Labeled(Label::Ok),
                "o" => break Outcome::Labeled(Label::Old),
                "f" => break Outcome::Labeled(Label::Fail),
                "x" => break Outcome::Discarded,
                _ => {}
            }
        };
        writeln!(self.output)?;

        if let Outcome::Labeled(label) = outcome {
            report.set(STATUS, label.as_str());
            self.labeled.push(report);
        }
        debug!(file = name, ?outcome, "Report classified");
        Ok(outcome)
    }
}

/// Regular files directly inside `dir`, sorted by name
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        } else {
            debug!(path = %path.display(), "Skipping non-file entry");
        }
    }
    files.sort();
    Ok(files)
}
