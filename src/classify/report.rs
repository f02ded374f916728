//! Parsing of saved `smartctl -a` reports.

use std::fmt::Write as _;

pub const INFO_SECTION: &str = "=== START OF INFORMATION SECTION ===";
pub const DATA_SECTION: &str = "=== START OF READ SMART DATA SECTION ===";
pub const ERROR_LOG_SECTION: &str = "SMART Error Log Version";

/// Attributes picked from the SMART data section
pub const ATTRIBUTES: [&str; 11] = [
    "Start_Stop_Count",
    "Reallocated_Sector_Ct",
    "Seek_Error_Rate",
    "Power_On_Hours",
    "Power_Cycle_Count",
    "SSD_Life_Left",
    "Lifetime_Writes_GiB",
    "Load_Cycle_Count",
    "Reallocated_Event_Count",
    "Current_Pending_Sector",
    "Offline_Uncorrectable",
];

pub const MODEL_FAMILY: &str = "Model_Family";
pub const SERIAL_NUMBER: &str = "Serial_Number";
pub const POWER_ON_HOURS: &str = "Power_On_Hours";
pub const POWER_ON_HOURS_EXACT: &str = "Power_On_Hours_Exact";
pub const ERRORS_UNC: &str = "Errors_UNC";
pub const STATUS: &str = "Status";

const RED: &str = "\x1b[31;40m";
const END_ESCAPE: &str = "\x1b[0;0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Info,
    Data,
    ErrorLog,
}

/// Attributes extracted from one report, in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmartReport {
    fields: Vec<(String, String)>,
}

impl SmartReport {
    pub fn parse(text: &str) -> Self {
        let mut report = Self::default();
        let mut section = Section::None;
        let mut unc_errors = 0usize;

        for line in text.lines() {
            if line.contains(INFO_SECTION) {
                section = Section::Info;
                continue;
            }
            if line.contains(DATA_SECTION) {
                section = Section::Data;
                continue;
            }
            if line.contains(ERROR_LOG_SECTION) {
                section = Section::ErrorLog;
                continue;
            }

            match section {
                Section::Info => {
                    if line.contains("Model Family:  ") {
                        if let Some(value) = after_double_space(line) {
                            report.set(MODEL_FAMILY, value);
                        }
                    }
                    if line.contains("Serial Number") {
                        if let Some(value) = after_double_space(line) {
                            report.set(SERIAL_NUMBER, value);
                        }
                    }
                }
                Section::Data => report.parse_attribute_line(line),
                Section::ErrorLog => {
                    if line.contains("Error: UNC") {
                        unc_errors += 1;
                    }
                }
                Section::None => {}
            }
        }

        report.set(ERRORS_UNC, &unc_errors.to_string());
        report
    }

    fn parse_attribute_line(&mut self, line: &str) {
        for attribute in ATTRIBUTES {
            if !line.contains(attribute) {
                continue;
            }
            let mut value = line.trim_end().rsplit(' ').next().unwrap_or_default();
            if attribute == POWER_ON_HOURS {
                // e.g. "12345h+06m+10.123s"
                let exact = match value.split_once('h') {
                    Some((hours, _)) => {
                        value = hours;
                        true
                    }
                    None => false,
                };
                self.set(POWER_ON_HOURS_EXACT, if exact { "true" } else { "false" });
            }
            self.set(attribute, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a field; an existing field keeps its position.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.get(SERIAL_NUMBER)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// One line per field, non-zero counters highlighted.
    pub fn summary(&self) -> Vec<String> {
        let exact = self.get(POWER_ON_HOURS_EXACT) != Some("false");
        self.fields()
            .map(|(key, value)| {
                let details = if key == POWER_ON_HOURS {
                    power_on_details(value, exact)
                } else {
                    String::new()
                };
                if is_nonzero_number(value) {
                    format!("{}: {}{}{}{}", key, RED, value, END_ESCAPE, details)
                } else {
                    format!("{}: {}{}", key, value, details)
                }
            })
            .collect()
    }
}

fn after_double_space(line: &str) -> Option<&str> {
    line.split_once("  ").map(|(_, value)| value.trim())
}

fn is_nonzero_number(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_digit())
        && value.chars().any(|c| c != '0')
}

/// Power-on time expressed as server days and office years. Some drives
/// report minutes in the hours field: when the count is not exact and would
/// mean between 1 and 20 years of minutes, that reading is shown too.
fn power_on_details(value: &str, exact: bool) -> String {
    let Ok(count) = value.parse::<u64>() else {
        return String::new();
    };
    let hours = count as f64;

    let mut details = format!(
        " ({:.2} server days, {:.2} office years)",
        hours / 24.0,
        hours / 8.0 / 304.0
    );
    let years_if_minutes = hours / 60.0 / 24.0 / 365.0;
    if !exact && years_if_minutes > 1.0 && years_if_minutes < 20.0 {
        let _ = write!(
            details,
            " (or, if minutes, {:.2} server days, {:.2} office years)",
            hours / 60.0 / 24.0,
            hours / 60.0 / 8.0 / 304.0
        );
    }
    details
}
