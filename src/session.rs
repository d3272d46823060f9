//! Test session bookkeeping.
//!
//! A session groups the cycles run by one operator on one production batch
//! and collects a report line for every device that was reported fully
//! tested.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{DeviceKey, DeviceRecord, DeviceState};

/// Final result of one device, as logged at the fully-tested notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub key: DeviceKey,
    pub dut_number: Option<u32>,
    pub id: String,
    pub state: DeviceState,
    pub errors: Vec<String>,
    pub tested_at: DateTime<Local>,
}

impl DeviceReport {
    pub fn from_record(record: &DeviceRecord) -> Self {
        DeviceReport {
            key: record.key,
            dut_number: record.dut_number,
            id: record.facts.id.clone().unwrap_or_default(),
            state: record.state(),
            errors: record.errors.clone(),
            tested_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub operator_name: String,
    pub batch_number: String,
    pub batch_info: String,
    pub start_time: DateTime<Local>,
    reports: Vec<DeviceReport>,
}

impl Session {
    /// Start a session. Operator name and batch number are mandatory.
    pub fn start(operator_name: &str, batch_number: &str, batch_info: &str) -> Result<Self, AppError> {
        let operator_name = simplified(operator_name);
        let batch_number = batch_number.trim().to_string();

        if operator_name.is_empty() {
            return Err(AppError::Session("operator name is required".to_string()));
        }
        if batch_number.is_empty() {
            return Err(AppError::Session("batch number is required".to_string()));
        }

        Ok(Session {
            operator_name,
            batch_number,
            batch_info: batch_info.trim().to_string(),
            start_time: Local::now(),
            reports: Vec::new(),
        })
    }

    pub fn log_device(&mut self, report: DeviceReport) {
        log::info!(
            "[Session] {} {} ({}): {}",
            self.batch_number,
            report.dut_number.map_or_else(|| report.key.to_string(), |n| format!("DUT {}", n)),
            if report.id.is_empty() { "no id" } else { &report.id },
            report.state.as_str()
        );
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[DeviceReport] {
        &self.reports
    }

    pub fn passed_count(&self) -> usize {
        self.count(DeviceState::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(DeviceState::Failed)
    }

    fn count(&self, state: DeviceState) -> usize {
        self.reports.iter().filter(|r| r.state == state).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the session as JSON to `path`, creating missing directories.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = self.to_json().map_err(|e| AppError::Io(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, json)?;
        log::info!("[Session] Report written to {}", path.display());
        Ok(())
    }
}

/// Collapse internal whitespace runs and trim.
fn simplified(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SocketIndex;

    #[test]
    fn test_session_requires_operator_and_batch() {
        assert!(Session::start("  ", "B1", "").is_err());
        assert!(Session::start("Ada", "", "").is_err());

        let session = Session::start("  Ada   Lovelace ", " B-17 ", "night shift").unwrap();
        assert_eq!(session.operator_name, "Ada Lovelace");
        assert_eq!(session.batch_number, "B-17");
    }

    #[test]
    fn test_counts_and_export() {
        let mut session = Session::start("Ada", "B-17", "").unwrap();
        let mut record = DeviceRecord::new(DeviceKey::new(0, SocketIndex(1))).with_dut_number(Some(4));
        record.facts.id = Some("ABC".to_string());
        record.set_verdict(DeviceState::Passed);
        session.log_device(DeviceReport::from_record(&record));

        let mut failed = DeviceRecord::new(DeviceKey::new(0, SocketIndex(2)));
        failed.set_verdict(DeviceState::Failed);
        session.log_device(DeviceReport::from_record(&failed));

        assert_eq!(session.passed_count(), 1);
        assert_eq!(session.failed_count(), 1);

        let json = session.to_json().unwrap();
        assert!(json.contains("\"batch_number\": \"B-17\""));
        assert!(json.contains("\"id\": \"ABC\""));
    }

    #[test]
    fn test_save_writes_report_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports").join("B-17.json");
        let session = Session::start("Ada", "B-17", "").unwrap();

        session.save(&path).unwrap();
        let saved: Session = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.batch_number, "B-17");
    }

    #[test]
    fn test_save_into_a_file_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("taken");
        fs::write(&blocker, "").unwrap();
        let session = Session::start("Ada", "B-17", "").unwrap();

        let err = session.save(&blocker.join("report.json")).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert!(err.user_message().starts_with("File operation failed"));
    }
}
