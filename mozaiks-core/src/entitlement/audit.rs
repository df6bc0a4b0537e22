//! Structured audit trail for entitlement decisions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Denials per app per minute before an anomaly record is written.
const ANOMALY_DENIALS_PER_MINUTE: u32 = 10;

/// Bounded retention of recent records.
const MAX_RECORDS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Allowed,
    Denied,
    TenantIsolation,
    AnomalyDetected,
    Dropped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub capability: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Default)]
struct DenialWindow {
    minute: i64,
    count: u32,
}

/// In-memory audit log with denial-rate anomaly detection.
///
/// Every capability check writes a record; repeated denials within a
/// minute additionally write an `anomaly_detected` record for the app.
pub struct AuditLog {
    records: Mutex<VecDeque<AuditRecord>>,
    denials: Mutex<HashMap<String, DenialWindow>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(256)),
            denials: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        capability: &str,
        result: AuditResult,
        detail: Option<String>,
    ) {
        let record = AuditRecord {
            ts: Utc::now(),
            app_id: app_id.to_string(),
            user_id: user_id.map(str::to_string),
            capability: capability.to_string(),
            result,
            detail,
        };

        match result {
            AuditResult::Denied => {
                tracing::warn!(app_id, capability, "capability denied");
                self.track_denial(app_id, user_id);
            }
            AuditResult::TenantIsolation => {
                tracing::warn!(app_id, capability, "tenant isolation violation");
            }
            _ => {}
        }

        self.push(record);
    }

    fn track_denial(&self, app_id: &str, user_id: Option<&str>) {
        let minute = Utc::now().timestamp() / 60;
        let mut denials = self.denials.lock();
        let window = denials.entry(app_id.to_string()).or_default();
        if window.minute != minute {
            window.minute = minute;
            window.count = 0;
        }
        window.count += 1;

        if window.count == ANOMALY_DENIALS_PER_MINUTE + 1 {
            tracing::warn!(app_id, denials = window.count, "denial anomaly detected");
            self.push(AuditRecord {
                ts: Utc::now(),
                app_id: app_id.to_string(),
                user_id: user_id.map(str::to_string),
                capability: "anomaly_detected".to_string(),
                result: AuditResult::AnomalyDetected,
                detail: Some(format!("{} denials within one minute", window.count)),
            });
        }
    }

    fn push(&self, record: AuditRecord) {
        let mut records = self.records.lock();
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Recent records for an app, newest last.
    pub fn records_for(&self, app_id: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.app_id == app_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
