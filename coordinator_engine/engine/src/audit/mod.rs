use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::types::{PartyId, SessionKind};

/// Type of session event being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditEventType {
    SessionCreated,
    PartyJoined,
    MessagesSubmitted,
    TransactionStaged,
    SessionFinalized,
    SessionExpired,
}

/// Record of a coordinator event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub kind: SessionKind,
    pub session_id: String,
    pub party_id: Option<PartyId>,
    pub message: String,
    pub timestamp: String, // RFC3339
}

impl AuditRecord {
    pub fn new(
        event_type: AuditEventType,
        kind: SessionKind,
        session_id: impl Into<String>,
        party_id: Option<PartyId>,
        message: impl Into<String>,
    ) -> Self {
        AuditRecord {
            event_type,
            kind,
            session_id: session_id.into(),
            party_id,
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn event_type_label(&self) -> &'static str {
        match self.event_type {
            AuditEventType::SessionCreated => "CREATED",
            AuditEventType::PartyJoined => "JOINED",
            AuditEventType::MessagesSubmitted => "SUBMITTED",
            AuditEventType::TransactionStaged => "STAGED",
            AuditEventType::SessionFinalized => "FINALIZED",
            AuditEventType::SessionExpired => "EXPIRED",
        }
    }
}

/// Bounded in-memory audit trail; the oldest record is evicted first.
pub struct AuditTracker {
    records: Mutex<VecDeque<AuditRecord>>,
    max_entries: usize,
}

impl AuditTracker {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    /// Record a new event in the audit log
    pub fn log(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            event = record.event_type_label(),
            kind = %record.kind,
            session_id = %record.session_id,
            party_id = ?record.party_id.map(|p| p.0),
            "{}",
            record.message
        );

        if self.max_entries == 0 {
            return;
        }
        // A poisoned audit buffer must not take the request down with it.
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() == self.max_entries {
            records.pop_front(); // evict oldest
        }
        records.push_back(record);
    }

    /// Most recent records, newest first.
    pub fn recent(&self, count: usize) -> Vec<AuditRecord> {
        let records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.iter().rev().take(count).cloned().collect()
    }
}

/// Helper to get current timestamp as RFC3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
