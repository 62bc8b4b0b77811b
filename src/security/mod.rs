// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Security module - reset PIN verification, lockout and audit trail

mod auth;
mod credential;

pub use auth::*;
pub use credential::ResetCredential;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 PHC string of the reset PIN; resets are refused while unset
    pub reset_pin_hash: Option<String>,

    /// Failed attempts before further resets are refused
    pub lockout_threshold: u32,

    /// How long the lockout lasts
    pub lockout_secs: u64,

    /// Enable audit logging
    pub audit_logging: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            reset_pin_hash: None,
            lockout_threshold: 5,
            lockout_secs: 900,
            audit_logging: true,
        }
    }
}

/// Audit event for security logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: NaiveDateTime,
    pub event_type: AuditEventType,
    pub description: String,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    ResetAuthorized,
    ResetRejected,
    ResetLockedOut,
    SystemStart,
    SystemStop,
}

const AUDIT_CAPACITY: usize = 10_000;

/// In-memory audit log
pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn log(&self, event: AuditEvent) {
        info!(
            event_type = ?event.event_type,
            success = event.success,
            "Audit: {}", event.description
        );

        let mut events = self.events.write();
        events.push(event);

        if events.len() > AUDIT_CAPACITY {
            let drain_count = events.len() - AUDIT_CAPACITY;
            events.drain(0..drain_count);
        }
    }

    /// Most recent first
    pub fn get_events(&self, limit: usize) -> Vec<AuditEvent> {
        self.events.read().iter().rev().take(limit).cloned().collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
