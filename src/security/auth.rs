//! Reset PIN verification and lockout

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

use super::{AuditEvent, AuditEventType, AuditLog, ResetCredential, SecurityConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid reset credential")]
    Unauthorized,

    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: i64 },

    #[error("no reset PIN is configured")]
    NotConfigured,
}

/// Hash a PIN using Argon2id
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| anyhow!("PIN hashing failed: {}", e))?;

    Ok(hash.to_string())
}

/// Verify a PIN against a PHC hash string
pub fn verify_pin(pin: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid hash format: {}", e))?;

    let argon2 = Argon2::default();

    Ok(argon2.verify_password(pin.as_bytes(), &parsed_hash).is_ok())
}

/// Gatekeeper for the administrative reset
pub struct ResetAuthorizer {
    pin_hash: Option<String>,

    /// Consecutive failures and when the last one happened
    failed_attempts: u32,
    last_failure: Option<NaiveDateTime>,

    lockout_threshold: u32,
    lockout_duration: Duration,

    audit: Option<Arc<AuditLog>>,
}

impl ResetAuthorizer {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            pin_hash: config.reset_pin_hash.clone(),
            failed_attempts: 0,
            last_failure: None,
            lockout_threshold: config.lockout_threshold.max(1),
            lockout_duration: Duration::seconds(config.lockout_secs as i64),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.pin_hash.is_some()
    }

    /// Seconds left on an active lockout
    pub fn locked_out_for(&self, now: NaiveDateTime) -> Option<i64> {
        if self.failed_attempts < self.lockout_threshold {
            return None;
        }
        let until = self.last_failure? + self.lockout_duration;
        (now < until).then(|| (until - now).num_seconds().max(1))
    }

    /// Check a credential. Never logs the attempted secret.
    pub fn authorize(&mut self, credential: &ResetCredential, now: NaiveDateTime) -> Result<(), AuthError> {
        let Some(hash) = self.pin_hash.as_deref() else {
            self.audit(AuditEventType::ResetRejected, "reset refused: no PIN configured", false, now);
            return Err(AuthError::NotConfigured);
        };

        if let Some(retry_after_secs) = self.locked_out_for(now) {
            self.audit(AuditEventType::ResetLockedOut, "reset refused: locked out", false, now);
            return Err(AuthError::LockedOut { retry_after_secs });
        }
        if self.failed_attempts >= self.lockout_threshold {
            // lockout expired
            self.failed_attempts = 0;
        }

        let valid = match verify_pin(credential.as_str(), hash) {
            Ok(valid) => valid,
            Err(e) => {
                error!("Stored reset PIN hash is unusable: {}", e);
                return Err(AuthError::NotConfigured);
            }
        };

        if valid {
            self.failed_attempts = 0;
            self.last_failure = None;
            self.audit(AuditEventType::ResetAuthorized, "reset authorized", true, now);
            Ok(())
        } else {
            self.failed_attempts += 1;
            self.last_failure = Some(now);
            warn!(failed_attempts = self.failed_attempts, "Rejected reset credential");
            self.audit(AuditEventType::ResetRejected, "reset refused: bad credential", false, now);
            Err(AuthError::Unauthorized)
        }
    }

    fn audit(&self, event_type: AuditEventType, description: &str, success: bool, now: NaiveDateTime) {
        if let Some(ref audit) = self.audit {
            audit.log(AuditEvent {
                timestamp: now,
                event_type,
                description: description.to_string(),
                success,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn authorizer(pin: &str) -> ResetAuthorizer {
        let config = SecurityConfig {
            reset_pin_hash: Some(hash_pin(pin).unwrap()),
            ..Default::default()
        };
        ResetAuthorizer::new(&config)
    }

    #[test]
    fn test_pin_hash_verify() {
        let hash = hash_pin("1234").unwrap();
        assert!(verify_pin("1234", &hash).unwrap());
        assert!(!verify_pin("4321", &hash).unwrap());
        assert!(verify_pin("1234", "not-a-hash").is_err());
    }

    #[test]
    fn test_authorize() {
        let mut auth = authorizer("1234");
        assert_eq!(auth.authorize(&ResetCredential::new("0000"), now()), Err(AuthError::Unauthorized));
        assert_eq!(auth.authorize(&ResetCredential::new("1234"), now()), Ok(()));
    }

    #[test]
    fn test_not_configured_refuses_everything() {
        let mut auth = ResetAuthorizer::new(&SecurityConfig::default());
        assert!(!auth.is_configured());
        assert_eq!(auth.authorize(&ResetCredential::new(""), now()), Err(AuthError::NotConfigured));
    }

    #[test]
    fn test_lockout_after_threshold() {
        let audit = Arc::new(AuditLog::new());
        let mut auth = authorizer("1234").with_audit(audit.clone());
        for _ in 0..5 {
            assert_eq!(auth.authorize(&ResetCredential::new("9999"), now()), Err(AuthError::Unauthorized));
        }

        // Even the right PIN is refused while locked
        let later = now() + Duration::seconds(60);
        assert_eq!(
            auth.authorize(&ResetCredential::new("1234"), later),
            Err(AuthError::LockedOut { retry_after_secs: 840 })
        );

        let expired = now() + Duration::seconds(901);
        assert_eq!(auth.authorize(&ResetCredential::new("1234"), expired), Ok(()));

        let events = audit.get_events(10);
        assert_eq!(events.len(), 7);
        assert!(events[0].success);
    }
}
